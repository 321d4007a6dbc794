//! Maxim DS3231 battery-backed real time clock.

use core::fmt::Write as _;

use embedded_hal::blocking::i2c::{Write, WriteRead};

use crate::time::Timestamp;

/// Fixed I2C address of the DS3231.
pub const DEFAULT_ADDRESS: u8 = 0x68;

/// First timekeeping register (seconds).
const REG_SECONDS: u8 = 0x00;

/// A calendar time, always UTC.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DateTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    /// 1..=7, meaning is up to whoever set the clock.
    pub weekday: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl DateTime {
    /// Format as `YYYY-MM-DDTHH:MM:SSZ`.
    pub fn to_timestamp(&self) -> Timestamp {
        let mut ts = Timestamp::new();
        let _ = write!(
            ts,
            "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        );
        ts
    }

    fn is_valid(&self) -> bool {
        (2000..=2099).contains(&self.year)
            && (1..=12).contains(&self.month)
            && (1..=31).contains(&self.day)
            && self.weekday <= 7
            && self.hour < 24
            && self.minute < 60
            && self.second < 60
    }
}

/// Things that go wrong talking to the clock.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Ds3231Error<E> {
    /// The bus transaction failed.
    I2c(E),
    /// The registers held (or we were asked to write) an impossible time.
    InvalidTime,
}

/// The clock itself keeps all state; the bus is lent in for each call.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Ds3231 {
    address: u8,
}

impl Ds3231 {
    pub fn new(address: u8) -> Self {
        Ds3231 { address }
    }

    /// Read the current time.
    pub fn datetime<I2C, E>(&self, i2c: &mut I2C) -> Result<DateTime, Ds3231Error<E>>
    where
        I2C: WriteRead<Error = E>,
    {
        let mut regs = [0u8; 7];
        i2c.write_read(self.address, &[REG_SECONDS], &mut regs)
            .map_err(Ds3231Error::I2c)?;

        let dt = DateTime {
            second: bcd_to_dec(regs[0] & 0x7F),
            minute: bcd_to_dec(regs[1] & 0x7F),
            hour: bcd_to_dec(regs[2] & 0x3F),
            weekday: bcd_to_dec(regs[3] & 0x07),
            day: bcd_to_dec(regs[4] & 0x3F),
            month: bcd_to_dec(regs[5] & 0x1F),
            year: 2000 + u16::from(bcd_to_dec(regs[6])),
        };
        if !dt.is_valid() {
            return Err(Ds3231Error::InvalidTime);
        }
        Ok(dt)
    }

    /// Set the clock. A zero weekday is stored as 1.
    pub fn set_datetime<I2C, E>(&self, i2c: &mut I2C, dt: &DateTime) -> Result<(), Ds3231Error<E>>
    where
        I2C: Write<Error = E>,
    {
        let dt = DateTime {
            weekday: if dt.weekday == 0 { 1 } else { dt.weekday },
            ..*dt
        };
        if !dt.is_valid() {
            return Err(Ds3231Error::InvalidTime);
        }
        let buf = [
            REG_SECONDS,
            dec_to_bcd(dt.second),
            dec_to_bcd(dt.minute),
            dec_to_bcd(dt.hour),
            dec_to_bcd(dt.weekday),
            dec_to_bcd(dt.day),
            dec_to_bcd(dt.month),
            dec_to_bcd((dt.year - 2000) as u8),
        ];
        i2c.write(self.address, &buf).map_err(Ds3231Error::I2c)
    }
}

fn bcd_to_dec(b: u8) -> u8 {
    (b >> 4) * 10 + (b & 0x0F)
}

fn dec_to_bcd(d: u8) -> u8 {
    ((d / 10) << 4) | (d % 10)
}
