//! Sensirion SHT31 temperature and humidity sensor.

use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::blocking::i2c::{Read, Write, WriteRead};

/// Default I2C address (ADDR pin low).
pub const DEFAULT_ADDRESS: u8 = 0x44;

/// Single shot, high repeatability, no clock stretching.
const CMD_MEASURE_HIGH: [u8; 2] = [0x24, 0x00];
/// Read the status register.
const CMD_READ_STATUS: [u8; 2] = [0xF3, 0x2D];
/// Worst-case high repeatability conversion time.
const MEASURE_TIME_MS: u32 = 15;

/// One temperature/humidity reading.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct SensorSample {
    pub temperature_c: f32,
    pub humidity_percent: f32,
}

/// Things that go wrong talking to the sensor.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Sht31Error<E> {
    /// The bus transaction failed.
    I2c(E),
    /// A word arrived with a bad checksum.
    Crc,
}

/// The sensor is stateless on our side; the bus is lent in for each call.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Sht31 {
    address: u8,
}

impl Sht31 {
    pub fn new(address: u8) -> Self {
        Sht31 { address }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    /// Check that something answering like an SHT31 is on the bus.
    pub fn probe<I2C, E>(&self, i2c: &mut I2C) -> Result<u16, Sht31Error<E>>
    where
        I2C: WriteRead<Error = E>,
    {
        let mut buf = [0u8; 3];
        i2c.write_read(self.address, &CMD_READ_STATUS, &mut buf)
            .map_err(Sht31Error::I2c)?;
        word(&buf)
    }

    /// Trigger a single measurement, wait for it, and read it back.
    pub fn measure<I2C, E, D>(&self, i2c: &mut I2C, delay: &mut D) -> Result<SensorSample, Sht31Error<E>>
    where
        I2C: Write<Error = E> + Read<Error = E>,
        D: DelayMs<u32>,
    {
        i2c.write(self.address, &CMD_MEASURE_HIGH)
            .map_err(Sht31Error::I2c)?;
        delay.delay_ms(MEASURE_TIME_MS);

        let mut buf = [0u8; 6];
        i2c.read(self.address, &mut buf).map_err(Sht31Error::I2c)?;
        let t_raw = word(&buf[0..3])?;
        let rh_raw = word(&buf[3..6])?;

        Ok(SensorSample {
            temperature_c: -45.0 + 175.0 * f32::from(t_raw) / 65535.0,
            humidity_percent: 100.0 * f32::from(rh_raw) / 65535.0,
        })
    }
}

/// Check and unpack a big-endian word followed by its CRC.
fn word<E>(bytes: &[u8]) -> Result<u16, Sht31Error<E>> {
    if crc8(&bytes[0..2]) != bytes[2] {
        return Err(Sht31Error::Crc);
    }
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

/// CRC-8, polynomial 0x31, init 0xFF, as used on every Sensirion word.
pub fn crc8(data: &[u8]) -> u8 {
    let mut crc = 0xFFu8;
    for &byte in data {
        crc ^= byte;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ 0x31
            } else {
                crc << 1
            };
        }
    }
    crc
}
