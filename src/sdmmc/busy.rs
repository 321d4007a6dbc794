use embedded_hal::{blocking::spi::Transfer, digital::v2::OutputPin};

use super::proto::*;
use super::Error;

/// How many bytes we clock while waiting for a command response (NCR).
const COMMAND_RESPONSE_POLLS: u32 = 100;

/// How many bytes we clock while the card holds the data line low. At 1 MHz
/// this is roughly half a second.
const WAIT_NOT_BUSY_POLLS: u32 = 65_536;

/// How many bytes we clock waiting for a start-of-data token. At 1 MHz this
/// is roughly one second.
const DATA_TOKEN_POLLS: u32 = 131_072;

/// A struct used to ensure that communication only occurs
/// when CS is low.
///
/// This struct is responsible for command framing, data tokens and the
/// bounded polling on every wait. It never retries anything.
pub struct SdMmcSpiBusy<'spi, 'cs, SPI, CS>
where
    SPI: Transfer<u8>,
    CS: OutputPin,
{
    spi: &'spi mut SPI,
    cs: &'cs mut CS,
    data_crc: bool,
}

impl<'spi, 'cs, SPI, CS> Drop for SdMmcSpiBusy<'spi, 'cs, SPI, CS>
where
    SPI: Transfer<u8>,
    CS: OutputPin,
{
    fn drop(&mut self) {
        self.cs_high().ok();
    }
}

impl<'spi, 'cs, SPI, CS> SdMmcSpiBusy<'spi, 'cs, SPI, CS>
where
    SPI: Transfer<u8>,
    CS: OutputPin,
{
    pub fn new(spi: &'spi mut SPI, cs: &'cs mut CS, data_crc: bool) -> Result<Self, Error> {
        let mut me = Self { spi, cs, data_crc };
        me.cs_low()?;
        Ok(me)
    }

    fn cs_high(&mut self) -> Result<(), Error> {
        self.cs.set_high().map_err(|_| Error::GpioError)
    }

    fn cs_low(&mut self) -> Result<(), Error> {
        self.cs.set_low().map_err(|_| Error::GpioError)
    }

    /// Send one byte and receive one byte.
    fn transfer(&mut self, out: u8) -> Result<u8, Error> {
        self.spi
            .transfer(&mut [out])
            .map(|b| b[0])
            .map_err(|_e| Error::Transport)
    }

    /// Receive a byte from the SD card by clocking in an 0xFF byte.
    pub fn receive(&mut self) -> Result<u8, Error> {
        self.transfer(0xFF)
    }

    /// Send a byte from the SD card.
    pub fn send(&mut self, out: u8) -> Result<(), Error> {
        let _ = self.transfer(out)?;
        Ok(())
    }

    /// Spin until the card returns 0xFF, or we spin too many times and
    /// timeout.
    pub fn wait_not_busy(&mut self) -> Result<(), Error> {
        for _ in 0..WAIT_NOT_BUSY_POLLS {
            if self.receive()? == 0xFF {
                return Ok(());
            }
        }
        Err(Error::TimeoutWaitNotBusy)
    }

    /// Perform a command.
    ///
    /// The card is deselected and reselected around a spare clock byte
    /// first, then we wait for the line to go idle before the frame goes
    /// out.
    pub fn card_command(&mut self, command: u8, arg: u32) -> Result<u8, Error> {
        self.cs_high()?;
        self.receive()?;
        self.cs_low()?;
        self.wait_not_busy()?;

        let mut buf = [
            0x40 | command,
            (arg >> 24) as u8,
            (arg >> 16) as u8,
            (arg >> 8) as u8,
            arg as u8,
            0,
        ];
        buf[5] = crc7(&buf[0..5]);

        for b in buf.iter() {
            self.send(*b)?;
        }

        // skip stuff byte for stop read
        if command == CMD12 {
            let _result = self.receive()?;
        }

        for _ in 0..COMMAND_RESPONSE_POLLS {
            let result = self.receive()?;
            if (result & R1_VALID_MASK) == 0 {
                return Ok(result);
            }
        }

        Err(Error::TimeoutCommand(command))
    }

    /// Perform an application-specific command. The CMD55 status is not
    /// inspected; the card reports problems in the response to the command
    /// itself.
    pub fn card_acmd(&mut self, command: u8, arg: u32) -> Result<u8, Error> {
        self.card_command(CMD55, 0)?;
        self.card_command(command, arg)
    }

    /// Read an arbitrary number of bytes from the card. Always fills the
    /// given buffer, so make sure it's the right size.
    ///
    /// The two CRC bytes after the payload are only checked when data CRC
    /// was requested at bring-up.
    pub fn read_data(&mut self, buffer: &mut [u8]) -> Result<(), Error> {
        let mut token = 0xFF;
        for _ in 0..DATA_TOKEN_POLLS {
            token = self.receive()?;
            if token != 0xFF {
                break;
            }
        }
        if token == 0xFF {
            return Err(Error::TimeoutReadBuffer);
        }
        if token != DATA_START_BLOCK {
            return Err(Error::BadDataToken(token));
        }

        for b in buffer.iter_mut() {
            *b = self.receive()?;
        }

        let mut crc = u16::from(self.receive()?);
        crc <<= 8;
        crc |= u16::from(self.receive()?);

        if self.data_crc {
            let calc_crc = crc16(buffer);
            if crc != calc_crc {
                return Err(Error::CrcError(crc, calc_crc));
            }
        }

        Ok(())
    }

    /// Write an arbitrary number of bytes to the card, check the data
    /// response and wait for the card to finish programming.
    pub fn write_data(&mut self, token: u8, buffer: &[u8]) -> Result<(), Error> {
        let crc = if self.data_crc { crc16(buffer) } else { 0xFFFF };
        self.send(token)?;
        for &b in buffer.iter() {
            self.send(b)?;
        }
        self.send((crc >> 8) as u8)?;
        self.send(crc as u8)?;
        let status = self.receive()?;
        if (status & DATA_RES_MASK) != DATA_RES_ACCEPTED {
            return Err(Error::WriteRejected(status));
        }
        self.wait_not_busy()
    }
}
