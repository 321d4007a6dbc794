//! datalogger - SDMMC Protocol
//!
//! Implements enough of the SD/MMC protocol on a generic SPI interface to
//! back a filesystem: bring-up, capacity-class detection, block reads and
//! writes, and the capacity query.
//!
//! This is currently optimised for readability and debugability, not
//! performance.

mod busy;
pub mod proto;


use busy::SdMmcSpiBusy;
use proto::*;

use crate::block_device::{Block, BlockCount, BlockDevice, BlockIdx};
use crate::fault::FaultKind;

use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::blocking::spi::Transfer;
use embedded_hal::digital::v2::OutputPin;
#[cfg(feature = "log")]
use log::{debug, trace, warn};

#[cfg(feature = "defmt-log")]
use defmt::{debug, trace, warn};

/// The SPI peripheral must be able to change its clock, because cards have
/// to be brought up slowly before they can be run fast.
///
/// `embedded-hal` has no trait for this, so the board glue implements it.
pub trait SpiClock {
    /// Reconfigure the bus to clock at `hz`.
    fn set_frequency(&mut self, hz: u32);
}

impl<T> SpiClock for &mut T
where
    T: SpiClock,
{
    fn set_frequency(&mut self, hz: u32) {
        (*self).set_frequency(hz)
    }
}

/// Represents an SD Card interface.
/// Built from an SPI peripheral and a Chip
/// Select pin. We need Chip Select to be separate so we can clock out some
/// bytes without Chip Select asserted (which puts the card into SPI mode).
pub struct SdMmcSpi<SPI, CS, DELAY, State>
where
    SPI: Transfer<u8> + SpiClock,
    CS: OutputPin,
    DELAY: DelayMs<u32>,
{
    info: CardInfo,
    options: AcquireOpts,
    spi: SPI,
    cs: CS,
    delay: DELAY,
    state: State,
}

/// The possible errors `SdMmcSpi` can generate.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Error {
    /// We got an error from the SPI peripheral
    Transport,
    /// Couldn't set a GPIO pin
    GpioError,
    /// Couldn't find the card: no answer to CMD0, or an answer that was
    /// neither idle nor ready
    CardNotFound,
    /// We didn't get a response when executing this command
    TimeoutCommand(u8),
    /// The card did not leave the idle state within the bring-up bound
    TimeoutACommand(u8),
    /// We didn't get a response when waiting for the card to not be busy
    TimeoutWaitNotBusy,
    /// We didn't get a start token when reading data from the card
    TimeoutReadBuffer,
    /// CMD16 was refused, so a byte-addressed card can't be used
    SetBlockLenError(u8),
    /// The card sent something other than a start token before the data
    BadDataToken(u8),
    /// We failed to read the Card Specific Data register
    RegisterReadError,
    /// We got a CRC mismatch (card gave us, we calculated)
    CrcError(u16, u16),
    /// The card refused a read command
    ReadError,
    /// The card refused a write command
    WriteError,
    /// The card refused a data block; carries the data response token
    WriteRejected(u8),
}

impl Error {
    /// Where this error sits in the logger's fault taxonomy.
    pub fn fault_kind(&self) -> FaultKind {
        match self {
            Error::TimeoutCommand(_)
            | Error::TimeoutACommand(_)
            | Error::TimeoutWaitNotBusy
            | Error::TimeoutReadBuffer => FaultKind::ProtocolTimeout,
            Error::Transport
            | Error::GpioError
            | Error::CardNotFound
            | Error::SetBlockLenError(_) => FaultKind::InitFailure,
            Error::BadDataToken(_)
            | Error::RegisterReadError
            | Error::CrcError(_, _)
            | Error::ReadError => FaultKind::ReadFailure,
            Error::WriteError | Error::WriteRejected(_) => FaultKind::WriteFailure,
        }
    }
}

/// The state of an SdMmcSpi if it is not initialized
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub struct NotInit;

/// The state of an SdMmcSpi if it is initialized
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub struct Initialized;

/// The different types of card we support.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CardType {
    /// Rejected CMD8; a version 1.x standard capacity card
    SD1,
    /// Version 2.0 standard capacity card
    SD2,
    /// High capacity card
    SDHC,
}

/// How the card interprets the address in a read or write command.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Addressing {
    /// Standard capacity cards take a byte offset.
    Byte,
    /// High capacity cards take a block number.
    Block,
}

impl Addressing {
    /// What to multiply a block index by to get the command argument.
    pub fn multiplier(self) -> u32 {
        match self {
            Addressing::Byte => Block::LEN_U32,
            Addressing::Block => 1,
        }
    }
}

/// What bring-up found out about the card. Fixed until the next bring-up.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CardInfo {
    pub card_type: CardType,
    pub addressing: Addressing,
    /// The bus frequency in use, in Hz.
    pub speed_hz: u32,
}

/// Options for bringing the card up.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone)]
pub struct AcquireOpts {
    /// Bus frequency while negotiating. Cards must accept 100-400 kHz.
    pub init_hz: u32,
    /// Bus frequency once the card is ready.
    pub operating_hz: u32,
    /// How many times we ask the card to initialise before giving up.
    pub init_attempts: u32,
    /// Milliseconds to sleep between initialisation attempts.
    pub init_retry_delay_ms: u32,
    /// Generate CRC on written blocks and check it on read blocks. Off by
    /// default: the two CRC bytes are read and thrown away, and dummy CRC is
    /// sent, which is what cards in SPI mode accept out of reset.
    pub verify_data_crc: bool,
}

impl Default for AcquireOpts {
    fn default() -> Self {
        AcquireOpts {
            init_hz: 100_000,
            operating_hz: 1_000_000,
            init_attempts: 1000,
            init_retry_delay_ms: 1,
            verify_data_crc: false,
        }
    }
}

impl<SPI, CS, DELAY, State> SdMmcSpi<SPI, CS, DELAY, State>
where
    SPI: Transfer<u8> + SpiClock,
    CS: OutputPin,
    DELAY: DelayMs<u32>,
{
    fn discard_byte(&mut self) -> Result<u8, Error> {
        self.spi
            .transfer(&mut [0xFF])
            .map(|b| b[0])
            .map_err(|_e| Error::Transport)
    }

    /// Take the driver apart again.
    pub fn free(self) -> (SPI, CS, DELAY) {
        (self.spi, self.cs, self.delay)
    }
}

impl<SPI, CS, DELAY> SdMmcSpi<SPI, CS, DELAY, NotInit>
where
    SPI: Transfer<u8> + SpiClock,
    CS: OutputPin,
    DELAY: DelayMs<u32>,
{
    /// Create a new SD/MMC controller using a raw SPI interface.
    pub fn new(spi: SPI, cs: CS, delay: DELAY) -> Self {
        SdMmcSpi {
            info: CardInfo {
                card_type: CardType::SD1,
                addressing: Addressing::Byte,
                speed_hz: 0,
            },
            options: AcquireOpts::default(),
            spi,
            cs,
            delay,
            state: NotInit {},
        }
    }

    /// Initializes the card into a known state
    pub fn bring_up(self) -> Result<SdMmcSpi<SPI, CS, DELAY, Initialized>, (Error, Self)> {
        self.bring_up_with_opts(Default::default())
    }

    /// Initializes the card into a known state
    pub fn bring_up_with_opts(
        mut self,
        options: AcquireOpts,
    ) -> Result<SdMmcSpi<SPI, CS, DELAY, Initialized>, (Error, Self)> {
        debug!("bringing up card with opts: {:?}", options);
        self.options = options;
        let f = |s: &mut Self| {
            trace!("Reset card..");
            s.spi.set_frequency(options.init_hz);
            s.info.speed_hz = options.init_hz;

            // Supply minimum of 74 clock cycles without CS asserted.
            s.cs.set_high().map_err(|_| Error::GpioError)?;
            for _ in 0..10 {
                s.discard_byte()?;
            }

            let mut busy =
                SdMmcSpiBusy::new(&mut s.spi, &mut s.cs, options.verify_data_crc)?;

            // Enter SPI mode
            match busy.card_command(CMD0, 0) {
                Ok(r) if r == R1::IDLE.bits() || r == 0 => {}
                Ok(r) => {
                    warn!("CMD0 got response: {:x}", r);
                    return Err(Error::CardNotFound);
                }
                Err(Error::TimeoutCommand(_)) => {
                    warn!("CMD0 got no response");
                    return Err(Error::CardNotFound);
                }
                Err(e) => return Err(e),
            }

            // Check card version. Version 2 cards echo the argument back;
            // we don't look at the echo.
            let r1 = R1::from_bits_truncate(busy.card_command(CMD8, IF_COND_CHECK_PATTERN)?);
            s.info.card_type = if r1.contains(R1::ILLEGAL_COMMAND) {
                CardType::SD1
            } else {
                for _ in 0..4 {
                    busy.receive()?;
                }
                CardType::SD2
            };
            debug!("Card version: {:?}", s.info.card_type);

            let mut attempts = 0;
            loop {
                let r = busy.card_acmd(ACMD41, ACMD41_HCS)?;
                if R1::from_bits_truncate(r).is_ready() {
                    break;
                }
                attempts += 1;
                if attempts >= options.init_attempts {
                    return Err(Error::TimeoutACommand(ACMD41));
                }
                s.delay.delay_ms(options.init_retry_delay_ms);
            }
            trace!("Card ready after {} retries", attempts);

            s.info.addressing = Addressing::Byte;
            if busy.card_command(CMD58, 0)? == 0 {
                let mut ocr = [0u8; 4];
                for b in ocr.iter_mut() {
                    *b = busy.receive()?;
                }
                if (ocr[0] & OCR_CCS) != 0 {
                    s.info.addressing = Addressing::Block;
                    s.info.card_type = CardType::SDHC;
                }
            }

            if s.info.addressing == Addressing::Byte {
                let r = busy.card_command(CMD16, Block::LEN_U32)?;
                if r != 0 {
                    return Err(Error::SetBlockLenError(r));
                }
            }
            Ok(())
        };
        let result = f(&mut self);
        let _ = self.discard_byte();

        match result {
            Ok(_) => {
                self.spi.set_frequency(options.operating_hz);
                self.info.speed_hz = options.operating_hz;
                debug!("Card up: {:?}", self.info);
                Ok(SdMmcSpi {
                    info: self.info,
                    options: self.options,
                    spi: self.spi,
                    cs: self.cs,
                    delay: self.delay,
                    state: Initialized {},
                })
            }
            Err(e) => Err((e, self)),
        }
    }
}

impl<SPI, CS, DELAY> SdMmcSpi<SPI, CS, DELAY, Initialized>
where
    SPI: Transfer<u8> + SpiClock,
    CS: OutputPin,
    DELAY: DelayMs<u32>,
{
    /// Mark the card as unused.
    /// This should be kept infallible, because Drop is unable to fail.
    /// See https://github.com/rust-lang/rfcs/issues/814
    // If there is any need to flush data, it should be implemented here.
    pub fn deinit(self) -> SdMmcSpi<SPI, CS, DELAY, NotInit> {
        SdMmcSpi {
            info: self.info,
            options: self.options,
            spi: self.spi,
            cs: self.cs,
            delay: self.delay,
            state: NotInit {},
        }
    }

    /// What bring-up negotiated.
    pub fn card_info(&self) -> CardInfo {
        self.info
    }

    /// Run a command with chip select asserted.
    ///
    /// Chip select is always deasserted, even if an error occured in `f`
    fn with_chip_select<F, R>(&mut self, f: F) -> Result<R, Error>
    where
        F: FnOnce(&mut SdMmcSpiBusy<SPI, CS>) -> Result<R, Error>,
    {
        let mut busy =
            SdMmcSpiBusy::new(&mut self.spi, &mut self.cs, self.options.verify_data_crc)?;
        f(&mut busy)
    }

    /// Read the 'card specific data' block.
    pub fn read_csd(&mut self) -> Result<Csd, Error> {
        self.with_chip_select(|spi| {
            if spi.card_command(CMD9, 0)? != 0 {
                return Err(Error::RegisterReadError);
            }
            let mut data = [0u8; 16];
            spi.read_data(&mut data)?;
            Ok(Csd::from_bytes(data))
        })
    }

    /// Return the usable size of this SD card in bytes.
    pub fn card_size_bytes(&mut self) -> Result<u64, Error> {
        Ok(self.read_csd()?.card_capacity_bytes())
    }

    /// Can this card erase single blocks?
    pub fn erase_single_block_enabled(&mut self) -> Result<bool, Error> {
        Ok(self.read_csd()?.erase_single_block_enabled())
    }

    fn card_address(&self, block_idx: BlockIdx) -> u32 {
        block_idx.to_card_address(self.info.addressing.multiplier())
    }
}

impl<SPI, CS, DELAY> BlockDevice for SdMmcSpi<SPI, CS, DELAY, Initialized>
where
    SPI: Transfer<u8> + SpiClock,
    CS: OutputPin,
    DELAY: DelayMs<u32>,
{
    type Error = Error;

    /// Read one or more blocks, starting at the given block index.
    fn read_blocks(
        &mut self,
        start_block_idx: BlockIdx,
        blocks: &mut [Block],
    ) -> Result<(), Self::Error> {
        let start_idx = self.card_address(start_block_idx);
        trace!("read {} blocks @ {}", blocks.len(), start_idx);
        self.with_chip_select(|s| {
            match blocks.len() {
                0 => {}
                1 => {
                    // Start a single-block read
                    if s.card_command(CMD17, start_idx)? != 0 {
                        return Err(Error::ReadError);
                    }
                    s.read_data(&mut blocks[0].contents)?;
                }
                _ => {
                    // Start a multi-block read
                    if s.card_command(CMD18, start_idx)? != 0 {
                        return Err(Error::ReadError);
                    }
                    let result = blocks
                        .iter_mut()
                        .try_for_each(|block| s.read_data(&mut block.contents));
                    // Stop the read, even when a block failed part way
                    let stop = s.card_command(CMD12, 0).map(|_| ());
                    result.and(stop)?;
                }
            }
            Ok(())
        })
    }

    /// Write one or more blocks, starting at the given block index.
    fn write_blocks(&mut self, start_block_idx: BlockIdx, blocks: &[Block]) -> Result<(), Self::Error> {
        let start_idx = self.card_address(start_block_idx);
        trace!("write {} blocks @ {}", blocks.len(), start_idx);
        self.with_chip_select(|s| {
            match blocks.len() {
                0 => {}
                1 => {
                    // Start a single-block write
                    if s.card_command(CMD24, start_idx)? != 0 {
                        return Err(Error::WriteError);
                    }
                    s.write_data(DATA_START_BLOCK, &blocks[0].contents)?;
                }
                _ => {
                    // Start a multi-block write
                    if s.card_command(CMD25, start_idx)? != 0 {
                        return Err(Error::WriteError);
                    }
                    let result = blocks
                        .iter()
                        .try_for_each(|block| s.write_data(WRITE_MULTIPLE_TOKEN, &block.contents));
                    // Stop the write, skip the stuff byte, then the card
                    // goes busy while it finishes programming. The stop goes
                    // out even when a block failed; the first error wins.
                    let stop = s
                        .send(STOP_TRAN_TOKEN)
                        .and_then(|_| s.receive())
                        .and_then(|_| s.wait_not_busy());
                    result.and(stop)?;
                }
            }
            Ok(())
        })
    }

    /// Determine how many blocks this device can hold. Zero if the CSD
    /// can't be read.
    fn block_count(&mut self) -> BlockCount {
        match self.read_csd() {
            Ok(csd) => BlockCount(csd.card_capacity_blocks()),
            Err(e) => {
                warn!("Can't read CSD: {:?}", e);
                BlockCount(0)
            }
        }
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
