//! datalogger - SD/MMC protocol constants
//!
//! Command indices, tokens, the R1 status byte, CRC helpers and the Card
//! Specific Data register, as seen by a host talking to a card in SPI mode.

/// GO_IDLE_STATE - init card in spi mode if CS low
pub const CMD0: u8 = 0x00;
/// SEND_IF_COND - verify SD Memory Card interface operating condition.
pub const CMD8: u8 = 0x08;
/// SEND_CSD - read the Card Specific Data (CSD register)
pub const CMD9: u8 = 0x09;
/// STOP_TRANSMISSION - end multiple block read sequence
pub const CMD12: u8 = 0x0C;
/// SET_BLOCKLEN - set the block length for byte-addressed cards
pub const CMD16: u8 = 0x10;
/// READ_SINGLE_BLOCK - read a single data block from the card
pub const CMD17: u8 = 0x11;
/// READ_MULTIPLE_BLOCK - read a multiple data blocks from the card
pub const CMD18: u8 = 0x12;
/// WRITE_BLOCK - write a single data block to the card
pub const CMD24: u8 = 0x18;
/// WRITE_MULTIPLE_BLOCK - write blocks of data until a STOP_TRANSMISSION
pub const CMD25: u8 = 0x19;
/// APP_CMD - escape for application specific command
pub const CMD55: u8 = 0x37;
/// READ_OCR - read the OCR register of a card
pub const CMD58: u8 = 0x3A;
/// SD_SEND_OP_COMD - Sends host capacity support information and activates
/// the card's initialization process
pub const ACMD41: u8 = 0x29;

/// CMD8 argument: 2.7-3.6V supply plus the 0xAA check pattern.
pub const IF_COND_CHECK_PATTERN: u32 = 0x1AA;
/// ACMD41 argument with the Host Capacity Support bit set.
pub const ACMD41_HCS: u32 = 0x4000_0000;
/// Byte 0 of the OCR: Card Capacity Status (bit 30 of the register).
pub const OCR_CCS: u8 = 0x40;

/// start data token for read or write single block*/
pub const DATA_START_BLOCK: u8 = 0xFE;
/// stop token for write multiple blocks*/
pub const STOP_TRAN_TOKEN: u8 = 0xFD;
/// start data token for write multiple blocks*/
pub const WRITE_MULTIPLE_TOKEN: u8 = 0xFC;
/// mask for data response tokens after a write block operation */
pub const DATA_RES_MASK: u8 = 0x1F;
/// write data accepted token */
pub const DATA_RES_ACCEPTED: u8 = 0x05;

/// A response byte with the top bit clear is a valid R1.
pub const R1_VALID_MASK: u8 = 0x80;

bitflags::bitflags! {
    /// The single status byte a card returns after every command.
    pub struct R1: u8 {
        const IDLE = 0x01;
        const ERASE_RESET = 0x02;
        const ILLEGAL_COMMAND = 0x04;
        const COM_CRC_ERROR = 0x08;
        const ERASE_SEQUENCE_ERROR = 0x10;
        const ADDRESS_ERROR = 0x20;
        const PARAMETER_ERROR = 0x40;
    }
}

impl R1 {
    /// Card has left the idle state and has no error bits set.
    pub fn is_ready(self) -> bool {
        self.is_empty()
    }
}

/// Perform the 7-bit CRC used on the SD card command frame. The result is
/// already shifted left and carries the end bit.
pub fn crc7(data: &[u8]) -> u8 {
    let mut crc = 0u8;
    for mut d in data.iter().cloned() {
        for _bit in 0..8 {
            crc <<= 1;
            if ((d & 0x80) ^ (crc & 0x80)) != 0 {
                crc ^= 0x09;
            }
            d <<= 1;
        }
    }
    (crc << 1) | 1
}

/// Perform the X25 CRC calculation, as used for data blocks.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc = 0u16;
    for &byte in data {
        crc = ((crc >> 8) & 0xFF) | (crc << 8);
        crc ^= u16::from(byte);
        crc ^= (crc & 0xFF) >> 4;
        crc ^= crc << 12;
        crc ^= (crc & 0xFF) << 5;
    }
    crc
}

/// Card Specific Data, version 1 (standard capacity cards).
#[derive(Default, Clone)]
pub struct CsdV1 {
    /// The 16-bytes of data in this Card Specific Data block
    pub data: [u8; 16],
}

/// Card Specific Data, version 2 (SDHC/SDXC).
#[derive(Default, Clone)]
pub struct CsdV2 {
    /// The 16-bytes of data in this Card Specific Data block
    pub data: [u8; 16],
}

/// Card Specific Data
#[derive(Clone)]
pub enum Csd {
    V1(CsdV1),
    V2(CsdV2),
}

impl Csd {
    /// Pick the layout from the CSD_STRUCTURE bits in the leading byte.
    pub fn from_bytes(data: [u8; 16]) -> Csd {
        if data[0] >> 6 == 1 {
            Csd::V2(CsdV2 { data })
        } else {
            Csd::V1(CsdV1 { data })
        }
    }

    pub fn card_capacity_bytes(&self) -> u64 {
        match self {
            Csd::V1(contents) => contents.card_capacity_bytes(),
            Csd::V2(contents) => contents.card_capacity_bytes(),
        }
    }

    pub fn card_capacity_blocks(&self) -> u32 {
        match self {
            Csd::V1(contents) => contents.card_capacity_blocks(),
            Csd::V2(contents) => contents.card_capacity_blocks(),
        }
    }

    pub fn erase_single_block_enabled(&self) -> bool {
        match self {
            Csd::V1(contents) => contents.erase_single_block_enabled(),
            Csd::V2(contents) => contents.erase_single_block_enabled(),
        }
    }
}

impl CsdV1 {
    fn data(&self) -> &[u8; 16] {
        &self.data
    }

    define_field!(csd_ver, u8, 0, 6, 2);
    define_field!(read_block_length, u8, 5, 0, 4);
    define_field!(device_size, u32, [(6, 0, 2), (7, 0, 8), (8, 6, 2)]);
    define_field!(device_size_multiplier, u16, [(9, 0, 2), (10, 7, 1)]);
    define_field!(erase_single_block_enabled, bool, 10, 6);

    /// Returns the card size in bytes
    pub fn card_capacity_bytes(&self) -> u64 {
        let shift = u32::from(self.device_size_multiplier())
            + u32::from(self.read_block_length())
            + 2;
        (u64::from(self.device_size()) + 1) << shift
    }

    /// Returns the card size in 512-byte blocks
    pub fn card_capacity_blocks(&self) -> u32 {
        (self.card_capacity_bytes() / 512) as u32
    }
}

impl CsdV2 {
    fn data(&self) -> &[u8; 16] {
        &self.data
    }

    define_field!(csd_ver, u8, 0, 6, 2);
    define_field!(device_size, u32, [(7, 0, 6), (8, 0, 8), (9, 0, 8)]);
    define_field!(erase_single_block_enabled, bool, 10, 6);

    /// Returns the card size in bytes
    pub fn card_capacity_bytes(&self) -> u64 {
        (u64::from(self.device_size()) + 1) * 512 * 1024
    }

    /// Returns the card size in 512-byte blocks
    pub fn card_capacity_blocks(&self) -> u32 {
        (self.device_size() + 1) * 1024
    }
}
