//! # datalogger
//!
//! > Firmware core for an unattended environmental data logger
//!
//! The logger samples temperature and humidity, stamps each sample with the
//! time from a battery-backed clock, appends it to a CSV file on an SD card
//! and shows it on a small display. Nobody is around to read a console once
//! it is deployed, so every failure is folded into one severity which is
//! blinked out on a lamp.
//!
//! It is written in pure-Rust, is `#![no_std]` and does not use `alloc` or
//! `collections` to keep the memory footprint low. In the first instance it
//! is designed for readability and simplicity over performance.
//!
//! ## Using the crate
//!
//! The board glue supplies the buses and pins (anything implementing the
//! `embedded-hal` 0.2 blocking traits), a drawing surface for the display and
//! a filesystem that can sit on a [`BlockDevice`]. We supply the
//! `BlockDevice` for SD and SDHC cards over SPI.
//!
//! ```rust,ignore
//! let board = datalogger::bringup::Board {
//!     i2c: Ok(i2c),
//!     switch: switch_pin,
//!     fault_lamp: red_led,
//!     run_lamp: green_led,
//!     display: oled,
//!     card: datalogger::SdMmcSpi::new(sd_spi, sd_cs, sd_delay),
//!     volume: fat,
//! };
//! let config = datalogger::Config::default();
//! let up = datalogger::bringup::bring_up(board, &config, timer.uptime_ms());
//! let mut mission = datalogger::Mission::new(up, config, timer, delay);
//! mission.run();
//! ```
//!
//! ## Features
//!
//! * `defmt-log`: By turning off the default features and enabling the
//! `defmt-log` feature you can configure this crate to log messages over
//! defmt instead.
//!
//! Make sure that either the `log` feature or the `defmt-log` feature is enabled.

#![cfg_attr(not(test), no_std)]
// #![deny(missing_docs)]

// ****************************************************************************
//
// Imports
//
// ****************************************************************************

#[cfg(test)]
mod mocks;

#[macro_use]
mod structure;

pub mod block_device;
pub mod bringup;
pub mod config;
pub mod fault;
pub mod mission;
pub mod peripherals;
pub mod sdmmc;
pub mod storage;
pub mod time;

pub use crate::block_device::{Block, BlockCount, BlockDevice, BlockIdx, MemoryBlockDevice};
pub use crate::config::Config;
pub use crate::fault::{FaultKind, FaultMonitor, FaultRecord, Severity};
pub use crate::mission::{Mission, MissionMode};
pub use crate::sdmmc::Error as SdMmcError;
pub use crate::sdmmc::{AcquireOpts, SdMmcSpi, SpiClock};
pub use crate::storage::{Storage, Volume};
pub use crate::time::Uptime;

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
