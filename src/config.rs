//! datalogger - Configuration
//!
//! Everything here is fixed at build time. [`Config::default`] is what the
//! flight board runs with; tests build their own.

use crate::fault::BlinkTiming;
use crate::sdmmc::AcquireOpts;
use crate::time::Millis;

/// Time between samples while recording.
pub const SAMPLE_INTERVAL_MS: Millis = 1000;

/// How long the switch must hold still before we believe it.
pub const SWITCH_DEBOUNCE_MS: Millis = 50;

/// Loop sleep while idle.
pub const OFF_YIELD_MS: u32 = 50;

/// Loop sleep while recording.
pub const ON_YIELD_MS: u32 = 10;

/// Where the card's filesystem is mounted.
pub const SD_MOUNT_POINT: &str = "/sd";

/// Runtime view of the constants above.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone)]
pub struct Config {
    pub sample_interval_ms: Millis,
    pub switch_debounce_ms: Millis,
    /// `true` if the switch reads high when on.
    pub switch_active_high: bool,
    /// `true` if the lamps light when their pin is driven high.
    pub led_active_high: bool,
    pub off_yield_ms: u32,
    pub on_yield_ms: u32,
    pub mount_point: &'static str,
    pub sensor_address: u8,
    pub clock_address: u8,
    /// SD bring-up speeds and options.
    pub card: AcquireOpts,
    pub blink: BlinkTiming,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            sample_interval_ms: SAMPLE_INTERVAL_MS,
            switch_debounce_ms: SWITCH_DEBOUNCE_MS,
            switch_active_high: true,
            led_active_high: true,
            off_yield_ms: OFF_YIELD_MS,
            on_yield_ms: ON_YIELD_MS,
            mount_point: SD_MOUNT_POINT,
            sensor_address: crate::peripherals::sht31::DEFAULT_ADDRESS,
            clock_address: crate::peripherals::ds3231::DEFAULT_ADDRESS,
            card: AcquireOpts::default(),
            blink: BlinkTiming::default(),
        }
    }
}
