//! datalogger - Peripheral drivers
//!
//! Thin drivers for everything on the board besides the SD card. Each one
//! fails on its own; none of them knows about the others or about faults.
//! Drivers on the shared I2C bus hold no bus handle: it is lent to them
//! for each call.

pub mod display;
pub mod ds3231;
pub mod indicator;
pub mod sht31;
pub mod switch;

pub use display::{DrawingSurface, Screen};
pub use ds3231::{DateTime, Ds3231, Ds3231Error};
pub use indicator::Indicator;
pub use sht31::{SensorSample, Sht31, Sht31Error};
pub use switch::Switch;
