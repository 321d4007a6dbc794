//! datalogger - Bring-up
//!
//! Brings every part of the board up once, in a fixed order, and reports
//! what failed instead of stopping. Whatever fails here stays off for the
//! rest of the boot.

use core::fmt::Debug;

use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::blocking::i2c::{Read, Write, WriteRead};
use embedded_hal::blocking::spi::Transfer;
use embedded_hal::digital::v2::{InputPin, OutputPin};
#[cfg(feature = "log")]
use log::{debug, error, info, warn};

#[cfg(feature = "defmt-log")]
use defmt::{debug, error, info, warn};

use crate::block_device::BlockDevice;
use crate::config::Config;
use crate::fault::{FaultKind, FaultRecord, Severity};
use crate::peripherals::{DrawingSurface, Ds3231, Indicator, Screen, Sht31, Switch};
use crate::sdmmc::{self, AcquireOpts, Initialized, NotInit, SdMmcSpi, SpiClock};
use crate::storage::{Storage, Volume};
use crate::time::Millis;

/// Room for one fault per bring-up step.
pub const MAX_BRINGUP_FAULTS: usize = 8;

/// Faults found during bring-up, oldest first.
pub type BringUpFaults = heapless::Vec<FaultRecord, MAX_BRINGUP_FAULTS>;

/// Something in the card slot that can be brought up into a block device.
pub trait CardSlot {
    type Device: BlockDevice;
    type Error: Debug;

    fn bring_up(self, options: AcquireOpts) -> Result<Self::Device, Self::Error>;

    /// How to file a bring-up error.
    fn fault_kind(error: &Self::Error) -> FaultKind;
}

impl<SPI, CS, DELAY> CardSlot for SdMmcSpi<SPI, CS, DELAY, NotInit>
where
    SPI: Transfer<u8> + SpiClock,
    CS: OutputPin,
    DELAY: DelayMs<u32>,
{
    type Device = SdMmcSpi<SPI, CS, DELAY, Initialized>;
    type Error = sdmmc::Error;

    fn bring_up(self, options: AcquireOpts) -> Result<Self::Device, Self::Error> {
        self.bring_up_with_opts(options).map_err(|(e, _)| e)
    }

    fn fault_kind(error: &sdmmc::Error) -> FaultKind {
        match error.fault_kind() {
            FaultKind::ProtocolTimeout => FaultKind::ProtocolTimeout,
            _ => FaultKind::InitFailure,
        }
    }
}

/// Everything the board glue hands over at reset.
pub struct Board<I2C, IE, SW, RED, GREEN, D, C, V> {
    /// The I2C bus, or why it couldn't be set up.
    pub i2c: Result<I2C, IE>,
    pub switch: SW,
    pub fault_lamp: RED,
    pub run_lamp: GREEN,
    pub display: D,
    pub card: C,
    /// The filesystem to mount on the card.
    pub volume: V,
}

/// The parts that came up. `None` means failed at bring-up: never retried.
pub struct Peripherals<I2C, SW, RED, GREEN, D, V>
where
    SW: InputPin,
    RED: OutputPin,
    GREEN: OutputPin,
    D: DrawingSurface,
    V: Volume,
{
    pub i2c: Option<I2C>,
    pub switch: Option<Switch<SW>>,
    pub fault_lamp: Indicator<RED>,
    pub run_lamp: Indicator<GREEN>,
    pub screen: Option<Screen<D>>,
    pub sensor: Option<Sht31>,
    pub clock: Option<Ds3231>,
    /// Mounted or not; see [`Storage::is_mounted`].
    pub storage: Storage<V>,
}

/// What bring-up produced.
pub struct BringUp<I2C, SW, RED, GREEN, D, V>
where
    SW: InputPin,
    RED: OutputPin,
    GREEN: OutputPin,
    D: DrawingSurface,
    V: Volume,
{
    pub peripherals: Peripherals<I2C, SW, RED, GREEN, D, V>,
    pub faults: BringUpFaults,
}

fn note<E: Debug + ?Sized>(
    faults: &mut BringUpFaults,
    severity: Severity,
    origin: &'static str,
    kind: FaultKind,
    cause: &E,
) {
    let record = FaultRecord::new(severity, origin, kind).with_cause(cause);
    if severity >= Severity::Critical {
        error!("{} failed: {}", origin, record.cause_str());
    } else {
        warn!("{} failed: {}", origin, record.cause_str());
    }
    // one slot per step, so this can't overflow
    let _ = faults.push(record);
}

/// Bring the board up: lamps, switch, I2C bus, display, sensor, clock,
/// then the SD card and its filesystem.
pub fn bring_up<I2C, IE, SW, RED, GREEN, D, C, V>(
    board: Board<I2C, IE, SW, RED, GREEN, D, C, V>,
    config: &Config,
    now: Millis,
) -> BringUp<I2C, SW, RED, GREEN, D, V>
where
    I2C: Write<Error = IE> + Read<Error = IE> + WriteRead<Error = IE>,
    IE: Debug,
    SW: InputPin,
    SW::Error: Debug,
    RED: OutputPin,
    GREEN: OutputPin,
    D: DrawingSurface,
    C: CardSlot,
    V: Volume<Device = C::Device>,
{
    let mut faults = BringUpFaults::new();

    // Lamps first, so later failures can be shown. Nothing is written yet.
    let fault_lamp = Indicator::new(board.fault_lamp, config.led_active_high);
    let run_lamp = Indicator::new(board.run_lamp, config.led_active_high);

    let switch = match Switch::new(
        board.switch,
        config.switch_active_high,
        config.switch_debounce_ms,
        now,
    ) {
        Ok(switch) => Some(switch),
        Err(e) => {
            note(&mut faults, Severity::Degraded, "switch_init", FaultKind::InitFailure, &e);
            None
        }
    };

    let mut i2c = match board.i2c {
        Ok(i2c) => Some(i2c),
        Err(e) => {
            note(&mut faults, Severity::Critical, "i2c_init", FaultKind::InitFailure, &e);
            None
        }
    };

    let mut screen = None;
    let mut sensor = None;
    let mut clock = None;
    if let Some(bus) = i2c.as_mut() {
        let mut candidate = Screen::new(board.display);
        match candidate.blank() {
            Ok(()) => screen = Some(candidate),
            Err(e) => note(&mut faults, Severity::Critical, "display_init", FaultKind::InitFailure, &e),
        }

        let sht31 = Sht31::new(config.sensor_address);
        match sht31.probe(bus) {
            Ok(status) => {
                debug!("sensor status {:x}", status);
                sensor = Some(sht31);
            }
            Err(e) => note(&mut faults, Severity::Degraded, "sensor_init", FaultKind::InitFailure, &e),
        }

        let rtc = Ds3231::new(config.clock_address);
        match rtc.datetime(bus) {
            Ok(dt) => {
                info!("clock reads {}", dt.to_timestamp().as_str());
                clock = Some(rtc);
            }
            Err(e) => note(&mut faults, Severity::Degraded, "clock_init", FaultKind::InitFailure, &e),
        }
    }

    let mut storage = Storage::new(board.volume, config.mount_point);
    match board.card.bring_up(config.card) {
        Ok(device) => {
            if !storage.mount(device) {
                note(&mut faults, Severity::Warning, "sd_mount", FaultKind::InitFailure, "mount failed");
            }
        }
        Err(e) => note(&mut faults, Severity::Warning, "sd_init", C::fault_kind(&e), &e),
    }

    info!("bring-up done, {} faults", faults.len());
    BringUp {
        peripherals: Peripherals {
            i2c,
            switch,
            fault_lamp,
            run_lamp,
            screen,
            sensor,
            clock,
            storage,
        },
        faults,
    }
}
