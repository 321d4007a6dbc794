//! datalogger - Mission control
//!
//! The main loop. One call to [`Mission::step`] reads the switch, decides
//! the mode, does that mode's work and updates the fault lamp, in that
//! order. Every peripheral call is wrapped: a failure is recorded with the
//! fault monitor and replaced by a fallback, and the loop carries on.

use core::fmt::Debug;

use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::blocking::i2c::{Read, Write, WriteRead};
use embedded_hal::digital::v2::{InputPin, OutputPin};
#[cfg(feature = "log")]
use log::{info, trace};

#[cfg(feature = "defmt-log")]
use defmt::{info, trace};

use crate::bringup::{BringUp, Peripherals};
use crate::config::Config;
use crate::fault::{FaultKind, FaultMonitor, Severity};
use crate::peripherals::{DrawingSurface, SensorSample};
use crate::storage::Volume;
use crate::time::{elapsed, uptime_timestamp, Millis, Timestamp, Uptime};

/// What the switch asks for.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MissionMode {
    /// Idle: nothing recorded. Always the mode at boot.
    Off,
    /// Sampling, and recording if storage allows.
    On,
}

/// The running logger.
pub struct Mission<I2C, SW, RED, GREEN, D, V, T, DL>
where
    SW: InputPin,
    RED: OutputPin,
    GREEN: OutputPin,
    D: DrawingSurface,
    V: Volume,
{
    config: Config,
    parts: Peripherals<I2C, SW, RED, GREEN, D, V>,
    faults: FaultMonitor,
    uptime: T,
    delay: DL,
    mode: MissionMode,
    /// Cleared for the rest of the boot once storage lets us down.
    logging: bool,
    last_sample: Millis,
    latest_sample: Option<SensorSample>,
}

impl<I2C, IE, SW, RED, GREEN, D, V, T, DL> Mission<I2C, SW, RED, GREEN, D, V, T, DL>
where
    I2C: Write<Error = IE> + Read<Error = IE> + WriteRead<Error = IE>,
    IE: Debug,
    SW: InputPin,
    SW::Error: Debug,
    RED: OutputPin,
    RED::Error: Debug,
    GREEN: OutputPin,
    GREEN::Error: Debug,
    D: DrawingSurface,
    V: Volume,
    T: Uptime,
    DL: DelayMs<u32>,
{
    /// Take over from bring-up. Its faults go straight into the monitor.
    pub fn new(bring_up: BringUp<I2C, SW, RED, GREEN, D, V>, config: Config, uptime: T, delay: DL) -> Self {
        let mut faults = FaultMonitor::new(config.blink);
        for fault in bring_up.faults {
            faults.record_fault(fault);
        }
        let logging = bring_up.peripherals.storage.is_mounted();
        Mission {
            config,
            parts: bring_up.peripherals,
            faults,
            uptime,
            delay,
            mode: MissionMode::Off,
            logging,
            last_sample: 0,
            latest_sample: None,
        }
    }

    /// Loop forever.
    pub fn run(&mut self) -> ! {
        loop {
            let pause = self.step();
            self.delay.delay_ms(pause);
        }
    }

    /// One pass of the loop. Returns how long to sleep before the next.
    pub fn step(&mut self) -> u32 {
        let now = self.uptime.uptime_ms();
        if self.switch_on(now) {
            self.on_pass(now)
        } else {
            self.off_pass(now)
        }
    }

    pub fn mode(&self) -> MissionMode {
        self.mode
    }

    pub fn faults(&self) -> &FaultMonitor {
        &self.faults
    }

    /// Clear all recorded faults. The loop never does this by itself.
    pub fn clear_faults(&mut self) {
        self.faults.clear();
    }

    pub fn peripherals(&self) -> &Peripherals<I2C, SW, RED, GREEN, D, V> {
        &self.parts
    }

    /// Whether rows are still being written this boot.
    pub fn is_logging(&self) -> bool {
        self.logging
    }

    /// The last sample taken, if the last attempt worked.
    pub fn latest_sample(&self) -> Option<SensorSample> {
        self.latest_sample
    }

    fn record(&mut self, severity: Severity, origin: &'static str, kind: FaultKind, cause: &dyn Debug) {
        self.faults.record(severity, origin, kind, Some(cause));
    }

    /// A missing or broken switch reads as off.
    fn switch_on(&mut self, now: Millis) -> bool {
        let result = match self.parts.switch.as_mut() {
            Some(switch) => switch.is_active(now),
            None => return false,
        };
        match result {
            Ok(on) => on,
            Err(e) => {
                self.record(Severity::Degraded, "switch_read", FaultKind::ReadFailure, &e);
                false
            }
        }
    }

    fn off_pass(&mut self, now: Millis) -> u32 {
        if self.mode == MissionMode::On {
            info!("mission off");
            self.parts.storage.stop();
            self.mode = MissionMode::Off;
        }

        // the blink code keeps time, but in Off the fault lamp is steady
        let _ = self.faults.tick_pattern(now);
        if let Err(e) = self.parts.fault_lamp.on() {
            self.record(Severity::Degraded, "led_off_state", FaultKind::WriteFailure, &e);
        }
        if let Err(e) = self.parts.run_lamp.off() {
            self.record(Severity::Degraded, "led_off_state", FaultKind::WriteFailure, &e);
        }

        let timestamp = self.timestamp(now);
        if let Some(screen) = self.parts.screen.as_mut() {
            if let Err(e) = screen.show_off(&timestamp) {
                self.display_failed(&e);
            }
        }
        self.show_fault_detail();
        self.config.off_yield_ms
    }

    fn on_pass(&mut self, now: Millis) -> u32 {
        let entering = self.mode == MissionMode::Off;
        if entering {
            info!("mission on");
            self.mode = MissionMode::On;
            self.last_sample = now;
            self.start_session(now);
        }

        if entering
            && self.faults.is_signalling()
            && self.parts.fault_lamp.set_lit(self.faults.lamp_lit()).is_err()
        {
            trace!("fault lamp write failed");
        }
        if self.faults.tick(now, &mut self.parts.fault_lamp).is_err() {
            trace!("fault lamp write failed");
        }
        if !self.faults.is_signalling() {
            if let Err(e) = self.parts.fault_lamp.off() {
                self.record(Severity::Degraded, "led_on_state", FaultKind::WriteFailure, &e);
            }
        }
        if let Err(e) = self.parts.run_lamp.on() {
            self.record(Severity::Degraded, "led_on_state", FaultKind::WriteFailure, &e);
        }

        if elapsed(now, self.last_sample) >= self.config.sample_interval_ms {
            self.last_sample = now;
            let sample = self.read_sensor();
            self.latest_sample = sample;
            let timestamp = self.timestamp(now);
            if let Some(sample) = sample.as_ref() {
                self.log_row(&timestamp, sample);
            }
            self.show_sample(sample.as_ref(), &timestamp);
            self.show_fault_detail();
        }
        self.config.on_yield_ms
    }

    fn start_session(&mut self, now: Millis) {
        if !self.logging {
            return;
        }
        let timestamp = self.timestamp(now);
        if let Err(e) = self.parts.storage.start_new(&timestamp) {
            self.record(Severity::Warning, "log_start", FaultKind::WriteFailure, &e);
            self.logging = false;
        }
    }

    fn log_row(&mut self, timestamp: &str, sample: &SensorSample) {
        if !self.logging {
            return;
        }
        let result = self.parts.storage.write_row(
            timestamp,
            sample.temperature_c,
            sample.humidity_percent,
        );
        if let Err(e) = result {
            self.record(Severity::Warning, "log_write", FaultKind::WriteFailure, &e);
            self.parts.storage.stop();
            self.logging = false;
        }
    }

    fn read_sensor(&mut self) -> Option<SensorSample> {
        let (sensor, bus) = match (self.parts.sensor.as_ref(), self.parts.i2c.as_mut()) {
            (Some(sensor), Some(bus)) => (sensor, bus),
            _ => return None,
        };
        match sensor.measure(bus, &mut self.delay) {
            Ok(sample) => Some(sample),
            Err(e) => {
                self.record(Severity::Degraded, "sensor_read", FaultKind::ReadFailure, &e);
                None
            }
        }
    }

    /// The clock's time, or time since boot if the clock can't say.
    fn timestamp(&mut self, now: Millis) -> Timestamp {
        let result = match (self.parts.clock.as_ref(), self.parts.i2c.as_mut()) {
            (Some(clock), Some(bus)) => clock.datetime(bus),
            _ => return uptime_timestamp(now),
        };
        match result {
            Ok(dt) => dt.to_timestamp(),
            Err(e) => {
                self.record(Severity::Degraded, "clock_read", FaultKind::ReadFailure, &e);
                uptime_timestamp(now)
            }
        }
    }

    fn show_sample(&mut self, sample: Option<&SensorSample>, timestamp: &str) {
        let level = self.faults.severity();
        let result = match self.parts.screen.as_mut() {
            Some(screen) => match sample {
                Some(sample) => screen.show_on(sample, timestamp),
                None => screen.show_sensor_failed(level),
            },
            None => return,
        };
        if let Err(e) = result {
            self.display_failed(&e);
        }
    }

    /// Put the latest fault on screen while anything is wrong.
    fn show_fault_detail(&mut self) {
        let level = self.faults.severity();
        if level == Severity::Ok {
            return;
        }
        let result = match (self.parts.screen.as_mut(), self.faults.latest()) {
            (Some(screen), Some(fault)) => screen.show_fault(level, fault),
            _ => return,
        };
        if let Err(e) = result {
            self.display_failed(&e);
        }
    }

    /// The display is given up on for the rest of the boot.
    fn display_failed(&mut self, error: &D::Error) {
        self.record(Severity::Critical, "display_render", FaultKind::RenderFailure, error);
        self.parts.screen = None;
    }
}
