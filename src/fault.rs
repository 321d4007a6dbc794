//! datalogger - Fault tracking
//!
//! Every peripheral failure ends up here. The monitor keeps the worst
//! severity seen since the last explicit clear, the most recent fault in
//! detail, and turns the severity into a blink code on the fault lamp.

use core::fmt::{self, Debug, Write};

use embedded_hal::digital::v2::OutputPin;
#[cfg(feature = "log")]
use log::{info, warn};

#[cfg(feature = "defmt-log")]
use defmt::{info, warn};

use crate::peripherals::Indicator;
use crate::time::{elapsed, Millis};

/// How much of an error's `Debug` text we keep.
pub const CAUSE_LEN: usize = 40;

/// Captured error text, truncated to [`CAUSE_LEN`] bytes.
pub type Cause = heapless::String<CAUSE_LEN>;

/// How bad things are. Ordered, so the worst of several is their maximum.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Severity {
    /// Nothing has gone wrong.
    Ok = 0,
    /// An optional feature (logging) is off.
    Warning = 1,
    /// Core telemetry (sensor, clock, switch) is missing; the loop carries on.
    Degraded = 2,
    /// The display is gone; the blink code is all that is left.
    Critical = 3,
    /// Reserved. Nothing raises this today.
    Fatal = 4,
}

impl Severity {
    pub const ALL: [Severity; 5] = [
        Severity::Ok,
        Severity::Warning,
        Severity::Degraded,
        Severity::Critical,
        Severity::Fatal,
    ];

    /// Upper-case name, as shown on the display.
    pub fn name(self) -> &'static str {
        match self {
            Severity::Ok => "OK",
            Severity::Warning => "WARNING",
            Severity::Degraded => "DEGRADED",
            Severity::Critical => "CRITICAL",
            Severity::Fatal => "FATAL",
        }
    }

    /// Number of lamp pulses per blink cycle.
    pub fn pulses(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A running maximum over severities. Only [`SeverityMax::reset`] lowers it.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SeverityMax(Severity);

impl SeverityMax {
    pub const fn new() -> Self {
        SeverityMax(Severity::Ok)
    }

    /// Fold another severity in, returning the new maximum.
    pub fn raise(&mut self, severity: Severity) -> Severity {
        self.0 = self.0.max(severity);
        self.0
    }

    pub fn get(&self) -> Severity {
        self.0
    }

    pub fn reset(&mut self) {
        self.0 = Severity::Ok;
    }
}

impl Default for SeverityMax {
    fn default() -> Self {
        Self::new()
    }
}

/// What sort of thing went wrong.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FaultKind {
    /// The peripheral never came up; it stays off for this boot.
    InitFailure,
    /// A single read failed.
    ReadFailure,
    /// Storage (or an output) refused a write.
    WriteFailure,
    /// The card did not answer within its bound.
    ProtocolTimeout,
    /// The display could not draw a frame.
    RenderFailure,
}

impl FaultKind {
    /// Short label used as the fault message.
    pub fn label(self) -> &'static str {
        match self {
            FaultKind::InitFailure => "init failed",
            FaultKind::ReadFailure => "read failed",
            FaultKind::WriteFailure => "write failed",
            FaultKind::ProtocolTimeout => "timeout",
            FaultKind::RenderFailure => "render failed",
        }
    }
}

/// One recorded fault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaultRecord {
    pub severity: Severity,
    /// Where it happened, e.g. `"sensor_read"`.
    pub origin: &'static str,
    pub kind: FaultKind,
    /// The error behind it, if there was one.
    pub cause: Option<Cause>,
}

impl FaultRecord {
    pub fn new(severity: Severity, origin: &'static str, kind: FaultKind) -> Self {
        FaultRecord {
            severity,
            origin,
            kind,
            cause: None,
        }
    }

    /// Attach the `Debug` text of `error`, cut to fit.
    pub fn with_cause<E: Debug + ?Sized>(mut self, error: &E) -> Self {
        self.cause = Some(capture_cause(error));
        self
    }

    pub fn message(&self) -> &'static str {
        self.kind.label()
    }

    pub fn cause_str(&self) -> &str {
        self.cause.as_ref().map(|c| c.as_str()).unwrap_or("")
    }
}

/// A `fmt::Write` sink that keeps what fits and silently drops the rest.
struct Truncating<'a>(&'a mut Cause);

impl<'a> Write for Truncating<'a> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for c in s.chars() {
            if self.0.push(c).is_err() {
                break;
            }
        }
        Ok(())
    }
}

fn capture_cause<E: Debug + ?Sized>(error: &E) -> Cause {
    let mut cause = Cause::new();
    let _ = write!(Truncating(&mut cause), "{:?}", error);
    cause
}

/// Lamp timings for the blink code.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BlinkTiming {
    pub on_ms: Millis,
    pub off_ms: Millis,
    /// Pause after the last pulse. Must be longer than either phase above.
    pub gap_ms: Millis,
}

impl Default for BlinkTiming {
    fn default() -> Self {
        BlinkTiming {
            on_ms: 120,
            off_ms: 120,
            gap_ms: 700,
        }
    }
}

/// Non-blocking blink scheduler.
///
/// A cycle is `2 * n` lamp toggles followed by a gap. `n` is latched when
/// a cycle starts, so the count a watcher sees is never a mix of two
/// severities. The phase only moves on once enough time has passed since
/// the last change, so it copes with being called at uneven intervals.
#[derive(Debug, Clone)]
pub struct Blinker {
    timing: BlinkTiming,
    step: u8,
    pulses: u8,
    lit: bool,
    last_change: Millis,
}

impl Blinker {
    pub fn new(timing: BlinkTiming) -> Self {
        Blinker {
            timing,
            step: 0,
            pulses: 0,
            lit: false,
            last_change: 0,
        }
    }

    /// Advance the pattern. Returns the new lamp state when it changes.
    pub fn tick(&mut self, now: Millis, severity: Severity) -> Option<bool> {
        if severity == Severity::Ok {
            let was_running = self.pulses != 0;
            self.reset(now);
            return if was_running { Some(false) } else { None };
        }
        if self.pulses == 0 {
            // first tick since the pattern (re)started
            self.pulses = severity.pulses();
            self.last_change = now;
        }

        let toggles = 2 * self.pulses;
        let interval = if self.step >= toggles {
            self.timing.gap_ms
        } else if self.lit {
            self.timing.on_ms
        } else {
            self.timing.off_ms
        };
        if elapsed(now, self.last_change) < interval {
            return None;
        }
        self.last_change = now;

        if self.step < toggles {
            self.lit = !self.lit;
            self.step += 1;
            Some(self.lit)
        } else {
            // gap over, start the next cycle with whatever is current now;
            // the lamp is already off after an even number of toggles
            self.step = 0;
            self.pulses = severity.pulses();
            None
        }
    }

    /// Is the lamp meant to be lit right now?
    pub fn is_lit(&self) -> bool {
        self.lit
    }

    fn reset(&mut self, now: Millis) {
        self.step = 0;
        self.pulses = 0;
        self.lit = false;
        self.last_change = now;
    }
}

/// Collects faults from the whole system.
#[derive(Debug, Clone)]
pub struct FaultMonitor {
    level: SeverityMax,
    latest: Option<FaultRecord>,
    blinker: Blinker,
}

impl FaultMonitor {
    pub fn new(timing: BlinkTiming) -> Self {
        FaultMonitor {
            level: SeverityMax::new(),
            latest: None,
            blinker: Blinker::new(timing),
        }
    }

    /// Record a fault. The running severity only goes up; the detail is
    /// always replaced by this, the newest, fault.
    pub fn record(
        &mut self,
        severity: Severity,
        origin: &'static str,
        kind: FaultKind,
        cause: Option<&dyn Debug>,
    ) {
        let mut record = FaultRecord::new(severity, origin, kind);
        if let Some(cause) = cause {
            record = record.with_cause(cause);
        }
        self.record_fault(record);
    }

    /// Record an already-built fault.
    pub fn record_fault(&mut self, record: FaultRecord) {
        let level = self.level.raise(record.severity);
        warn!(
            "{} fault at {}: {} {} (now {})",
            record.severity.name(),
            record.origin,
            record.message(),
            record.cause_str(),
            level.name()
        );
        self.latest = Some(record);
    }

    /// Back to `Ok`. Only ever called on purpose.
    pub fn clear(&mut self) {
        info!("faults cleared");
        self.level.reset();
        self.latest = None;
    }

    /// Worst severity since the last clear.
    pub fn severity(&self) -> Severity {
        self.level.get()
    }

    /// The most recent fault, whatever its severity.
    pub fn latest(&self) -> Option<&FaultRecord> {
        self.latest.as_ref()
    }

    /// True while the blink code owns the fault lamp.
    pub fn is_signalling(&self) -> bool {
        self.severity() > Severity::Ok
    }

    /// Drive the blink code. Call on every pass that owns the lamp; never
    /// blocks. At `Ok` the lamp is left to the caller, apart from being
    /// switched off once when a pattern stops.
    pub fn tick<P: OutputPin>(
        &mut self,
        now: Millis,
        lamp: &mut Indicator<P>,
    ) -> Result<(), P::Error> {
        match self.blinker.tick(now, self.level.get()) {
            Some(lit) => lamp.set_lit(lit),
            None => Ok(()),
        }
    }

    /// Where the blink code has the lamp right now.
    pub fn lamp_lit(&self) -> bool {
        self.blinker.is_lit()
    }

    /// Advance the blink code without a lamp attached.
    pub fn tick_pattern(&mut self, now: Millis) -> Option<bool> {
        self.blinker.tick(now, self.level.get())
    }
}

impl Default for FaultMonitor {
    fn default() -> Self {
        Self::new(BlinkTiming::default())
    }
}
