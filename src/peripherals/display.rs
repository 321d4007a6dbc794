//! Status screens for the 128x64 panel.
//!
//! The panel itself (controller, fonts, framebuffer) lives behind
//! [`DrawingSurface`]; this module only decides what text goes where.

use core::fmt::{self, Debug, Write};

use super::sht31::SensorSample;
use crate::fault::{FaultRecord, Severity};
use crate::time::{date_part, time_part};

/// Characters that fit across the panel in the 8x8 font.
pub const LINE_CHARS: usize = 16;

/// Most lines we ever put on one frame.
pub const MAX_LINES: usize = 5;

/// Title shown at the top of the running screen.
pub const TITLE: &str = "Borealis-1";

type Line = heapless::String<24>;

/// Something we can draw lines of text on.
pub trait DrawingSurface {
    type Error: Debug;

    /// Blank the back buffer.
    fn clear(&mut self) -> Result<(), Self::Error>;

    /// Draw `text` with its top-left corner at (`x`, `y`) pixels.
    fn draw_text(&mut self, text: &str, x: i32, y: i32) -> Result<(), Self::Error>;

    /// Push the back buffer to the panel.
    fn present(&mut self) -> Result<(), Self::Error>;
}

impl<T> DrawingSurface for &mut T
where
    T: DrawingSurface,
{
    type Error = T::Error;

    fn clear(&mut self) -> Result<(), Self::Error> {
        (*self).clear()
    }

    fn draw_text(&mut self, text: &str, x: i32, y: i32) -> Result<(), Self::Error> {
        (*self).draw_text(text, x, y)
    }

    fn present(&mut self) -> Result<(), Self::Error> {
        (*self).present()
    }
}

/// Composes whole frames on a [`DrawingSurface`].
pub struct Screen<D>
where
    D: DrawingSurface,
{
    surface: D,
}

impl<D> Screen<D>
where
    D: DrawingSurface,
{
    pub fn new(surface: D) -> Self {
        Screen { surface }
    }

    /// Push an empty frame. Used at bring-up to find out if the panel
    /// is there at all.
    pub fn blank(&mut self) -> Result<(), D::Error> {
        self.surface.clear()?;
        self.surface.present()
    }

    /// Idle screen, shown while the mission switch is off.
    pub fn show_off(&mut self, timestamp: &str) -> Result<(), D::Error> {
        let clock = clock_line(timestamp);
        self.frame(&[
            ("Experiment OFF", 0),
            (date_part(timestamp), 16),
            (clock.as_str(), 26),
            ("Switch the switch", 44),
            ("to turn ON", 54),
        ])
    }

    /// Live reading, shown while recording.
    pub fn show_on(&mut self, sample: &SensorSample, timestamp: &str) -> Result<(), D::Error> {
        let mut temp = Line::new();
        let _ = write!(temp, "T: {:.1} C", sample.temperature_c);
        let mut rh = Line::new();
        let _ = write!(rh, "H: {:.1} %", sample.humidity_percent);
        let clock = clock_line(timestamp);
        self.frame(&[
            (TITLE, 0),
            (temp.as_str(), 16),
            (rh.as_str(), 26),
            (date_part(timestamp), 38),
            (clock.as_str(), 48),
        ])
    }

    /// Shown in place of a reading when the sensor didn't give one.
    pub fn show_sensor_failed(&mut self, level: Severity) -> Result<(), D::Error> {
        self.show_error(level.max(Severity::Degraded), "sensor", "SHT31", "read failed")
    }

    /// Detail of the latest fault, headed by the current severity.
    pub fn show_fault(&mut self, level: Severity, fault: &FaultRecord) -> Result<(), D::Error> {
        self.show_error(level, fault.origin, fault.message(), fault.cause_str())
    }

    /// Generic error layout: level, origin, kind, then up to two lines of
    /// cause. Every line is cut to the panel width.
    pub fn show_error(
        &mut self,
        level: Severity,
        origin: &str,
        kind: &str,
        cause: &str,
    ) -> Result<(), D::Error> {
        let mut heading = Line::new();
        let _ = write!(heading, "SAFE: {}", level);
        let (cause_1, cause_2) = split_at_char(cause, LINE_CHARS);
        self.frame(&[
            (clip(&heading), 0),
            (clip(origin), 16),
            (clip(kind), 26),
            (cause_1, 38),
            (clip(cause_2), 48),
        ])
    }

    /// Clear, draw non-empty lines at x = 0, present.
    fn frame(&mut self, lines: &[(&str, i32)]) -> Result<(), D::Error> {
        self.surface.clear()?;
        for &(text, y) in lines.iter().take(MAX_LINES) {
            if !text.is_empty() {
                self.surface.draw_text(text, 0, y)?;
            }
        }
        self.surface.present()
    }

    pub fn release(self) -> D {
        self.surface
    }
}

impl<D> Debug for Screen<D>
where
    D: DrawingSurface,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Screen").finish()
    }
}

/// `HH:MM:SSZ`, or nothing for a placeholder timestamp.
fn clock_line(timestamp: &str) -> Line {
    let mut line = Line::new();
    let time = time_part(timestamp);
    if !time.is_empty() {
        let _ = write!(line, "{}Z", time);
    }
    line
}

/// The first `LINE_CHARS` characters of `text`.
fn clip(text: &str) -> &str {
    split_at_char(text, LINE_CHARS).0
}

fn split_at_char(text: &str, chars: usize) -> (&str, &str) {
    match text.char_indices().nth(chars) {
        Some((idx, _)) => text.split_at(idx),
        None => (text, ""),
    }
}
