//! Debounced mission switch.

use embedded_hal::digital::v2::InputPin;

use crate::time::{elapsed, Millis};

/// A two-position switch read through a GPIO input.
///
/// A new level is only believed once the raw input has held it for the
/// debounce window.
pub struct Switch<P>
where
    P: InputPin,
{
    pin: P,
    active_high: bool,
    debounce_ms: Millis,
    stable: bool,
    last_raw: bool,
    last_change: Millis,
}

impl<P> Switch<P>
where
    P: InputPin,
{
    /// Take the pin and sample it once, so the starting level is known.
    pub fn new(pin: P, active_high: bool, debounce_ms: Millis, now: Millis) -> Result<Self, P::Error> {
        let level = pin.is_high()?;
        Ok(Switch {
            pin,
            active_high,
            debounce_ms,
            stable: level,
            last_raw: level,
            last_change: now,
        })
    }

    /// The debounced pin level (true = high).
    pub fn level(&mut self, now: Millis) -> Result<bool, P::Error> {
        let raw = self.pin.is_high()?;
        if raw != self.last_raw {
            self.last_raw = raw;
            self.last_change = now;
        }
        if elapsed(now, self.last_change) >= self.debounce_ms {
            self.stable = self.last_raw;
        }
        Ok(self.stable)
    }

    /// Is the switch in its "on" position?
    pub fn is_active(&mut self, now: Millis) -> Result<bool, P::Error> {
        Ok(self.level(now)? == self.active_high)
    }

    pub fn release(self) -> P {
        self.pin
    }
}
