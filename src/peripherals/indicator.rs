//! A lamp on a GPIO pin.

use embedded_hal::digital::v2::OutputPin;

/// Drives a single LED, hiding whether it is wired active-high or
/// active-low.
pub struct Indicator<P>
where
    P: OutputPin,
{
    pin: P,
    active_high: bool,
    lit: Option<bool>,
}

impl<P> Indicator<P>
where
    P: OutputPin,
{
    /// Wrap a pin. Nothing is written until the first `on`/`off`.
    pub fn new(pin: P, active_high: bool) -> Self {
        Indicator {
            pin,
            active_high,
            lit: None,
        }
    }

    pub fn on(&mut self) -> Result<(), P::Error> {
        self.set_lit(true)
    }

    pub fn off(&mut self) -> Result<(), P::Error> {
        self.set_lit(false)
    }

    pub fn set_lit(&mut self, lit: bool) -> Result<(), P::Error> {
        if lit == self.active_high {
            self.pin.set_high()?;
        } else {
            self.pin.set_low()?;
        }
        self.lit = Some(lit);
        Ok(())
    }

    /// The last state successfully written, if any.
    pub fn is_lit(&self) -> Option<bool> {
        self.lit
    }

    pub fn release(self) -> P {
        self.pin
    }
}
