//! datalogger - Time keeping
//!
//! Milliseconds since boot drive every schedule in the logger. Wall-clock
//! time only ever appears as text in a [`Timestamp`].

use core::fmt::Write;

/// Milliseconds since boot.
pub type Millis = u64;

/// A free-running millisecond counter. Board glue implements this on top of
/// a hardware timer.
pub trait Uptime {
    fn uptime_ms(&mut self) -> Millis;
}

impl<T> Uptime for &mut T
where
    T: Uptime,
{
    fn uptime_ms(&mut self) -> Millis {
        (*self).uptime_ms()
    }
}

/// Time from `earlier` to `now`, or zero if the counter went backwards.
pub fn elapsed(now: Millis, earlier: Millis) -> Millis {
    now.saturating_sub(earlier)
}

/// Longest text a timestamp can hold (`UPTIME_18446744073709551615ms`).
pub const TIMESTAMP_LEN: usize = 32;

/// A timestamp as written to the CSV and shown on screen: either
/// `YYYY-MM-DDTHH:MM:SSZ` or an `UPTIME_<ms>ms` placeholder.
pub type Timestamp = heapless::String<TIMESTAMP_LEN>;

/// The stand-in timestamp used when the clock can't be read.
pub fn uptime_timestamp(now: Millis) -> Timestamp {
    let mut ts = Timestamp::new();
    // 29 characters at most, always fits
    let _ = write!(ts, "UPTIME_{}ms", now);
    ts
}

/// The `YYYY-MM-DD` part of an ISO timestamp, or the whole text if it
/// isn't one.
pub fn date_part(ts: &str) -> &str {
    if is_iso(ts) {
        &ts[..10]
    } else {
        ts
    }
}

/// The `HH:MM:SS` part of an ISO timestamp, or nothing if it isn't one.
pub fn time_part(ts: &str) -> &str {
    if is_iso(ts) {
        &ts[11..19]
    } else {
        ""
    }
}

fn is_iso(ts: &str) -> bool {
    let b = ts.as_bytes();
    b.len() >= 19 && ts.is_ascii() && b[4] == b'-' && b[10] == b'T' && b[13] == b':'
}
