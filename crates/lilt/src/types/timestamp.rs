//! Seconds/nanos timestamps.
//!
//! A timestamp is a signed count of seconds since the Unix epoch plus a
//! nanosecond fraction normalised into `[0, 10^9)`. Arithmetic carries and
//! borrows explicitly so the fraction stays normalised through negative
//! results. Windows tick conversions use the 100ns tick and the 1601→1970
//! epoch offset.

use std::fmt;

use chrono::{DateTime, Utc};

/// Nanoseconds per second.
const NANOS_PER_SECOND: i64 = 1_000_000_000;
/// Windows FILETIME ticks are 100ns.
const NANOS_PER_TICK: i64 = 100;
/// Seconds between 1601-01-01 and 1970-01-01.
const WINDOWS_EPOCH_OFFSET_SECONDS: i64 = 11_644_473_600;

/// An instant, as `(seconds, nanos)` with `0 <= nanos < 10^9`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp {
    pub seconds: i64,
    pub nanos: u32,
}

impl Timestamp {
    /// Builds a timestamp, normalising an arbitrary nano count into range.
    #[must_use]
    pub fn new(seconds: i64, nanos: i64) -> Self {
        let mut seconds = seconds + nanos.div_euclid(NANOS_PER_SECOND);
        let mut nanos = nanos.rem_euclid(NANOS_PER_SECOND);
        if nanos < 0 {
            // rem_euclid keeps this non-negative; belt for the i64::MIN edge.
            nanos += NANOS_PER_SECOND;
            seconds -= 1;
        }
        Self {
            seconds,
            nanos: nanos as u32,
        }
    }

    /// From whole Unix seconds.
    #[must_use]
    pub fn from_unix(seconds: i64) -> Self {
        Self { seconds, nanos: 0 }
    }

    /// Whole Unix seconds, truncating the fraction.
    #[must_use]
    pub fn to_unix(self) -> i64 {
        self.seconds
    }

    /// From Windows FILETIME ticks (100ns since 1601-01-01).
    #[must_use]
    pub fn from_windows_ticks(ticks: i64) -> Self {
        let seconds = ticks.div_euclid(NANOS_PER_SECOND / NANOS_PER_TICK) - WINDOWS_EPOCH_OFFSET_SECONDS;
        let nanos = ticks.rem_euclid(NANOS_PER_SECOND / NANOS_PER_TICK) * NANOS_PER_TICK;
        Self::new(seconds, nanos)
    }

    /// To Windows FILETIME ticks.
    #[must_use]
    pub fn to_windows_ticks(self) -> i64 {
        (self.seconds + WINDOWS_EPOCH_OFFSET_SECONDS) * (NANOS_PER_SECOND / NANOS_PER_TICK)
            + i64::from(self.nanos) / NANOS_PER_TICK
    }

    /// Adds a duration given in whole nanoseconds.
    #[must_use]
    pub fn add_nanos(self, nanos: i64) -> Self {
        Self::new(self.seconds, i64::from(self.nanos) + nanos)
    }

    /// Adds a real-valued duration in seconds.
    #[must_use]
    pub fn add_seconds_f64(self, seconds: f64) -> Self {
        let whole = seconds.trunc() as i64;
        let frac_nanos = (seconds.fract() * NANOS_PER_SECOND as f64).round() as i64;
        Self::new(self.seconds + whole, i64::from(self.nanos) + frac_nanos)
    }

    /// Adds a duration in the given unit.
    #[must_use]
    pub fn add_units(self, amount: f64, unit: DurationUnit) -> Self {
        self.add_seconds_f64(amount * unit.seconds())
    }

    /// Signed difference `self - other` in real seconds.
    #[must_use]
    pub fn diff_seconds(self, other: Self) -> f64 {
        let seconds = self.seconds - other.seconds;
        let nanos = i64::from(self.nanos) - i64::from(other.nanos);
        seconds as f64 + nanos as f64 / NANOS_PER_SECOND as f64
    }
}

/// The units timestamp arithmetic accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurationUnit {
    Days,
    Hours,
    Minutes,
    Seconds,
    Milliseconds,
    Microseconds,
    Nanoseconds,
}

impl DurationUnit {
    fn seconds(self) -> f64 {
        match self {
            Self::Days => 86_400.0,
            Self::Hours => 3_600.0,
            Self::Minutes => 60.0,
            Self::Seconds => 1.0,
            Self::Milliseconds => 1e-3,
            Self::Microseconds => 1e-6,
            Self::Nanoseconds => 1e-9,
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match DateTime::<Utc>::from_timestamp(self.seconds, self.nanos) {
            Some(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S%.9fZ")),
            None => write!(f, "@{}.{:09}", self.seconds, self.nanos),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nanos_normalise_into_range() {
        let t = Timestamp::new(10, 2_500_000_000);
        assert_eq!(t.seconds, 12);
        assert_eq!(t.nanos, 500_000_000);

        let negative = Timestamp::new(10, -1);
        assert_eq!(negative.seconds, 9);
        assert_eq!(negative.nanos, 999_999_999);
    }

    #[test]
    fn unix_round_trip() {
        let t = Timestamp::from_unix(1_500_000_000);
        assert_eq!(t.to_unix(), 1_500_000_000);
    }

    #[test]
    fn windows_ticks_round_trip() {
        let t = Timestamp::new(1_234_567, 890_000_000);
        let ticks = t.to_windows_ticks();
        assert_eq!(Timestamp::from_windows_ticks(ticks), t);
    }

    #[test]
    fn diff_is_signed_real_seconds() {
        let a = Timestamp::new(100, 750_000_000);
        let b = Timestamp::new(99, 250_000_000);
        let diff = a.diff_seconds(b);
        assert!((diff - 1.5).abs() < 1e-9);
        assert!((b.diff_seconds(a) + 1.5).abs() < 1e-9);
    }

    #[test]
    fn unit_arithmetic_carries() {
        let t = Timestamp::new(0, 999_999_999).add_units(2.0, DurationUnit::Nanoseconds);
        assert_eq!(t.seconds, 1);
        assert_eq!(t.nanos, 1);

        let day = Timestamp::from_unix(0).add_units(1.0, DurationUnit::Days);
        assert_eq!(day.seconds, 86_400);
    }
}
