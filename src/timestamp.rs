//! Simulated time: a non-negative fixed-point value with a 0.4 microsecond
//! tick, exactly matching `original_source/src/timestamp.h`'s `TimeUnit`.
//!
//! All arithmetic is checked; overflow or going negative is a fatal
//! `SimError::TimestampOverflow` — the source throws an exception for the
//! same condition, we propagate a `Result` instead (configuration/iteration
//! boundary, not a protocol invariant).

use crate::error::SimError;
use std::fmt;

/// Tick resolution in seconds.
pub const TIME_UNIT: f64 = 0.4e-6;

/// A simulated instant or duration, stored as a tick count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);

    /// Construct directly from a tick count.
    pub fn from_ticks(ticks: u64) -> Self {
        Timestamp(ticks)
    }

    pub fn ticks(self) -> u64 {
        self.0
    }

    /// Construct from a duration in seconds, truncating to the nearest tick.
    pub fn from_secs(secs: f64) -> Result<Self, SimError> {
        if !secs.is_finite() || secs < 0.0 {
            return Err(SimError::TimestampOverflow(format!(
                "negative or non-finite seconds: {secs}"
            )));
        }
        let ticks = secs / TIME_UNIT;
        if ticks > u64::MAX as f64 {
            return Err(SimError::TimestampOverflow(format!(
                "seconds value too large: {secs}"
            )));
        }
        Ok(Timestamp(ticks as u64))
    }

    pub fn as_secs(self) -> f64 {
        self.0 as f64 * TIME_UNIT
    }

    pub fn checked_add(self, rhs: Timestamp) -> Result<Self, SimError> {
        self.0
            .checked_add(rhs.0)
            .map(Timestamp)
            .ok_or_else(|| SimError::TimestampOverflow("addition overflowed".into()))
    }

    pub fn checked_sub(self, rhs: Timestamp) -> Result<Self, SimError> {
        self.0
            .checked_sub(rhs.0)
            .map(Timestamp)
            .ok_or_else(|| SimError::TimestampOverflow("subtraction underflowed".into()))
    }

    /// Saturating add used for "a tick past" style bumps where overflow is
    /// astronomically implausible (adding a single tick to `now`).
    pub fn plus_ticks(self, ticks: u64) -> Self {
        Timestamp(self.0.saturating_add(ticks))
    }
}

impl std::ops::Add for Timestamp {
    type Output = Timestamp;
    fn add(self, rhs: Timestamp) -> Timestamp {
        self.checked_add(rhs)
            .unwrap_or_else(|e| panic!("{e}"))
    }
}

impl std::ops::Sub for Timestamp {
    type Output = Timestamp;
    fn sub(self, rhs: Timestamp) -> Timestamp {
        self.checked_sub(rhs)
            .unwrap_or_else(|e| panic!("{e}"))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}", self.as_secs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_seconds_is_lossy_but_close() {
        let t = Timestamp::from_secs(0.001).unwrap();
        assert!((t.as_secs() - 0.001).abs() < TIME_UNIT);
    }

    #[test]
    fn negative_seconds_is_overflow() {
        assert!(Timestamp::from_secs(-1.0).is_err());
    }

    #[test]
    fn subtraction_underflow_is_an_error() {
        let a = Timestamp::from_ticks(1);
        let b = Timestamp::from_ticks(2);
        assert!(a.checked_sub(b).is_err());
    }

    #[test]
    fn ordering_is_total_and_monotone() {
        let a = Timestamp::from_ticks(5);
        let b = Timestamp::from_ticks(10);
        assert!(a < b);
        assert_eq!(a.plus_ticks(5), b);
    }
}
