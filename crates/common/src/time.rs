//! Monotonic time sources for baton.
//!
//! Schedulers in this workspace never look at wall-clock time. Everything is
//! measured as a [`Duration`] elapsed since a clock's origin, read through the
//! [`Clock`] trait so tests can substitute a [`ManualClock`] and step time
//! deterministically.
//!
//! # Example
//!
//! ```rust
//! use baton_common::time::{Clock, ManualClock};
//! use std::time::Duration;
//!
//! let clock = ManualClock::new();
//! assert_eq!(clock.now(), Duration::ZERO);
//!
//! clock.advance(Duration::from_millis(250));
//! assert_eq!(clock.now(), Duration::from_millis(250));
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// A monotonic time source.
///
/// `now()` returns the time elapsed since the clock's origin. Successive
/// calls never go backwards.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Returns the elapsed time since this clock's origin.
    fn now(&self) -> Duration;

    /// Returns the elapsed time since the origin in nanoseconds.
    fn now_nanos(&self) -> u64 {
        duration_to_nanos(self.now())
    }
}

/// A [`Clock`] backed by [`Instant`].
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    /// Creates a clock whose origin is the current instant.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// A [`Clock`] that only moves when told to.
///
/// Intended for tests. Time is stored in nanoseconds so it can be shared
/// across threads without a lock.
#[derive(Debug, Default)]
pub struct ManualClock {
    nanos: AtomicU64,
}

impl ManualClock {
    /// Creates a clock at time zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        self.nanos.fetch_add(duration_to_nanos(by), Ordering::SeqCst);
    }

    /// Sets the clock to `to`. Ignored if it would move time backwards.
    pub fn set(&self, to: Duration) {
        self.nanos.fetch_max(duration_to_nanos(to), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::SeqCst))
    }
}

/// Converts a duration to whole nanoseconds, saturating at `u64::MAX`.
pub fn duration_to_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

/// Truncates a nanosecond count to whole milliseconds.
///
/// Runners only accept millisecond delays, so every submission passes
/// through here. Sub-millisecond remainders are dropped, never rounded up.
pub fn floor_to_millis(nanos: u64) -> Duration {
    Duration::from_millis(nanos / 1_000_000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advance() {
        let clock = ManualClock::new();
        clock.advance(Duration::from_millis(5));
        clock.advance(Duration::from_micros(10));
        assert_eq!(clock.now(), Duration::from_micros(5_010));
        assert_eq!(clock.now_nanos(), 5_010_000);
    }

    #[test]
    fn test_manual_clock_never_goes_backwards() {
        let clock = ManualClock::new();
        clock.set(Duration::from_secs(2));
        clock.set(Duration::from_secs(1));
        assert_eq!(clock.now(), Duration::from_secs(2));
    }

    #[test]
    fn test_monotonic_clock_moves_forward() {
        let clock = MonotonicClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }

    #[test]
    fn test_floor_to_millis() {
        assert_eq!(floor_to_millis(0), Duration::ZERO);
        assert_eq!(floor_to_millis(999_999), Duration::ZERO);
        assert_eq!(floor_to_millis(1_000_000), Duration::from_millis(1));
        assert_eq!(floor_to_millis(2_999_999), Duration::from_millis(2));
    }

    #[test]
    fn test_duration_to_nanos_saturates() {
        assert_eq!(duration_to_nanos(Duration::MAX), u64::MAX);
        assert_eq!(duration_to_nanos(Duration::from_nanos(42)), 42);
    }
}
