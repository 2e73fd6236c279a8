//! Wall-clock utilities for token lifecycle bookkeeping
//!
//! Token expiry is tracked at the granularity of whole seconds since the Unix
//! epoch, which is the resolution of the `iat` and `exp` claims carried by
//! the tokens themselves. The [`Clock`] trait lets the lifecycle engine ask
//! for "now" without being tied to the system clock, so that expiry and
//! refresh transitions can be driven deterministically in tests.
//!
//! ```
//! use cloudcore_clock::{Clock, DurationSecs, ManualClock, UnixTime};
//!
//! let clock = ManualClock::new(UnixTime(1_000));
//! let observer = clock.clone();
//!
//! clock.advance(DurationSecs(30));
//! assert_eq!(observer.now(), UnixTime(1_030));
//! ```

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unused_must_use
)]
#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]

use std::{
    fmt, ops,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, SystemTime},
};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Unix time
///
/// Unix time as represented by the number of seconds elapsed since the
/// beginning of the Unix epoch on 1970/01/01 at 00:00:00 UTC.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Ord, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(transparent))]
#[repr(transparent)]
pub struct UnixTime(pub u64);

impl UnixTime {
    /// The latest representable time, used as "never"
    pub const MAX: UnixTime = UnixTime(u64::MAX);

    /// Adds a duration, saturating at [`UnixTime::MAX`]
    #[inline]
    pub const fn saturating_add(self, d: DurationSecs) -> Self {
        Self(self.0.saturating_add(d.0))
    }
}

impl From<SystemTime> for UnixTime {
    #[inline]
    fn from(t: SystemTime) -> Self {
        // Times before the epoch clamp to the epoch itself.
        let time = t
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();

        UnixTime(time)
    }
}

impl fmt::Display for UnixTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// A span of whole seconds
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Ord, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(transparent))]
#[repr(transparent)]
pub struct DurationSecs(pub u64);

impl From<DurationSecs> for Duration {
    #[inline]
    fn from(d: DurationSecs) -> Self {
        Duration::from_secs(d.0)
    }
}

impl From<Duration> for DurationSecs {
    #[inline]
    fn from(d: Duration) -> Self {
        DurationSecs(d.as_secs())
    }
}

impl ops::Add<DurationSecs> for UnixTime {
    type Output = UnixTime;

    #[inline]
    fn add(self, rhs: DurationSecs) -> Self::Output {
        self.saturating_add(rhs)
    }
}

impl ops::AddAssign<DurationSecs> for UnixTime {
    #[inline]
    fn add_assign(&mut self, rhs: DurationSecs) {
        *self = *self + rhs;
    }
}

impl ops::Sub<DurationSecs> for UnixTime {
    type Output = UnixTime;

    #[inline]
    fn sub(self, rhs: DurationSecs) -> Self::Output {
        UnixTime(self.0.saturating_sub(rhs.0))
    }
}

/// The elapsed time between two instants, zero if `rhs` is later than `self`
impl ops::Sub for UnixTime {
    type Output = DurationSecs;

    #[inline]
    fn sub(self, rhs: UnixTime) -> Self::Output {
        DurationSecs(self.0.saturating_sub(rhs.0))
    }
}

impl ops::Add for DurationSecs {
    type Output = DurationSecs;

    #[inline]
    fn add(self, rhs: DurationSecs) -> Self::Output {
        DurationSecs(self.0.saturating_add(rhs.0))
    }
}

/// Scales a duration by a ratio, rounding up to the next whole second
impl ops::Mul<f64> for DurationSecs {
    type Output = DurationSecs;

    #[inline]
    fn mul(self, rhs: f64) -> Self::Output {
        let scaled = self.0 as f64 * rhs;
        let nearest = scaled.round();
        // Products that land on a whole second up to float error stay there.
        if (scaled - nearest).abs() < 1e-6 {
            DurationSecs(nearest as u64)
        } else {
            DurationSecs(scaled.ceil() as u64)
        }
    }
}

/// Represents a clock, which can tell the current time
pub trait Clock {
    /// Gets the current time according to this clock
    fn now(&self) -> UnixTime;
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    #[inline]
    fn now(&self) -> UnixTime {
        (**self).now()
    }
}

/// The system clock as provided by `std::time::SystemTime`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct System;

impl Clock for System {
    #[inline]
    fn now(&self) -> UnixTime {
        UnixTime::from(SystemTime::now())
    }
}

/// A test clock which maintains the current time as internal state
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TestClock(UnixTime);

impl Clock for TestClock {
    #[inline]
    fn now(&self) -> UnixTime {
        self.0
    }
}

impl TestClock {
    /// Creates a new test clock with the specified time
    #[inline]
    pub const fn new(time: UnixTime) -> Self {
        Self(time)
    }

    /// Updates the clock's current time to `val`
    pub fn set(&mut self, val: UnixTime) {
        self.0 = val;
    }

    /// Increments the clock's current time by `inc` seconds
    pub fn inc(&mut self, inc: u64) {
        (self.0).0 += inc;
    }
}

/// A manually driven clock that can be shared across tasks
///
/// Clones observe the same time, so a test can hand one clone to a token
/// manager and move time forward through another.
#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    /// Creates a new shared clock starting at `time`
    pub fn new(time: UnixTime) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(time.0)),
        }
    }

    /// Moves the clock to `time`
    pub fn set(&self, time: UnixTime) {
        self.now.store(time.0, Ordering::SeqCst);
    }

    /// Moves the clock forward by `d`
    pub fn advance(&self, d: DurationSecs) {
        self.now.fetch_add(d.0, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    #[inline]
    fn now(&self) -> UnixTime {
        UnixTime(self.now.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scaling_rounds_up_to_whole_seconds() {
        assert_eq!(DurationSecs(3600) * 0.2, DurationSecs(720));
        assert_eq!(DurationSecs(3) * 0.2, DurationSecs(1));
        assert_eq!(DurationSecs(0) * 0.2, DurationSecs(0));
    }

    #[test]
    fn subtracting_later_time_saturates() {
        assert_eq!(UnixTime(10) - UnixTime(20), DurationSecs(0));
        assert_eq!(UnixTime(20) - UnixTime(10), DurationSecs(10));
    }

    #[test]
    fn adding_to_max_saturates() {
        assert_eq!(UnixTime::MAX + DurationSecs(60), UnixTime::MAX);
    }

    #[test]
    fn manual_clock_clones_share_time() {
        let clock = ManualClock::new(UnixTime(100));
        let other = clock.clone();
        clock.advance(DurationSecs(5));
        assert_eq!(other.now(), UnixTime(105));
        other.set(UnixTime(7));
        assert_eq!(clock.now(), UnixTime(7));
    }

    #[test]
    fn test_clock_increments() {
        let mut clock = TestClock::new(UnixTime(1));
        clock.inc(2);
        assert_eq!(clock.now(), UnixTime(3));
    }
}
