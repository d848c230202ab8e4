//! Time types for Zircon
//!
//! `Time` is nanoseconds on the monotonic clock, `Duration` a signed span.
//! Deadlines passed to blocking waits are `Time` values; `Time::INFINITE`
//! never expires and `Time::INFINITE_PAST` turns a wait into a poll.

use std::ops::{Add, Sub};
use std::sync::OnceLock;

/// A duration of time (in nanoseconds)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Duration(i64);

impl Duration {
    /// Zero duration
    pub const ZERO: Duration = Duration(0);

    /// Infinite duration
    pub const INFINITE: Duration = Duration(i64::MAX);

    /// Create a duration from nanoseconds
    pub const fn from_nanos(nanos: i64) -> Self {
        Duration(nanos)
    }

    /// Create a duration from microseconds
    pub const fn from_micros(micros: i64) -> Self {
        Duration(micros.saturating_mul(1_000))
    }

    /// Create a duration from milliseconds
    pub const fn from_millis(millis: i64) -> Self {
        Duration(millis.saturating_mul(1_000_000))
    }

    /// Create a duration from seconds
    pub const fn from_seconds(secs: i64) -> Self {
        Duration(secs.saturating_mul(1_000_000_000))
    }

    /// Get the duration in nanoseconds
    pub const fn into_nanos(self) -> i64 {
        self.0
    }

    /// Get the duration in milliseconds
    pub const fn into_millis(self) -> i64 {
        self.0 / 1_000_000
    }
}

impl From<std::time::Duration> for Duration {
    fn from(d: std::time::Duration) -> Self {
        Duration(i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
    }
}

impl Add for Duration {
    type Output = Duration;
    fn add(self, rhs: Duration) -> Duration {
        Duration(self.0.saturating_add(rhs.0))
    }
}

impl Sub for Duration {
    type Output = Duration;
    fn sub(self, rhs: Duration) -> Duration {
        Duration(self.0.saturating_sub(rhs.0))
    }
}

/// A point in time (nanoseconds since boot)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Time(i64);

/// Host instant standing in for boot time
fn boot() -> std::time::Instant {
    static BOOT: OnceLock<std::time::Instant> = OnceLock::new();
    *BOOT.get_or_init(std::time::Instant::now)
}

impl Time {
    /// The epoch (time 0)
    pub const ZERO: Time = Time(0);

    /// Infinite future
    pub const INFINITE: Time = Time(i64::MAX);

    /// Infinite past
    pub const INFINITE_PAST: Time = Time(i64::MIN);

    /// Create a time from nanoseconds
    pub const fn from_nanos(nanos: i64) -> Self {
        Time(nanos)
    }

    /// Get the time in nanoseconds
    pub const fn into_nanos(self) -> i64 {
        self.0
    }

    /// Get the current monotonic time
    pub fn get_monotonic() -> Self {
        Time::ZERO + Duration::from(boot().elapsed())
    }

    /// Deadline `duration` from now (`zx_deadline_after`)
    pub fn after(duration: Duration) -> Self {
        Self::get_monotonic() + duration
    }

    /// Host instant for a deadline; `None` means never
    pub(crate) fn to_std_instant(self) -> Option<std::time::Instant> {
        if self == Time::INFINITE {
            return None;
        }
        let nanos = u64::try_from(self.0).unwrap_or(0);
        boot().checked_add(std::time::Duration::from_nanos(nanos))
    }
}

impl Add<Duration> for Time {
    type Output = Time;
    fn add(self, rhs: Duration) -> Time {
        Time(self.0.saturating_add(rhs.0))
    }
}

impl Sub<Duration> for Time {
    type Output = Time;
    fn sub(self, rhs: Duration) -> Time {
        Time(self.0.saturating_sub(rhs.0))
    }
}

impl Sub for Time {
    type Output = Duration;
    fn sub(self, rhs: Time) -> Duration {
        Duration(self.0.saturating_sub(rhs.0))
    }
}

/// An instant in time (alias for Time for compatibility)
pub type Instant = Time;
