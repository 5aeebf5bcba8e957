//! Utilities for messing with time
//!
//! Types included allow messing with and mocking out clocks and other
//! side-effect-laden time operations. Session decisions in `tokenkeep` never
//! read the wall clock directly; they ask a [`Clock`], which lets tests move
//! time forward deterministically with a [`TestClock`].

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
    str::FromStr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, SystemTime},
};

#[cfg(feature = "serde")]
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Unix time
///
/// Unix time as represented by the number of seconds elapsed since the
/// beginning of the Unix epoch on 1970/01/01 at 00:00:00 UTC.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Ord, PartialOrd)]
#[repr(transparent)]
pub struct UnixTime(pub u64);

/// Unix time with millisecond precision
///
/// Activity timestamps are tracked at this resolution.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Ord, PartialOrd)]
#[repr(transparent)]
pub struct UnixMillis(pub u64);

impl UnixMillis {
    /// Truncates to whole seconds
    #[inline]
    pub const fn to_unix_time(self) -> UnixTime {
        UnixTime(self.0 / 1000)
    }

    /// Time elapsed between `earlier` and `self`
    ///
    /// Saturates to zero if `earlier` is actually later.
    #[inline]
    pub fn saturating_since(self, earlier: UnixMillis) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0))
    }
}

impl UnixTime {
    /// Time remaining from `self` until `later`, or `None` if `later` is not after `self`
    #[inline]
    pub fn until(self, later: UnixTime) -> Option<Duration> {
        later
            .0
            .checked_sub(self.0)
            .filter(|&secs| secs > 0)
            .map(Duration::from_secs)
    }
}

impl From<SystemTime> for UnixTime {
    #[inline]
    fn from(t: SystemTime) -> Self {
        UnixMillis::from(t).to_unix_time()
    }
}

impl From<SystemTime> for UnixMillis {
    #[inline]
    fn from(t: SystemTime) -> Self {
        // A clock set before the epoch is reported as the epoch itself.
        let millis = t
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();

        UnixMillis(millis)
    }
}

impl From<UnixTime> for UnixMillis {
    #[inline]
    fn from(t: UnixTime) -> Self {
        UnixMillis(t.0.saturating_mul(1000))
    }
}

impl ops::Add<Duration> for UnixTime {
    type Output = UnixTime;

    #[inline]
    fn add(self, rhs: Duration) -> Self::Output {
        UnixTime(self.0.saturating_add(rhs.as_secs()))
    }
}

impl ops::Sub<Duration> for UnixTime {
    type Output = UnixTime;

    #[inline]
    fn sub(self, rhs: Duration) -> Self::Output {
        UnixTime(self.0.saturating_sub(rhs.as_secs()))
    }
}

impl ops::Add<Duration> for UnixMillis {
    type Output = UnixMillis;

    #[inline]
    fn add(self, rhs: Duration) -> Self::Output {
        UnixMillis(self.0.saturating_add(rhs.as_millis() as u64))
    }
}

impl ops::Sub<Duration> for UnixMillis {
    type Output = UnixMillis;

    #[inline]
    fn sub(self, rhs: Duration) -> Self::Output {
        UnixMillis(self.0.saturating_sub(rhs.as_millis() as u64))
    }
}

impl fmt::Display for UnixTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl fmt::Display for UnixMillis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for UnixMillis {
    type Err = std::num::ParseIntError;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(UnixMillis)
    }
}

#[cfg(feature = "serde")]
#[cfg_attr(docsrs, doc(cfg(feature = "serde")))]
impl Serialize for UnixTime {
    #[inline]
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

#[cfg(feature = "serde")]
#[cfg_attr(docsrs, doc(cfg(feature = "serde")))]
impl<'de> Deserialize<'de> for UnixTime {
    #[inline]
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = u64::deserialize(deserializer)?;
        Ok(Self(s))
    }
}

#[cfg(feature = "serde")]
#[cfg_attr(docsrs, doc(cfg(feature = "serde")))]
impl Serialize for UnixMillis {
    #[inline]
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

#[cfg(feature = "serde")]
#[cfg_attr(docsrs, doc(cfg(feature = "serde")))]
impl<'de> Deserialize<'de> for UnixMillis {
    #[inline]
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = u64::deserialize(deserializer)?;
        Ok(Self(s))
    }
}

/// Represents a clock, which can tell the current time
pub trait Clock {
    /// Gets the current time, with millisecond precision, according to this clock
    fn now_millis(&self) -> UnixMillis;

    /// Gets the current time according to this clock
    #[inline]
    fn now(&self) -> UnixTime {
        self.now_millis().to_unix_time()
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    #[inline]
    fn now_millis(&self) -> UnixMillis {
        (**self).now_millis()
    }
}

impl<C: Clock + ?Sized> Clock for Box<C> {
    #[inline]
    fn now_millis(&self) -> UnixMillis {
        (**self).now_millis()
    }
}

/// The system clock as provided by `std::time::SystemTime`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct System;

impl Clock for System {
    #[inline]
    fn now_millis(&self) -> UnixMillis {
        UnixMillis::from(SystemTime::now())
    }
}

/// A test clock which maintains the current time as shared internal state
///
/// Clones observe the same time, so a test can keep one handle while
/// the code under test owns another.
#[derive(Clone, Debug, Default)]
pub struct TestClock(Arc<AtomicU64>);

impl Clock for TestClock {
    #[inline]
    fn now_millis(&self) -> UnixMillis {
        UnixMillis(self.0.load(Ordering::Acquire))
    }
}

impl TestClock {
    /// Creates a new test clock with the specified time
    pub fn new(time: impl Into<UnixMillis>) -> Self {
        Self(Arc::new(AtomicU64::new(time.into().0)))
    }

    /// Updates the clock's current time to `val`
    pub fn set(&self, val: impl Into<UnixMillis>) {
        self.0.store(val.into().0, Ordering::Release);
    }

    /// Moves the clock's current time forward by `inc`
    pub fn advance(&self, inc: Duration) {
        self.0.fetch_add(inc.as_millis() as u64, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn millis_truncate_to_seconds() {
        assert_eq!(UnixMillis(1_999).to_unix_time(), UnixTime(1));
        assert_eq!(UnixMillis::from(UnixTime(7)), UnixMillis(7_000));
    }

    #[test]
    fn saturating_since_never_goes_negative() {
        let now = UnixMillis(10_000);
        assert_eq!(now.saturating_since(UnixMillis(4_000)), Duration::from_secs(6));
        assert_eq!(now.saturating_since(UnixMillis(12_000)), Duration::ZERO);
    }

    #[test]
    fn until_is_none_when_not_in_the_future() {
        assert_eq!(UnixTime(100).until(UnixTime(160)), Some(Duration::from_secs(60)));
        assert_eq!(UnixTime(100).until(UnixTime(100)), None);
        assert_eq!(UnixTime(100).until(UnixTime(40)), None);
    }

    #[test]
    fn parses_stored_millis() {
        assert_eq!(" 1700000000123 ".parse::<UnixMillis>(), Ok(UnixMillis(1_700_000_000_123)));
        assert!("yesterday".parse::<UnixMillis>().is_err());
    }

    #[test]
    fn test_clock_clones_share_time() {
        let clock = TestClock::new(UnixTime(1_000));
        let handle = clock.clone();

        handle.advance(Duration::from_secs(90));
        assert_eq!(clock.now(), UnixTime(1_090));

        handle.set(UnixMillis(5_500));
        assert_eq!(clock.now_millis(), UnixMillis(5_500));
        assert_eq!(clock.now(), UnixTime(5));
    }

    #[test]
    fn system_clock_is_after_the_epoch() {
        assert!(System.now() > UnixTime(0));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn serializes_as_bare_number() {
        let json = serde_json::to_string(&UnixTime(42)).unwrap();
        assert_eq!(json, "42");
        let back: UnixMillis = serde_json::from_str("42000").unwrap();
        assert_eq!(back, UnixMillis(42_000));
    }
}
