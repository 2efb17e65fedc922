//! Timestamps and the injectable clock.
//!
//! Event time is carried as milliseconds since the Unix epoch, matching what
//! upstream producers put on the wire (`timestamp_ms`, `ts_ms`). Engine time
//! (window ticks) comes from a [`Clock`], so tests drive it with
//! [`ManualClock`] instead of sleeping.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Milliseconds since the Unix epoch.
///
/// # Examples
///
/// ```
/// use kyrostream::Timestamp;
///
/// let start = Timestamp::from_millis(1_000);
/// let end = Timestamp::from_millis(8_000);
/// assert_eq!(end.seconds_since(start), 7.0);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// The Unix epoch.
    pub const EPOCH: Self = Self(0);

    #[must_use]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    #[must_use]
    pub const fn as_millis(self) -> i64 {
        self.0
    }

    /// Current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        Self(Utc::now().timestamp_millis())
    }

    /// Signed elapsed seconds from `earlier` to `self`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn seconds_since(self, earlier: Self) -> f64 {
        (self.0.saturating_sub(earlier.0)) as f64 / 1000.0
    }

    /// Elapsed duration from `earlier`, clamped at zero.
    #[must_use]
    pub fn duration_since(self, earlier: Self) -> Duration {
        let millis = self.0.saturating_sub(earlier.0).max(0);
        Duration::from_millis(u64::try_from(millis).unwrap_or(0))
    }

    /// Adds a duration, saturating at the representable maximum.
    #[must_use]
    pub fn saturating_add(self, d: Duration) -> Self {
        let millis = i64::try_from(d.as_millis()).unwrap_or(i64::MAX);
        Self(self.0.saturating_add(millis))
    }

    /// Converts to a chrono timestamp, if representable.
    #[must_use]
    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.0).single()
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self(dt.timestamp_millis())
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_datetime() {
            Some(dt) => write!(f, "{}", dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)),
            None => write!(f, "{}ms", self.0),
        }
    }
}

/// Source of engine time.
pub trait Clock: Send + Sync {
    /// Current time.
    fn now(&self) -> Timestamp;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// Manually advanced clock for deterministic tests and replays.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use kyrostream::time::{Clock, ManualClock};
/// use kyrostream::Timestamp;
///
/// let clock = ManualClock::new(Timestamp::from_millis(0));
/// clock.advance(Duration::from_secs(2));
/// assert_eq!(clock.now(), Timestamp::from_millis(2_000));
/// ```
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    #[must_use]
    pub fn new(start: Timestamp) -> Self {
        Self {
            millis: AtomicI64::new(start.as_millis()),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        let millis = i64::try_from(by.as_millis()).unwrap_or(i64::MAX);
        self.millis.fetch_add(millis, Ordering::AcqRel);
    }

    /// Jumps to an absolute time. Moving backwards is allowed; the tick
    /// schedule simply waits until the clock passes its next deadline again.
    pub fn set(&self, at: Timestamp) {
        self.millis.store(at.as_millis(), Ordering::Release);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_millis(self.millis.load(Ordering::Acquire))
    }
}

impl<C: Clock + ?Sized> Clock for std::sync::Arc<C> {
    fn now(&self) -> Timestamp {
        (**self).now()
    }
}

/// Fixed-interval tick deadlines.
///
/// `due` returns true at most once per elapsed interval, which is what makes
/// the window aggregation tumbling rather than sliding. If the clock skips
/// several intervals at once, a single tick is reported and the next
/// deadline is realigned to `now + interval`.
#[derive(Debug)]
pub struct TickSchedule {
    interval: Duration,
    next_due: Mutex<Timestamp>,
}

impl TickSchedule {
    #[must_use]
    pub fn new(interval: Duration, start: Timestamp) -> Self {
        Self {
            interval,
            next_due: Mutex::new(start.saturating_add(interval)),
        }
    }

    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns true (and schedules the next deadline) if a tick is due at `now`.
    pub fn due(&self, now: Timestamp) -> bool {
        // The guarded value is a plain timestamp, so a poisoned lock still holds a usable deadline.
        let mut next = self.next_due.lock().unwrap_or_else(PoisonError::into_inner);
        if now < *next {
            return false;
        }
        *next = now.saturating_add(self.interval);
        true
    }

    /// Next deadline.
    #[must_use]
    pub fn next_due(&self) -> Timestamp {
        *self.next_due.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seconds_since() {
        let a = Timestamp::from_millis(1_000);
        let b = Timestamp::from_millis(8_000);
        assert!((b.seconds_since(a) - 7.0).abs() < f64::EPSILON);
        assert!((a.seconds_since(b) + 7.0).abs() < f64::EPSILON);
        assert_eq!(a.duration_since(b), Duration::ZERO);
    }

    #[test]
    fn test_display_is_rfc3339() {
        let ts = Timestamp::from_millis(0);
        assert_eq!(ts.to_string(), "1970-01-01T00:00:00.000Z");
    }

    #[test]
    fn test_manual_clock_advance_and_set() {
        let clock = ManualClock::new(Timestamp::from_millis(100));
        clock.advance(Duration::from_millis(50));
        assert_eq!(clock.now().as_millis(), 150);
        clock.set(Timestamp::from_millis(10));
        assert_eq!(clock.now().as_millis(), 10);
    }

    #[test]
    fn test_tick_schedule_fires_once_per_interval() {
        let schedule = TickSchedule::new(Duration::from_secs(2), Timestamp::from_millis(0));
        assert!(!schedule.due(Timestamp::from_millis(1_999)));
        assert!(schedule.due(Timestamp::from_millis(2_000)));
        assert!(!schedule.due(Timestamp::from_millis(2_001)));
        assert!(!schedule.due(Timestamp::from_millis(3_999)));
        assert!(schedule.due(Timestamp::from_millis(4_000)));
    }

    #[test]
    fn test_tick_schedule_realigns_after_gap() {
        let schedule = TickSchedule::new(Duration::from_secs(1), Timestamp::from_millis(0));
        assert!(schedule.due(Timestamp::from_millis(10_500)));
        assert_eq!(schedule.next_due(), Timestamp::from_millis(11_500));
        assert!(!schedule.due(Timestamp::from_millis(11_000)));
    }

    #[test]
    fn test_tick_schedule_survives_poisoned_lock() {
        let schedule = std::sync::Arc::new(TickSchedule::new(Duration::from_secs(1), Timestamp::from_millis(0)));
        let held = std::sync::Arc::clone(&schedule);
        let crashed = std::thread::spawn(move || {
            let _guard = held.next_due.lock().unwrap();
            panic!("ticker crashed while holding the deadline");
        })
        .join();
        assert!(crashed.is_err());
        assert!(schedule.next_due.is_poisoned());

        assert_eq!(schedule.next_due(), Timestamp::from_millis(1_000));
        assert!(schedule.due(Timestamp::from_millis(1_000)));
        assert_eq!(schedule.next_due(), Timestamp::from_millis(2_000));
        assert!(!schedule.due(Timestamp::from_millis(1_500)));
    }
}
