//! Time sources.
//!
//! Everything that reads "now" goes through [`Clock`] so tests can drive the
//! state machine and the reaper with a [`ManualClock`].

use std::sync::Mutex;

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Utc};

/// A source of the current instant.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub const fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Moves the clock forward (or backward, for a negative duration).
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// The calendar day `now` falls on in the given offset.
pub fn calendar_date(now: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    now.with_timezone(&offset).date_naive()
}

/// Builds a fixed UTC offset from minutes east of UTC.
///
/// Returns `None` if the offset is outside ±24h.
pub fn offset_from_minutes(minutes: i32) -> Option<FixedOffset> {
    FixedOffset::east_opt(minutes.checked_mul(60)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(ts("2025-03-01T09:00:00Z"));
        clock.advance(Duration::seconds(90));
        assert_eq!(clock.now(), ts("2025-03-01T09:01:30Z"));
        clock.set(ts("2025-03-02T00:00:00Z"));
        assert_eq!(clock.now(), ts("2025-03-02T00:00:00Z"));
    }

    #[test]
    fn calendar_date_respects_offset() {
        let now = ts("2025-03-01T23:30:00Z");
        let utc = offset_from_minutes(0).unwrap();
        let plus_two = offset_from_minutes(120).unwrap();
        assert_eq!(calendar_date(now, utc).to_string(), "2025-03-01");
        assert_eq!(calendar_date(now, plus_two).to_string(), "2025-03-02");
    }

    #[test]
    fn offset_out_of_range_is_rejected() {
        assert!(offset_from_minutes(25 * 60).is_none());
        assert!(offset_from_minutes(i32::MAX).is_none());
    }
}
