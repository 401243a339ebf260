//! Quota Windows
//!
//! Fixed 60-second windows aligned to wall-clock minute boundaries.

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;

/// Length of a rate window in seconds
pub const WINDOW_SECS: i64 = 60;

/// Identifier of the minute window containing `now`
pub fn window_id(now: DateTime<Utc>) -> i64 {
    now.timestamp().div_euclid(WINDOW_SECS)
}

/// Start of a window
pub fn window_start(id: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(id * WINDOW_SECS, 0)
}

/// Time source for window accounting
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Start at the beginning of a window
    pub fn at_window_start(id: i64) -> Self {
        Self::new(window_start(id).unwrap_or_default())
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }

    pub fn advance(&self, by: TimeDelta) {
        let mut guard = self.now.lock();
        *guard += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_windows_align_to_minutes() {
        let start = DateTime::from_timestamp(1_700_000_040, 0).unwrap();
        let id = window_id(start);
        assert_eq!(window_start(id).unwrap(), start);

        let end = start + TimeDelta::seconds(59);
        assert_eq!(window_id(end), id);
        assert_eq!(window_id(end + TimeDelta::seconds(1)), id + 1);
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::at_window_start(1000);
        assert_eq!(window_id(clock.now()), 1000);

        clock.advance(TimeDelta::seconds(61));
        assert_eq!(window_id(clock.now()), 1001);
    }
}
