//! Market Hours Gate
//!
//! Decides whether ingestion cycles may run at a given instant. The window
//! is half-open on whole local hours: open at `open_hour:00`, closed from
//! `close_hour:00` on.

use chrono::{DateTime, Timelike, Utc};
use chrono_tz::Tz;

/// Invalid market-hours bounds.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    /// Open hour outside 0..=23.
    #[error("open hour {0} is outside 0..=23")]
    InvalidOpenHour(u32),
    /// Close hour outside 1..=24.
    #[error("close hour {0} is outside 1..=24")]
    InvalidCloseHour(u32),
    /// Window is empty or inverted.
    #[error("open hour {open} must be before close hour {close}")]
    EmptyWindow {
        /// Open hour.
        open: u32,
        /// Close hour.
        close: u32,
    },
}

/// Trading window in a market's local time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarketHours {
    timezone: Tz,
    open_hour: u32,
    close_hour: u32,
}

impl MarketHours {
    /// Create a window `[open_hour, close_hour)` in `timezone`.
    ///
    /// # Errors
    ///
    /// Returns an error if the hours are out of range or not increasing.
    pub const fn new(timezone: Tz, open_hour: u32, close_hour: u32) -> Result<Self, ScheduleError> {
        if open_hour > 23 {
            return Err(ScheduleError::InvalidOpenHour(open_hour));
        }
        if close_hour == 0 || close_hour > 24 {
            return Err(ScheduleError::InvalidCloseHour(close_hour));
        }
        if open_hour >= close_hour {
            return Err(ScheduleError::EmptyWindow {
                open: open_hour,
                close: close_hour,
            });
        }
        Ok(Self {
            timezone,
            open_hour,
            close_hour,
        })
    }

    /// Window covering the whole day.
    #[must_use]
    pub const fn always_open(timezone: Tz) -> Self {
        Self {
            timezone,
            open_hour: 0,
            close_hour: 24,
        }
    }

    /// Whether `now` falls inside the window.
    #[must_use]
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        let hour = now.with_timezone(&self.timezone).hour();
        hour >= self.open_hour && hour < self.close_hour
    }

    /// Market timezone.
    #[must_use]
    pub const fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Opening hour.
    #[must_use]
    pub const fn open_hour(&self) -> u32 {
        self.open_hour
    }

    /// Closing hour (exclusive).
    #[must_use]
    pub const fn close_hour(&self) -> u32 {
        self.close_hour
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono_tz::America::Argentina::Buenos_Aires;
    use test_case::test_case;

    fn byma() -> MarketHours {
        MarketHours::new(Buenos_Aires, 11, 17).unwrap()
    }

    fn local(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Buenos_Aires
            .with_ymd_and_hms(2025, 10, 16, h, m, s)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test_case(10, 59, 59, false ; "just before open")]
    #[test_case(11, 0, 0, true ; "exactly at open")]
    #[test_case(14, 30, 0, true ; "midday")]
    #[test_case(16, 59, 59, true ; "last second")]
    #[test_case(17, 0, 0, false ; "exactly at close")]
    #[test_case(23, 0, 0, false ; "night")]
    fn window_is_half_open(h: u32, m: u32, s: u32, expected: bool) {
        assert_eq!(byma().is_open(local(h, m, s)), expected);
    }

    #[test]
    fn hours_are_local_not_utc() {
        // 14:00 UTC is 11:00 in Buenos Aires.
        let at = Utc.with_ymd_and_hms(2025, 10, 16, 14, 0, 0).unwrap();
        assert!(byma().is_open(at));
        let at = Utc.with_ymd_and_hms(2025, 10, 16, 11, 0, 0).unwrap();
        assert!(!byma().is_open(at));
    }

    #[test]
    fn always_open_covers_midnight() {
        let gate = MarketHours::always_open(Buenos_Aires);
        assert!(gate.is_open(local(0, 0, 0)));
        assert!(gate.is_open(local(23, 59, 59)));
    }

    #[test]
    fn invalid_bounds_are_rejected() {
        assert_eq!(
            MarketHours::new(Buenos_Aires, 24, 24),
            Err(ScheduleError::InvalidOpenHour(24))
        );
        assert_eq!(
            MarketHours::new(Buenos_Aires, 10, 25),
            Err(ScheduleError::InvalidCloseHour(25))
        );
        assert_eq!(
            MarketHours::new(Buenos_Aires, 17, 11),
            Err(ScheduleError::EmptyWindow {
                open: 17,
                close: 11
            })
        );
    }
}
