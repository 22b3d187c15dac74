//! Countdown for the kata in focus.
//!
//! Readings are always recomputed from wall-clock time against the kata's end,
//! never accumulated, so a process that sleeps and wakes still shows the right
//! remaining time.

use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;

/// Recompute cadence for the focus display.
pub const TICK: Duration = Duration::from_secs(1);

/// Full-bar reference for the progress gauge (two hours).
pub const PROGRESS_SPAN_SECS: u64 = 7200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Urgency {
    /// More than 30 minutes left.
    Calm,
    /// More than 10 minutes left.
    Focused,
    /// Ten minutes or less.
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerReading {
    pub hours: u64,
    pub minutes: u64,
    pub seconds: u64,
    pub total_seconds: u64,
    pub is_expired: bool,
}

impl TimerReading {
    pub const EXPIRED: TimerReading = TimerReading {
        hours: 0,
        minutes: 0,
        seconds: 0,
        total_seconds: 0,
        is_expired: true,
    };

    pub fn at(end: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        let remaining_ms = (end - now).num_milliseconds();
        if remaining_ms <= 0 {
            return Self::EXPIRED;
        }

        let total = u64::try_from(remaining_ms / 1000).unwrap_or(0);
        Self {
            hours: total / 3600,
            minutes: (total % 3600) / 60,
            seconds: total % 60,
            total_seconds: total,
            is_expired: false,
        }
    }

    pub fn urgency(&self) -> Urgency {
        match self.total_seconds {
            t if t > 1800 => Urgency::Calm,
            t if t > 600 => Urgency::Focused,
            _ => Urgency::Critical,
        }
    }

    /// Remaining share of the two-hour reference bar, in `[0, 1]`.
    pub fn progress(&self) -> f64 {
        let ratio = self.total_seconds as f64 / PROGRESS_SPAN_SECS as f64;
        ratio.min(1.0)
    }
}

impl fmt::Display for TimerReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}:{:02}", self.hours, self.minutes, self.seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 10, 0, 0).unwrap()
    }

    #[test]
    fn splits_remaining_time() {
        let end = now() + ChronoDuration::seconds(3725);
        let r = TimerReading::at(end, now());
        assert_eq!((r.hours, r.minutes, r.seconds), (1, 2, 5));
        assert_eq!(r.to_string(), "01:02:05");
        assert!(!r.is_expired);
        assert_eq!(r.urgency(), Urgency::Calm);
    }

    #[test]
    fn past_end_is_expired() {
        let r = TimerReading::at(now(), now());
        assert_eq!(r, TimerReading::EXPIRED);
        assert_eq!(r.to_string(), "00:00:00");

        let late = TimerReading::at(now() - ChronoDuration::minutes(5), now());
        assert!(late.is_expired);
    }

    #[test]
    fn sub_second_remainder_truncates() {
        let end = now() + ChronoDuration::milliseconds(1500);
        let r = TimerReading::at(end, now());
        assert_eq!(r.total_seconds, 1);
        assert!(!r.is_expired);
    }

    #[test]
    fn urgency_bands() {
        let band = |secs| TimerReading::at(now() + ChronoDuration::seconds(secs), now()).urgency();
        assert_eq!(band(1801), Urgency::Calm);
        assert_eq!(band(1800), Urgency::Focused);
        assert_eq!(band(601), Urgency::Focused);
        assert_eq!(band(600), Urgency::Critical);
    }

    #[test]
    fn progress_caps_at_full_bar() {
        let long = TimerReading::at(now() + ChronoDuration::hours(3), now());
        assert_eq!(long.progress(), 1.0);
        let half = TimerReading::at(now() + ChronoDuration::hours(1), now());
        assert!((half.progress() - 0.5).abs() < 1e-9);
    }
}
