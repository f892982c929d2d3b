//! Working-hours window for the polling loop.
//!
//! The portal lives in a fixed-offset timezone and the worker may run in a
//! minimal container without tzdata, so the window is evaluated with an
//! explicit [`FixedOffset`] instead of the runtime's local timezone.

use chrono::{DateTime, Datelike, Duration, FixedOffset, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Weekday/time-of-day window in a fixed UTC offset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkingHours {
    pub start_hour: u32,
    pub start_minute: u32,
    pub end_hour: u32,
    pub end_minute: u32,
    /// Working weekdays, 0 = Sunday through 6 = Saturday.
    pub work_days: Vec<u8>,
    /// Portal timezone offset from UTC in hours (negative for west).
    pub utc_offset_hours: i32,
}

impl Default for WorkingHours {
    fn default() -> Self {
        // Monday through Friday, 07:40-18:00, UTC-3.
        Self {
            start_hour: 7,
            start_minute: 40,
            end_hour: 18,
            end_minute: 0,
            work_days: vec![1, 2, 3, 4, 5],
            utc_offset_hours: -3,
        }
    }
}

impl WorkingHours {
    fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_hours * 3600)
            .unwrap_or_else(|| FixedOffset::east_opt(0).expect("zero offset is valid"))
    }

    fn to_local(&self, now: DateTime<Utc>) -> DateTime<FixedOffset> {
        now.with_timezone(&self.offset())
    }

    fn is_work_day(&self, weekday_from_sunday: u8) -> bool {
        self.work_days.contains(&weekday_from_sunday)
    }

    fn start_minutes(&self) -> u32 {
        self.start_hour * 60 + self.start_minute
    }

    fn end_minutes(&self) -> u32 {
        self.end_hour * 60 + self.end_minute
    }

    /// Whether the given instant falls inside the window.
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        let local = self.to_local(now);
        let weekday = local.weekday().num_days_from_sunday() as u8;
        let minutes = local.hour() * 60 + local.minute();
        self.is_work_day(weekday) && minutes >= self.start_minutes() && minutes < self.end_minutes()
    }

    /// Time remaining until the next window opening.
    ///
    /// Zero when the window is currently open or when `work_days` is empty.
    pub fn until_next_open(&self, now: DateTime<Utc>) -> Duration {
        if self.contains(now) || self.work_days.is_empty() {
            return Duration::zero();
        }

        let local = self.to_local(now);
        for day_offset in 0..=7 {
            let date = match local.date_naive().checked_add_days(chrono::Days::new(day_offset)) {
                Some(date) => date,
                None => break,
            };
            if !self.is_work_day(date.weekday().num_days_from_sunday() as u8) {
                continue;
            }
            let start_naive = match date.and_hms_opt(self.start_hour, self.start_minute, 0) {
                Some(start) => start,
                None => continue,
            };
            if let Some(start) = self.offset().from_local_datetime(&start_naive).single() {
                if start > local {
                    return start - local;
                }
            }
        }
        Duration::zero()
    }
}

/// Render a countdown as a compact "1d 2h 3m" string.
pub fn format_countdown(duration: Duration) -> String {
    let total_minutes = duration.num_minutes().max(0);
    let days = total_minutes / (60 * 24);
    let hours = (total_minutes % (60 * 24)) / 60;
    let minutes = total_minutes % 60;

    let mut parts = Vec::new();
    if days > 0 {
        parts.push(format!("{days}d"));
    }
    if hours > 0 {
        parts.push(format!("{hours}h"));
    }
    if minutes > 0 || parts.is_empty() {
        parts.push(format!("{minutes}m"));
    }
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn weekday_inside_window() {
        let hours = WorkingHours::default();
        // 2026-01-05 is a Monday; 13:00 UTC is 10:00 local (UTC-3).
        assert!(hours.contains(utc(2026, 1, 5, 13, 0)));
    }

    #[test]
    fn before_start_and_after_end_are_outside() {
        let hours = WorkingHours::default();
        // 10:00 UTC on a Monday is 07:00 local, before the 07:40 start.
        assert!(!hours.contains(utc(2026, 1, 5, 10, 0)));
        // 21:30 UTC is 18:30 local, past the 18:00 end.
        assert!(!hours.contains(utc(2026, 1, 5, 21, 30)));
    }

    #[test]
    fn weekend_is_outside() {
        let hours = WorkingHours::default();
        // 2026-01-03 is a Saturday.
        assert!(!hours.contains(utc(2026, 1, 3, 13, 0)));
    }

    #[test]
    fn countdown_to_same_day_start() {
        let hours = WorkingHours::default();
        // Monday 07:00 local; window opens at 07:40.
        let wait = hours.until_next_open(utc(2026, 1, 5, 10, 0));
        assert_eq!(wait.num_minutes(), 40);
    }

    #[test]
    fn countdown_skips_the_weekend() {
        let hours = WorkingHours::default();
        // Friday 2026-01-02 at 19:00 local (22:00 UTC): next opening is Monday 07:40.
        let wait = hours.until_next_open(utc(2026, 1, 2, 22, 0));
        assert_eq!(wait.num_days(), 2);
        let remainder = wait - Duration::days(2);
        assert_eq!(remainder.num_minutes(), 12 * 60 + 40);
    }

    #[test]
    fn countdown_formatting() {
        assert_eq!(format_countdown(Duration::minutes(0)), "0m");
        assert_eq!(format_countdown(Duration::minutes(61)), "1h 1m");
        assert_eq!(
            format_countdown(Duration::minutes(2 * 24 * 60 + 125)),
            "2d 2h 5m"
        );
    }
}
