//! Calendar helpers for episode titles, feed dates and the daily timer.
//!
//! Everything is UTC and computed from Unix seconds with civil-date
//! arithmetic, so no timezone database is needed.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

const WEEKDAYS_SV: [&str; 7] = [
    "måndag", "tisdag", "onsdag", "torsdag", "fredag", "lördag", "söndag",
];

const MONTHS_SV: [&str; 12] = [
    "januari", "februari", "mars", "april", "maj", "juni",
    "juli", "augusti", "september", "oktober", "november", "december",
];

const WEEKDAYS_EN: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

const MONTHS_EN: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// A broken-down UTC timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CivilTime {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
    pub second: u32,
    /// Monday = 0.
    pub weekday: u32,
}

impl CivilTime {
    pub fn from_unix(secs: u64) -> Self {
        let days = (secs / 86_400) as i64;
        let rem = secs % 86_400;
        let (year, month, day) = days_to_date(days);
        // 1970-01-01 was a Thursday.
        let weekday = ((days + 3).rem_euclid(7)) as u32;
        Self {
            year,
            month,
            day,
            hour: (rem / 3600) as u32,
            minute: ((rem % 3600) / 60) as u32,
            second: (rem % 60) as u32,
            weekday,
        }
    }

    /// `2026-10-17T06:00:00Z`
    pub fn iso8601(&self) -> String {
        format!(
            "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )
    }

    /// `Sat, 17 Oct 2026 06:00:00 +0000`
    pub fn rfc2822(&self) -> String {
        format!(
            "{}, {:02} {} {:04} {:02}:{:02}:{:02} +0000",
            WEEKDAYS_EN[self.weekday as usize],
            self.day,
            MONTHS_EN[(self.month - 1) as usize],
            self.year,
            self.hour,
            self.minute,
            self.second
        )
    }

    /// `lördag den 17 oktober 2026`
    pub fn swedish_long(&self) -> String {
        format!(
            "{} den {} {} {}",
            WEEKDAYS_SV[self.weekday as usize],
            self.day,
            MONTHS_SV[(self.month - 1) as usize],
            self.year
        )
    }

    /// `17 oktober 2026`
    pub fn swedish_short(&self) -> String {
        format!(
            "{} {} {}",
            self.day,
            MONTHS_SV[(self.month - 1) as usize],
            self.year
        )
    }

    pub fn swedish_weekday(&self) -> &'static str {
        WEEKDAYS_SV[self.weekday as usize]
    }

    /// `20261017`
    pub fn compact_date(&self) -> String {
        format!("{:04}{:02}{:02}", self.year, self.month, self.day)
    }

    /// `2026-10-17`
    pub fn iso_date(&self) -> String {
        format!("{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }

    /// `060000`
    pub fn compact_time(&self) -> String {
        format!("{:02}{:02}{:02}", self.hour, self.minute, self.second)
    }
}

/// Current Unix time in seconds.
pub fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Convert days since Unix epoch to (year, month, day).
fn days_to_date(days: i64) -> (i32, u32, u32) {
    // Algorithm from Howard Hinnant
    let z = days + 719468;
    let era = if z >= 0 { z } else { z - 146096 } / 146097;
    let doe = (z - era * 146097) as u32;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m = if mp < 10 { mp + 3 } else { mp - 9 };
    let y = if m <= 2 { y + 1 } else { y };
    (y as i32, m, d)
}

/// Parse `"HH:MM"` into (hour, minute).
pub fn parse_time_of_day(value: &str) -> Result<(u32, u32)> {
    let (h, m) = value
        .trim()
        .split_once(':')
        .with_context(|| format!("Expected HH:MM, got '{}'", value))?;
    let hour: u32 = h.parse().with_context(|| format!("Bad hour in '{}'", value))?;
    let minute: u32 = m.parse().with_context(|| format!("Bad minute in '{}'", value))?;
    if hour > 23 || minute > 59 {
        bail!("Time of day out of range: '{}'", value);
    }
    Ok((hour, minute))
}

/// Seconds from `now` until the next occurrence of `hour:minute` UTC.
///
/// Returns a full day when `now` is exactly on the target.
pub fn seconds_until(now: u64, hour: u32, minute: u32) -> u64 {
    let target = (hour as u64) * 3600 + (minute as u64) * 60;
    let today = now % 86_400;
    if target > today {
        target - today
    } else {
        86_400 - today + target
    }
}

/// Format whole seconds as `HH:MM:SS`.
pub fn format_duration(total_secs: u64) -> String {
    format!(
        "{:02}:{:02}:{:02}",
        total_secs / 3600,
        (total_secs % 3600) / 60,
        total_secs % 60
    )
}

/// Create a unique run directory like `2026-10-17-episode-12` inside root.
///
/// Handles collisions by appending -2, -3, etc.
pub fn create_run_dir(root: &Path, now: u64, label: &str) -> Result<PathBuf> {
    let base_name = format!("{}-{}", CivilTime::from_unix(now).iso_date(), label);

    let candidate = root.join(&base_name);
    if !candidate.exists() {
        std::fs::create_dir_all(&candidate)
            .with_context(|| format!("Failed to create run dir: {}", candidate.display()))?;
        return Ok(candidate);
    }

    let mut counter = 2u32;
    loop {
        let candidate = root.join(format!("{}-{}", base_name, counter));
        if !candidate.exists() {
            std::fs::create_dir_all(&candidate)
                .with_context(|| format!("Failed to create run dir: {}", candidate.display()))?;
            return Ok(candidate);
        }
        counter += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2026-10-17 06:30:15 UTC
    const SAMPLE: u64 = 1_792_218_615;

    #[test]
    fn test_days_to_date() {
        // 2024-01-01 = 19723 days since epoch
        let (y, m, d) = days_to_date(19723);
        assert_eq!((y, m, d), (2024, 1, 1));
    }

    #[test]
    fn test_civil_time_fields() {
        let t = CivilTime::from_unix(SAMPLE);
        assert_eq!((t.year, t.month, t.day), (2026, 10, 17));
        assert_eq!((t.hour, t.minute, t.second), (6, 30, 15));
        assert_eq!(t.swedish_weekday(), "lördag");
    }

    #[test]
    fn test_epoch_is_thursday() {
        let t = CivilTime::from_unix(0);
        assert_eq!(t.weekday, 3);
        assert_eq!(t.rfc2822(), "Thu, 01 Jan 1970 00:00:00 +0000");
    }

    #[test]
    fn test_formats() {
        let t = CivilTime::from_unix(SAMPLE);
        assert_eq!(t.iso8601(), "2026-10-17T06:30:15Z");
        assert_eq!(t.rfc2822(), "Sat, 17 Oct 2026 06:30:15 +0000");
        assert_eq!(t.swedish_long(), "lördag den 17 oktober 2026");
        assert_eq!(t.swedish_short(), "17 oktober 2026");
        assert_eq!(t.compact_date(), "20261017");
        assert_eq!(t.compact_time(), "063015");
    }

    #[test]
    fn test_parse_time_of_day() {
        assert_eq!(parse_time_of_day("06:00").unwrap(), (6, 0));
        assert_eq!(parse_time_of_day(" 23:59 ").unwrap(), (23, 59));
        assert!(parse_time_of_day("24:00").is_err());
        assert!(parse_time_of_day("0600").is_err());
        assert!(parse_time_of_day("ab:cd").is_err());
    }

    #[test]
    fn test_seconds_until() {
        let midnight = 86_400 * 100;
        assert_eq!(seconds_until(midnight, 6, 0), 6 * 3600);
        // Already past today's slot: wait until tomorrow.
        assert_eq!(seconds_until(midnight + 7 * 3600, 6, 0), 23 * 3600);
        assert_eq!(seconds_until(midnight + 6 * 3600, 6, 0), 86_400);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0), "00:00:00");
        assert_eq!(format_duration(725), "00:12:05");
        assert_eq!(format_duration(3661), "01:01:01");
    }

    #[test]
    fn test_create_run_dir_collision() {
        let root = tempfile::tempdir().unwrap();
        let dir1 = create_run_dir(root.path(), SAMPLE, "episode-3").unwrap();
        let dir2 = create_run_dir(root.path(), SAMPLE, "episode-3").unwrap();
        assert_ne!(dir1, dir2);
        assert!(dir1.ends_with("2026-10-17-episode-3"));
        assert!(dir2.to_string_lossy().ends_with("-2"));
        assert!(dir2.is_dir());
    }
}
