//! Timestamp formatting for frames and timeline entries
//!
//! Media positions render as `HH:MM:SS.mmm` (frame timestamps in the
//! database and export bundles); live timeline entries carry a
//! wall-clock `HH:MM:SS` prefix.

use chrono::{DateTime, Timelike, Utc};

/// Format a media position in milliseconds as `HH:MM:SS.mmm`.
///
/// # Examples
///
/// ```
/// use sv_common::time::format_media_timestamp;
///
/// assert_eq!(format_media_timestamp(0), "00:00:00.000");
/// assert_eq!(format_media_timestamp(29_000), "00:00:29.000");
/// assert_eq!(format_media_timestamp(3_725_042), "01:02:05.042");
/// ```
pub fn format_media_timestamp(ms: u64) -> String {
    let hours = ms / 3_600_000;
    let minutes = (ms % 3_600_000) / 60_000;
    let seconds = (ms % 60_000) / 1_000;
    let millis = ms % 1_000;
    format!("{:02}:{:02}:{:02}.{:03}", hours, minutes, seconds, millis)
}

/// Format a wall-clock instant as `HH:MM:SS` (UTC).
pub fn format_wall_clock(at: DateTime<Utc>) -> String {
    format!("{:02}:{:02}:{:02}", at.hour(), at.minute(), at.second())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_media_timestamp_zero() {
        assert_eq!(format_media_timestamp(0), "00:00:00.000");
    }

    #[test]
    fn test_media_timestamp_sub_second() {
        assert_eq!(format_media_timestamp(42), "00:00:00.042");
        assert_eq!(format_media_timestamp(999), "00:00:00.999");
    }

    #[test]
    fn test_media_timestamp_minutes_and_hours() {
        assert_eq!(format_media_timestamp(61_500), "00:01:01.500");
        assert_eq!(format_media_timestamp(3_600_000), "01:00:00.000");
        assert_eq!(format_media_timestamp(3_725_042), "01:02:05.042");
    }

    #[test]
    fn test_wall_clock() {
        let at = Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap();
        assert_eq!(format_wall_clock(at), "09:26:53");
    }
}
