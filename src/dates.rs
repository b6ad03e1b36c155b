use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Utc, Weekday};
use chrono_tz::Tz;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DateError {
    #[error("date must not be empty")]
    Empty,
    #[error("unrecognized date {0:?}; expected YYYY-MM-DD or an RFC 3339 timestamp")]
    Unrecognized(String),
}

/// Normalizes a wire date to a calendar date in the reference time zone.
///
/// Accepts `YYYY-MM-DD`, RFC 3339 timestamps (converted into `tz` before the
/// time is dropped) and naive `YYYY-MM-DDTHH:MM:SS[.fff]` (already `tz`-local).
pub fn parse_wire_date(raw: &str, tz: Tz) -> Result<NaiveDate, DateError> {
    let t = raw.trim();
    if t.is_empty() {
        return Err(DateError::Empty);
    }
    if let Ok(d) = NaiveDate::parse_from_str(t, "%Y-%m-%d") {
        return Ok(d);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(t) {
        return Ok(dt.with_timezone(&tz).date_naive());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(t, fmt) {
            return Ok(ndt.date());
        }
    }
    Err(DateError::Unrecognized(t.to_string()))
}

pub fn format_date(d: NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

/// Start of the current day in the reference time zone.
pub fn today_in(tz: Tz) -> NaiveDate {
    Utc::now().with_timezone(&tz).date_naive()
}

pub fn is_sunday(d: NaiveDate) -> bool {
    d.weekday() == Weekday::Sun
}

/// Inclusive ascending range. Empty when `start > end`.
pub fn date_range(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    if start > end {
        return Vec::new();
    }
    start.iter_days().take_while(|d| *d <= end).collect()
}

pub fn parse_timezone(name: &str) -> Result<Tz, String> {
    name.trim()
        .parse::<Tz>()
        .map_err(|e| format!("unknown time zone {:?}: {}", name, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).expect("valid date")
    }

    #[test]
    fn plain_dates_pass_through() {
        assert_eq!(parse_wire_date("2024-01-07", Tz::UTC), Ok(d(2024, 1, 7)));
        assert_eq!(parse_wire_date(" 2024-01-08 ", Tz::UTC), Ok(d(2024, 1, 8)));
    }

    #[test]
    fn timestamps_normalize_in_reference_zone() {
        // 18:30Z on the 7th is already the 8th in Kolkata.
        let tz = parse_timezone("Asia/Kolkata").expect("tz");
        assert_eq!(parse_wire_date("2024-01-07T18:30:00Z", tz), Ok(d(2024, 1, 8)));
        assert_eq!(
            parse_wire_date("2024-01-07T18:30:00Z", Tz::UTC),
            Ok(d(2024, 1, 7))
        );
        assert_eq!(
            parse_wire_date("2024-01-07T23:59:59.500", tz),
            Ok(d(2024, 1, 7))
        );
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_wire_date("", Tz::UTC), Err(DateError::Empty));
        assert!(matches!(
            parse_wire_date("07/01/2024", Tz::UTC),
            Err(DateError::Unrecognized(_))
        ));
    }

    #[test]
    fn range_is_inclusive_and_empty_when_reversed() {
        let r = date_range(d(2024, 1, 30), d(2024, 2, 2));
        assert_eq!(
            r,
            vec![d(2024, 1, 30), d(2024, 1, 31), d(2024, 2, 1), d(2024, 2, 2)]
        );
        assert_eq!(date_range(d(2024, 1, 7), d(2024, 1, 7)), vec![d(2024, 1, 7)]);
        assert!(date_range(d(2024, 1, 8), d(2024, 1, 7)).is_empty());
    }

    #[test]
    fn sunday_detection() {
        assert!(is_sunday(d(2024, 1, 7)));
        assert!(!is_sunday(d(2024, 1, 8)));
    }
}
