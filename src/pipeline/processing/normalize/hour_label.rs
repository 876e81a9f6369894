//! Parsing of the local date and hour labels found in raw extracts.
//!
//! Sources disagree on layout: `"7"`, `"7.0"`, `"HE07"`, `"07:00"`, the odd
//! `"01::00s"`, or the time glued onto the date cell (`"11/6/2022  01:00 s"`).

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::constants::DATE_FORMATS;
use crate::domain::{DstMarker, RawRow};

static PERIOD_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:HE\s*)?(\d{1,2})(?:\.0+|:+00(?::00)?)?\s*([sd*])?$")
        .expect("period pattern compiles")
});

/// Hour label and optional DST marker, before any convention shift
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodLabel {
    pub hour: u32,
    pub marker: Option<DstMarker>,
}

/// Parse a local calendar date in any of the accepted layouts.
pub fn parse_local_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(trimmed, format).ok())
}

/// Parse an hour label such as `"HE07"`, `"01:00 s"` or `"2*"`.
pub fn parse_period(raw: &str) -> Option<PeriodLabel> {
    let captures = PERIOD_PATTERN.captures(raw.trim())?;
    let hour = captures.get(1)?.as_str().parse::<u32>().ok()?;
    let marker = captures.get(2).map(|m| match m.as_str() {
        "d" | "D" => DstMarker::Daylight,
        _ => DstMarker::Standard,
    });
    Some(PeriodLabel { hour, marker })
}

/// Split a raw row into its date text and its period text.
///
/// When the row has no period, whatever follows the date in the date cell is
/// used as the period.
pub fn split_timestamp(row: &RawRow) -> (&str, Option<&str>) {
    let trimmed = row.date.trim();
    let (date_part, rest) = match trimmed.split_once(char::is_whitespace) {
        Some((date, rest)) => (date, Some(rest.trim()).filter(|r| !r.is_empty())),
        None => (trimmed, None),
    };

    let period = row
        .period
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .or(rest);

    (date_part, period)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_local_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2022, 11, 6).unwrap();
        assert_eq!(parse_local_date("2022-11-06"), Some(expected));
        assert_eq!(parse_local_date("11/6/2022"), Some(expected));
        assert_eq!(parse_local_date("11-06-2022"), Some(expected));
        assert_eq!(parse_local_date("2022/11/06"), Some(expected));
        assert_eq!(parse_local_date("Nov 6"), None);
    }

    #[test]
    fn test_parse_period_variants() {
        let plain = PeriodLabel { hour: 7, marker: None };
        assert_eq!(parse_period("7"), Some(plain));
        assert_eq!(parse_period("7.0"), Some(plain));
        assert_eq!(parse_period("HE07"), Some(plain));
        assert_eq!(parse_period("he 7"), Some(plain));
        assert_eq!(parse_period("07:00"), Some(plain));
        assert_eq!(parse_period("07:00:00"), Some(plain));
    }

    #[test]
    fn test_parse_period_rejects_sub_hour_minutes() {
        assert_eq!(parse_period("08:45"), None);
        assert_eq!(parse_period("07:30"), None);
        assert_eq!(parse_period("07:00:30"), None);
    }

    #[test]
    fn test_parse_period_markers() {
        assert_eq!(
            parse_period("01:00 s"),
            Some(PeriodLabel { hour: 1, marker: Some(DstMarker::Standard) })
        );
        assert_eq!(
            parse_period("03:00d"),
            Some(PeriodLabel { hour: 3, marker: Some(DstMarker::Daylight) })
        );
        assert_eq!(
            parse_period("01::00s"),
            Some(PeriodLabel { hour: 1, marker: Some(DstMarker::Standard) })
        );
        assert_eq!(
            parse_period("2*"),
            Some(PeriodLabel { hour: 2, marker: Some(DstMarker::Standard) })
        );
        assert_eq!(parse_period("noon"), None);
    }

    #[test]
    fn test_split_timestamp_uses_date_cell_time() {
        let row = RawRow::new("11/6/2022  01:00 s", None, vec![], Some(1.0));
        assert_eq!(split_timestamp(&row), ("11/6/2022", Some("01:00 s")));

        let row = RawRow::new("2022-11-06", Some(" 2 "), vec![], Some(1.0));
        assert_eq!(split_timestamp(&row), ("2022-11-06", Some("2")));

        let row = RawRow::new("2022-11-06", None, vec![], None);
        assert_eq!(split_timestamp(&row), ("2022-11-06", None));
    }
}
