//! Value types shared by every pipeline stage.
//!
//! Everything here is built once per run and never mutated in place; stages
//! hand each other new vectors instead of editing shared tables.

use chrono::{DateTime, Datelike, Months, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::constants::DIMENSION_SEPARATOR;

/// A row as handed over by a source-specific parser
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRow {
    /// Local calendar date; may also carry a time of day and DST marker
    pub date: String,
    /// Hour indicator in the pipeline's hour convention
    #[serde(default)]
    pub period: Option<String>,
    /// Grouping dimension values, in configured order
    #[serde(default)]
    pub dimensions: Vec<String>,
    /// Reported value, `None` when the source cell was empty
    #[serde(default)]
    pub value: Option<f64>,
}

impl RawRow {
    pub fn new(
        date: impl Into<String>,
        period: Option<&str>,
        dimensions: Vec<String>,
        value: Option<f64>,
    ) -> Self {
        Self {
            date: date.into(),
            period: period.map(str::to_string),
            dimensions,
            value,
        }
    }

    /// Human-readable label of the raw timestamp, used in warnings
    pub fn timestamp_label(&self) -> String {
        match &self.period {
            Some(period) => format!("{} {}", self.date.trim(), period.trim()),
            None => self.date.trim().to_string(),
        }
    }
}

/// How the source labels an hourly interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HourConvention {
    /// 1..24, the label is the end of the interval
    #[default]
    HourEnding,
    /// 0..23, the label is the start of the interval
    HourBeginning,
}

impl HourConvention {
    /// Convert a labelled hour to an hour-beginning index.
    pub fn to_hour_beginning(&self, hour: u32) -> Option<u32> {
        match self {
            HourConvention::HourEnding => hour.checked_sub(1),
            HourConvention::HourBeginning => Some(hour),
        }
    }
}

impl FromStr for HourConvention {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace(['-', ' '], "_").as_str() {
            "hour_ending" | "he" => Ok(HourConvention::HourEnding),
            "hour_beginning" | "hb" => Ok(HourConvention::HourBeginning),
            other => Err(format!("unknown hour convention '{}'", other)),
        }
    }
}

/// Explicit marker some sources attach to the repeated fall-back hour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DstMarker {
    /// `d`: the first occurrence, still on daylight time
    Daylight,
    /// `s` or `*`: the second occurrence, back on standard time
    Standard,
}

/// Parsed local identity of a raw row
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimeKey {
    pub date: NaiveDate,
    /// Hour-beginning index; `None` for daily and monthly data
    pub hour: Option<u32>,
    pub dimensions: Vec<String>,
    pub marker: Option<DstMarker>,
}

/// A record on the canonical UTC axis
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRecord {
    pub instant: DateTime<Utc>,
    pub dimensions: Vec<String>,
    /// NaN when the source value was missing
    pub value: f64,
}

impl NormalizedRecord {
    pub fn new(dimensions: Vec<String>, instant: DateTime<Utc>, value: f64) -> Self {
        Self {
            instant,
            dimensions,
            value,
        }
    }

    pub fn key(&self) -> RecordKey {
        RecordKey {
            dimensions: self.dimensions.clone(),
            instant: self.instant,
        }
    }

    pub fn is_missing_value(&self) -> bool {
        self.value.is_nan()
    }
}

/// Join and ordering key: dimensions first, then instant
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey {
    pub dimensions: Vec<String>,
    pub instant: DateTime<Utc>,
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} at {}",
            format_dimensions(&self.dimensions),
            self.instant.format("%Y-%m-%dT%H:%MZ")
        )
    }
}

/// Render a dimension tuple the way warnings print it.
pub fn format_dimensions(dimensions: &[String]) -> String {
    if dimensions.is_empty() {
        "<all>".to_string()
    } else {
        dimensions.join(DIMENSION_SEPARATOR)
    }
}

/// Sampling frequency of a series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    #[default]
    Hourly,
    Daily,
    Monthly,
}

impl Frequency {
    /// First expected instant of a series whose earliest observation is `first`.
    pub fn anchor(&self, first: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Frequency::Hourly => first,
            Frequency::Daily => floating_midnight(first.date_naive()),
            Frequency::Monthly => {
                let date = first.date_naive();
                floating_midnight(date.with_day(1).unwrap_or(date))
            }
        }
    }

    /// The expected instant following `instant`.
    pub fn step(&self, instant: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Frequency::Hourly => instant.checked_add_signed(chrono::Duration::hours(1)),
            Frequency::Daily => instant.checked_add_signed(chrono::Duration::days(1)),
            Frequency::Monthly => instant.checked_add_months(Months::new(1)),
        }
    }

    pub fn is_hourly(&self) -> bool {
        matches!(self, Frequency::Hourly)
    }
}

impl FromStr for Frequency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "hourly" | "h" => Ok(Frequency::Hourly),
            "daily" | "d" => Ok(Frequency::Daily),
            "monthly" | "m" | "ms" => Ok(Frequency::Monthly),
            other => Err(format!("unknown frequency '{}'", other)),
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Frequency::Hourly => "hourly",
            Frequency::Daily => "daily",
            Frequency::Monthly => "monthly",
        };
        f.write_str(name)
    }
}

/// 00:00 of a calendar date on a UTC-labelled wall clock.
///
/// Daily and monthly series use this so their steps never drift across DST.
pub fn floating_midnight(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN))
}

/// Records sharing one dimension tuple, ordered by instant
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    key: Vec<String>,
    records: Vec<NormalizedRecord>,
}

impl Series {
    pub fn new(key: Vec<String>, mut records: Vec<NormalizedRecord>) -> Self {
        records.retain(|r| r.dimensions == key);
        records.sort_by(|a, b| a.instant.cmp(&b.instant));
        Self { key, records }
    }

    /// Split records into one series per dimension tuple, ordered by key.
    pub fn group(records: &[NormalizedRecord]) -> Vec<Series> {
        let mut groups: BTreeMap<Vec<String>, Vec<NormalizedRecord>> = BTreeMap::new();
        for record in records {
            groups
                .entry(record.dimensions.clone())
                .or_default()
                .push(record.clone());
        }
        groups
            .into_iter()
            .map(|(key, records)| Series::new(key, records))
            .collect()
    }

    pub fn key(&self) -> &[String] {
        &self.key
    }

    pub fn records(&self) -> &[NormalizedRecord] {
        &self.records
    }

    pub fn instants(&self) -> impl Iterator<Item = DateTime<Utc>> + '_ {
        self.records.iter().map(|r| r.instant)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Earliest and latest instant, if any.
    pub fn range(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        match (self.records.first(), self.records.last()) {
            (Some(first), Some(last)) => Some((first.instant, last.instant)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn test_hour_ending_shift() {
        assert_eq!(HourConvention::HourEnding.to_hour_beginning(1), Some(0));
        assert_eq!(HourConvention::HourEnding.to_hour_beginning(24), Some(23));
        assert_eq!(HourConvention::HourEnding.to_hour_beginning(0), None);
        assert_eq!(HourConvention::HourBeginning.to_hour_beginning(0), Some(0));
    }

    #[test]
    fn test_monthly_anchor_and_step() {
        let first = at(2024, 1, 31, 0);
        let anchor = Frequency::Monthly.anchor(first);
        assert_eq!(anchor, at(2024, 1, 1, 0));
        assert_eq!(Frequency::Monthly.step(anchor), Some(at(2024, 2, 1, 0)));
    }

    #[test]
    fn test_daily_anchor_is_midnight() {
        assert_eq!(Frequency::Daily.anchor(at(2024, 3, 10, 7)), at(2024, 3, 10, 0));
    }

    #[test]
    fn test_series_group_orders_by_key_and_instant() {
        let records = vec![
            NormalizedRecord::new(vec!["B".into()], at(2024, 1, 1, 1), 2.0),
            NormalizedRecord::new(vec!["A".into()], at(2024, 1, 1, 2), 1.0),
            NormalizedRecord::new(vec!["A".into()], at(2024, 1, 1, 0), 0.0),
        ];

        let groups = Series::group(&records);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].key(), &["A".to_string()]);
        assert_eq!(groups[0].range(), Some((at(2024, 1, 1, 0), at(2024, 1, 1, 2))));
        assert_eq!(groups[1].len(), 1);
    }

    #[test]
    fn test_frequency_parsing() {
        assert_eq!("Hourly".parse::<Frequency>(), Ok(Frequency::Hourly));
        assert_eq!("MS".parse::<Frequency>(), Ok(Frequency::Monthly));
        assert!("weekly".parse::<Frequency>().is_err());
    }
}
