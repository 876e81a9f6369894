//! Local-time normalizer: raw wall-clock rows onto the UTC axis.
//!
//! Hourly rows are grouped per (dimensions, local date) so DST days can be
//! resolved as a whole:
//!
//! - a spring-forward hour has no instant; rows for it are dropped and the
//!   day is recorded as an expected [`DstSkip`]
//! - a fall-back hour has two instants; rows are assigned by explicit `d`/`s`
//!   marker first, then by extract order
//! - a day numbered 1..25 (hour-beginning 0..24) on a 25-hour local day is
//!   read as elapsed hours since local midnight
//!
//! Daily and monthly rows are anchored at 00:00 of their calendar date (day 1
//! for monthly) on a floating clock.

pub mod hour_label;

use chrono::{DateTime, Datelike, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::domain::{
    floating_midnight, DstMarker, Frequency, HourConvention, NormalizedRecord, RawRow, RecordKey,
    TimeKey,
};
use crate::pipeline::processing::warning::Warning;
use hour_label::{parse_local_date, parse_period, split_timestamp};

/// A local hour that does not exist on a spring-forward date
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct DstSkip {
    pub dimensions: Vec<String>,
    pub date: NaiveDate,
    /// Hour-beginning index of the skipped local hour
    pub local_hour: u32,
    /// Whether the extract carried a row for the skipped hour
    pub row_dropped: bool,
}

/// Everything the normalizer hands to the next stages
#[derive(Debug, Clone, Default)]
pub struct NormalizationOutput {
    /// Unique per (dimensions, instant), sorted by that key
    pub records: Vec<NormalizedRecord>,
    pub dst_skips: Vec<DstSkip>,
    pub warnings: Vec<Warning>,
    /// Rows that produced no record (unparseable, duplicate or skipped hour)
    pub dropped_rows: usize,
}

/// A raw row that passed parsing, with its position in the extract
#[derive(Debug, Clone)]
struct ParsedRow {
    position: usize,
    key: TimeKey,
    value: f64,
}

/// Converts raw local rows to [`NormalizedRecord`]s in one named zone
#[derive(Debug, Clone)]
pub struct LocalTimeNormalizer {
    timezone: Tz,
    hour_convention: HourConvention,
    frequency: Frequency,
}

impl LocalTimeNormalizer {
    pub fn new(timezone: Tz, hour_convention: HourConvention, frequency: Frequency) -> Self {
        Self {
            timezone,
            hour_convention,
            frequency,
        }
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Normalize a whole extract. Bad rows are dropped with a warning; this
    /// never fails.
    pub fn normalize(&self, rows: &[RawRow]) -> NormalizationOutput {
        let mut output = NormalizationOutput::default();
        let mut parsed = Vec::with_capacity(rows.len());

        for (position, row) in rows.iter().enumerate() {
            match self.parse_row(position, row) {
                Some(parsed_row) => parsed.push(parsed_row),
                None => {
                    output.dropped_rows += 1;
                    output.warnings.push(Warning::source_data_missing(
                        &row.dimensions,
                        format!(
                            "Cannot parse local timestamp '{}' in row {} of {} data, row dropped",
                            row.timestamp_label(),
                            position,
                            crate::domain::format_dimensions(&row.dimensions)
                        ),
                    ));
                }
            }
        }

        let candidates = if self.frequency.is_hourly() {
            self.resolve_hourly(parsed, &mut output)
        } else {
            parsed
                .into_iter()
                .map(|row| {
                    let date = match self.frequency {
                        Frequency::Monthly => row.key.date.with_day(1).unwrap_or(row.key.date),
                        _ => row.key.date,
                    };
                    (floating_midnight(date), row)
                })
                .collect()
        };

        let mut unique: BTreeMap<RecordKey, f64> = BTreeMap::new();
        for (instant, row) in candidates {
            let key = RecordKey {
                dimensions: row.key.dimensions,
                instant,
            };
            if unique.contains_key(&key) {
                output.dropped_rows += 1;
                output
                    .warnings
                    .push(Warning::duplicate_timestamp(&key.dimensions, instant, "fresh"));
            } else {
                unique.insert(key, row.value);
            }
        }

        output.records = unique
            .into_iter()
            .map(|(key, value)| NormalizedRecord::new(key.dimensions, key.instant, value))
            .collect();
        output.dst_skips.sort();

        info!(
            "Normalized {} of {} rows ({} dropped, {} expected DST skips)",
            output.records.len(),
            rows.len(),
            output.dropped_rows,
            output.dst_skips.len()
        );

        output
    }

    fn parse_row(&self, position: usize, row: &RawRow) -> Option<ParsedRow> {
        let (date_text, period_text) = split_timestamp(row);
        let date = parse_local_date(date_text)?;

        let (hour, marker) = if self.frequency.is_hourly() {
            let label = parse_period(period_text?)?;
            let hour = self.hour_convention.to_hour_beginning(label.hour)?;
            if hour > 24 {
                return None;
            }
            (Some(hour), label.marker)
        } else {
            (None, None)
        };

        let value = row.value.filter(|v| v.is_finite()).unwrap_or(f64::NAN);

        Some(ParsedRow {
            position,
            key: TimeKey {
                date,
                hour,
                dimensions: row.dimensions.clone(),
                marker,
            },
            value,
        })
    }

    fn resolve_hourly(
        &self,
        parsed: Vec<ParsedRow>,
        output: &mut NormalizationOutput,
    ) -> Vec<(DateTime<Utc>, ParsedRow)> {
        let mut days: BTreeMap<(Vec<String>, NaiveDate), Vec<ParsedRow>> = BTreeMap::new();
        for row in parsed {
            days.entry((row.key.dimensions.clone(), row.key.date))
                .or_default()
                .push(row);
        }

        let mut resolved = Vec::new();
        for ((dimensions, date), rows) in days {
            let skipped = self.skipped_hours(date);
            let elapsed_numbering = rows.iter().any(|r| r.key.hour == Some(24));

            if elapsed_numbering && self.day_length_hours(date) == Some(25) {
                debug!("Reading {} {:?} as a 25-hour day", date, dimensions);
                match self.local_midnight(date) {
                    Some(midnight) => {
                        for row in rows {
                            let offset = chrono::Duration::hours(i64::from(row.key.hour.unwrap_or(0)));
                            resolved.push((midnight + offset, row));
                        }
                    }
                    None => {
                        output.dropped_rows += rows.len();
                        output.warnings.push(Warning::source_data_missing(
                            &dimensions,
                            format!("Local midnight of {} does not exist, {} rows dropped", date, rows.len()),
                        ));
                    }
                }
                continue;
            }

            let mut by_hour: BTreeMap<u32, Vec<ParsedRow>> = BTreeMap::new();
            for row in rows {
                match row.key.hour {
                    Some(hour) if hour < 24 => by_hour.entry(hour).or_default().push(row),
                    _ => {
                        output.dropped_rows += 1;
                        output.warnings.push(Warning::source_data_missing(
                            &dimensions,
                            format!(
                                "Hour-beginning index 24 on {} for {} data, but the local day has no 25th hour; row {} dropped",
                                date,
                                crate::domain::format_dimensions(&dimensions),
                                row.position
                            ),
                        ));
                    }
                }
            }

            for local_hour in &skipped {
                output.dst_skips.push(DstSkip {
                    dimensions: dimensions.clone(),
                    date,
                    local_hour: *local_hour,
                    row_dropped: by_hour.contains_key(local_hour),
                });
            }

            for (hour, hour_rows) in by_hour {
                let Some(local) = date.and_hms_opt(hour, 0, 0) else {
                    output.dropped_rows += hour_rows.len();
                    continue;
                };

                match self.timezone.from_local_datetime(&local) {
                    LocalResult::Single(instant) => {
                        resolved.extend(
                            hour_rows
                                .into_iter()
                                .map(|row| (instant.with_timezone(&Utc), row)),
                        );
                    }
                    LocalResult::Ambiguous(earlier, later) => {
                        resolved.extend(assign_ambiguous(
                            hour_rows,
                            earlier.with_timezone(&Utc),
                            later.with_timezone(&Utc),
                        ));
                    }
                    LocalResult::None => {
                        debug!(
                            "Dropping {} row(s) for nonexistent local hour {} on {}",
                            hour_rows.len(),
                            hour,
                            date
                        );
                        output.dropped_rows += hour_rows.len();
                    }
                }
            }
        }

        resolved
    }

    /// Hour-beginning indices that do not exist locally on `date`.
    fn skipped_hours(&self, date: NaiveDate) -> Vec<u32> {
        (0..24)
            .filter(|hour| {
                date.and_hms_opt(*hour, 0, 0)
                    .map(|local| matches!(self.timezone.from_local_datetime(&local), LocalResult::None))
                    .unwrap_or(false)
            })
            .collect()
    }

    fn local_midnight(&self, date: NaiveDate) -> Option<DateTime<Utc>> {
        self.timezone
            .from_local_datetime(&date.and_time(NaiveTime::MIN))
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
    }

    fn day_length_hours(&self, date: NaiveDate) -> Option<i64> {
        let start = self.local_midnight(date)?;
        let end = self.local_midnight(date.succ_opt()?)?;
        Some((end - start).num_hours())
    }
}

/// Assign rows sharing a repeated local hour to its two instants.
///
/// Marked rows take their slot first; unmarked rows fill what is left in
/// extract order. Leftovers come last and fall out as duplicates in the
/// caller, which keeps the first row seen per instant.
fn assign_ambiguous(
    rows: Vec<ParsedRow>,
    earlier: DateTime<Utc>,
    later: DateTime<Utc>,
) -> Vec<(DateTime<Utc>, ParsedRow)> {
    let mut earlier_slot: Option<ParsedRow> = None;
    let mut later_slot: Option<ParsedRow> = None;
    let mut unmarked = Vec::new();
    let mut extras = Vec::new();

    for row in rows {
        match row.key.marker {
            Some(DstMarker::Daylight) if earlier_slot.is_none() => earlier_slot = Some(row),
            Some(DstMarker::Standard) if later_slot.is_none() => later_slot = Some(row),
            Some(DstMarker::Daylight) => extras.push((earlier, row)),
            Some(DstMarker::Standard) => extras.push((later, row)),
            None => unmarked.push(row),
        }
    }

    for row in unmarked {
        if earlier_slot.is_none() {
            earlier_slot = Some(row);
        } else if later_slot.is_none() {
            later_slot = Some(row);
        } else {
            extras.push((later, row));
        }
    }

    let mut assigned = Vec::with_capacity(2 + extras.len());
    if let Some(row) = earlier_slot {
        assigned.push((earlier, row));
    }
    if let Some(row) = later_slot {
        assigned.push((later, row));
    }
    assigned.extend(extras);
    assigned
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::HashSet;

    fn normalizer(convention: HourConvention) -> LocalTimeNormalizer {
        LocalTimeNormalizer::new(chrono_tz::America::New_York, convention, Frequency::Hourly)
    }

    fn row(date: &str, period: &str, value: f64) -> RawRow {
        RawRow::new(date, Some(period), vec!["ZoneA".to_string()], Some(value))
    }

    fn utc(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn test_hour_ending_shifted_before_conversion() {
        let output = normalizer(HourConvention::HourEnding).normalize(&[row("2024-01-15", "1", 5.0)]);
        assert_eq!(output.records.len(), 1);
        // 00:00 EST
        assert_eq!(output.records[0].instant, utc(2024, 1, 15, 5));
    }

    #[test]
    fn test_fall_back_rows_get_consecutive_instants() {
        // HE2 on 2024-11-03 is local 01:00, which happens twice
        let rows = vec![
            row("2024-11-03", "1", 1.0),
            row("2024-11-03", "2", 2.0),
            row("2024-11-03", "2", 3.0),
            row("2024-11-03", "3", 4.0),
        ];
        let output = normalizer(HourConvention::HourEnding).normalize(&rows);

        let instants: Vec<_> = output.records.iter().map(|r| r.instant).collect();
        assert_eq!(
            instants,
            vec![utc(2024, 11, 3, 4), utc(2024, 11, 3, 5), utc(2024, 11, 3, 6), utc(2024, 11, 3, 7)]
        );
        assert_eq!(output.records[1].value, 2.0);
        assert_eq!(output.records[2].value, 3.0);
        assert!(output.warnings.is_empty());
    }

    #[test]
    fn test_fall_back_markers_override_row_order() {
        let rows = vec![row("2024-11-03", "01:00 s", 20.0), row("2024-11-03", "01:00d", 10.0)];
        let output = normalizer(HourConvention::HourBeginning).normalize(&rows);

        assert_eq!(output.records.len(), 2);
        assert_eq!(output.records[0].instant, utc(2024, 11, 3, 5));
        assert_eq!(output.records[0].value, 10.0);
        assert_eq!(output.records[1].instant, utc(2024, 11, 3, 6));
        assert_eq!(output.records[1].value, 20.0);
    }

    #[test]
    fn test_single_fall_back_row_takes_earlier_instant() {
        let output = normalizer(HourConvention::HourBeginning).normalize(&[row("2024-11-03", "1", 7.0)]);
        assert_eq!(output.records.len(), 1);
        assert_eq!(output.records[0].instant, utc(2024, 11, 3, 5));
    }

    #[test]
    fn test_spring_forward_hour_is_skipped_not_an_error() {
        // HE1, HE2, HE4: local 00:00, 01:00, 03:00; 02:00 does not exist
        let rows = vec![
            row("2024-03-10", "1", 1.0),
            row("2024-03-10", "2", 2.0),
            row("2024-03-10", "4", 4.0),
        ];
        let output = normalizer(HourConvention::HourEnding).normalize(&rows);

        let instants: Vec<_> = output.records.iter().map(|r| r.instant).collect();
        assert_eq!(instants, vec![utc(2024, 3, 10, 5), utc(2024, 3, 10, 6), utc(2024, 3, 10, 7)]);
        assert_eq!(output.dst_skips.len(), 1);
        assert_eq!(output.dst_skips[0].local_hour, 2);
        assert!(!output.dst_skips[0].row_dropped);
        assert!(output.warnings.is_empty());
    }

    #[test]
    fn test_row_for_nonexistent_hour_is_dropped() {
        let output = normalizer(HourConvention::HourEnding).normalize(&[row("2024-03-10", "3", 9.0)]);
        assert!(output.records.is_empty());
        assert_eq!(output.dropped_rows, 1);
        assert!(output.dst_skips[0].row_dropped);
    }

    #[test]
    fn test_twenty_five_hour_numbering() {
        let rows: Vec<RawRow> = (1..=25)
            .map(|he| row("2024-11-03", &he.to_string(), f64::from(he)))
            .collect();
        let output = normalizer(HourConvention::HourEnding).normalize(&rows);

        assert_eq!(output.records.len(), 25);
        assert_eq!(output.records[0].instant, utc(2024, 11, 3, 4));
        assert_eq!(output.records[24].instant, utc(2024, 11, 4, 4));
        assert!(output.warnings.is_empty());
    }

    #[test]
    fn test_unparseable_rows_are_isolated() {
        let rows = vec![
            row("2024-01-15", "1", 1.0),
            row("not a date", "2", 2.0),
            row("2024-01-15", "noon", 3.0),
            row("2024-01-15", "3", 4.0),
        ];
        let output = normalizer(HourConvention::HourEnding).normalize(&rows);

        assert_eq!(output.records.len(), 2);
        assert_eq!(output.dropped_rows, 2);
        assert_eq!(output.warnings.len(), 2);
        assert!(output
            .warnings
            .iter()
            .all(|w| w.kind == crate::pipeline::processing::warning::WarningKind::SourceDataMissing));
    }

    #[test]
    fn test_off_the_hour_labels_are_dropped_not_folded() {
        let rows = vec![
            row("2024-01-15", "07:00", 1.0),
            row("2024-01-15", "07:30", 2.0),
            row("2024-01-15", "08:45", 3.0),
        ];
        let output = normalizer(HourConvention::HourBeginning).normalize(&rows);

        assert_eq!(output.records.len(), 1);
        assert_eq!(output.records[0].instant, utc(2024, 1, 15, 12));
        assert_eq!(output.records[0].value, 1.0);
        assert_eq!(output.dropped_rows, 2);
        assert!(output
            .warnings
            .iter()
            .all(|w| w.kind == crate::pipeline::processing::warning::WarningKind::SourceDataMissing));
        assert_eq!(output.warnings.len(), 2);
    }

    #[test]
    fn test_duplicate_unambiguous_hour_keeps_first_row() {
        let rows = vec![row("2024-01-15", "5", 1.0), row("2024-01-15", "5", 2.0)];
        let output = normalizer(HourConvention::HourEnding).normalize(&rows);

        assert_eq!(output.records.len(), 1);
        assert_eq!(output.records[0].value, 1.0);
        assert_eq!(
            output.warnings[0].kind,
            crate::pipeline::processing::warning::WarningKind::DuplicateTimestamp
        );
    }

    #[test]
    fn test_no_duplicate_keys_for_messy_extract() {
        let mut rows = Vec::new();
        for date in ["2024-11-03", "2024-03-10", "2024-07-01"] {
            for he in 1..=24 {
                rows.push(row(date, &he.to_string(), 1.0));
                rows.push(row(date, &he.to_string(), 2.0));
                rows.push(row(date, &format!("{}:00s", he), 3.0));
            }
        }
        let output = normalizer(HourConvention::HourEnding).normalize(&rows);

        let keys: HashSet<_> = output.records.iter().map(|r| r.key()).collect();
        assert_eq!(keys.len(), output.records.len());
        assert_eq!(output.records.len() + output.dropped_rows, rows.len());
    }

    #[test]
    fn test_missing_value_becomes_nan() {
        let raw = RawRow::new("2024-01-15", Some("1"), vec!["ZoneA".to_string()], None);
        let output = normalizer(HourConvention::HourEnding).normalize(&[raw]);
        assert!(output.records[0].is_missing_value());
    }

    #[test]
    fn test_monthly_rows_anchor_to_first_day() {
        let normalizer = LocalTimeNormalizer::new(
            chrono_tz::America::New_York,
            HourConvention::HourEnding,
            Frequency::Monthly,
        );
        let rows = vec![RawRow::new("2024-02-15", None, vec!["ZoneA".to_string()], Some(1.0))];
        let output = normalizer.normalize(&rows);
        assert_eq!(output.records[0].instant, utc(2024, 2, 1, 0));
    }
}
