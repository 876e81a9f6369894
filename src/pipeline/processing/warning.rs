use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::constants::NO_WARNINGS_MARKER;
use crate::domain::format_dimensions;

/// Classification of a warning, used by operators to triage a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum WarningKind {
    /// Raw data could not be turned into a record, or a group is too thin to check
    SourceDataMissing,
    /// More than one row competed for the same instant
    DuplicateTimestamp,
    /// An expected periodic instant is absent
    ContinuityGap,
    /// A normalized record carries no value
    MissingValue,
    /// Fresh and persisted values differ by more than the tolerance
    ValueMismatch,
    /// Fresh and persisted data disagree about which range they cover
    RangeConflict,
    /// Informational marker for a clean run
    NoWarnings,
}

impl fmt::Display for WarningKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WarningKind::SourceDataMissing => "SourceDataMissing",
            WarningKind::DuplicateTimestamp => "DuplicateTimestamp",
            WarningKind::ContinuityGap => "ContinuityGap",
            WarningKind::MissingValue => "MissingValue",
            WarningKind::ValueMismatch => "ValueMismatch",
            WarningKind::RangeConflict => "RangeConflict",
            WarningKind::NoWarnings => "NoWarnings",
        };
        f.write_str(name)
    }
}

/// Severity levels for warnings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum WarningSeverity {
    /// Nothing to act on
    Info,
    /// Worth a look, the run is still publishable
    Warning,
    /// Points at an upstream mapping or history problem
    Error,
}

impl WarningKind {
    pub fn severity(&self) -> WarningSeverity {
        match self {
            WarningKind::NoWarnings => WarningSeverity::Info,
            WarningKind::SourceDataMissing
            | WarningKind::DuplicateTimestamp
            | WarningKind::ContinuityGap
            | WarningKind::MissingValue => WarningSeverity::Warning,
            WarningKind::ValueMismatch | WarningKind::RangeConflict => WarningSeverity::Error,
        }
    }
}

/// A tagged, human-readable finding from one of the pipeline stages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Warning {
    pub kind: WarningKind,
    pub severity: WarningSeverity,
    /// Dimension tuple the warning is about, if it concerns a single group
    pub dimensions: Option<Vec<String>>,
    /// Instant the warning is about, if it concerns a single point
    pub instant: Option<DateTime<Utc>>,
    pub message: String,
}

impl Warning {
    pub fn new(kind: WarningKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: kind.severity(),
            dimensions: None,
            instant: None,
            message: message.into(),
        }
    }

    pub fn with_dimensions(mut self, dimensions: &[String]) -> Self {
        self.dimensions = Some(dimensions.to_vec());
        self
    }

    pub fn with_instant(mut self, instant: DateTime<Utc>) -> Self {
        self.instant = Some(instant);
        self
    }

    /// The marker returned in place of an empty warning list
    pub fn no_warnings() -> Self {
        Self::new(WarningKind::NoWarnings, NO_WARNINGS_MARKER)
    }

    pub fn source_data_missing(dimensions: &[String], message: impl Into<String>) -> Self {
        Self::new(WarningKind::SourceDataMissing, message).with_dimensions(dimensions)
    }

    pub fn duplicate_timestamp(dimensions: &[String], instant: DateTime<Utc>, origin: &str) -> Self {
        Self::new(
            WarningKind::DuplicateTimestamp,
            format!(
                "Duplicate timestamp {} in {} {} data, later rows dropped",
                fmt_instant(instant),
                origin,
                format_dimensions(dimensions)
            ),
        )
        .with_dimensions(dimensions)
        .with_instant(instant)
    }

    pub fn continuity_gap(dimensions: &[String], instant: DateTime<Utc>) -> Self {
        Self::new(
            WarningKind::ContinuityGap,
            format!(
                "Find missing timestamp {} in {} data",
                fmt_instant(instant),
                format_dimensions(dimensions)
            ),
        )
        .with_dimensions(dimensions)
        .with_instant(instant)
    }

    pub fn missing_value(dimensions: &[String], instant: DateTime<Utc>) -> Self {
        Self::new(
            WarningKind::MissingValue,
            format!(
                "Find missing value at {} in {} data",
                fmt_instant(instant),
                format_dimensions(dimensions)
            ),
        )
        .with_dimensions(dimensions)
        .with_instant(instant)
    }

    pub fn value_mismatch(
        dimensions: &[String],
        instant: DateTime<Utc>,
        fresh: f64,
        persisted: f64,
        delta: f64,
    ) -> Self {
        Self::new(
            WarningKind::ValueMismatch,
            format!(
                "Find data mismatch at {} in {}: fresh {} vs persisted {} (delta {:+})",
                fmt_instant(instant),
                format_dimensions(dimensions),
                fresh,
                persisted,
                delta
            ),
        )
        .with_dimensions(dimensions)
        .with_instant(instant)
    }

    /// Data for `groups` between `start` and `end` exists on one side only.
    pub fn range_conflict(
        groups: &[Vec<String>],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        missing_from: &str,
    ) -> Self {
        let names: Vec<String> = groups.iter().map(|g| format_dimensions(g)).collect();
        let warning = Self::new(
            WarningKind::RangeConflict,
            format!(
                "{} data from {} to {} not found in {} data",
                names.join(", "),
                fmt_instant(start),
                fmt_instant(end),
                missing_from
            ),
        )
        .with_instant(start);

        match groups {
            [single] => warning.with_dimensions(single),
            _ => warning,
        }
    }

    /// Whether this is the clean-run marker
    pub fn is_marker(&self) -> bool {
        self.kind == WarningKind::NoWarnings
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_marker() {
            return f.write_str(&self.message);
        }
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

pub(crate) fn fmt_instant(instant: DateTime<Utc>) -> String {
    instant.format("%Y-%m-%dT%H:%MZ").to_string()
}

/// The final, never-empty warning list of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarningReport {
    warnings: Vec<Warning>,
}

impl WarningReport {
    /// Wrap a list of warnings, substituting the marker for an empty list.
    pub fn from_warnings(warnings: Vec<Warning>) -> Self {
        if warnings.is_empty() {
            Self {
                warnings: vec![Warning::no_warnings()],
            }
        } else {
            Self { warnings }
        }
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn len(&self) -> usize {
        self.warnings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.warnings.is_empty()
    }

    /// True when the run was checked and nothing needs attention
    pub fn is_clean(&self) -> bool {
        self.warnings.len() == 1 && self.warnings[0].is_marker()
    }

    /// Real warnings only; empty for a clean run
    pub fn issues(&self) -> impl Iterator<Item = &Warning> {
        self.warnings.iter().filter(|w| !w.is_marker())
    }

    pub fn count_by_kind(&self) -> BTreeMap<WarningKind, usize> {
        let mut counts = BTreeMap::new();
        for warning in &self.warnings {
            *counts.entry(warning.kind).or_insert(0) += 1;
        }
        counts
    }

    pub fn highest_severity(&self) -> WarningSeverity {
        self.warnings
            .iter()
            .map(|w| w.severity)
            .max()
            .unwrap_or(WarningSeverity::Info)
    }

    /// Warnings ordered most severe first, keeping stage order within a level.
    pub fn by_severity(&self) -> Vec<&Warning> {
        let mut ordered: Vec<&Warning> = self.warnings.iter().collect();
        ordered.sort_by(|a, b| b.severity.cmp(&a.severity));
        ordered
    }

    /// One tagged line per warning
    pub fn lines(&self) -> Vec<String> {
        self.warnings.iter().map(|w| w.to_string()).collect()
    }
}
