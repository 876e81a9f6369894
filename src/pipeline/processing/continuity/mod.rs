use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{debug, warn};

use crate::domain::{format_dimensions, Frequency, NormalizedRecord, Series};
use crate::pipeline::processing::normalize::DstSkip;
use crate::pipeline::processing::warning::Warning;

/// Continuity findings for one dimension group
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesContinuity {
    pub dimensions: Vec<String>,
    /// Expected instants absent from the series, ascending
    pub gaps: Vec<DateTime<Utc>>,
    /// Instants observed more than once, ascending
    pub duplicates: Vec<DateTime<Utc>>,
    /// Spring-forward hours that are expected to be missing locally
    #[serde(skip)]
    pub expected_skips: Vec<DstSkip>,
    pub observed: usize,
    pub expected: usize,
    /// Too few observations to establish a range
    pub needs_review: bool,
}

impl SeriesContinuity {
    pub fn is_continuous(&self) -> bool {
        self.gaps.is_empty() && self.duplicates.is_empty() && !self.needs_review
    }
}

/// Continuity findings for every group of one dataset
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContinuityReport {
    /// Which dataset was checked, e.g. "fresh" or "persisted"
    pub origin: String,
    pub frequency: Frequency,
    pub series: Vec<SeriesContinuity>,
}

impl ContinuityReport {
    pub fn total_gaps(&self) -> usize {
        self.series.iter().map(|s| s.gaps.len()).sum()
    }

    pub fn total_duplicates(&self) -> usize {
        self.series.iter().map(|s| s.duplicates.len()).sum()
    }

    pub fn is_continuous(&self) -> bool {
        self.series.iter().all(SeriesContinuity::is_continuous)
    }

    pub fn for_dimensions(&self, dimensions: &[String]) -> Option<&SeriesContinuity> {
        self.series.iter().find(|s| s.dimensions == dimensions)
    }

    /// Gaps, duplicates and review flags as tagged warnings, group by group.
    pub fn warnings(&self) -> Vec<Warning> {
        let mut warnings = Vec::new();
        for series in &self.series {
            if series.needs_review {
                warnings.push(Warning::source_data_missing(
                    &series.dimensions,
                    format!(
                        "Only {} observation(s) in {} {} data, continuity cannot be established; manual review needed",
                        series.observed,
                        format_dimensions(&series.dimensions),
                        self.origin
                    ),
                ));
            }
            for instant in &series.duplicates {
                warnings.push(Warning::duplicate_timestamp(&series.dimensions, *instant, &self.origin));
            }
            for instant in &series.gaps {
                warnings.push(Warning::continuity_gap(&series.dimensions, *instant));
            }
        }
        warnings
    }
}

/// Diffs observed instants against the expected fixed-step sequence
#[derive(Debug, Clone, Copy)]
pub struct ContinuityValidator {
    frequency: Frequency,
}

impl ContinuityValidator {
    pub fn new(frequency: Frequency) -> Self {
        Self { frequency }
    }

    pub fn frequency(&self) -> Frequency {
        self.frequency
    }

    /// Check a single series. Read-only; the series is not touched.
    pub fn validate(&self, series: &Series, dst_skips: &[DstSkip]) -> SeriesContinuity {
        let expected_skips: Vec<DstSkip> = dst_skips
            .iter()
            .filter(|skip| skip.dimensions == series.key())
            .cloned()
            .collect();

        let mut observed = BTreeSet::new();
        let mut duplicates = BTreeSet::new();
        for instant in series.instants() {
            if !observed.insert(instant) {
                duplicates.insert(instant);
            }
        }

        let mut result = SeriesContinuity {
            dimensions: series.key().to_vec(),
            gaps: Vec::new(),
            duplicates: duplicates.into_iter().collect(),
            expected_skips,
            observed: observed.len(),
            expected: observed.len(),
            needs_review: false,
        };

        let (Some(first), Some(last)) = (observed.first().copied(), observed.last().copied()) else {
            result.needs_review = true;
            return result;
        };
        if observed.len() < 2 {
            result.needs_review = true;
            return result;
        }

        let mut expected = 0;
        let mut cursor = Some(self.frequency.anchor(first));
        while let Some(instant) = cursor {
            if instant > last {
                break;
            }
            expected += 1;
            if !observed.contains(&instant) {
                result.gaps.push(instant);
            }
            cursor = self.frequency.step(instant);
        }
        result.expected = expected;

        if result.gaps.is_empty() {
            debug!(
                "Continuity check: no missing values in {} data",
                format_dimensions(series.key())
            );
        } else {
            warn!(
                "Continuity check: {} missing timestamp(s) in {} data",
                result.gaps.len(),
                format_dimensions(series.key())
            );
        }

        result
    }

    /// Group records by dimensions and check every group.
    pub fn validate_records(
        &self,
        records: &[NormalizedRecord],
        dst_skips: &[DstSkip],
        origin: &str,
    ) -> ContinuityReport {
        let series = Series::group(records)
            .iter()
            .map(|s| self.validate(s, dst_skips))
            .collect();

        ContinuityReport {
            origin: origin.to_string(),
            frequency: self.frequency,
            series,
        }
    }
}
