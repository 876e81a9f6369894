// Reconciliation pipeline: normalize -> continuity -> reconcile -> resolve

pub mod processing;

use chrono_tz::Tz;
use tracing::{info, warn};

use crate::constants::DEFAULT_TOLERANCE;
use crate::domain::{Frequency, HourConvention, NormalizedRecord, RawRow};
use crate::error::{ReconcileError, Result};
use processing::continuity::{ContinuityReport, ContinuityValidator};
use processing::normalize::{LocalTimeNormalizer, NormalizationOutput};
use processing::reconcile::{ReconciliationEngine, ReconciliationOutcome};
use processing::resolve::{ConflictResolver, Resolution};

/// Plain parameters for one pipeline; no global state
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileSettings {
    pub dimension_names: Vec<String>,
    pub frequency: Frequency,
    pub timezone: Tz,
    pub hour_convention: HourConvention,
    pub tolerance: f64,
    pub check_persisted_continuity: bool,
}

impl ReconcileSettings {
    pub fn new(dimension_names: Vec<String>, frequency: Frequency, timezone: Tz) -> Self {
        Self {
            dimension_names,
            frequency,
            timezone,
            hour_convention: HourConvention::default(),
            tolerance: DEFAULT_TOLERANCE,
            check_persisted_continuity: false,
        }
    }

    pub fn with_hour_convention(mut self, hour_convention: HourConvention) -> Self {
        self.hour_convention = hour_convention;
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_persisted_continuity(mut self, enabled: bool) -> Self {
        self.check_persisted_continuity = enabled;
        self
    }

    fn normalizer(&self) -> LocalTimeNormalizer {
        LocalTimeNormalizer::new(self.timezone, self.hour_convention, self.frequency)
    }
}

/// Everything one run produced
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub normalization: NormalizationOutput,
    /// Fresh report first, persisted report second when enabled
    pub continuity: Vec<ContinuityReport>,
    pub outcome: ReconciliationOutcome,
    pub resolution: Resolution,
}

impl PipelineReport {
    pub fn fresh_records(&self) -> &[NormalizedRecord] {
        &self.normalization.records
    }

    pub fn total_gaps(&self) -> usize {
        self.continuity.iter().map(|c| c.total_gaps()).sum()
    }
}

/// Result of the normalize + continuity half of a run
#[derive(Debug, Clone)]
pub struct ContinuityCheck {
    pub normalization: NormalizationOutput,
    pub continuity: ContinuityReport,
}

impl ContinuityCheck {
    /// Earliest fresh instant, used to bound the persisted query
    pub fn first_instant(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.normalization.records.iter().map(|r| r.instant).min()
    }
}

fn check_dimensions<'a>(
    source_name: &str,
    expected: usize,
    rows: impl Iterator<Item = &'a [String]>,
) -> Result<()> {
    for (row, dimensions) in rows.enumerate() {
        if dimensions.len() != expected {
            return Err(ReconcileError::DimensionMismatch {
                source_name: source_name.to_string(),
                row,
                expected,
                found: dimensions.len(),
            });
        }
    }
    Ok(())
}

fn normalize_checked(settings: &ReconcileSettings, raw: &[RawRow]) -> Result<NormalizationOutput> {
    if raw.is_empty() {
        return Err(ReconcileError::EmptySeries("raw extract has no rows".to_string()));
    }
    check_dimensions(
        "fresh",
        settings.dimension_names.len(),
        raw.iter().map(|r| r.dimensions.as_slice()),
    )?;

    let normalization = settings.normalizer().normalize(raw);
    if normalization.records.is_empty() {
        return Err(ReconcileError::EmptySeries(format!(
            "none of the {} raw rows could be normalized",
            raw.len()
        )));
    }
    Ok(normalization)
}

/// Normalize a raw extract and check its continuity, without reconciling.
pub fn check_continuity(settings: &ReconcileSettings, raw: &[RawRow]) -> Result<ContinuityCheck> {
    let normalization = normalize_checked(settings, raw)?;
    let continuity = ContinuityValidator::new(settings.frequency).validate_records(
        &normalization.records,
        &normalization.dst_skips,
        "fresh",
    );
    Ok(ContinuityCheck {
        normalization,
        continuity,
    })
}

/// Run all four stages on one fresh extract and the persisted history.
///
/// Fails only on structural problems; everything else ends up in the
/// warning report.
pub fn run_pipeline(
    settings: &ReconcileSettings,
    raw: &[RawRow],
    persisted: &[NormalizedRecord],
) -> Result<PipelineReport> {
    let check = check_continuity(settings, raw)?;
    reconcile_checked(settings, check, persisted)
}

/// Finish a run whose fresh side was already normalized and checked.
pub fn reconcile_checked(
    settings: &ReconcileSettings,
    check: ContinuityCheck,
    persisted: &[NormalizedRecord],
) -> Result<PipelineReport> {
    check_dimensions(
        "persisted",
        settings.dimension_names.len(),
        persisted.iter().map(|r| r.dimensions.as_slice()),
    )?;

    let ContinuityCheck {
        normalization,
        continuity: fresh_continuity,
    } = check;

    let mut continuity = vec![fresh_continuity];
    if settings.check_persisted_continuity && !persisted.is_empty() {
        continuity.push(
            ContinuityValidator::new(settings.frequency).validate_records(persisted, &[], "persisted"),
        );
    }
    if persisted.is_empty() {
        warn!("No persisted data; every fresh record is new");
    }

    let outcome = ReconciliationEngine::new(settings.tolerance)
        .with_persisted_duplicate_warnings(!settings.check_persisted_continuity)
        .reconcile(&normalization.records, persisted);
    let resolution = ConflictResolver::new().resolve(
        &normalization.records,
        &normalization.warnings,
        &continuity,
        &outcome,
    );

    info!(
        "Pipeline finished: {} fresh records, {} gaps, {} to append",
        normalization.records.len(),
        continuity.iter().map(|c| c.total_gaps()).sum::<usize>(),
        resolution.update_feed.len()
    );

    Ok(PipelineReport {
        normalization,
        continuity,
        outcome,
        resolution,
    })
}
