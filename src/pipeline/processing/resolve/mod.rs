use tracing::info;

use crate::domain::NormalizedRecord;
use crate::pipeline::processing::continuity::ContinuityReport;
use crate::pipeline::processing::reconcile::ReconciliationOutcome;
use crate::pipeline::processing::warning::{Warning, WarningReport};

/// What a run publishes
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// Fresh records with no persisted counterpart, ordered by key
    pub update_feed: Vec<NormalizedRecord>,
    pub report: WarningReport,
}

/// Turns the stage outputs into an update feed and the final warning list
#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictResolver;

impl ConflictResolver {
    pub fn new() -> Self {
        Self
    }

    /// `continuity` holds one report per checked dataset, fresh first.
    pub fn resolve(
        &self,
        fresh: &[NormalizedRecord],
        normalization_warnings: &[Warning],
        continuity: &[ContinuityReport],
        outcome: &ReconciliationOutcome,
    ) -> Resolution {
        let new_keys = outcome.new_only_keys();
        let mut update_feed: Vec<NormalizedRecord> = fresh
            .iter()
            .filter(|r| new_keys.contains(&r.key()))
            .cloned()
            .collect();
        update_feed.sort_by(|a, b| {
            a.dimensions
                .cmp(&b.dimensions)
                .then(a.instant.cmp(&b.instant))
        });
        update_feed.dedup_by(|a, b| a.dimensions == b.dimensions && a.instant == b.instant);

        let mut warnings: Vec<Warning> = normalization_warnings.to_vec();
        for report in continuity {
            warnings.extend(report.warnings());
        }
        let mut missing: Vec<&NormalizedRecord> = fresh.iter().filter(|r| r.is_missing_value()).collect();
        missing.sort_by(|a, b| a.key().cmp(&b.key()));
        warnings.extend(
            missing
                .into_iter()
                .map(|r| Warning::missing_value(&r.dimensions, r.instant)),
        );
        warnings.extend(outcome.warnings.iter().cloned());

        let report = WarningReport::from_warnings(warnings);
        info!(
            "Update feed has {} record(s); {} warning(s), highest severity {:?}",
            update_feed.len(),
            if report.is_clean() { 0 } else { report.len() },
            report.highest_severity()
        );

        Resolution { update_feed, report }
    }
}

impl Resolution {
    /// True when nothing needs to be appended
    pub fn is_noop(&self) -> bool {
        self.update_feed.is_empty()
    }
}
