//! Metrics for reconciliation runs
//!
//! Counters and histograms go through the `metrics` facade; a Prometheus
//! recorder is installed on demand so a run can dump its numbers to a file.

use std::fmt;
use std::sync::OnceLock;

/// Enum representing all metric names used by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    // Run lifecycle
    RunsStarted,
    RunsSucceeded,
    RunsFailed,
    RunDuration,

    // I/O boundary
    IoRetries,
    IoRowsLoaded,

    // Normalize metrics
    NormalizeRecords,
    NormalizeRowsDropped,
    NormalizeDstSkips,

    // Continuity metrics
    ContinuityGaps,

    // Reconcile metrics
    ReconcileMatched,
    ReconcileNewOnly,
    ReconcilePersistedOnly,
    ReconcileMismatches,

    // Resolve metrics
    ResolveRecordsAppended,
    ResolveBatchesSkipped,
    ResolveWarnings,
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::RunsStarted => "etl_runs_started_total",
            MetricName::RunsSucceeded => "etl_runs_succeeded_total",
            MetricName::RunsFailed => "etl_runs_failed_total",
            MetricName::RunDuration => "etl_run_duration_seconds",

            MetricName::IoRetries => "etl_io_retries_total",
            MetricName::IoRowsLoaded => "etl_io_rows_loaded_total",

            MetricName::NormalizeRecords => "etl_normalize_records_total",
            MetricName::NormalizeRowsDropped => "etl_normalize_rows_dropped_total",
            MetricName::NormalizeDstSkips => "etl_normalize_dst_skips_total",

            MetricName::ContinuityGaps => "etl_continuity_gaps_total",

            MetricName::ReconcileMatched => "etl_reconcile_matched_total",
            MetricName::ReconcileNewOnly => "etl_reconcile_new_only_total",
            MetricName::ReconcilePersistedOnly => "etl_reconcile_persisted_only_total",
            MetricName::ReconcileMismatches => "etl_reconcile_mismatches_total",

            MetricName::ResolveRecordsAppended => "etl_resolve_records_appended_total",
            MetricName::ResolveBatchesSkipped => "etl_resolve_batches_skipped_total",
            MetricName::ResolveWarnings => "etl_resolve_warnings_total",
        }
    }

    pub fn all_metrics() -> impl Iterator<Item = MetricName> {
        use MetricName::*;
        [
            RunsStarted,
            RunsSucceeded,
            RunsFailed,
            RunDuration,
            IoRetries,
            IoRowsLoaded,
            NormalizeRecords,
            NormalizeRowsDropped,
            NormalizeDstSkips,
            ContinuityGaps,
            ReconcileMatched,
            ReconcileNewOnly,
            ReconcilePersistedOnly,
            ReconcileMismatches,
            ResolveRecordsAppended,
            ResolveBatchesSkipped,
            ResolveWarnings,
        ]
        .into_iter()
    }

    /// (phase, description)
    pub fn metadata(&self) -> (&'static str, &'static str) {
        match self {
            MetricName::RunsStarted => ("run", "Pipeline runs started"),
            MetricName::RunsSucceeded => ("run", "Pipeline runs that published results"),
            MetricName::RunsFailed => ("run", "Pipeline runs aborted by an error"),
            MetricName::RunDuration => ("run", "Wall time of a run in seconds"),
            MetricName::IoRetries => ("io", "Retried collaborator calls by operation"),
            MetricName::IoRowsLoaded => ("io", "Rows read from collaborators by origin"),
            MetricName::NormalizeRecords => ("normalize", "Records placed on the UTC axis"),
            MetricName::NormalizeRowsDropped => ("normalize", "Raw rows dropped during normalization"),
            MetricName::NormalizeDstSkips => ("normalize", "Expected spring-forward skips"),
            MetricName::ContinuityGaps => ("continuity", "Missing expected timestamps by origin"),
            MetricName::ReconcileMatched => ("reconcile", "Keys present on both sides"),
            MetricName::ReconcileNewOnly => ("reconcile", "Keys only in fresh data"),
            MetricName::ReconcilePersistedOnly => ("reconcile", "Keys only in persisted data"),
            MetricName::ReconcileMismatches => ("reconcile", "Matched keys beyond tolerance"),
            MetricName::ResolveRecordsAppended => ("resolve", "Records appended to the store"),
            MetricName::ResolveBatchesSkipped => ("resolve", "Update batches already appended earlier"),
            MetricName::ResolveWarnings => ("resolve", "Published warnings by kind"),
        }
    }
}

static METRICS_HANDLE: OnceLock<metrics_exporter_prometheus::PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder. Calling it twice is a no-op.
pub fn init() -> Result<(), Box<dyn std::error::Error>> {
    if METRICS_HANDLE.get().is_some() {
        return Ok(());
    }

    let handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {}", e))?;
    METRICS_HANDLE.set(handle).ok();
    describe_all();
    Ok(())
}

fn describe_all() {
    for metric in MetricName::all_metrics() {
        let (phase, description) = metric.metadata();
        let help = format!("{} ({})", description, phase);
        match metric {
            MetricName::RunDuration => {
                ::metrics::describe_histogram!(metric.as_str(), ::metrics::Unit::Seconds, help)
            }
            _ => ::metrics::describe_counter!(metric.as_str(), help),
        }
    }
}

/// Prometheus text rendering of everything recorded so far
pub fn render() -> Option<String> {
    METRICS_HANDLE.get().map(|handle| handle.render())
}

// ============================================================================
// Run Metrics
// ============================================================================

pub mod run {
    use super::MetricName;

    pub fn started(pipeline: &str) {
        ::metrics::counter!(MetricName::RunsStarted.as_str(), "pipeline" => pipeline.to_string()).increment(1);
    }

    pub fn succeeded(pipeline: &str, secs: f64) {
        ::metrics::counter!(MetricName::RunsSucceeded.as_str(), "pipeline" => pipeline.to_string()).increment(1);
        ::metrics::histogram!(MetricName::RunDuration.as_str(), "pipeline" => pipeline.to_string()).record(secs);
    }

    pub fn failed(pipeline: &str) {
        ::metrics::counter!(MetricName::RunsFailed.as_str(), "pipeline" => pipeline.to_string()).increment(1);
    }
}

// ============================================================================
// I/O Metrics
// ============================================================================

pub mod io {
    use super::MetricName;

    pub fn retry(operation: &str) {
        ::metrics::counter!(MetricName::IoRetries.as_str(), "operation" => operation.to_string()).increment(1);
    }

    pub fn rows_loaded(origin: &str, count: usize) {
        ::metrics::counter!(MetricName::IoRowsLoaded.as_str(), "origin" => origin.to_string())
            .increment(count as u64);
    }
}

// ============================================================================
// Stage Metrics
// ============================================================================

pub mod normalize {
    use super::MetricName;

    pub fn batch_normalized(records: usize, dropped: usize, dst_skips: usize) {
        ::metrics::counter!(MetricName::NormalizeRecords.as_str()).increment(records as u64);
        ::metrics::counter!(MetricName::NormalizeRowsDropped.as_str()).increment(dropped as u64);
        ::metrics::counter!(MetricName::NormalizeDstSkips.as_str()).increment(dst_skips as u64);
    }
}

pub mod continuity {
    use super::MetricName;

    pub fn gaps_found(origin: &str, gaps: usize) {
        ::metrics::counter!(MetricName::ContinuityGaps.as_str(), "origin" => origin.to_string())
            .increment(gaps as u64);
    }
}

pub mod reconcile {
    use super::MetricName;
    use crate::pipeline::processing::reconcile::PartitionCounts;

    pub fn partitions(counts: &PartitionCounts) {
        ::metrics::counter!(MetricName::ReconcileMatched.as_str()).increment(counts.matched as u64);
        ::metrics::counter!(MetricName::ReconcileNewOnly.as_str()).increment(counts.new_only as u64);
        ::metrics::counter!(MetricName::ReconcilePersistedOnly.as_str()).increment(counts.persisted_only as u64);
        ::metrics::counter!(MetricName::ReconcileMismatches.as_str()).increment(counts.mismatched as u64);
    }
}

pub mod resolve {
    use super::MetricName;

    pub fn records_appended(count: usize) {
        ::metrics::counter!(MetricName::ResolveRecordsAppended.as_str()).increment(count as u64);
    }

    pub fn batch_skipped() {
        ::metrics::counter!(MetricName::ResolveBatchesSkipped.as_str()).increment(1);
    }

    pub fn warning_published(kind: &str) {
        ::metrics::counter!(MetricName::ResolveWarnings.as_str(), "kind" => kind.to_string()).increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_metric_names_are_unique_and_prefixed() {
        let names: Vec<&str> = MetricName::all_metrics().map(|m| m.as_str()).collect();
        let unique: HashSet<&str> = names.iter().copied().collect();
        assert_eq!(names.len(), unique.len());
        assert!(names.iter().all(|n| n.starts_with("etl_")));
    }

    #[test]
    fn test_rendered_output_carries_descriptions() {
        init().unwrap();
        run::started("describe_test");
        let text = render().unwrap();
        assert!(text.contains("Pipeline runs started (run)"));
    }

    #[test]
    fn test_display_matches_as_str() {
        for metric in MetricName::all_metrics() {
            assert_eq!(metric.to_string(), metric.as_str());
            assert!(!metric.metadata().1.is_empty());
        }
    }
}
