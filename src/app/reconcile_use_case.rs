use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::app::ports::{
    AppendOutcome, PersistedSeriesPort, RawSourcePort, UpdateFeedPort, WarningReportPort,
};
use crate::app::retry::RetryPolicy;
use crate::idempotency::compute_batch_fingerprint;
use crate::observability::metrics;
use crate::pipeline::processing::reconcile::PartitionCounts;
use crate::pipeline::processing::warning::WarningSeverity;
use crate::pipeline::{check_continuity, reconcile_checked, PipelineReport, ReconcileSettings};

/// What a finished run reports back to its caller
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub pipeline: String,
    pub started_at: DateTime<Utc>,
    pub raw_rows: usize,
    pub fresh_records: usize,
    pub dropped_rows: usize,
    pub persisted_records: usize,
    pub gaps: usize,
    pub partitions: PartitionCounts,
    /// Fingerprint of the appended batch, if there was anything to append
    pub batch_id: Option<String>,
    pub appended: usize,
    pub batch_already_applied: bool,
    pub warnings: Vec<String>,
    pub highest_severity: WarningSeverity,
}

impl RunSummary {
    pub fn is_clean(&self) -> bool {
        self.highest_severity == WarningSeverity::Info
    }
}

/// Use case for one reconciliation run: load, reconcile, append, publish
pub struct ReconcileUseCase {
    pipeline: String,
    settings: ReconcileSettings,
    retry: RetryPolicy,
    lookback: Option<Duration>,
    raw_source: Box<dyn RawSourcePort>,
    persisted_source: Box<dyn PersistedSeriesPort>,
    update_feed: Box<dyn UpdateFeedPort>,
    warning_sink: Box<dyn WarningReportPort>,
}

impl ReconcileUseCase {
    pub fn new(
        pipeline: impl Into<String>,
        settings: ReconcileSettings,
        raw_source: Box<dyn RawSourcePort>,
        persisted_source: Box<dyn PersistedSeriesPort>,
        update_feed: Box<dyn UpdateFeedPort>,
        warning_sink: Box<dyn WarningReportPort>,
    ) -> Self {
        Self {
            pipeline: pipeline.into(),
            settings,
            retry: RetryPolicy::default(),
            lookback: None,
            raw_source,
            persisted_source,
            update_feed,
            warning_sink,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Only load persisted history starting `days` before the first fresh instant.
    pub fn with_lookback_days(mut self, days: Option<u32>) -> Self {
        self.lookback = days.map(|d| Duration::days(i64::from(d)));
        self
    }

    /// Run the whole pipeline once. Structural and I/O failures abort the run;
    /// data anomalies end up in the published warnings.
    pub async fn execute(&self) -> Result<RunSummary> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let clock = Instant::now();
        info!("Starting run {} of pipeline '{}'", run_id, self.pipeline);
        metrics::run::started(&self.pipeline);

        match self.execute_inner(run_id, started_at).await {
            Ok(summary) => {
                metrics::run::succeeded(&self.pipeline, clock.elapsed().as_secs_f64());
                info!(
                    "Run {} finished: {} appended, {} warning line(s)",
                    run_id,
                    summary.appended,
                    summary.warnings.len()
                );
                Ok(summary)
            }
            Err(e) => {
                metrics::run::failed(&self.pipeline);
                error!("Run {} of pipeline '{}' failed: {:#}", run_id, self.pipeline, e);
                Err(e)
            }
        }
    }

    async fn execute_inner(&self, run_id: Uuid, started_at: DateTime<Utc>) -> Result<RunSummary> {
        let raw_source = &self.raw_source;
        let raw = self
            .retry
            .run("load raw extract", move || raw_source.load_raw())
            .await?;
        metrics::io::rows_loaded("fresh", raw.len());

        let check = check_continuity(&self.settings, &raw)?;
        let since = match (self.lookback, check.first_instant()) {
            (Some(lookback), Some(first)) => first.checked_sub_signed(lookback),
            _ => None,
        };

        let persisted_source = &self.persisted_source;
        let persisted = self
            .retry
            .run("load persisted series", move || persisted_source.load_persisted(since))
            .await?;
        metrics::io::rows_loaded("persisted", persisted.len());

        let report = reconcile_checked(&self.settings, check, &persisted)?;
        self.record_stage_metrics(&report);

        let (batch_id, appended, batch_already_applied) = self.append_update(&report).await?;

        let warning_sink = &self.warning_sink;
        let warnings = &report.resolution.report;
        self.retry
            .run("publish warnings", move || warning_sink.publish(run_id, warnings))
            .await?;
        for warning in warnings.issues() {
            metrics::resolve::warning_published(&warning.kind.to_string());
        }

        Ok(RunSummary {
            run_id,
            pipeline: self.pipeline.clone(),
            started_at,
            raw_rows: raw.len(),
            fresh_records: report.fresh_records().len(),
            dropped_rows: report.normalization.dropped_rows,
            persisted_records: persisted.len(),
            gaps: report.total_gaps(),
            partitions: report.outcome.counts(),
            batch_id,
            appended,
            batch_already_applied,
            warnings: warnings.lines(),
            highest_severity: warnings.highest_severity(),
        })
    }

    async fn append_update(&self, report: &PipelineReport) -> Result<(Option<String>, usize, bool)> {
        let records = report.resolution.update_feed.as_slice();
        if records.is_empty() {
            info!("Nothing new to append for pipeline '{}'", self.pipeline);
            return Ok((None, 0, false));
        }

        let batch_id = compute_batch_fingerprint(&self.pipeline, records);
        let update_feed = &self.update_feed;
        let id = batch_id.as_str();
        let outcome = self
            .retry
            .run("append update feed", move || update_feed.append(id, records))
            .await?;

        match outcome {
            AppendOutcome::Appended(count) => {
                metrics::resolve::records_appended(count);
                Ok((Some(batch_id), count, false))
            }
            AppendOutcome::AlreadyApplied => {
                warn!("Batch {} was already appended; skipping", batch_id);
                metrics::resolve::batch_skipped();
                Ok((Some(batch_id), 0, true))
            }
        }
    }

    fn record_stage_metrics(&self, report: &PipelineReport) {
        metrics::normalize::batch_normalized(
            report.normalization.records.len(),
            report.normalization.dropped_rows,
            report.normalization.dst_skips.len(),
        );
        for continuity in &report.continuity {
            metrics::continuity::gaps_found(&continuity.origin, continuity.total_gaps());
        }
        metrics::reconcile::partitions(&report.outcome.counts());
    }
}
