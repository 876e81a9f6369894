use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{NormalizedRecord, RawRow};
use crate::pipeline::processing::warning::WarningReport;

/// Where a run's raw extract comes from (a parser's output)
#[async_trait]
pub trait RawSourcePort: Send + Sync {
    async fn load_raw(&self) -> anyhow::Result<Vec<RawRow>>;
}

/// Read side of the authoritative store
#[async_trait]
pub trait PersistedSeriesPort: Send + Sync {
    /// Records with `instant >= since`, or everything when `since` is `None`.
    async fn load_persisted(&self, since: Option<DateTime<Utc>>) -> anyhow::Result<Vec<NormalizedRecord>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended(usize),
    /// The batch fingerprint was already recorded; nothing was written
    AlreadyApplied,
}

/// Append-only write side of the authoritative store
#[async_trait]
pub trait UpdateFeedPort: Send + Sync {
    async fn append(&self, batch_id: &str, records: &[NormalizedRecord]) -> anyhow::Result<AppendOutcome>;
}

/// Sink for the human-readable warning list
#[async_trait]
pub trait WarningReportPort: Send + Sync {
    async fn publish(&self, run_id: Uuid, report: &WarningReport) -> anyhow::Result<()>;
}
