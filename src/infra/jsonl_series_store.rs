use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::app::ports::{AppendOutcome, PersistedSeriesPort, UpdateFeedPort};
use crate::constants::BATCH_LEDGER_SUFFIX;
use crate::domain::{NormalizedRecord, RecordKey};

/// On-disk shape of a persisted record; missing values are stored as `null`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub dimensions: Vec<String>,
    pub instant: DateTime<Utc>,
    pub value: Option<f64>,
}

impl From<&NormalizedRecord> for StoredRecord {
    fn from(record: &NormalizedRecord) -> Self {
        Self {
            dimensions: record.dimensions.clone(),
            instant: record.instant,
            value: Some(record.value).filter(|v| v.is_finite()),
        }
    }
}

impl From<StoredRecord> for NormalizedRecord {
    fn from(stored: StoredRecord) -> Self {
        NormalizedRecord::new(stored.dimensions, stored.instant, stored.value.unwrap_or(f64::NAN))
    }
}

/// Append-only JSON-lines store for one pipeline's authoritative series.
///
/// Every appended batch's fingerprint goes into a sibling ledger file
/// (`<store>.batches`) after its rows; a batch whose fingerprint is already
/// there is not written again. Rows whose key is already stored are never
/// written twice, so a batch interrupted before its ledger entry resumes
/// cleanly.
pub struct JsonlSeriesStore {
    path: PathBuf,
    ledger_path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlSeriesStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut ledger = path.clone().into_os_string();
        ledger.push(".");
        ledger.push(BATCH_LEDGER_SUFFIX);
        Self {
            path,
            ledger_path: PathBuf::from(ledger),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn ledger_path(&self) -> &Path {
        &self.ledger_path
    }

    async fn read_optional(path: &Path) -> anyhow::Result<String> {
        match tokio::fs::read_to_string(path).await {
            Ok(contents) => Ok(contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(anyhow::anyhow!("Failed to read {:?}: {}", path, e)),
        }
    }

    async fn read_records(&self) -> anyhow::Result<Vec<NormalizedRecord>> {
        let contents = Self::read_optional(&self.path).await?;
        let mut records = Vec::new();
        for (index, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let stored: StoredRecord = serde_json::from_str(line)
                .with_context(|| format!("invalid stored record on line {} of {:?}", index + 1, self.path))?;
            records.push(NormalizedRecord::from(stored));
        }
        Ok(records)
    }

    async fn applied_batches(&self) -> anyhow::Result<HashSet<String>> {
        let contents = Self::read_optional(&self.ledger_path).await?;
        Ok(contents
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn append_lines(path: &Path, body: &str) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("Failed to create directory {:?}", parent))?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .with_context(|| format!("Failed to open {:?}", path))?;
        file.write_all(body.as_bytes())
            .await
            .with_context(|| format!("Failed to write to {:?}", path))?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl PersistedSeriesPort for JsonlSeriesStore {
    async fn load_persisted(&self, since: Option<DateTime<Utc>>) -> anyhow::Result<Vec<NormalizedRecord>> {
        let records: Vec<NormalizedRecord> = self
            .read_records()
            .await?
            .into_iter()
            .filter(|r| since.map_or(true, |s| r.instant >= s))
            .collect();
        debug!("Loaded {} persisted records from {:?}", records.len(), self.path);
        Ok(records)
    }
}

#[async_trait]
impl UpdateFeedPort for JsonlSeriesStore {
    async fn append(&self, batch_id: &str, records: &[NormalizedRecord]) -> anyhow::Result<AppendOutcome> {
        let _guard = self.write_lock.lock().await;

        if self.applied_batches().await?.contains(batch_id) {
            return Ok(AppendOutcome::AlreadyApplied);
        }

        // Rows left behind by an attempt that died before its ledger entry
        let stored: HashSet<RecordKey> = self.read_records().await?.iter().map(|r| r.key()).collect();
        let pending: Vec<&NormalizedRecord> = records.iter().filter(|r| !stored.contains(&r.key())).collect();
        if pending.len() < records.len() {
            warn!(
                "Batch {}: {} of {} records already in {:?}, writing the rest",
                batch_id,
                records.len() - pending.len(),
                records.len(),
                self.path
            );
        }

        let mut body = String::new();
        for record in &pending {
            body.push_str(&serde_json::to_string(&StoredRecord::from(*record))?);
            body.push('\n');
        }
        if !body.is_empty() {
            Self::append_lines(&self.path, &body).await?;
        }
        Self::append_lines(&self.ledger_path, &format!("{}\n", batch_id)).await?;

        info!("Appended {} records to {:?} (batch {})", pending.len(), self.path, batch_id);
        Ok(AppendOutcome::Appended(pending.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn rec(hour: u32, value: f64) -> NormalizedRecord {
        NormalizedRecord::new(
            vec!["ZoneA".to_string()],
            Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).unwrap(),
            value,
        )
    }

    #[tokio::test]
    async fn test_missing_store_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonlSeriesStore::new(temp_dir.path().join("series.jsonl"));
        assert!(store.load_persisted(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_append_then_load() {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonlSeriesStore::new(temp_dir.path().join("nested").join("series.jsonl"));

        let outcome = store.append("batch-1", &[rec(0, 10.0), rec(1, f64::NAN)]).await.unwrap();
        assert_eq!(outcome, AppendOutcome::Appended(2));

        let loaded = store.load_persisted(None).await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0], rec(0, 10.0));
        assert!(loaded[1].value.is_nan());

        let recent = store
            .load_persisted(Some(Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap()))
            .await
            .unwrap();
        assert_eq!(recent.len(), 1);
    }

    #[tokio::test]
    async fn test_same_batch_is_appended_once() {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonlSeriesStore::new(temp_dir.path().join("series.jsonl"));

        store.append("batch-1", &[rec(0, 10.0)]).await.unwrap();
        let again = store.append("batch-1", &[rec(0, 10.0)]).await.unwrap();

        assert_eq!(again, AppendOutcome::AlreadyApplied);
        assert_eq!(store.load_persisted(None).await.unwrap().len(), 1);
        assert!(store.ledger_path().to_string_lossy().ends_with("series.jsonl.batches"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_ledger_write_does_not_duplicate_rows() {
        use crate::app::retry::RetryPolicy;
        use std::time::Duration;

        let temp_dir = TempDir::new().unwrap();
        let store = JsonlSeriesStore::new(temp_dir.path().join("series.jsonl"));
        // Ledger opens fail while it points into a directory that does not exist
        std::os::unix::fs::symlink(temp_dir.path().join("gone").join("ledger"), store.ledger_path()).unwrap();

        let records = [rec(0, 10.0)];
        let store_ref = &store;
        let records_ref = &records[..];
        let result = RetryPolicy::new(3, Duration::ZERO)
            .run("append", move || store_ref.append("batch-1", records_ref))
            .await;

        assert!(result.is_err());
        assert_eq!(store.load_persisted(None).await.unwrap().len(), 1);

        std::fs::remove_file(store.ledger_path()).unwrap();
        let resumed = store.append("batch-1", &records).await.unwrap();
        assert_eq!(resumed, AppendOutcome::Appended(0));
        assert_eq!(store.load_persisted(None).await.unwrap().len(), 1);
        assert_eq!(
            store.append("batch-1", &records).await.unwrap(),
            AppendOutcome::AlreadyApplied
        );
    }

    #[test]
    fn test_stored_record_uses_null_for_missing() {
        let json = serde_json::to_string(&StoredRecord::from(&rec(0, f64::NAN))).unwrap();
        assert!(json.contains("\"value\":null"));
    }
}
