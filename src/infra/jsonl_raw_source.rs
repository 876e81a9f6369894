use anyhow::Context;
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::debug;

use crate::app::ports::RawSourcePort;
use crate::domain::RawRow;

/// Reads a parser's output: one JSON `RawRow` per line
pub struct JsonlRawSource {
    path: PathBuf,
}

impl JsonlRawSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

pub(crate) fn parse_raw_rows(contents: &str) -> anyhow::Result<Vec<RawRow>> {
    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str::<RawRow>(line)
                .with_context(|| format!("invalid raw row on line {}", index + 1))
        })
        .collect()
}

#[async_trait]
impl RawSourcePort for JsonlRawSource {
    async fn load_raw(&self) -> anyhow::Result<Vec<RawRow>> {
        let contents = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read raw extract {:?}", self.path))?;
        let rows = parse_raw_rows(&contents)?;
        debug!("Loaded {} raw rows from {:?}", rows.len(), self.path);
        Ok(rows)
    }
}
