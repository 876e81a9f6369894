use anyhow::Context;
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::info;
use uuid::Uuid;

use crate::app::ports::WarningReportPort;
use crate::constants::WARNINGS_FILE_HEADER;
use crate::pipeline::processing::warning::WarningReport;

/// Writes the warning list to a text file, replacing the previous run's file
pub struct FileWarningReportAdapter {
    path: PathBuf,
}

impl FileWarningReportAdapter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

pub(crate) fn render_report(report: &WarningReport) -> String {
    let mut body = String::from(WARNINGS_FILE_HEADER);
    body.push('\n');
    for line in report.lines() {
        body.push_str(&line);
        body.push('\n');
    }
    body
}

#[async_trait]
impl WarningReportPort for FileWarningReportAdapter {
    async fn publish(&self, run_id: Uuid, report: &WarningReport) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("Failed to create directory {:?}", parent))?;
            }
        }
        tokio::fs::write(&self.path, render_report(report))
            .await
            .with_context(|| format!("Failed to write warnings file {:?}", self.path))?;

        info!(
            "Published {} warning line(s) for run {} to {:?}",
            report.len(),
            run_id,
            self.path
        );
        Ok(())
    }
}
