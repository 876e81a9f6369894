use thiserror::Error;

/// Errors that abort a pipeline run.
///
/// Row-level anomalies never show up here; they are collected as
/// [`Warning`](crate::pipeline::processing::warning::Warning)s instead.
#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown time zone: {0}")]
    UnknownTimezone(String),

    #[error("{source_name} row {row} has {found} dimension values, expected {expected}")]
    DimensionMismatch {
        source_name: String,
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("Empty series: {0}")]
    EmptySeries(String),

    #[error("{operation} failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        last_error: String,
    },
}

pub type Result<T> = std::result::Result<T, ReconcileError>;
