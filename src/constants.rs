/// Defaults and fixed strings shared across the pipeline stages.

/// Absolute tolerance for fresh vs persisted deltas, in source units.
pub const DEFAULT_TOLERANCE: f64 = 1.0;

/// Zone used when a pipeline config does not name one.
pub const DEFAULT_TIMEZONE: &str = "America/New_York";

/// Text of the single marker returned when a run produced no warnings.
pub const NO_WARNINGS_MARKER: &str = "no warnings";

/// First line of every warnings file.
pub const WARNINGS_FILE_HEADER: &str = "Warning Messages in ETL Process:";

// Retry defaults for the I/O collaborators
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 1_000;

/// Suffix of the ledger file that records fingerprints of appended batches.
pub const BATCH_LEDGER_SUFFIX: &str = "batches";

/// Date layouts accepted for the local calendar date of a raw row.
pub const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%m/%d/%Y", "%m-%d-%Y", "%Y/%m/%d"];

/// Separator used when a dimension tuple is rendered into a warning.
pub const DIMENSION_SEPARATOR: &str = "/";
