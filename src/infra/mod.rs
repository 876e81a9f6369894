pub mod jsonl_raw_source;
pub mod jsonl_series_store;
pub mod warning_file_adapter;

pub use jsonl_raw_source::JsonlRawSource;
pub use jsonl_series_store::{JsonlSeriesStore, StoredRecord};
pub use warning_file_adapter::FileWarningReportAdapter;
