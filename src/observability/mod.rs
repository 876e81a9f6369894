// Observability: metrics for the I/O boundary and pipeline stages

pub mod metrics;

pub use metrics::{init, render};
