use sha2::{Digest, Sha256};

use crate::domain::{format_dimensions, NormalizedRecord};

/// Fingerprint of an update batch, stable across retries of the same run.
///
/// Each record contributes `dimensions|instant|value`; missing values hash as
/// `NaN` so two batches only collide when they would append the same rows.
pub fn compute_batch_fingerprint(pipeline: &str, records: &[NormalizedRecord]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(pipeline.as_bytes());
    for record in records {
        hasher.update(b"\n");
        hasher.update(format_dimensions(&record.dimensions).as_bytes());
        hasher.update(b"|");
        hasher.update(record.instant.to_rfc3339().as_bytes());
        hasher.update(b"|");
        hasher.update(format!("{:?}", record.value).as_bytes());
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn rec(value: f64) -> NormalizedRecord {
        NormalizedRecord::new(
            vec!["ZoneA".to_string()],
            Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap(),
            value,
        )
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let a = compute_batch_fingerprint("load", &[rec(12.0)]);
        let b = compute_batch_fingerprint("load", &[rec(12.0)]);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_fingerprint_depends_on_values_and_pipeline() {
        let base = compute_batch_fingerprint("load", &[rec(12.0)]);
        assert_ne!(base, compute_batch_fingerprint("load", &[rec(12.5)]));
        assert_ne!(base, compute_batch_fingerprint("price", &[rec(12.0)]));
        assert_ne!(base, compute_batch_fingerprint("load", &[]));
    }
}
