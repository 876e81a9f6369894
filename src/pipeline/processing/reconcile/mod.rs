//! Three-way reconciliation of a fresh extract against persisted history.
//!
//! Every key seen on either side ends up in exactly one of Matched, NewOnly or
//! PersistedOnly. Matched entries carry `fresh - persisted`; entries whose
//! delta exceeds the tolerance become ValueMismatch warnings. Range conflicts
//! catch history holes: fresh rows that should already be persisted, and
//! persisted rows the fresh extract no longer reproduces.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

use crate::constants::DEFAULT_TOLERANCE;
use crate::domain::{NormalizedRecord, RecordKey};
use crate::pipeline::processing::warning::Warning;

/// Partition a key was assigned to
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "tag", rename_all = "snake_case")]
pub enum MatchTag {
    /// Present on both sides; `delta = fresh - persisted`
    Matched { delta: f64 },
    NewOnly,
    PersistedOnly,
}

/// One row of the full outer join
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconciledEntry {
    pub key: RecordKey,
    pub tag: MatchTag,
    pub fresh: Option<f64>,
    pub persisted: Option<f64>,
}

impl ReconciledEntry {
    pub fn delta(&self) -> Option<f64> {
        match self.tag {
            MatchTag::Matched { delta } => Some(delta),
            _ => None,
        }
    }

    /// NaN deltas never count as mismatches.
    pub fn exceeds(&self, tolerance: f64) -> bool {
        self.delta().map(|d| d.abs() > tolerance).unwrap_or(false)
    }
}

/// Outcome of one reconciliation: entries ordered by key, then the warnings
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconciliationOutcome {
    pub tolerance: f64,
    pub entries: Vec<ReconciledEntry>,
    /// Duplicate persisted keys, then value mismatches, then range conflicts
    pub warnings: Vec<Warning>,
}

impl ReconciliationOutcome {
    pub fn matched(&self) -> impl Iterator<Item = &ReconciledEntry> {
        self.entries
            .iter()
            .filter(|e| matches!(e.tag, MatchTag::Matched { .. }))
    }

    pub fn new_only(&self) -> impl Iterator<Item = &ReconciledEntry> {
        self.entries.iter().filter(|e| e.tag == MatchTag::NewOnly)
    }

    pub fn persisted_only(&self) -> impl Iterator<Item = &ReconciledEntry> {
        self.entries.iter().filter(|e| e.tag == MatchTag::PersistedOnly)
    }

    pub fn mismatches(&self) -> impl Iterator<Item = &ReconciledEntry> {
        let tolerance = self.tolerance;
        self.entries.iter().filter(move |e| e.exceeds(tolerance))
    }

    pub fn new_only_keys(&self) -> BTreeSet<RecordKey> {
        self.new_only().map(|e| e.key.clone()).collect()
    }

    pub fn counts(&self) -> PartitionCounts {
        let mut counts = PartitionCounts::default();
        for entry in &self.entries {
            match entry.tag {
                MatchTag::Matched { .. } => counts.matched += 1,
                MatchTag::NewOnly => counts.new_only += 1,
                MatchTag::PersistedOnly => counts.persisted_only += 1,
            }
        }
        counts.mismatched = self.mismatches().count();
        counts
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PartitionCounts {
    pub matched: usize,
    pub new_only: usize,
    pub persisted_only: usize,
    pub mismatched: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct ReconciliationEngine {
    tolerance: f64,
    persisted_duplicate_warnings: bool,
}

impl Default for ReconciliationEngine {
    fn default() -> Self {
        Self::new(DEFAULT_TOLERANCE)
    }
}

impl ReconciliationEngine {
    pub fn new(tolerance: f64) -> Self {
        Self {
            tolerance,
            persisted_duplicate_warnings: true,
        }
    }

    /// Turn off when a persisted continuity report already lists the duplicates.
    pub fn with_persisted_duplicate_warnings(mut self, enabled: bool) -> Self {
        self.persisted_duplicate_warnings = enabled;
        self
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    pub fn reconcile(
        &self,
        fresh: &[NormalizedRecord],
        persisted: &[NormalizedRecord],
    ) -> ReconciliationOutcome {
        let mut warnings = Vec::new();
        let fresh_index = index_records(fresh, "fresh", true, &mut warnings);
        let persisted_index = index_records(
            persisted,
            "persisted",
            self.persisted_duplicate_warnings,
            &mut warnings,
        );

        let keys: BTreeSet<&RecordKey> = fresh_index.keys().chain(persisted_index.keys()).collect();
        let mut entries = Vec::with_capacity(keys.len());
        for key in keys {
            let fresh_value = fresh_index.get(key).copied();
            let persisted_value = persisted_index.get(key).copied();
            let tag = match (fresh_value, persisted_value) {
                (Some(f), Some(p)) => MatchTag::Matched { delta: f - p },
                (Some(_), None) => MatchTag::NewOnly,
                (None, _) => MatchTag::PersistedOnly,
            };
            entries.push(ReconciledEntry {
                key: key.clone(),
                tag,
                fresh: fresh_value,
                persisted: persisted_value,
            });
        }

        for entry in entries.iter().filter(|e| e.exceeds(self.tolerance)) {
            if let (Some(f), Some(p), Some(delta)) = (entry.fresh, entry.persisted, entry.delta()) {
                debug!("Mismatch at {}: delta {}", entry.key, delta);
                warnings.push(Warning::value_mismatch(
                    &entry.key.dimensions,
                    entry.key.instant,
                    f,
                    p,
                    delta,
                ));
            }
        }

        warnings.extend(range_conflicts(
            &entries,
            fresh_index.keys().map(|k| k.instant).min(),
            persisted_index.keys().map(|k| k.instant).max(),
        ));

        let outcome = ReconciliationOutcome {
            tolerance: self.tolerance,
            entries,
            warnings,
        };
        let counts = outcome.counts();
        info!(
            "Reconciled {} keys: {} matched, {} new, {} persisted only, {} mismatched",
            outcome.entries.len(),
            counts.matched,
            counts.new_only,
            counts.persisted_only,
            counts.mismatched
        );
        outcome
    }
}

fn index_records(
    records: &[NormalizedRecord],
    origin: &str,
    report_duplicates: bool,
    warnings: &mut Vec<Warning>,
) -> BTreeMap<RecordKey, f64> {
    let mut index = BTreeMap::new();
    for record in records {
        let key = record.key();
        if index.contains_key(&key) {
            if report_duplicates {
                warnings.push(Warning::duplicate_timestamp(&record.dimensions, record.instant, origin));
            }
            continue;
        }
        index.insert(key, record.value);
    }
    index
}

/// (a) NewOnly keys at or before the persisted max, (b) PersistedOnly keys at
/// or after the fresh min. One warning per direction.
fn range_conflicts(
    entries: &[ReconciledEntry],
    fresh_min: Option<DateTime<Utc>>,
    persisted_max: Option<DateTime<Utc>>,
) -> Vec<Warning> {
    let mut warnings = Vec::new();

    if let Some(persisted_max) = persisted_max {
        let stale: Vec<&RecordKey> = entries
            .iter()
            .filter(|e| e.tag == MatchTag::NewOnly && e.key.instant <= persisted_max)
            .map(|e| &e.key)
            .collect();
        if let Some(start) = stale.iter().map(|k| k.instant).min() {
            let groups = distinct_groups(&stale);
            warn!(
                "{} new record(s) fall inside the persisted range, {} group(s) affected",
                stale.len(),
                groups.len()
            );
            warnings.push(Warning::range_conflict(&groups, start, persisted_max, "persisted"));
        }
    }

    if let Some(fresh_min) = fresh_min {
        let dropped: Vec<&RecordKey> = entries
            .iter()
            .filter(|e| e.tag == MatchTag::PersistedOnly && e.key.instant >= fresh_min)
            .map(|e| &e.key)
            .collect();
        if let Some(end) = dropped.iter().map(|k| k.instant).max() {
            let groups = distinct_groups(&dropped);
            warn!(
                "{} persisted record(s) missing from the fresh extract, {} group(s) affected",
                dropped.len(),
                groups.len()
            );
            warnings.push(Warning::range_conflict(&groups, fresh_min, end, "fresh"));
        }
    }

    warnings
}

fn distinct_groups(keys: &[&RecordKey]) -> Vec<Vec<String>> {
    keys.iter()
        .map(|k| k.dimensions.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::processing::warning::WarningKind;
    use chrono::{Duration, TimeZone};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn zone(name: &str) -> Vec<String> {
        vec![name.to_string()]
    }

    fn hour(h: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::hours(h)
    }

    fn rec(name: &str, h: i64, value: f64) -> NormalizedRecord {
        NormalizedRecord::new(zone(name), hour(h), value)
    }

    #[test]
    fn test_small_delta_within_tolerance_is_matched() {
        let outcome = ReconciliationEngine::new(1.0).reconcile(&[rec("ZoneA", 0, 100.0)], &[rec("ZoneA", 0, 100.5)]);

        assert_eq!(outcome.entries.len(), 1);
        assert_eq!(outcome.entries[0].tag, MatchTag::Matched { delta: -0.5 });
        assert!(outcome.warnings.is_empty());
    }

    #[test]
    fn test_tight_tolerance_reports_mismatch() {
        let outcome = ReconciliationEngine::new(0.1).reconcile(&[rec("ZoneA", 0, 100.0)], &[rec("ZoneA", 0, 100.5)]);

        assert_eq!(outcome.mismatches().count(), 1);
        assert_eq!(outcome.warnings.len(), 1);
        assert_eq!(outcome.warnings[0].kind, WarningKind::ValueMismatch);
        assert_eq!(outcome.warnings[0].instant, Some(hour(0)));
    }

    #[test]
    fn test_nan_delta_is_not_a_mismatch() {
        let outcome = ReconciliationEngine::new(0.0).reconcile(&[rec("ZoneA", 0, f64::NAN)], &[rec("ZoneA", 0, 5.0)]);

        assert!(matches!(outcome.entries[0].tag, MatchTag::Matched { delta } if delta.is_nan()));
        assert_eq!(outcome.mismatches().count(), 0);
    }

    #[test]
    fn test_new_rows_after_persisted_range_are_clean() {
        let fresh = vec![rec("ZoneA", 0, 10.0), rec("ZoneA", 1, 12.0)];
        let persisted = vec![rec("ZoneA", 0, 10.0)];
        let outcome = ReconciliationEngine::default().reconcile(&fresh, &persisted);

        assert_eq!(outcome.new_only_keys().len(), 1);
        assert!(outcome.new_only_keys().contains(&rec("ZoneA", 1, 0.0).key()));
        assert!(outcome.warnings.is_empty());
    }

    #[test]
    fn test_new_group_inside_persisted_range_is_a_conflict() {
        let fresh = vec![rec("ZoneA", 0, 1.0), rec("ZoneB", 0, 1.0), rec("ZoneB", 1, 1.0)];
        let persisted = vec![rec("ZoneA", 0, 1.0), rec("ZoneA", 1, 1.0)];
        let outcome = ReconciliationEngine::default().reconcile(&fresh, &persisted);

        // ZoneA 01:00 is also persisted-only and inside the fresh range
        let conflicts: Vec<_> = outcome
            .warnings
            .iter()
            .filter(|w| w.kind == WarningKind::RangeConflict)
            .collect();
        assert_eq!(conflicts.len(), 2);
        assert!(conflicts[0].message.starts_with("ZoneB data from 2024-01-01T00:00Z to 2024-01-01T01:00Z"));
        assert!(conflicts[0].message.ends_with("not found in persisted data"));
        assert_eq!(conflicts[0].dimensions, Some(zone("ZoneB")));
        assert!(conflicts[1].message.starts_with("ZoneA data"));
        assert!(conflicts[1].message.ends_with("not found in fresh data"));
    }

    #[test]
    fn test_persisted_duplicates_keep_first() {
        let persisted = vec![rec("ZoneA", 0, 1.0), rec("ZoneA", 0, 9.0)];
        let outcome = ReconciliationEngine::default().reconcile(&[rec("ZoneA", 0, 1.0)], &persisted);

        assert_eq!(outcome.entries.len(), 1);
        assert_eq!(outcome.entries[0].persisted, Some(1.0));
        assert_eq!(outcome.warnings[0].kind, WarningKind::DuplicateTimestamp);
    }

    #[test]
    fn test_persisted_duplicate_warnings_can_be_silenced() {
        let persisted = vec![rec("ZoneA", 0, 1.0), rec("ZoneA", 0, 9.0)];
        let outcome = ReconciliationEngine::default()
            .with_persisted_duplicate_warnings(false)
            .reconcile(&[rec("ZoneA", 0, 1.0)], &persisted);

        assert_eq!(outcome.entries[0].persisted, Some(1.0));
        assert!(outcome.warnings.is_empty());
    }

    #[test]
    fn test_empty_persisted_side_has_no_conflicts() {
        let outcome = ReconciliationEngine::default().reconcile(&[rec("ZoneA", 0, 1.0)], &[]);
        assert_eq!(outcome.counts().new_only, 1);
        assert!(outcome.warnings.is_empty());
    }

    #[test]
    fn test_partitions_cover_every_key_exactly_once() {
        let mut rng = StdRng::seed_from_u64(42);
        let engine = ReconciliationEngine::default();

        for _ in 0..200 {
            let mut fresh = Vec::new();
            let mut persisted = Vec::new();
            let mut universe = BTreeSet::new();
            for name in ["ZoneA", "ZoneB", "ZoneC"] {
                for h in 0..24 {
                    let roll: u8 = rng.gen_range(0..4);
                    let value: f64 = rng.gen_range(0.0..100.0);
                    if roll == 0 || roll == 2 {
                        fresh.push(rec(name, h, value));
                    }
                    if roll == 1 || roll == 2 {
                        persisted.push(rec(name, h, value + rng.gen_range(-2.0..2.0)));
                    }
                    if roll != 3 {
                        universe.insert(rec(name, h, 0.0).key());
                    }
                }
            }

            let outcome = engine.reconcile(&fresh, &persisted);
            let keys: Vec<_> = outcome.entries.iter().map(|e| e.key.clone()).collect();
            let unique: BTreeSet<_> = keys.iter().cloned().collect();
            assert_eq!(keys.len(), unique.len());
            assert_eq!(unique, universe);

            let counts = outcome.counts();
            assert_eq!(counts.matched + counts.new_only + counts.persisted_only, universe.len());
            for entry in &outcome.entries {
                match entry.tag {
                    MatchTag::Matched { .. } => assert!(entry.fresh.is_some() && entry.persisted.is_some()),
                    MatchTag::NewOnly => assert!(entry.fresh.is_some() && entry.persisted.is_none()),
                    MatchTag::PersistedOnly => assert!(entry.fresh.is_none() && entry.persisted.is_some()),
                }
            }
        }
    }
}
