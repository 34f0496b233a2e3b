//! Snapshot reconciliation.
//!
//! Compares the records of the current run against the previous snapshot
//! and classifies every identity as created, updated, unchanged or
//! deleted. The result is the complete new snapshot plus the change events
//! to append to the audit log.
//!
//! Deleted records are never purged: they stay in the snapshot with
//! `_active = 0` and their last known content, and reappear as `created`.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::models::{ChangeEvent, ChangeType, Fields, Record, StoredRecord, timestamp};

/// Previous snapshot keyed by identity, in stored row order.
pub type Snapshot = IndexMap<String, StoredRecord>;

/// Content hash over the sorted hash-field projection.
pub fn content_hash(input: &BTreeMap<String, String>) -> String {
    let canonical = serde_json::to_string(input).unwrap_or_default();
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

/// Partitions in which a missing record counts as deleted.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DeletionScope {
    /// Every partition was fetched completely.
    #[default]
    All,
    /// Only these partitions were fetched; rows of others are kept as-is.
    Partitions(HashSet<String>),
}

impl DeletionScope {
    pub fn covers(&self, partition: &str) -> bool {
        match self {
            Self::All => true,
            Self::Partitions(set) => set.contains(partition),
        }
    }
}

/// Output of one reconciliation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Reconciliation {
    /// Complete new snapshot, one row per identity
    pub snapshot: Vec<StoredRecord>,
    /// Events in processing order
    pub changes: Vec<ChangeEvent>,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub deleted: usize,
    /// Rows carried over without classification (inactive or out of scope)
    pub retained: usize,
    /// Input records dropped for lack of an identity key
    pub skipped: usize,
}

impl Reconciliation {
    /// Check if there are any changes.
    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }

    /// Get the total number of changes.
    pub fn change_count(&self) -> usize {
        self.created + self.updated + self.deleted
    }
}

/// Reconciler for one run.
#[derive(Debug, Clone)]
pub struct Reconciler {
    run_id: String,
    now: String,
}

impl Reconciler {
    /// Create a reconciler stamping events with `run_id` and `now`.
    pub fn new(run_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            run_id: run_id.into(),
            now: timestamp(now),
        }
    }

    /// Reconcile this run's records against the previous snapshot.
    ///
    /// A record repeated within `records` keeps its first position but the
    /// content of its last occurrence.
    pub fn reconcile(
        &self,
        records: Vec<Record>,
        previous: &Snapshot,
        scope: &DeletionScope,
    ) -> Reconciliation {
        let mut out = Reconciliation::default();

        let mut latest: IndexMap<String, Record> = IndexMap::with_capacity(records.len());
        for record in records {
            if record.id.trim().is_empty() {
                log::warn!(
                    "Dropping record without identity key (grade {})",
                    record.partition
                );
                out.skipped += 1;
                continue;
            }
            if let Some(slot) = latest.get_mut(&record.id) {
                log::debug!("Duplicate record {} in run, last one wins", record.id);
                *slot = record;
            } else {
                latest.insert(record.id.clone(), record);
            }
        }

        for (id, record) in latest.iter() {
            let hash = content_hash(&record.hash_input);
            let prev = previous.get(id).filter(|p| p.active);

            let stored = match prev {
                None => {
                    out.created += 1;
                    out.changes
                        .push(self.event(id, ChangeType::Created, "", "", &hash, &record.partition));
                    self.stored(record, hash, ChangeType::Created)
                }
                Some(p) if p.hash != hash => {
                    out.updated += 1;
                    let field = changed_columns(&p.fields, &record.fields);
                    out.changes.push(self.event(
                        id,
                        ChangeType::Updated,
                        &field,
                        &p.hash,
                        &hash,
                        &record.partition,
                    ));
                    self.stored(record, hash, ChangeType::Updated)
                }
                Some(p) => {
                    out.unchanged += 1;
                    StoredRecord {
                        id: id.clone(),
                        fields: record.fields.clone(),
                        hash: p.hash.clone(),
                        last_changed_at: p.last_changed_at.clone(),
                        last_change_type: p.last_change_type.clone(),
                        active: true,
                    }
                }
            };
            out.snapshot.push(stored);
        }

        for (id, prev) in previous.iter() {
            if latest.contains_key(id) {
                continue;
            }
            if !prev.active || !scope.covers(prev.partition()) {
                out.retained += 1;
                out.snapshot.push(prev.clone());
                continue;
            }

            out.deleted += 1;
            out.changes.push(self.event(
                id,
                ChangeType::Deleted,
                "",
                &prev.hash,
                "",
                prev.partition(),
            ));
            out.snapshot.push(StoredRecord {
                last_changed_at: self.now.clone(),
                last_change_type: ChangeType::Deleted.to_string(),
                active: false,
                ..prev.clone()
            });
        }

        out
    }

    fn stored(&self, record: &Record, hash: String, change: ChangeType) -> StoredRecord {
        StoredRecord {
            id: record.id.clone(),
            fields: record.fields.clone(),
            hash,
            last_changed_at: self.now.clone(),
            last_change_type: change.to_string(),
            active: true,
        }
    }

    fn event(
        &self,
        id: &str,
        change_type: ChangeType,
        field: &str,
        old_hash: &str,
        new_hash: &str,
        partition: &str,
    ) -> ChangeEvent {
        ChangeEvent {
            run_id: self.run_id.clone(),
            timestamp: self.now.clone(),
            id: id.to_string(),
            change_type,
            field: field.to_string(),
            old_hash: old_hash.to_string(),
            new_hash: new_hash.to_string(),
            partition: partition.to_string(),
        }
    }
}

/// Comma separated names of the columns whose values differ.
fn changed_columns(previous: &Fields, current: &Fields) -> String {
    let mut names: Vec<&str> = current
        .iter()
        .filter(|(k, v)| previous.get(*k).map(String::as_str).unwrap_or("") != v.as_str())
        .map(|(k, _)| k.as_str())
        .collect();
    names.extend(
        previous
            .iter()
            .filter(|(k, v)| !v.is_empty() && !current.contains_key(*k))
            .map(|(k, _)| k.as_str()),
    );
    names.join(",")
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::models::{Grade, StoredRecord};
    use crate::services::normalizer::normalize_match;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 1, 12, 0, 0).unwrap()
    }

    fn grade(id: &str) -> Grade {
        Grade {
            id: id.into(),
            season_id: "19".into(),
            name: String::new(),
        }
    }

    fn make_record(id: &str, home: &str, away: &str, score: &str) -> Record {
        make_in(id, "g1", home, away, score)
    }

    fn make_in(id: &str, grade_id: &str, home: &str, away: &str, score: &str) -> Record {
        let entity = serde_json::json!({
            "match_id": id,
            "home_name": home,
            "away_name": away,
            "score_text": score,
        });
        normalize_match(&entity, &grade(grade_id)).unwrap()
    }

    fn as_snapshot(rows: &[StoredRecord]) -> Snapshot {
        rows.iter().map(|r| (r.id.clone(), r.clone())).collect()
    }

    fn run(records: Vec<Record>, previous: &Snapshot) -> Reconciliation {
        Reconciler::new("run-1", now()).reconcile(records, previous, &DeletionScope::All)
    }

    #[test]
    fn test_first_run_creates() {
        let result = run(vec![make_record("1", "A", "B", "")], &Snapshot::new());

        assert_eq!(result.changes.len(), 1);
        let event = &result.changes[0];
        assert_eq!(event.change_type, ChangeType::Created);
        assert_eq!(event.old_hash, "");
        assert_eq!(event.new_hash.len(), 64);
        assert_eq!(event.partition, "g1");

        assert_eq!(result.snapshot.len(), 1);
        assert!(result.snapshot[0].active);
        assert_eq!(result.snapshot[0].last_change_type, "created");
        assert_eq!(result.snapshot[0].last_changed_at, "2025-05-01T12:00:00Z");
    }

    #[test]
    fn test_score_change_updates() {
        let first = run(vec![make_record("1", "A", "B", "")], &Snapshot::new());
        let prev = as_snapshot(&first.snapshot);
        let h1 = first.snapshot[0].hash.clone();

        let result = run(vec![make_record("1", "A", "B", "2-1")], &prev);
        assert_eq!(result.updated, 1);
        let event = &result.changes[0];
        assert_eq!(event.change_type, ChangeType::Updated);
        assert_eq!(event.old_hash, h1);
        assert_ne!(event.new_hash, h1);
        assert_eq!(event.field, "score_text");
    }

    #[test]
    fn test_identical_rerun_is_unchanged() {
        let records = vec![make_record("1", "A", "B", ""), make_record("2", "C", "D", "")];
        let first = run(records.clone(), &Snapshot::new());
        let second = Reconciler::new("run-2", now() + chrono::Duration::hours(1)).reconcile(
            records,
            &as_snapshot(&first.snapshot),
            &DeletionScope::All,
        );

        assert!(!second.has_changes());
        assert_eq!(second.unchanged, 2);
        // Unchanged rows keep their original bookkeeping.
        assert_eq!(second.snapshot, first.snapshot);
    }

    #[test]
    fn test_missing_record_is_soft_deleted() {
        let first = run(vec![make_record("1", "A", "B", "3-0")], &Snapshot::new());
        let result = run(vec![], &as_snapshot(&first.snapshot));

        assert_eq!(result.deleted, 1);
        let event = &result.changes[0];
        assert_eq!(event.change_type, ChangeType::Deleted);
        assert_eq!(event.old_hash, first.snapshot[0].hash);
        assert_eq!(event.new_hash, "");

        let row = &result.snapshot[0];
        assert!(!row.active);
        assert_eq!(row.last_change_type, "deleted");
        assert_eq!(row.fields, first.snapshot[0].fields);
        assert_eq!(row.hash, first.snapshot[0].hash);
    }

    #[test]
    fn test_deleted_record_is_not_deleted_twice() {
        let first = run(vec![make_record("1", "A", "B", "")], &Snapshot::new());
        let deleted = run(vec![], &as_snapshot(&first.snapshot));
        let again = run(vec![], &as_snapshot(&deleted.snapshot));

        assert!(!again.has_changes());
        assert_eq!(again.retained, 1);
        assert_eq!(again.snapshot, deleted.snapshot);
    }

    #[test]
    fn test_resurrection_is_created() {
        let record = make_record("1", "A", "B", "1-1");
        let first = run(vec![record.clone()], &Snapshot::new());
        let deleted = run(vec![], &as_snapshot(&first.snapshot));
        let back = run(vec![record], &as_snapshot(&deleted.snapshot));

        assert_eq!(back.created, 1);
        assert_eq!(back.changes[0].change_type, ChangeType::Created);
        assert_eq!(back.changes[0].old_hash, "");
        assert!(back.snapshot[0].active);
    }

    #[test]
    fn test_duplicate_last_write_wins() {
        let result = run(
            vec![
                make_record("1", "A", "B", ""),
                make_record("2", "C", "D", ""),
                make_record("1", "A", "B", "4-2"),
            ],
            &Snapshot::new(),
        );

        assert_eq!(result.snapshot.len(), 2);
        assert_eq!(result.changes.len(), 2);
        assert_eq!(result.snapshot[0].id, "1");
        assert_eq!(result.snapshot[0].fields["score_text"], "4-2");
        assert_eq!(
            result.snapshot[0].hash,
            content_hash(&make_record("1", "A", "B", "4-2").hash_input)
        );
    }

    #[test]
    fn test_hash_ignores_field_order_and_extra_columns() {
        let a = serde_json::json!({"id": "1", "homeTeamName": "A", "awayTeamName": "B", "ts": 1});
        let b = serde_json::json!({"ts": 2, "awayTeamName": "B", "homeTeamName": "A", "id": "1"});
        let ra = normalize_match(&a, &grade("g")).unwrap();
        let rb = normalize_match(&b, &grade("g")).unwrap();
        assert_eq!(content_hash(&ra.hash_input), content_hash(&rb.hash_input));

        let first = run(vec![ra], &Snapshot::new());
        let second = run(vec![rb], &as_snapshot(&first.snapshot));
        assert!(!second.has_changes());
        // The volatile column is still refreshed in the stored row.
        assert_eq!(second.snapshot[0].fields["ts"], "2");
    }

    #[test]
    fn test_input_order_does_not_change_classification() {
        let prev = as_snapshot(
            &run(
                vec![make_record("1", "A", "B", ""), make_record("2", "C", "D", "")],
                &Snapshot::new(),
            )
            .snapshot,
        );

        let forward = run(
            vec![make_record("1", "A", "B", "1-0"), make_record("3", "E", "F", "")],
            &prev,
        );
        let backward = run(
            vec![make_record("3", "E", "F", ""), make_record("1", "A", "B", "1-0")],
            &prev,
        );

        let classify = |r: &Reconciliation| {
            let mut v: Vec<(String, ChangeType, String)> = r
                .changes
                .iter()
                .map(|e| (e.id.clone(), e.change_type, e.new_hash.clone()))
                .collect();
            v.sort();
            v
        };
        assert_eq!(classify(&forward), classify(&backward));
    }

    #[test]
    fn test_partitions_do_not_collide() {
        let result = run(
            vec![make_in("1", "g1", "A", "B", ""), make_in("2", "g2", "A", "B", "")],
            &Snapshot::new(),
        );
        assert_eq!(result.snapshot.len(), 2);
        assert_eq!(result.created, 2);
    }

    #[test]
    fn test_scope_protects_unfetched_partitions() {
        let first = run(
            vec![make_in("1", "g1", "A", "B", ""), make_in("2", "g2", "C", "D", "")],
            &Snapshot::new(),
        );
        let scope = DeletionScope::Partitions(HashSet::from(["g1".to_string()]));
        let result = Reconciler::new("run-2", now()).reconcile(
            vec![],
            &as_snapshot(&first.snapshot),
            &scope,
        );

        assert_eq!(result.deleted, 1);
        assert_eq!(result.retained, 1);
        assert_eq!(result.changes[0].id, "1");
        let kept = result.snapshot.iter().find(|r| r.id == "2").unwrap();
        assert!(kept.active);
    }

    #[test]
    fn test_records_without_id_are_skipped() {
        let mut record = make_record("1", "A", "B", "");
        record.id = String::new();
        let result = run(vec![record], &Snapshot::new());
        assert_eq!(result.skipped, 1);
        assert!(result.snapshot.is_empty());
    }

    #[test]
    fn test_changed_columns_lists_removed_values() {
        let prev: Fields = [("a", "1"), ("b", "2"), ("c", "")]
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let curr: Fields = [("a", "1"), ("b", "3"), ("d", "x")]
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        assert_eq!(changed_columns(&prev, &curr), "b,d");
    }
}
