// src/storage/snapshot.rs

//! Snapshot persistence on top of a [`TableStore`].

use crate::error::{AppError, Result};
use crate::models::{CHANGES_HEADER, ChangeEvent, LoadFailurePolicy, StoredRecord};
use crate::pipeline::diff::Snapshot;
use crate::storage::{CHANGES_TABLE, Table, TableStore};

/// Reads and writes the snapshot table and appends change events.
pub struct SnapshotRepository<'a> {
    store: &'a dyn TableStore,
    table: String,
    on_load_failure: LoadFailurePolicy,
}

impl<'a> SnapshotRepository<'a> {
    pub fn new(
        store: &'a dyn TableStore,
        table: impl Into<String>,
        on_load_failure: LoadFailurePolicy,
    ) -> Self {
        Self {
            store,
            table: table.into(),
            on_load_failure,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Load the previous snapshot.
    ///
    /// A missing table is an ordinary first run. An unreadable one is
    /// handled per the configured [`LoadFailurePolicy`].
    pub async fn load(&self) -> Result<Snapshot> {
        let table = match self.store.read_table(&self.table).await {
            Ok(Some(table)) => table,
            Ok(None) => {
                log::info!("No snapshot table {} yet, starting empty", self.table);
                return Ok(Snapshot::new());
            }
            Err(e) => {
                return match self.on_load_failure {
                    LoadFailurePolicy::Abort => Err(AppError::snapshot_load(e)),
                    LoadFailurePolicy::FirstRun => {
                        log::warn!("Snapshot unreadable ({}), treating as first run", e);
                        Ok(Snapshot::new())
                    }
                };
            }
        };

        Ok(snapshot_from_table(&table))
    }

    /// Replace the snapshot table with the reconciled records.
    pub async fn persist(&self, records: &[StoredRecord]) -> Result<()> {
        let rows: Vec<_> = records.iter().map(StoredRecord::to_row).collect();
        let table = Table::from_rows(&rows);
        self.store.replace_table(&self.table, &table).await?;
        log::info!("Persisted {} snapshot rows to {}", rows.len(), self.table);
        Ok(())
    }

    /// Append change events to the CHANGES table.
    pub async fn append_changes(&self, changes: &[ChangeEvent]) -> Result<()> {
        if changes.is_empty() {
            return Ok(());
        }
        let rows: Vec<Vec<String>> = changes.iter().map(ChangeEvent::to_row).collect();
        self.store
            .append_rows(CHANGES_TABLE, &CHANGES_HEADER, &rows)
            .await
    }
}

/// Rebuild a snapshot from table rows.
///
/// Rows without an identity key are skipped; a repeated key keeps the
/// later row.
pub fn snapshot_from_table(table: &Table) -> Snapshot {
    let mut snapshot = Snapshot::new();
    let mut skipped = 0usize;
    for row in table.to_maps() {
        match StoredRecord::from_row(row) {
            Some(record) => {
                if snapshot.contains_key(&record.id) {
                    log::warn!("Duplicate snapshot row for {}, keeping the later one", record.id);
                }
                snapshot.insert(record.id.clone(), record);
            }
            None => skipped += 1,
        }
    }
    if skipped > 0 {
        log::warn!("Skipped {} snapshot rows without an id", skipped);
    }
    snapshot
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use tempfile::TempDir;

    use super::*;
    use crate::models::{ChangeType, Fields};
    use crate::storage::LocalStore;

    struct BrokenStore;

    #[async_trait]
    impl TableStore for BrokenStore {
        fn describe(&self) -> String {
            "broken".into()
        }
        async fn read_table(&self, name: &str) -> Result<Option<Table>> {
            Err(AppError::store(name, "permission denied"))
        }
        async fn replace_table(&self, _: &str, _: &Table) -> Result<()> {
            Ok(())
        }
        async fn append_rows(&self, _: &str, _: &[&str], _: &[Vec<String>]) -> Result<()> {
            Ok(())
        }
    }

    fn stored(id: &str, grade: &str, active: bool) -> StoredRecord {
        let mut fields = Fields::new();
        fields.insert("home".into(), format!("team {id}"));
        fields.insert("_grade".into(), grade.into());
        StoredRecord {
            id: id.into(),
            fields,
            hash: format!("h{id}"),
            last_changed_at: "2025-01-01T00:00:00Z".into(),
            last_change_type: "created".into(),
            active,
        }
    }

    #[tokio::test]
    async fn test_missing_table_is_empty() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path());
        let repo = SnapshotRepository::new(&store, "SNAPSHOT", LoadFailurePolicy::Abort);
        assert!(repo.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_persist_then_load() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path());
        let repo = SnapshotRepository::new(&store, "SNAPSHOT", LoadFailurePolicy::Abort);

        let records = vec![stored("1", "10", true), stored("2", "11", false)];
        repo.persist(&records).await.unwrap();

        let loaded = repo.load().await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded["1"], records[0]);
        assert_eq!(loaded["2"], records[1]);
        assert!(!loaded["2"].active);
    }

    #[tokio::test]
    async fn test_load_failure_policies() {
        let abort = SnapshotRepository::new(&BrokenStore, "SNAPSHOT", LoadFailurePolicy::Abort);
        assert!(matches!(
            abort.load().await,
            Err(AppError::SnapshotLoad { .. })
        ));

        let first_run =
            SnapshotRepository::new(&BrokenStore, "SNAPSHOT", LoadFailurePolicy::FirstRun);
        assert!(first_run.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_append_changes() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path());
        let repo = SnapshotRepository::new(&store, "SNAPSHOT", LoadFailurePolicy::Abort);

        let event = ChangeEvent {
            run_id: "r1".into(),
            timestamp: "t".into(),
            id: "1".into(),
            change_type: ChangeType::Created,
            field: String::new(),
            old_hash: String::new(),
            new_hash: "h1".into(),
            partition: "10".into(),
        };
        repo.append_changes(&[]).await.unwrap();
        assert!(store.read_table(CHANGES_TABLE).await.unwrap().is_none());

        repo.append_changes(&[event.clone()]).await.unwrap();
        repo.append_changes(&[event]).await.unwrap();
        let table = store.read_table(CHANGES_TABLE).await.unwrap().unwrap();
        assert_eq!(table.header, CHANGES_HEADER.to_vec());
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0][3], "created");
    }

    #[test]
    fn test_snapshot_from_table_skips_and_dedupes() {
        let table = Table::new(
            vec!["_id".into(), "home".into()],
            vec![
                vec!["1".into(), "A".into()],
                vec!["".into(), "B".into()],
                vec!["1".into(), "C".into()],
            ],
        );
        let snapshot = snapshot_from_table(&table);
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot["1"].fields["home"], "C");
    }
}
