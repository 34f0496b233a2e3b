// src/pipeline/export.rs

//! Export sinks for per-grade and MASTER tables.
//!
//! Every sink receives the same table. A failing sink is recorded in the
//! run journal and does not stop the others.

use std::path::PathBuf;

use futures::future::join_all;

use crate::models::Fields;
use crate::storage::local::write_csv_file;
use crate::storage::{RunJournal, Table, TableStore};

/// Name of the table holding every grade's rows.
pub const MASTER_TABLE: &str = "MASTER";

/// Fan-out writer over a set of table stores.
pub struct Exporter<'a> {
    sinks: Vec<&'a dyn TableStore>,
    csv_output: Option<PathBuf>,
}

impl<'a> Exporter<'a> {
    pub fn new(sinks: Vec<&'a dyn TableStore>, csv_output: Option<PathBuf>) -> Self {
        Self { sinks, csv_output }
    }

    /// Replace `name` in every sink. Returns the number of failed sinks.
    pub async fn export(&self, name: &str, rows: &[Fields], journal: &mut RunJournal) -> usize {
        if rows.is_empty() {
            log::debug!("Nothing to export for {}", name);
            return 0;
        }
        let table = Table::from_rows(rows);

        let results = join_all(self.sinks.iter().map(|s| s.replace_table(name, &table))).await;

        let mut failures = 0;
        for (sink, result) in self.sinks.iter().zip(results) {
            match result {
                Ok(()) => journal.info(
                    "export",
                    "write",
                    name,
                    format!("{} rows to {}", table.rows.len(), sink.describe()),
                ),
                Err(e) => {
                    failures += 1;
                    journal.error(
                        "export",
                        "write",
                        name,
                        format!("{} failed", sink.describe()),
                        e.to_string(),
                    );
                }
            }
        }
        failures
    }

    /// Write the extra CSV copy, if one is configured. Returns 1 on failure.
    pub async fn copy_main(&self, rows: &[Fields], journal: &mut RunJournal) -> usize {
        let Some(path) = self.csv_output.as_ref() else {
            return 0;
        };
        if rows.is_empty() {
            return 0;
        }
        let table = Table::from_rows(rows);
        match write_csv_file(path, &table).await {
            Ok(()) => {
                journal.info("export", "copy", MASTER_TABLE, format!("wrote {}", path.display()));
                0
            }
            Err(e) => {
                journal.error(
                    "export",
                    "copy",
                    MASTER_TABLE,
                    format!("could not write {}", path.display()),
                    e.to_string(),
                );
                1
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::storage::LocalStore;

    fn rows() -> Vec<Fields> {
        vec![
            [("id", "1"), ("home", "A")]
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            [("id", "2"), ("away", "B")]
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        ]
    }

    #[tokio::test]
    async fn test_export_to_all_sinks() {
        let tmp = TempDir::new().unwrap();
        let first = LocalStore::new(tmp.path().join("a"));
        let second = LocalStore::new(tmp.path().join("b"));
        let sinks: Vec<&dyn TableStore> = vec![&first, &second];
        let exporter = Exporter::new(sinks, None);
        let mut journal = RunJournal::new();

        assert_eq!(exporter.export("Grade_1", &rows(), &mut journal).await, 0);
        for store in [&first, &second] {
            let table = store.read_table("Grade_1").await.unwrap().unwrap();
            assert_eq!(table.header, vec!["id", "home", "away"]);
            assert_eq!(table.rows.len(), 2);
        }
        assert_eq!(journal.entries().len(), 2);
    }

    #[tokio::test]
    async fn test_empty_rows_write_nothing() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path());
        let sinks: Vec<&dyn TableStore> = vec![&store];
        let exporter = Exporter::new(sinks, Some(tmp.path().join("main.csv")));
        let mut journal = RunJournal::new();

        assert_eq!(exporter.export("MASTER", &[], &mut journal).await, 0);
        assert_eq!(exporter.copy_main(&[], &mut journal).await, 0);
        assert!(store.read_table("MASTER").await.unwrap().is_none());
        assert!(!tmp.path().join("main.csv").exists());
    }

    #[tokio::test]
    async fn test_copy_main() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("out").join("matches.csv");
        let exporter = Exporter::new(vec![], Some(path.clone()));
        let mut journal = RunJournal::new();

        assert_eq!(exporter.copy_main(&rows(), &mut journal).await, 0);
        let text = std::fs::read_to_string(path).unwrap();
        assert!(text.starts_with("id,home,away\n"));
    }
}
