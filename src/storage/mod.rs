//! Storage abstractions for tabular persistence.
//!
//! Everything the sync persists is a named table of text cells: the
//! per-grade and MASTER exports, the snapshot, and the RUNS / LOG / CHANGES
//! bookkeeping tables. Two backends implement [`TableStore`]:
//!
//! - [`LocalStore`]: one CSV file per table in a directory
//! - [`SheetsStore`]: one tab per table in a Google spreadsheet
//!
//! ## Local layout
//!
//! ```text
//! state/
//! ├── SNAPSHOT.csv          # Full snapshot, rewritten every run
//! ├── CHANGES.csv           # Append-only change log
//! ├── RUNS.csv              # One row per run
//! └── LOG.csv               # Run journal
//! ```

pub mod local;
pub mod runbook;
pub mod sheets;
pub mod snapshot;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::Fields;

// Re-export for convenience
pub use local::LocalStore;
pub use runbook::{CHANGES_TABLE, LOG_TABLE, RUNS_TABLE, RunJournal, bootstrap, record_run};
pub use sheets::SheetsStore;
pub use snapshot::SnapshotRepository;

/// A header row plus data rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(header: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self { header, rows }
    }

    /// Build a table from flat rows.
    ///
    /// The header is the union of all column names in first-seen order;
    /// missing cells are empty strings.
    pub fn from_rows(rows: &[Fields]) -> Self {
        let mut header: Vec<String> = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for row in rows {
            for key in row.keys() {
                if seen.insert(key.as_str()) {
                    header.push(key.clone());
                }
            }
        }

        let rows = rows
            .iter()
            .map(|row| {
                header
                    .iter()
                    .map(|h| row.get(h).cloned().unwrap_or_default())
                    .collect()
            })
            .collect();

        Self { header, rows }
    }

    /// Rows as column → value maps; short rows are padded with empty cells.
    pub fn to_maps(&self) -> Vec<Fields> {
        self.rows
            .iter()
            .map(|row| {
                self.header
                    .iter()
                    .enumerate()
                    .filter(|(_, h)| !h.is_empty())
                    .map(|(i, h)| (h.clone(), row.get(i).cloned().unwrap_or_default()))
                    .collect()
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.header.is_empty() && self.rows.is_empty()
    }
}

/// Trait for tabular storage backends.
#[async_trait]
pub trait TableStore: Send + Sync {
    /// Human readable location, for logs.
    fn describe(&self) -> String;

    /// Read a whole table; `None` when it does not exist.
    async fn read_table(&self, name: &str) -> Result<Option<Table>>;

    /// Replace the table's full contents, creating it if needed.
    async fn replace_table(&self, name: &str, table: &Table) -> Result<()>;

    /// Append rows, writing `header` first when the table is new or empty.
    async fn append_rows(&self, name: &str, header: &[&str], rows: &[Vec<String>]) -> Result<()>;

    /// Make sure the table exists with at least its header row.
    async fn ensure_table(&self, name: &str, header: &[&str]) -> Result<()> {
        self.append_rows(name, header, &[]).await
    }
}
