//! Run bookkeeping: the RUNS, LOG and CHANGES tables.

use chrono::Utc;

use crate::error::Result;
use crate::models::{
    CHANGES_HEADER, LOG_HEADER, LogEntry, LogLevel, RUNS_HEADER, RunSummary,
};
use crate::storage::TableStore;

pub const RUNS_TABLE: &str = "RUNS";
pub const LOG_TABLE: &str = "LOG";
pub const CHANGES_TABLE: &str = "CHANGES";

/// Structured entries collected during a run and flushed to LOG at the end.
///
/// Every entry is also emitted through the `log` facade.
#[derive(Debug, Default)]
pub struct RunJournal {
    entries: Vec<LogEntry>,
}

impl RunJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn push(
        &mut self,
        level: LogLevel,
        function: &str,
        action: &str,
        table: &str,
        message: impl Into<String>,
        detail: impl Into<String>,
    ) {
        let entry = LogEntry {
            timestamp: Utc::now(),
            function: function.to_string(),
            action: action.to_string(),
            table: table.to_string(),
            level,
            message: message.into(),
            detail: detail.into(),
        };

        match level {
            LogLevel::Info => log::info!("[{}] {}: {}", function, action, entry.message),
            LogLevel::Warn => log::warn!("[{}] {}: {}", function, action, entry.message),
            LogLevel::Error => log::error!("[{}] {}: {}", function, action, entry.message),
        }
        self.entries.push(entry);
    }

    pub fn info(&mut self, function: &str, action: &str, table: &str, message: impl Into<String>) {
        self.push(LogLevel::Info, function, action, table, message, "");
    }

    pub fn warn(&mut self, function: &str, action: &str, table: &str, message: impl Into<String>) {
        self.push(LogLevel::Warn, function, action, table, message, "");
    }

    pub fn error(
        &mut self,
        function: &str,
        action: &str,
        table: &str,
        message: impl Into<String>,
        detail: impl Into<String>,
    ) {
        self.push(LogLevel::Error, function, action, table, message, detail);
    }

    pub fn error_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.level == LogLevel::Error)
            .count()
    }
}

/// Create the bookkeeping tables with their headers when missing.
pub async fn bootstrap(store: &dyn TableStore) -> Result<()> {
    store.ensure_table(RUNS_TABLE, &RUNS_HEADER).await?;
    store.ensure_table(LOG_TABLE, &LOG_HEADER).await?;
    store.ensure_table(CHANGES_TABLE, &CHANGES_HEADER).await?;
    log::info!("Bookkeeping tables ready in {}", store.describe());
    Ok(())
}

/// Append the run's RUNS row and flush its journal to LOG.
pub async fn record_run(
    store: &dyn TableStore,
    summary: &RunSummary,
    script: &str,
    journal: &RunJournal,
) -> Result<()> {
    store
        .append_rows(RUNS_TABLE, &RUNS_HEADER, &[summary.to_row(script)])
        .await?;

    let rows: Vec<Vec<String>> = journal
        .entries()
        .iter()
        .map(|e| e.to_row(&summary.run_id, script))
        .collect();
    store.append_rows(LOG_TABLE, &LOG_HEADER, &rows).await
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use tempfile::TempDir;

    use super::*;
    use crate::models::{RunStatus, run_id};
    use crate::storage::LocalStore;

    #[tokio::test]
    async fn test_bootstrap_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path());

        bootstrap(&store).await.unwrap();
        bootstrap(&store).await.unwrap();

        for (name, header) in [
            (RUNS_TABLE, RUNS_HEADER.to_vec()),
            (LOG_TABLE, LOG_HEADER.to_vec()),
            (CHANGES_TABLE, CHANGES_HEADER.to_vec()),
        ] {
            let table = store.read_table(name).await.unwrap().unwrap();
            assert_eq!(table.header, header);
            assert!(table.rows.is_empty());
        }
    }

    #[tokio::test]
    async fn test_record_run_writes_runs_and_log() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path());

        let now = Utc::now();
        let summary = RunSummary {
            run_id: run_id(now),
            started_at: now,
            finished_at: now,
            grade_count: 2,
            match_count: 5,
            errors: 1,
            created: 5,
            updated: 0,
            unchanged: 0,
            deleted: 0,
            status: RunStatus::Partial,
        };
        let mut journal = RunJournal::new();
        journal.info("sync", "fetch", "Grade_1", "fetched 5 matches");
        journal.error("sync", "fetch", "Grade_2", "HTTP 500", "body head");
        assert_eq!(journal.error_count(), 1);

        record_run(&store, &summary, "matchsync", &journal).await.unwrap();

        let runs = store.read_table(RUNS_TABLE).await.unwrap().unwrap();
        assert_eq!(runs.rows.len(), 1);
        assert_eq!(runs.rows[0][0], summary.run_id);

        let log = store.read_table(LOG_TABLE).await.unwrap().unwrap();
        assert_eq!(log.rows.len(), 2);
        assert_eq!(log.rows[1][6], "ERROR");
        assert_eq!(log.rows[1][8], "body head");
    }
}
