//! Run bookkeeping: the RUNS and LOG table rows.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Header of the RUNS table.
pub const RUNS_HEADER: [&str; 9] = [
    "run_id",
    "start_time",
    "end_time",
    "script",
    "version",
    "grade_count",
    "match_count",
    "errors",
    "note",
];

/// Header of the LOG table.
pub const LOG_HEADER: [&str; 9] = [
    "run_id",
    "timestamp",
    "script",
    "function",
    "action",
    "table",
    "level",
    "message",
    "detail",
];

/// Format a timestamp the way every table stores it.
pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Derive a run id from the run's start time.
pub fn run_id(started: DateTime<Utc>) -> String {
    started.format("%Y%m%dT%H%M%S%.3fZ").to_string()
}

/// Final state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Every grade was processed
    Ok,
    /// Some grades failed; the rest was reconciled
    Partial,
    /// The run aborted
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }
}

/// Counters and outcome of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub grade_count: usize,
    pub match_count: usize,
    pub errors: usize,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub deleted: usize,
    pub status: RunStatus,
}

impl RunSummary {
    /// Number of change events written.
    pub fn change_count(&self) -> usize {
        self.created + self.updated + self.deleted
    }

    /// Human readable one-liner for the RUNS note and notifications.
    pub fn note(&self) -> String {
        format!(
            "status={} created={} updated={} deleted={} unchanged={}",
            self.status.as_str(),
            self.created,
            self.updated,
            self.deleted,
            self.unchanged
        )
    }

    /// Values in [`RUNS_HEADER`] order.
    pub fn to_row(&self, script: &str) -> Vec<String> {
        vec![
            self.run_id.clone(),
            timestamp(self.started_at),
            timestamp(self.finished_at),
            script.to_string(),
            env!("CARGO_PKG_VERSION").to_string(),
            self.grade_count.to_string(),
            self.match_count.to_string(),
            self.errors.to_string(),
            self.note(),
        ]
    }
}

/// Severity of a journal entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        }
    }
}

/// One row of the LOG table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub function: String,
    pub action: String,
    pub table: String,
    pub level: LogLevel,
    pub message: String,
    pub detail: String,
}

impl LogEntry {
    /// Values in [`LOG_HEADER`] order.
    pub fn to_row(&self, run_id: &str, script: &str) -> Vec<String> {
        vec![
            run_id.to_string(),
            timestamp(self.timestamp),
            script.to_string(),
            self.function.clone(),
            self.action.clone(),
            self.table.clone(),
            self.level.as_str().to_string(),
            self.message.clone(),
            self.detail.clone(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_run_id_format() {
        let at = Utc.with_ymd_and_hms(2025, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(run_id(at), "20250309T140507.000Z");
        assert_eq!(timestamp(at), "2025-03-09T14:05:07Z");
    }

    #[test]
    fn test_runs_row_matches_header() {
        let at = Utc.with_ymd_and_hms(2025, 3, 9, 14, 5, 7).unwrap();
        let summary = RunSummary {
            run_id: run_id(at),
            started_at: at,
            finished_at: at,
            grade_count: 3,
            match_count: 40,
            errors: 1,
            created: 2,
            updated: 1,
            unchanged: 37,
            deleted: 0,
            status: RunStatus::Partial,
        };
        let row = summary.to_row("matchsync");
        assert_eq!(row.len(), RUNS_HEADER.len());
        assert_eq!(row[5], "3");
        assert_eq!(row[7], "1");
        assert!(row[8].starts_with("status=partial"));
        assert_eq!(summary.change_count(), 3);
    }
}
