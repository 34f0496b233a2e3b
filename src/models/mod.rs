// src/models/mod.rs

//! Domain models for the sync application.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod config;
mod record;
mod run;
mod snapshot;

// Re-export all public types
pub use config::{
    Config, LoadFailurePolicy, OutputConfig, RetryConfig, SessionConfig, SheetsConfig,
    SnapshotConfig, TelegramConfig, UpstreamConfig,
};
pub use record::{Fields, Grade, Record};
pub use run::{
    LOG_HEADER, LogEntry, LogLevel, RUNS_HEADER, RunStatus, RunSummary, run_id, timestamp,
};
pub use snapshot::{
    BOOKKEEPING_COLUMNS, CHANGES_HEADER, COL_ACTIVE, COL_GRADE, COL_HASH, COL_ID,
    COL_LAST_CHANGE_TYPE, COL_LAST_CHANGED_AT, COL_SEASON, ChangeEvent, ChangeType,
    StoredRecord,
};
