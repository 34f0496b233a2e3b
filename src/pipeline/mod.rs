//! Pipeline entry points for sync operations.
//!
//! - `run_sync`: Fetch, reconcile, persist and export one run
//! - `diff`: Snapshot reconciliation

pub mod diff;
pub mod export;
pub mod sync;

pub use diff::{DeletionScope, Reconciler, Reconciliation, Snapshot};
pub use sync::{MatchSource, SyncOptions, Syncer, open_store, run_sync};
