// src/pipeline/sync.rs

//! One synchronization run.
//!
//! Steps: load the previous snapshot, fetch every grade (exporting each as
//! it arrives), reconcile, append change events, persist the snapshot,
//! export MASTER, record the run. Grades are fetched one after another through a
//! single upstream session.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::models::{
    Config, Fields, Grade, LoadFailurePolicy, Record, RunStatus, RunSummary, run_id,
};
use crate::pipeline::diff::{DeletionScope, Reconciler};
use crate::pipeline::export::{Exporter, MASTER_TABLE};
use crate::services::notifier::{fatal_message, grade_error_message, summary_message};
use crate::services::upstream::filter_grades;
use crate::services::{Notifier, ResultsVault, normalize_match, notify};
use crate::storage::{
    LocalStore, RunJournal, SheetsStore, SnapshotRepository, TableStore, record_run,
};
use crate::utils::http::Session;
use crate::utils::log as console;
use crate::utils::format_elapsed;

/// Per-invocation overrides from the command line.
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Only these grades; falls back to the configured list when empty
    pub grade_ids: Vec<String>,
    /// Use the local store even when Sheets is configured
    pub no_sheets: bool,
}

/// Where grades and their raw match entities come from.
#[async_trait]
pub trait MatchSource: Send {
    /// Called once before the first fetch.
    async fn open(&mut self) -> Result<()> {
        Ok(())
    }

    async fn grades(&mut self) -> Result<Vec<Grade>>;

    async fn matches(&mut self, grade: &Grade) -> Result<Vec<Value>>;

    /// Renew the upstream session between grades.
    async fn refresh(&mut self) {}
}

/// The live ResultsVault API behind a browser-like session.
pub struct UpstreamSource {
    api: ResultsVault,
    session: Session,
}

impl UpstreamSource {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            api: ResultsVault::from_config(&config.upstream)?,
            session: Session::new(config)?,
        })
    }
}

#[async_trait]
impl MatchSource for UpstreamSource {
    async fn open(&mut self) -> Result<()> {
        // Auth failures during fetches refresh the session again.
        if let Err(e) = self.session.warm_up().await {
            log::warn!("Referrer page failed to load: {}", e);
        }
        Ok(())
    }

    async fn grades(&mut self) -> Result<Vec<Grade>> {
        self.api.list_grades(&mut self.session).await
    }

    async fn matches(&mut self, grade: &Grade) -> Result<Vec<Value>> {
        self.api.list_matches(&mut self.session, grade).await
    }

    async fn refresh(&mut self) {
        self.session.refresh().await;
    }
}

/// Open the backing store: Sheets when configured, else the state directory.
pub fn open_store(config: &Config) -> Result<Box<dyn TableStore>> {
    match SheetsStore::from_config(config)? {
        Some(sheets) => Ok(Box::new(sheets)),
        None => Ok(Box::new(LocalStore::new(&config.output.state_dir))),
    }
}

/// Pacing between grades.
#[derive(Debug, Clone, Copy)]
pub struct Pacing {
    pub slowdown: Duration,
    pub refresh_every: usize,
}

impl Pacing {
    pub fn from_config(config: &Config) -> Self {
        Self {
            slowdown: Duration::from_millis(config.session.slowdown_ms),
            refresh_every: config.session.refresh_every,
        }
    }

    /// Whether the session should be renewed before the grade at `index`.
    pub fn refresh_before(&self, index: usize) -> bool {
        self.refresh_every > 0 && index > 0 && index % self.refresh_every == 0
    }
}

/// A run bound to its source, stores and notifier.
pub struct Syncer<'a> {
    pub store: &'a dyn TableStore,
    pub exporter: Exporter<'a>,
    pub notifier: Option<&'a Notifier>,
    pub pacing: Pacing,
    pub snapshot_table: String,
    pub on_load_failure: LoadFailurePolicy,
    pub script: String,
    /// Empty means every grade the upstream lists
    pub grade_filter: Vec<String>,
}

impl Syncer<'_> {
    /// Execute one run end to end.
    pub async fn run(&self, source: &mut dyn MatchSource) -> Result<RunSummary> {
        let started_at = Utc::now();
        let clock = Instant::now();
        let run_id = run_id(started_at);
        let mut journal = RunJournal::new();

        console::header(&format!("Sync run {}", run_id));

        let repo = SnapshotRepository::new(self.store, &self.snapshot_table, self.on_load_failure);
        console::step(1, 4, "Load snapshot");
        let previous = repo.load().await?;
        journal.info(
            "sync",
            "load",
            repo.table(),
            format!("{} rows in previous snapshot", previous.len()),
        );

        console::step(2, 4, "Fetch grades");
        source.open().await?;
        let listed = source.grades().await?;
        let grades = filter_grades(listed, &self.grade_filter);
        journal.info("sync", "grades", "", format!("{} grades to process", grades.len()));

        let mut errors = 0usize;
        let mut fetch_errors = 0usize;
        let mut fetched: HashSet<String> = HashSet::new();
        let mut records: Vec<Record> = Vec::new();
        let mut master: Vec<Fields> = Vec::new();

        for (index, grade) in grades.iter().enumerate() {
            if self.pacing.refresh_before(index) {
                source.refresh().await;
            }
            if index > 0 && !self.pacing.slowdown.is_zero() {
                tokio::time::sleep(self.pacing.slowdown).await;
            }

            let table = grade.table_name();
            let entities = match source.matches(grade).await {
                Ok(entities) => entities,
                Err(e) => {
                    fetch_errors += 1;
                    journal.error(
                        "sync",
                        "fetch",
                        &table,
                        format!("grade {} failed", grade.id),
                        e.to_string(),
                    );
                    notify(self.notifier, &grade_error_message(&grade.id, &e.to_string())).await;
                    continue;
                }
            };

            let mut grade_records: Vec<Record> = Vec::with_capacity(entities.len());
            let mut dropped = 0usize;
            for entity in &entities {
                match normalize_match(entity, grade) {
                    Some(record) => grade_records.push(record),
                    None => dropped += 1,
                }
            }
            if dropped > 0 {
                journal.warn(
                    "sync",
                    "normalize",
                    &table,
                    format!("{} matches without an id dropped", dropped),
                );
            }
            journal.info(
                "sync",
                "fetch",
                &table,
                format!("{} matches", grade_records.len()),
            );

            let rows: Vec<Fields> = grade_records.iter().map(|r| r.fields.clone()).collect();
            errors += self.exporter.export(&table, &rows, &mut journal).await;
            if grades.len() == 1 {
                errors += self.exporter.copy_main(&rows, &mut journal).await;
            }

            fetched.insert(grade.id.clone());
            master.extend(rows);
            records.extend(grade_records);
        }

        if grades.is_empty() && !previous.is_empty() {
            journal.warn(
                "sync",
                "grades",
                repo.table(),
                format!(
                    "upstream listed no grades; {} stored rows are in scope",
                    previous.len()
                ),
            );
        }

        // Missing rows only count as deleted in grades fetched completely.
        let scope = if self.grade_filter.is_empty() && fetch_errors == 0 {
            DeletionScope::All
        } else {
            DeletionScope::Partitions(fetched)
        };

        console::step(3, 4, "Reconcile");
        let match_count = records.len();
        let reconciler = Reconciler::new(&run_id, started_at);
        let result = reconciler.reconcile(records, &previous, &scope);
        journal.info(
            "sync",
            "reconcile",
            repo.table(),
            format!(
                "created={} updated={} unchanged={} deleted={} retained={}",
                result.created, result.updated, result.unchanged, result.deleted, result.retained
            ),
        );

        console::step(4, 4, "Persist and export");
        // CHANGES before SNAPSHOT: a failed persist only replays events next run.
        repo.append_changes(&result.changes).await?;
        repo.persist(&result.snapshot).await?;

        errors += self.exporter.export(MASTER_TABLE, &master, &mut journal).await;
        if grades.len() > 1 {
            errors += self.exporter.copy_main(&master, &mut journal).await;
        }

        errors += fetch_errors;
        let summary = RunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            grade_count: grades.len(),
            match_count,
            errors,
            created: result.created,
            updated: result.updated,
            unchanged: result.unchanged,
            deleted: result.deleted,
            status: if errors == 0 {
                RunStatus::Ok
            } else {
                RunStatus::Partial
            },
        };

        record_run(self.store, &summary, &self.script, &journal).await?;

        if result.has_changes() {
            notify(self.notifier, &summary_message(&self.script, &summary)).await;
        }

        console::summary(
            "Sync",
            &[
                ("grades", summary.grade_count.to_string()),
                ("matches", summary.match_count.to_string()),
                ("created", summary.created.to_string()),
                ("updated", summary.updated.to_string()),
                ("unchanged", summary.unchanged.to_string()),
                ("deleted", summary.deleted.to_string()),
                ("errors", summary.errors.to_string()),
                ("elapsed", format_elapsed(clock.elapsed())),
            ],
        );

        Ok(summary)
    }

    /// Record a run that aborted before completion. Best effort.
    async fn record_failure(&self, started_at: chrono::DateTime<Utc>, error: &AppError) {
        let mut journal = RunJournal::new();
        journal.error("sync", "abort", "", "run aborted", error.to_string());
        let summary = RunSummary {
            run_id: run_id(started_at),
            started_at,
            finished_at: Utc::now(),
            grade_count: 0,
            match_count: 0,
            errors: 1,
            created: 0,
            updated: 0,
            unchanged: 0,
            deleted: 0,
            status: RunStatus::Failed,
        };
        if let Err(e) = record_run(self.store, &summary, &self.script, &journal).await {
            log::warn!("Could not record failed run: {}", e);
        }
    }

    /// [`Syncer::run`] plus fatal handling: notify, and record the failure
    /// unless the snapshot could not be loaded.
    pub async fn run_or_report(&self, source: &mut dyn MatchSource) -> Result<RunSummary> {
        let started_at = Utc::now();
        match self.run(source).await {
            Ok(summary) => Ok(summary),
            Err(e) => {
                log::error!("Sync failed: {}", e);
                notify(self.notifier, &fatal_message(&e.to_string())).await;
                if !matches!(e, AppError::SnapshotLoad { .. }) {
                    self.record_failure(started_at, &e).await;
                }
                Err(e)
            }
        }
    }
}

/// Run a full sync against the live upstream.
pub async fn run_sync(config: &Config, options: &SyncOptions) -> Result<RunSummary> {
    let mut config = config.clone();
    if options.no_sheets {
        config.sheets.disabled = true;
    }
    let notifier = Notifier::from_config(&config);
    if let Err(e) = config.validate() {
        notify(notifier.as_ref(), &fatal_message(&e.to_string())).await;
        return Err(e);
    }

    let on_load_failure = config
        .snapshot
        .on_load_failure
        .ok_or_else(|| AppError::config("snapshot.on_load_failure is not set"))?;

    let store = open_store(&config)?;
    let output = LocalStore::new(&config.output.output_dir);
    let mut sinks: Vec<&dyn TableStore> = vec![&output];
    if config.sheets_enabled() {
        sinks.push(&*store);
    }
    log::info!("Store: {}", store.describe());

    let grade_filter = if options.grade_ids.is_empty() {
        config.upstream.grade_ids.clone()
    } else {
        options.grade_ids.clone()
    };

    let syncer = Syncer {
        store: &*store,
        exporter: Exporter::new(sinks, config.output.csv_output.as_ref().map(PathBuf::from)),
        notifier: notifier.as_ref(),
        pacing: Pacing::from_config(&config),
        snapshot_table: config.snapshot.table.clone(),
        on_load_failure,
        script: config.snapshot.script_name.clone(),
        grade_filter,
    };

    let mut source = match UpstreamSource::from_config(&config) {
        Ok(source) => source,
        Err(e) => {
            notify(notifier.as_ref(), &fatal_message(&e.to_string())).await;
            return Err(e);
        }
    };
    syncer.run_or_report(&mut source).await
}
