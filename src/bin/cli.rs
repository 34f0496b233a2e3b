//! matchsync CLI
//!
//! Local execution entry point.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use matchsync::{
    config::{self, DEFAULT_CONFIG_FILE},
    error::Result,
    models::Config,
    pipeline::{self, SyncOptions},
    services::ResultsVault,
    storage::{self, TableStore, snapshot::snapshot_from_table},
    utils::{log as console, split_list},
};

/// matchsync - ResultsVault match synchronization
#[derive(Parser, Debug)]
#[command(
    name = "matchsync",
    version,
    about = "Sync ResultsVault matches to CSV and Google Sheets with change tracking"
)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch all grades, reconcile against the snapshot and export
    Sync {
        /// Only these grade ids (comma separated); overrides GRADE_IDS
        #[arg(long, value_delimiter = ',')]
        grades: Vec<String>,

        /// Keep everything local even when Sheets is configured
        #[arg(long)]
        no_sheets: bool,
    },

    /// Validate configuration
    Validate,

    /// Create the RUNS, LOG and CHANGES tables if missing
    Bootstrap {
        /// Keep everything local even when Sheets is configured
        #[arg(long)]
        no_sheets: bool,
    },

    /// Show snapshot and last-run state plus the effective configuration
    Info,
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let mut config: Config = config::load(&cli.config)?;
    log::debug!("Loaded configuration from {}", cli.config.display());

    match cli.command {
        Command::Sync { grades, no_sheets } => {
            let options = SyncOptions {
                grade_ids: grades.iter().flat_map(|g| split_list(g)).collect(),
                no_sheets,
            };
            let summary = pipeline::run_sync(&config, &options).await?;
            log::info!("Run {} finished: {}", summary.run_id, summary.note());
        }

        Command::Validate => {
            log::info!("Validating configuration...");

            if let Err(e) = config.validate() {
                log::error!("Config validation failed: {}", e);
                return Err(e);
            }
            let api = ResultsVault::from_config(&config.upstream)?;
            log::info!("✓ Grades endpoint: {}", api.grades_url());
            log::info!(
                "✓ Store: {}",
                if config.sheets_enabled() {
                    "Google Sheets"
                } else {
                    "local CSV"
                }
            );

            log::info!("All validations passed!");
        }

        Command::Bootstrap { no_sheets } => {
            if no_sheets {
                config.sheets.disabled = true;
            }
            let store = pipeline::open_store(&config)?;
            storage::bootstrap(&*store).await?;
        }

        Command::Info => {
            console::header("matchsync info");
            let store = pipeline::open_store(&config)?;
            console::sub_item(&format!("Store: {}", store.describe()));
            console::sub_item(&format!(
                "Telegram: {}",
                if config.telegram_enabled() {
                    "enabled"
                } else {
                    "disabled"
                }
            ));

            match store.read_table(&config.snapshot.table).await? {
                Some(table) => {
                    let snapshot = snapshot_from_table(&table);
                    let active = snapshot.values().filter(|r| r.active).count();
                    console::sub_item(&format!(
                        "Snapshot: {} rows ({} active, {} deleted)",
                        snapshot.len(),
                        active,
                        snapshot.len() - active
                    ));
                }
                None => console::sub_item("No snapshot found yet."),
            }

            let last_run = store
                .read_table(storage::RUNS_TABLE)
                .await?
                .and_then(|t| t.to_maps().pop());
            if let Some(run) = last_run {
                console::sub_item(&format!(
                    "Last run: {} ended {} ({})",
                    run.get("run_id").map(String::as_str).unwrap_or_default(),
                    run.get("end_time").map(String::as_str).unwrap_or_default(),
                    run.get("note").map(String::as_str).unwrap_or_default()
                ));
            }

            let rendered = toml::to_string_pretty(&config)
                .map_err(|e| matchsync::error::AppError::config(e.to_string()))?;
            println!("{rendered}");
        }
    }

    Ok(())
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(()) => {
            log::info!("Done!");
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
