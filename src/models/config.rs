//! Application configuration structures.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Upstream endpoints and partition selection
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// HTTP session behavior
    #[serde(default)]
    pub session: SessionConfig,

    /// Retry budget for upstream and store calls
    #[serde(default)]
    pub retry: RetryConfig,

    /// File outputs
    #[serde(default)]
    pub output: OutputConfig,

    /// Google Sheets backend
    #[serde(default)]
    pub sheets: SheetsConfig,

    /// Telegram notifications
    #[serde(default)]
    pub telegram: TelegramConfig,

    /// Snapshot reconciliation settings
    #[serde(default)]
    pub snapshot: SnapshotConfig,
}

impl Config {
    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        let upstream = &self.upstream;
        if upstream.matches_endpoint.as_deref().is_none_or(str::is_empty) {
            return Err(AppError::validation("upstream.matches_endpoint is not set"));
        }
        if upstream.grades_endpoint.as_deref().is_none_or(str::is_empty) {
            return Err(AppError::validation("upstream.grades_endpoint is not set"));
        }
        if upstream.host.trim().is_empty() {
            return Err(AppError::validation("upstream.host is empty"));
        }
        for endpoint in [&upstream.matches_endpoint, &upstream.grades_endpoint]
            .into_iter()
            .flatten()
        {
            let url = url::Url::parse(endpoint.trim())?;
            let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
            if !host.ends_with(&upstream.host.to_ascii_lowercase()) {
                return Err(AppError::validation(format!(
                    "endpoint {endpoint} is not on {}",
                    upstream.host
                )));
            }
        }
        if self.session.user_agent.trim().is_empty() {
            return Err(AppError::validation("session.user_agent is empty"));
        }
        if self.session.timeout_ms == 0 {
            return Err(AppError::validation("session.timeout_ms must be > 0"));
        }
        if self.retry.max_attempts == 0 {
            return Err(AppError::validation("retry.max_attempts must be > 0"));
        }
        if self.snapshot.on_load_failure.is_none() {
            return Err(AppError::validation(
                "snapshot.on_load_failure must be set to \"abort\" or \"first-run\"",
            ));
        }
        if self.output.output_dir.trim().is_empty() {
            return Err(AppError::validation("output.output_dir is empty"));
        }
        if !self.sheets_enabled() && self.output.state_dir.trim().is_empty() {
            return Err(AppError::validation("output.state_dir is empty"));
        }
        Ok(())
    }

    /// Whether the Sheets backend should be used for this run.
    pub fn sheets_enabled(&self) -> bool {
        !self.sheets.disabled
            && self.sheets.spreadsheet_id.as_deref().is_some_and(|s| !s.is_empty())
            && self.sheets.access_token.as_deref().is_some_and(|s| !s.is_empty())
    }

    /// Whether a Telegram target is configured.
    pub fn telegram_enabled(&self) -> bool {
        self.telegram.bot_token.as_deref().is_some_and(|s| !s.is_empty())
            && self.telegram.chat_id.as_deref().is_some_and(|s| !s.is_empty())
    }
}

/// Upstream (ResultsVault) endpoints and partition selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Matches endpoint; grade and season parameters are set per request
    #[serde(default)]
    pub matches_endpoint: Option<String>,

    /// Grades (partition list) endpoint
    #[serde(default)]
    pub grades_endpoint: Option<String>,

    /// Host every JSON endpoint must point at
    #[serde(default = "defaults::upstream_host")]
    pub host: String,

    /// Candidate pages that establish the session, in priority order
    #[serde(default)]
    pub referrer_urls: Vec<String>,

    /// Host a referrer page must belong to
    #[serde(default = "defaults::referrer_host")]
    pub referrer_host: String,

    /// Referrer used when no candidate matches `referrer_host`
    #[serde(default = "defaults::referrer_url")]
    pub default_referrer: String,

    /// Season forced onto every request
    #[serde(default)]
    pub season_id: Option<String>,

    /// Only these grades are processed when non-empty
    #[serde(default)]
    pub grade_ids: Vec<String>,

    /// Static API key sent with every JSON request
    #[serde(default)]
    pub api_key: Option<String>,

    /// Header carrying `api_key`
    #[serde(default = "defaults::api_key_header")]
    pub api_key_header: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            matches_endpoint: None,
            grades_endpoint: None,
            host: defaults::upstream_host(),
            referrer_urls: Vec::new(),
            referrer_host: defaults::referrer_host(),
            default_referrer: defaults::referrer_url(),
            season_id: None,
            grade_ids: Vec::new(),
            api_key: None,
            api_key_header: defaults::api_key_header(),
        }
    }
}

/// HTTP session behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Per-request timeout in milliseconds
    #[serde(default = "defaults::timeout_ms")]
    pub timeout_ms: u64,

    /// Pause between grades in milliseconds
    #[serde(default = "defaults::slowdown_ms")]
    pub slowdown_ms: u64,

    /// Re-open the referrer page every N grades (0 disables)
    #[serde(default = "defaults::refresh_every")]
    pub refresh_every: usize,

    /// Try once without session cookies on 401/403
    #[serde(default = "defaults::enabled")]
    pub fallback_on_auth: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::user_agent(),
            timeout_ms: defaults::timeout_ms(),
            slowdown_ms: defaults::slowdown_ms(),
            refresh_every: defaults::refresh_every(),
            fallback_on_auth: defaults::enabled(),
        }
    }
}

/// Retry budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "defaults::max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "defaults::base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "defaults::jitter_ms")]
    pub jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: defaults::max_attempts(),
            base_delay_ms: defaults::base_delay_ms(),
            jitter_ms: defaults::jitter_ms(),
        }
    }
}

/// File outputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Directory receiving per-grade and MASTER CSV files
    #[serde(default = "defaults::output_dir")]
    pub output_dir: String,

    /// Extra copy of the main CSV (single grade or MASTER)
    #[serde(default)]
    pub csv_output: Option<String>,

    /// Directory of the local table store (snapshot and bookkeeping)
    #[serde(default = "defaults::state_dir")]
    pub state_dir: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            output_dir: defaults::output_dir(),
            csv_output: None,
            state_dir: defaults::state_dir(),
        }
    }
}

/// Google Sheets backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SheetsConfig {
    #[serde(default)]
    pub spreadsheet_id: Option<String>,

    /// OAuth bearer token with the spreadsheets scope
    #[serde(default, skip_serializing)]
    pub access_token: Option<String>,

    #[serde(default)]
    pub disabled: bool,

    #[serde(default = "defaults::sheets_api_base")]
    pub api_base: String,
}

impl Default for SheetsConfig {
    fn default() -> Self {
        Self {
            spreadsheet_id: None,
            access_token: None,
            disabled: false,
            api_base: defaults::sheets_api_base(),
        }
    }
}

/// Telegram notifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default, skip_serializing)]
    pub bot_token: Option<String>,

    #[serde(default)]
    pub chat_id: Option<String>,

    #[serde(default = "defaults::telegram_api_base")]
    pub api_base: String,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            chat_id: None,
            api_base: defaults::telegram_api_base(),
        }
    }
}

/// Snapshot reconciliation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// What an unreadable snapshot means; must be chosen explicitly
    #[serde(default)]
    pub on_load_failure: Option<LoadFailurePolicy>,

    /// Table holding the snapshot
    #[serde(default = "defaults::snapshot_table")]
    pub table: String,

    /// Name recorded in the RUNS and LOG tables
    #[serde(default = "defaults::script_name")]
    pub script_name: String,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            on_load_failure: None,
            table: defaults::snapshot_table(),
            script_name: defaults::script_name(),
        }
    }
}

/// Handling of a snapshot that cannot be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoadFailurePolicy {
    /// Abort the run; nothing is reconciled or written
    Abort,
    /// Continue as if no snapshot existed
    FirstRun,
}

impl FromStr for LoadFailurePolicy {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "abort" | "fail" => Ok(Self::Abort),
            "first-run" | "first_run" | "empty" => Ok(Self::FirstRun),
            other => Err(AppError::config(format!(
                "unknown snapshot load-failure policy '{other}'"
            ))),
        }
    }
}

impl fmt::Display for LoadFailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Abort => write!(f, "abort"),
            Self::FirstRun => write!(f, "first-run"),
        }
    }
}

mod defaults {
    // Upstream defaults
    pub fn upstream_host() -> String {
        "api.resultsvault.co.uk".to_string()
    }
    pub fn referrer_host() -> String {
        "matchcentre.kncb.nl".to_string()
    }
    pub fn referrer_url() -> String {
        "https://matchcentre.kncb.nl/matches/".to_string()
    }
    pub fn api_key_header() -> String {
        "x-api-key".to_string()
    }

    // Session defaults
    pub fn user_agent() -> String {
        "Mozilla/5.0 (compatible; matchsync/0.1)".to_string()
    }
    pub fn timeout_ms() -> u64 {
        30_000
    }
    pub fn slowdown_ms() -> u64 {
        1_200
    }
    pub fn refresh_every() -> usize {
        5
    }
    pub fn enabled() -> bool {
        true
    }

    // Retry defaults
    pub fn max_attempts() -> u32 {
        4
    }
    pub fn base_delay_ms() -> u64 {
        1_200
    }
    pub fn jitter_ms() -> u64 {
        400
    }

    // Output defaults
    pub fn output_dir() -> String {
        "output".to_string()
    }
    pub fn state_dir() -> String {
        "state".to_string()
    }

    // Remote APIs
    pub fn sheets_api_base() -> String {
        "https://sheets.googleapis.com/v4".to_string()
    }
    pub fn telegram_api_base() -> String {
        "https://api.telegram.org".to_string()
    }

    // Snapshot defaults
    pub fn snapshot_table() -> String {
        "SNAPSHOT".to_string()
    }
    pub fn script_name() -> String {
        "matchsync".to_string()
    }
}
