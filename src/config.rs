// src/config.rs

//! Configuration loading utilities.
//!
//! Configuration is layered: defaults, then an optional TOML file, then
//! environment variables. The environment is read through a lookup
//! function so tests can supply a plain map.

use std::path::Path;

use crate::error::{AppError, Result};
use crate::models::{Config, LoadFailurePolicy};
use crate::utils::split_list;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "matchsync.toml";

/// Load configuration from a TOML file.
///
/// A missing file yields the defaults; a malformed one is an error.
pub fn load_file(path: &Path) -> Result<Config> {
    match std::fs::read_to_string(path) {
        Ok(text) => toml::from_str(&text).map_err(|e| {
            AppError::config(format!("failed to parse {}: {e}", path.display()))
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            log::debug!("No config file at {}, using defaults", path.display());
            Ok(Config::default())
        }
        Err(e) => Err(AppError::Io(e)),
    }
}

/// Load the `.env` file (if any), the config file, and the process
/// environment, in that order.
pub fn load(path: &Path) -> Result<Config> {
    if let Ok(env_path) = dotenv::dotenv() {
        log::debug!("Loaded environment from {}", env_path.display());
    }
    let mut config = load_file(path)?;
    apply_env(&mut config, |key| std::env::var(key).ok())?;
    Ok(config)
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| AppError::config(format!("{key} must be a number (got '{value}')")))
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Apply environment overrides. Empty values are ignored.
pub fn apply_env<F>(config: &mut Config, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    let upstream = &mut config.upstream;
    if let Some(v) = get("MATCH_JSON_API_ENDPOINT") {
        upstream.matches_endpoint = Some(v.trim().to_string());
    }
    if let Some(v) = get("GRADES_JSON_API_ENDPOINT") {
        upstream.grades_endpoint = Some(v.trim().to_string());
    }
    let referrers: Vec<String> = [
        "MATCH_REFERRER_URL",
        "GRADES_REFERRER_URL",
        "SEASONS_REFERRER_URL",
    ]
    .iter()
    .filter_map(|key| get(*key))
    .map(|v| v.trim().to_string())
    .collect();
    if !referrers.is_empty() {
        upstream.referrer_urls = referrers;
    }
    if let Some(v) = get("SEASON_ID") {
        upstream.season_id = Some(v.trim().to_string());
    }
    if let Some(v) = get("GRADE_IDS") {
        upstream.grade_ids = split_list(&v);
    }
    if let Some(v) = get("API_KEY") {
        upstream.api_key = Some(v.trim().to_string());
    }

    let session = &mut config.session;
    if let Some(v) = get("SLOWDOWN_MS") {
        session.slowdown_ms = parse_number("SLOWDOWN_MS", &v)?;
    }
    if let Some(v) = get("TIMEOUT_MS") {
        session.timeout_ms = parse_number("TIMEOUT_MS", &v)?;
    }
    if let Some(v) = get("REFRESH_REFERRER_EVERY") {
        session.refresh_every = parse_number("REFRESH_REFERRER_EVERY", &v)?;
    }
    if let Some(v) = get("FALLBACK_ON_AUTH") {
        session.fallback_on_auth = parse_flag(&v);
    }

    let retry = &mut config.retry;
    if let Some(v) = get("RETRY_MAX") {
        retry.max_attempts = parse_number("RETRY_MAX", &v)?;
    }
    if let Some(v) = get("RETRY_BASE_DELAY_MS") {
        retry.base_delay_ms = parse_number("RETRY_BASE_DELAY_MS", &v)?;
    }
    if let Some(v) = get("RETRY_JITTER_MS") {
        retry.jitter_ms = parse_number("RETRY_JITTER_MS", &v)?;
    }

    let output = &mut config.output;
    if let Some(v) = get("OUTPUT_DIR") {
        output.output_dir = v.trim().to_string();
    }
    if let Some(v) = get("CSV_OUTPUT") {
        output.csv_output = Some(v.trim().to_string());
    }
    if let Some(v) = get("STATE_DIR") {
        output.state_dir = v.trim().to_string();
    }

    let sheets = &mut config.sheets;
    if let Some(v) = get("SPREADSHEET_ID") {
        sheets.spreadsheet_id = Some(v.trim().to_string());
    }
    if let Some(v) = get("GOOGLE_SHEETS_ACCESS_TOKEN") {
        sheets.access_token = Some(v.trim().to_string());
    }
    if let Some(v) = get("DISABLE_SHEETS") {
        sheets.disabled = parse_flag(&v);
    }

    let telegram = &mut config.telegram;
    if let Some(v) = get("TELEGRAM_BOT_TOKEN") {
        telegram.bot_token = Some(v.trim().to_string());
    }
    if let Some(v) = get("TELEGRAM_CHAT_ID") {
        telegram.chat_id = Some(v.trim().to_string());
    }

    if let Some(v) = get("SNAPSHOT_LOAD_FAILURE") {
        config.snapshot.on_load_failure = Some(v.parse::<LoadFailurePolicy>()?);
    }

    Ok(())
}
