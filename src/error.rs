// src/error.rs

//! Unified error handling for the sync application.

use std::fmt;

use thiserror::Error;

use crate::utils::retry::{RetryKind, Retryable};

/// Result type alias for sync operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Number of response-body characters kept for diagnostics.
pub const HEAD_LIMIT: usize = 220;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed outside of the retrying upstream client
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// CSV reading or writing failed
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// Upstream fetch failed after retries
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Tabular store error
    #[error("Store error for table {table}: {message}")]
    Store { table: String, message: String },

    /// Google Sheets API returned an error
    #[error("Sheets API error ({status}): {message}")]
    Sheets { status: u16, message: String },

    /// The previous snapshot could not be loaded
    #[error("Snapshot load failed: {message}")]
    SnapshotLoad { message: String },
}

impl AppError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a store error with the table it concerns.
    pub fn store(table: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Store {
            table: table.into(),
            message: message.to_string(),
        }
    }

    /// Create a snapshot load error.
    pub fn snapshot_load(message: impl fmt::Display) -> Self {
        Self::SnapshotLoad {
            message: message.to_string(),
        }
    }
}

impl Retryable for AppError {
    fn retry_kind(&self) -> RetryKind {
        match self {
            Self::Fetch(e) => e.retry_kind(),
            Self::Http(e) if e.is_timeout() || e.is_connect() => RetryKind::Transient,
            Self::Sheets { status, .. } if *status == 429 || *status >= 500 => {
                RetryKind::Transient
            }
            _ => RetryKind::Fatal,
        }
    }
}

/// Error of a single upstream JSON request.
///
/// Carries the URL and a truncated body so failures can be diagnosed from
/// the log or a notification alone.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("HTTP {status} for {url} | head={head}")]
    Status { status: u16, url: String, head: String },

    #[error("Non-JSON response from {url} | head={head}")]
    NonJson { url: String, head: String },

    #[error("JSON parse error for {url}: {message} | head={head}")]
    Parse {
        url: String,
        message: String,
        head: String,
    },

    #[error("Fetch failed for {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

/// Status codes worth another attempt.
const TRANSIENT_STATUSES: [u16; 9] = [401, 403, 408, 420, 429, 500, 502, 503, 504];

impl FetchError {
    /// HTTP status of the failed response, if one was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the upstream rejected the session.
    pub fn is_auth(&self) -> bool {
        matches!(self.status(), Some(401 | 403))
    }
}

impl Retryable for FetchError {
    fn retry_kind(&self) -> RetryKind {
        match self {
            Self::Status { status, .. } if matches!(status, 401 | 403) => {
                RetryKind::Reauthenticate
            }
            Self::Status { status, .. } if TRANSIENT_STATUSES.contains(status) => {
                RetryKind::Transient
            }
            Self::Transport { source, .. } if source.is_timeout() || source.is_connect() => {
                RetryKind::Transient
            }
            _ => RetryKind::Fatal,
        }
    }
}

/// Truncate a response body to [`HEAD_LIMIT`] characters.
pub fn head_of(body: &str) -> String {
    body.chars().take(HEAD_LIMIT).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16) -> FetchError {
        FetchError::Status {
            status: code,
            url: "https://api.example.com".into(),
            head: String::new(),
        }
    }

    #[test]
    fn test_auth_statuses_reauthenticate() {
        assert_eq!(status(401).retry_kind(), RetryKind::Reauthenticate);
        assert_eq!(status(403).retry_kind(), RetryKind::Reauthenticate);
        assert!(status(403).is_auth());
    }

    #[test]
    fn test_transient_statuses() {
        for code in [408, 420, 429, 500, 502, 503, 504] {
            assert_eq!(status(code).retry_kind(), RetryKind::Transient, "{code}");
        }
    }

    #[test]
    fn test_terminal_errors() {
        assert_eq!(status(404).retry_kind(), RetryKind::Fatal);
        let non_json = FetchError::NonJson {
            url: "u".into(),
            head: "<html>".into(),
        };
        assert_eq!(non_json.retry_kind(), RetryKind::Fatal);
        assert_eq!(AppError::config("x").retry_kind(), RetryKind::Fatal);
    }

    #[test]
    fn test_head_truncation() {
        let body = "x".repeat(500);
        assert_eq!(head_of(&body).len(), HEAD_LIMIT);
        assert_eq!(head_of("short"), "short");
    }

    #[test]
    fn test_sheets_rate_limit_is_transient() {
        let err = AppError::Sheets {
            status: 429,
            message: "quota".into(),
        };
        assert_eq!(err.retry_kind(), RetryKind::Transient);
    }
}
