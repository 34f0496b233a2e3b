//! Utility functions and helpers.

pub mod http;
pub mod log;
pub mod retry;
#[cfg(test)]
pub(crate) mod stub_server;

use std::time::Duration;

/// Format a duration as seconds with millisecond precision.
pub fn format_elapsed(elapsed: Duration) -> String {
    format!("{:.3}s", elapsed.as_secs_f64())
}

/// Split a comma or whitespace separated list, dropping empty items.
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(|c: char| c == ',' || c.is_whitespace())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
