// src/utils/retry.rs

//! Bounded retry with exponential backoff and jitter.
//!
//! Every retried I/O call in the crate goes through [`retry`]; call sites
//! only describe the operation and how to recover a session between
//! attempts.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::models::RetryConfig;

/// How a failed attempt should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryKind {
    /// Wait and try again.
    Transient,
    /// Refresh the session, then wait and try again.
    Reauthenticate,
    /// Give up immediately.
    Fatal,
}

/// Errors that know whether they are worth another attempt.
pub trait Retryable {
    fn retry_kind(&self) -> RetryKind;
}

/// Retry budget and delay shape.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles afterwards
    pub base_delay: Duration,
    /// Upper bound of the random extra delay
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            jitter: Duration::from_millis(config.jitter_ms),
        }
    }
}

impl RetryPolicy {
    /// Policy that never waits, for tests and dry runs.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::ZERO,
            jitter: Duration::ZERO,
        }
    }

    /// Delay before retrying after the given (1-based) failed attempt,
    /// without jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }

    /// Backoff plus a uniform random jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        let extra = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ms)
        };
        self.backoff(attempt) + Duration::from_millis(extra)
    }
}

/// Run `op` until it succeeds, fails fatally, or the budget is spent.
///
/// `recover` runs before the next attempt whenever the failure asks for
/// reauthentication. The last error is returned unchanged.
pub async fn retry<T, E, Op, Fut, Rec, RecFut>(
    policy: &RetryPolicy,
    label: &str,
    mut op: Op,
    mut recover: Rec,
) -> std::result::Result<T, E>
where
    E: Retryable + Display,
    Op: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    Rec: FnMut() -> RecFut,
    RecFut: Future<Output = ()>,
{
    let mut attempt = 1;
    loop {
        let error = match op().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        let kind = error.retry_kind();
        log::warn!(
            "[attempt {}/{}] {} -> {}",
            attempt,
            policy.max_attempts,
            label,
            error
        );

        if kind == RetryKind::Fatal || attempt >= policy.max_attempts {
            return Err(error);
        }

        if kind == RetryKind::Reauthenticate {
            recover().await;
        }

        let wait = policy.delay_for_attempt(attempt);
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
        attempt += 1;
    }
}
