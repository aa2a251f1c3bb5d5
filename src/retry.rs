//! Bounded retries with exponential backoff.
//!
//! Between attempt `k` and `k + 1` (zero-indexed) the executor sleeps
//! `base^k * multiplier` time units. On exhaustion the last error is returned
//! unchanged.
//!
//! [`execute`] retries every failure: it does not look at the error to decide
//! whether a retry can help, so permanent failures (a 4xx from the publish
//! target, a missing file) burn the full attempt budget. Callers that can
//! tell transient from permanent faults use [`execute_classified`].

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

use crate::config::RetryConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base: u32,
    pub multiplier: u32,
    /// Length of one backoff time unit.
    pub unit: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base: config.backoff_base,
            multiplier: config.backoff_multiplier,
            unit: Duration::from_millis(config.unit_ms),
        }
    }

    /// Backoff after the zero-indexed attempt `attempt` failed.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let units = (self.base as u64)
            .saturating_pow(attempt)
            .saturating_mul(self.multiplier as u64);
        self.unit.saturating_mul(units.min(u32::MAX as u64) as u32)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// Verdict of a retry classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retryability {
    Retry,
    Fatal,
}

/// Run `op` until it succeeds or `policy.max_attempts` attempts have failed.
pub async fn execute<T, E, F, Fut>(op_name: &str, policy: &RetryPolicy, op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    execute_classified(op_name, policy, |_| Retryability::Retry, op).await
}

/// Like [`execute`], but stops early when `classify` marks an error fatal.
pub async fn execute_classified<T, E, F, Fut, C>(
    op_name: &str,
    policy: &RetryPolicy,
    classify: C,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> Retryability,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let last = attempt + 1 >= max_attempts;
                if last || classify(&err) == Retryability::Fatal {
                    return Err(err);
                }

                let delay = policy.delay_after(attempt);
                debug!(
                    "{} failed: {}; retrying in {:?} (attempt {}/{})",
                    op_name,
                    err,
                    delay,
                    attempt + 1,
                    max_attempts
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
