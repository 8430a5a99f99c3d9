//! Linear-backoff retry for single upstream calls.

use std::future::Future;
use std::time::Duration;

use common::config::RetryConfig;
use common::Error;
use tokio::time::sleep;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    retryable_statuses: Vec<u16>,
}

/// Result of a retried call. An upstream that answered with an empty list is
/// `Succeeded`; only a call that never succeeded is `Exhausted`.
#[derive(Debug)]
pub enum RetryOutcome<T> {
    Succeeded { value: T, attempts: u32 },
    Exhausted { attempts: u32, last_error: Error },
}

impl<T> RetryOutcome<T> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryOutcome::Succeeded { attempts, .. } | RetryOutcome::Exhausted { attempts, .. } => {
                *attempts
            }
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, RetryOutcome::Exhausted { .. })
    }

    pub fn ok(self) -> Option<T> {
        match self {
            RetryOutcome::Succeeded { value, .. } => Some(value),
            RetryOutcome::Exhausted { .. } => None,
        }
    }
}

impl RetryPolicy {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: config.base_delay(),
            retryable_statuses: config.retryable_statuses.clone(),
        }
    }

    /// Transport failures and configured statuses are retried; anything else
    /// (including malformed payloads) fails on the first attempt.
    pub fn is_retryable(&self, err: &Error) -> bool {
        err.is_transport()
            || err
                .status()
                .map_or(false, |s| self.retryable_statuses.contains(&s))
    }

    /// Run `call` until it succeeds or attempts run out. The delay after
    /// failed attempt `n` is `n * base_delay`.
    pub async fn execute<T, F, Fut>(&self, label: &str, mut call: F) -> RetryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!("{} succeeded on attempt {}", label, attempt);
                    }
                    return RetryOutcome::Succeeded {
                        value,
                        attempts: attempt,
                    };
                }
                Err(e) if attempt < self.max_attempts && self.is_retryable(&e) => {
                    let delay = self.base_delay * attempt;
                    warn!(
                        "{} attempt {}/{} failed: {} (retrying in {:?})",
                        label, attempt, self.max_attempts, e, delay
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!("{} gave up after {} attempt(s): {}", label, attempt, e);
                    return RetryOutcome::Exhausted {
                        attempts: attempt,
                        last_error: e,
                    };
                }
            }
        }
    }
}
