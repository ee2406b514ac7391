//! Bounded retry with backoff for idempotent actions such as checkpoint commits

mod backoff;

pub use backoff::{Backoff, ExponentialBackoff, ExponentialBackoffBuilder, FixedBackoff};

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

use crate::config::CheckpointConfig;

/// Classifies failures that are likely to succeed when tried again
pub trait TransientError {
    fn is_transient(&self) -> bool;
}

/// Details of a failed attempt that is about to be retried
#[derive(Debug)]
pub struct RetryAttempt<'a, E> {
    /// The attempt that just failed (1-based)
    pub attempt: u32,
    /// How long the policy will wait before the next attempt
    pub delay: Duration,
    pub error: &'a E,
}

/// Executes an action, retrying transient failures with backoff
///
/// Non-transient failures propagate immediately. Once `max_attempts` have
/// been made the last failure is returned unchanged.
#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Arc<dyn Backoff>,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, ExponentialBackoff::default())
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: impl Backoff + 'static) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Arc::new(backoff),
        }
    }

    pub fn from_config(config: &CheckpointConfig) -> Self {
        let backoff = ExponentialBackoff::builder()
            .initial_delay(config.backoff_base)
            .multiplier(config.backoff_multiplier)
            .max_delay(config.max_backoff)
            .jitter_factor(config.backoff_jitter)
            .build();

        Self::new(config.max_retry_attempts, backoff)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Run `operation` until it succeeds, fails permanently, or attempts run out
    ///
    /// `on_retry` is invoked once for every retry, before the backoff sleep.
    pub async fn execute<F, Fut, T, E, R>(&self, mut operation: F, mut on_retry: R) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: TransientError + Display,
        R: FnMut(RetryAttempt<'_, E>),
    {
        let mut attempt = 0;

        loop {
            attempt += 1;
            trace!(attempt = attempt, "Executing operation");

            let error = match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempts = attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            if !error.is_transient() {
                debug!(attempt = attempt, error = %error, "Non-transient failure, not retrying");
                return Err(error);
            }

            if attempt >= self.max_attempts {
                warn!(
                    attempts = attempt,
                    error = %error,
                    "Maximum retry attempts exceeded"
                );
                return Err(error);
            }

            let delay = self.backoff.next_delay(attempt);
            warn!(
                attempt = attempt,
                delay_ms = ?delay.as_millis(),
                error = %error,
                "Operation failed, retrying after delay"
            );
            on_retry(RetryAttempt {
                attempt,
                delay,
                error: &error,
            });

            tokio::time::sleep(delay).await;
        }
    }
}
