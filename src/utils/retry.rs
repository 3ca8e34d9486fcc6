//! Retry utilities for resilient RPC calls
//!
//! This module provides the bounded retry loop with capped exponential backoff
//! shared by every scheduler call site. It knows nothing about node migration;
//! callers decide what to do once the retry budget is exhausted.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of calls, including the first one
    pub max_attempts: u32,

    /// Delay in milliseconds before the first retry
    pub initial_backoff_ms: u64,

    /// Maximum delay in milliseconds (caps exponential growth)
    pub max_backoff_ms: u64,

    /// Multiplier for exponential backoff (default: 2.0)
    pub backoff_multiplier: f64,

    /// Scale each delay by a random factor in [0.5, 1.0]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 500,
            max_backoff_ms: 5_000,
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }
}

impl RetryConfig {
    /// Create a retry configuration with the default 0.5s/5.0s backoff bounds
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    /// Create a retry configuration with custom delays
    pub fn with_backoff(max_attempts: u32, initial: Duration, max: Duration) -> Self {
        Self {
            max_attempts,
            initial_backoff_ms: initial.as_millis() as u64,
            max_backoff_ms: max.as_millis() as u64,
            ..Default::default()
        }
    }

    /// Enable or disable jitter
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Calculate the delay before retry number `attempt` (1-based)
    pub(crate) fn calculate_delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponential =
            self.initial_backoff_ms as f64 * self.backoff_multiplier.powi((attempt - 1) as i32);
        let mut delay_ms = exponential.min(self.max_backoff_ms as f64);

        if self.jitter {
            delay_ms *= rand::thread_rng().gen_range(0.5..=1.0);
        }

        Duration::from_millis(delay_ms as u64)
    }
}

/// Execute an operation with retry logic and exponential backoff
///
/// Every error is retried until `config.max_attempts` calls have been made.
/// Returns the last error if all attempts fail.
///
/// # Example
///
/// ```no_run
/// use seedsched::utils::retry::{with_retry, RetryConfig};
/// use seedsched::error::Result;
///
/// async fn ping() -> Result<u32> {
///     Ok(7)
/// }
///
/// # async fn run() -> Result<()> {
/// let config = RetryConfig::new(3);
/// let value = with_retry(&config, || async { ping().await }).await?;
/// # Ok(())
/// # }
/// ```
pub async fn with_retry<T, E, F, Fut>(config: &RetryConfig, operation: F) -> Result<T, E>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    with_retry_if(config, operation, |_: &E| true).await
}

/// Execute an operation with retry logic, using a custom retry predicate
///
/// A failure rejected by `should_retry` is returned immediately.
pub async fn with_retry_if<T, E, F, Fut, P>(
    config: &RetryConfig,
    mut operation: F,
    should_retry: P,
) -> Result<T, E>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        if attempt > 0 {
            let delay = config.calculate_delay(attempt);
            debug!(
                attempt = attempt,
                delay_ms = delay.as_millis(),
                "Retrying operation after delay"
            );
            tokio::time::sleep(delay).await;
        }

        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    debug!(attempt = attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) => {
                attempt += 1;

                if !should_retry(&e) {
                    warn!(error = %e, "Non-retryable error encountered");
                    return Err(e);
                }

                if attempt >= max_attempts {
                    warn!(attempts = attempt, error = %e, "Retry budget exhausted");
                    return Err(e);
                }

                warn!(
                    attempt = attempt,
                    max_attempts = max_attempts,
                    error = %e,
                    "Operation failed, will retry"
                );
            }
        }
    }
}

/// Positional form of [`with_retry_if`]
///
/// `classifier = None` retries every error.
pub async fn execute_with_retry<T, E, F, Fut>(
    operation: F,
    initial_backoff: Duration,
    max_backoff: Duration,
    max_attempts: u32,
    classifier: Option<&(dyn Fn(&E) -> bool + Send + Sync)>,
) -> Result<T, E>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let config = RetryConfig::with_backoff(max_attempts, initial_backoff, max_backoff);
    match classifier {
        Some(classifier) => with_retry_if(&config, operation, classifier).await,
        None => with_retry(&config, operation).await,
    }
}
