//! Retry with exponential backoff and jitter.
//!
//! Used by the dispatcher for per-endpoint delivery attempts and by the relay
//! client. The budget is always finite.

use agora_types::config::DeliveryConfig;
use rand::Rng;
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first try).
    pub max_attempts: u32,
    /// Minimum delay between retries in milliseconds.
    pub min_delay_ms: u64,
    /// Maximum delay between retries in milliseconds.
    pub max_delay_ms: u64,
    /// Jitter factor (0.0 = no jitter, 1.0 = full jitter).
    ///
    /// The actual sleep is `delay * (1 + random_fraction * jitter)`, where
    /// `random_fraction` is in `[0, 1)`.
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            min_delay_ms: 200,
            max_delay_ms: 5_000,
            jitter: 0.1,
        }
    }
}

impl RetryConfig {
    /// Per-endpoint delivery budget from the `[delivery]` config section.
    pub fn for_delivery(config: &DeliveryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts_per_endpoint.max(1),
            min_delay_ms: config.min_backoff_ms,
            max_delay_ms: config.max_backoff_ms.max(config.min_backoff_ms),
            jitter: 0.1,
        }
    }
}

/// Result of a retry operation.
#[derive(Debug)]
pub enum RetryOutcome<T, E> {
    /// The operation succeeded.
    Success {
        result: T,
        /// Total number of attempts made (1 = first try succeeded).
        attempts: u32,
    },
    /// Budget spent, or a non-retryable error came back.
    Exhausted { last_error: E, attempts: u32 },
}

impl<T, E> RetryOutcome<T, E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryOutcome::Success { attempts, .. } | RetryOutcome::Exhausted { attempts, .. } => {
                *attempts
            }
        }
    }

    pub fn into_result(self) -> Result<T, E> {
        match self {
            RetryOutcome::Success { result, .. } => Ok(result),
            RetryOutcome::Exhausted { last_error, .. } => Err(last_error),
        }
    }
}

/// Compute the delay for a given attempt (0-indexed).
///
/// Formula: `min(min_delay * 2^attempt, max_delay) * (1 + random * jitter)`,
/// clamped to `max_delay`.
pub fn compute_backoff(config: &RetryConfig, attempt: u32) -> u64 {
    let base = config
        .min_delay_ms
        .saturating_mul(1u64.checked_shl(attempt).unwrap_or(u64::MAX));
    let capped = base.min(config.max_delay_ms);

    if config.jitter <= 0.0 {
        return capped;
    }

    let frac: f64 = rand::thread_rng().gen();
    let with_jitter = (capped as f64) * (1.0 + frac * config.jitter);
    (with_jitter as u64).min(config.max_delay_ms)
}

/// Execute an async operation with retry.
///
/// `should_retry` inspects an error and decides whether another attempt could
/// help; a `false` ends the loop immediately.
pub async fn retry_async<F, Fut, T, E, P>(
    config: &RetryConfig,
    mut operation: F,
    should_retry: P,
) -> RetryOutcome<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let max = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    debug!(attempt = attempt + 1, "retry succeeded");
                }
                return RetryOutcome::Success {
                    result,
                    attempts: attempt + 1,
                };
            }
            Err(err) => {
                let retryable = should_retry(&err);
                if !retryable || attempt + 1 >= max {
                    if retryable {
                        warn!(attempt = attempt + 1, max_attempts = max, error = %err, "retry budget exhausted");
                    } else {
                        debug!(attempt = attempt + 1, error = %err, "error is not retryable");
                    }
                    return RetryOutcome::Exhausted {
                        last_error: err,
                        attempts: attempt + 1,
                    };
                }

                let delay_ms = compute_backoff(config, attempt);
                debug!(attempt = attempt + 1, delay_ms, error = %err, "retrying");
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                attempt += 1;
            }
        }
    }
}
