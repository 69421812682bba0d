//! Connection retry with exponential backoff.
//!
//! Transient broker failures (connection refused during a rolling
//! broker restart, a dropped long-poll) are retried here; everything
//! else propagates immediately. Only
//! [`WorkerError::ConnectionRetryable`](crate::WorkerError::ConnectionRetryable)
//! is considered transient.
//!
//! # Retry Strategy
//!
//! - Exponential backoff with randomized jitter to prevent thundering herd
//! - Delay capped at `max_delay`
//! - Exhausted retries surface as a terminal [`WorkerError::Connection`]

use std::collections::hash_map::RandomState;
use std::future::Future;
use std::hash::BuildHasher;
use std::time::Duration;

use tokio::time::sleep;

use crate::WorkerError;

/// Retry configuration with exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (0 = no retries, just the initial attempt).
    pub max_attempts: u32,

    /// Backoff multiplier applied to the delay after each retry.
    pub multiplier: f32,

    /// Initial delay before the first retry.
    pub initial_delay: Duration,

    /// Maximum delay between retry attempts (caps exponential growth).
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    /// Reasonable defaults for broker reconnection.
    ///
    /// - `max_attempts`: 5
    /// - `multiplier`: 2.0
    /// - `initial_delay`: 200ms
    /// - `max_delay`: 10s
    fn default() -> Self {
        // ---
        Self {
            max_attempts: 5,
            multiplier: 2.0,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryConfig {
    /// Next backoff delay after `current`, capped at `max_delay`.
    pub(crate) fn next_delay(&self, current: Duration) -> Duration {
        Duration::from_secs_f64(current.as_secs_f64() * self.multiplier as f64).min(self.max_delay)
    }
}

/// Retry an async operation on transient connection failures.
///
/// Executes `operation` and retries it per `retry_config` while it
/// fails with [`WorkerError::ConnectionRetryable`]. Non-retryable
/// errors fail immediately. When attempts are exhausted the last
/// transient error is promoted to a terminal
/// [`WorkerError::Connection`].
pub(crate) async fn retry_with_backoff<F, Fut, T>(
    retry_config: &RetryConfig,
    mut operation: F,
) -> crate::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = crate::Result<T>>,
{
    let mut attempt = 0;
    let mut current_delay = retry_config.initial_delay;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(WorkerError::ConnectionRetryable(details)) => {
                attempt += 1;

                if attempt > retry_config.max_attempts {
                    tracing::warn!(
                        attempts = retry_config.max_attempts,
                        "connection retries exhausted: {details}"
                    );
                    return Err(WorkerError::Connection(details));
                }

                let jittered_delay = apply_jitter(current_delay);

                tracing::debug!(
                    attempt,
                    max_attempts = retry_config.max_attempts,
                    delay_ms = jittered_delay.as_millis() as u64,
                    "retrying connection: {details}"
                );

                sleep(jittered_delay).await;
                current_delay = retry_config.next_delay(current_delay);
            }
            Err(err) => {
                // Non-retryable, fail immediately.
                return Err(err);
            }
        }
    }
}

/// Apply ±25% jitter to a delay so competing workers don't reconnect in
/// lockstep.
pub(crate) fn apply_jitter(delay: Duration) -> Duration {
    // ---
    let random_state = RandomState::new();
    let hash = random_state.hash_one(std::time::SystemTime::now());

    let random_factor = (hash % 1000) as f64 / 1000.0;
    let jitter_multiplier = 0.75 + (random_factor * 0.5);

    Duration::from_secs_f64(delay.as_secs_f64() * jitter_multiplier)
}
