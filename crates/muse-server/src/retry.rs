use muse_common::error::Classify;
use std::{fmt::Display, future::Future, time::Duration};
use tracing::warn;

/// Bounded retry settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Delay before attempt `attempt + 1`
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(100))
    }
}

/// Retry an async operation with linear backoff.
///
/// Only errors whose kind is retryable (transient or conflict) are retried;
/// anything else is returned immediately. Waits `base_delay * attempt`
/// between tries. Returns the first success, or the last error.
pub async fn retry_with_backoff<F, Fut, T, E>(policy: RetryPolicy, label: &str, f: F) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Classify + Display,
{
    let mut attempt = 1;
    loop {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) if e.kind().is_retryable() && attempt < policy.max_attempts => {
                warn!(
                    "{} failed (attempt {}/{}): {}",
                    label, attempt, policy.max_attempts, e
                );
                tokio::time::sleep(policy.delay(attempt)).await;
                attempt += 1;
            }
            Err(e) => {
                if e.kind().is_retryable() {
                    warn!("{} failed after {} attempts", label, attempt);
                }
                return Err(e);
            }
        }
    }
}
