//! Fixed-delay retry policy for rate-limited capabilities.
//!
//! Applied to exactly one invocation in the pipeline: the final large-tier
//! compile, which is the only capability known to rate-limit. Other failures
//! are not retried here - unit-level failures degrade to sentinel outputs
//! instead.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::warn;

use super::error::CapabilityError;

/// Bounded retry with a fixed delay between attempts.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Fixed delay between attempts (no backoff growth).
    pub fixed_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            fixed_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, fixed_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            fixed_delay,
        }
    }

    /// Run `op`, retrying only on rate-limit errors.
    ///
    /// Any other error returns immediately. After the final attempt the last
    /// rate-limit error is returned to the caller, which decides how to
    /// degrade.
    pub async fn run_rate_limited<T, F, Fut>(&self, mut op: F) -> Result<T, CapabilityError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CapabilityError>>,
    {
        let mut last_error: Option<CapabilityError> = None;

        for attempt in 1..=self.max_attempts {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_rate_limit() => {
                    if attempt < self.max_attempts {
                        warn!(
                            attempt,
                            max_attempts = self.max_attempts,
                            delay_ms = self.fixed_delay.as_millis() as u64,
                            "rate limited, retrying after fixed delay"
                        );
                        sleep(self.fixed_delay).await;
                    }
                    last_error = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        Err(last_error
            .unwrap_or_else(|| CapabilityError::upstream("retry", "no attempts made", false)))
    }
}
