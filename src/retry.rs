//! # Retry/Backoff Policy
//!
//! Bounded fixed-delay retry for transient external failures. The report
//! system answers HTTP 429 under load; the policy absorbs a run of those
//! (24 attempts at 10 seconds by default, about four minutes) before
//! converting exhaustion into a terminal error for the current attempt.
//! The item itself stays eligible for operator-triggered resubmission.

use crate::config::DispatchConfig;
use crate::error::ClientError;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Fixed sleep between retryable failures
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 24,
            delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    pub fn from_config(config: &DispatchConfig) -> Self {
        Self {
            max_attempts: config.rate_limit_retries,
            delay: config.rate_limit_delay,
        }
    }

    /// Run `op` until it succeeds, fails terminally, or the budget runs out.
    ///
    /// Only failures classified retryable by [`ClientError::is_retryable`]
    /// consume the budget; any other failure is returned immediately.
    pub async fn execute<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, ClientError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        let mut last: Option<ClientError> = None;
        for attempt in 1..=self.max_attempts.max(1) {
            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation, attempt, "Operation succeeded after retries");
                    }
                    return Ok(value);
                }
                Err(err) if err.is_retryable() && attempt < self.max_attempts => {
                    warn!(
                        operation,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_secs = self.delay.as_secs_f64(),
                        error = %err,
                        "Transient failure, retrying after fixed delay"
                    );
                    last = Some(err);
                    tokio::time::sleep(self.delay).await;
                }
                Err(err) if err.is_retryable() => {
                    last = Some(err);
                }
                Err(err) => return Err(err),
            }
        }
        Err(ClientError::RetriesExhausted {
            attempts: self.max_attempts,
            last: last
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no attempts made".to_string()),
        })
    }
}
