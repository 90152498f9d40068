use super::SourceError;
use crate::config::types::SourceConfig;
use std::future::Future;
use std::time::Duration;

/// Upper bound for the delay between two attempts
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Exponential backoff for retryable log requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first one
    pub max_retries: u32,
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_backoff: Duration) -> Self {
        Self {
            max_retries,
            initial_backoff,
        }
    }

    pub fn from_config(config: &SourceConfig) -> Self {
        Self::new(config.max_retries, config.retry_interval)
    }

    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Delay before retry number `attempt` (1-based): initial, 2x, 4x, ... capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .checked_mul(factor)
            .map_or(MAX_BACKOFF, |d| d.min(MAX_BACKOFF))
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error, or
    /// the retries are used up. The last error is returned.
    pub async fn run<F, Fut, T>(&self, label: &str, mut operation: F) -> Result<T, SourceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SourceError>>,
    {
        let mut attempt = 0u32;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_retries && e.is_retryable() => {
                    attempt += 1;
                    let backoff = self.backoff(attempt);
                    tracing::warn!(
                        segment = %label,
                        attempt = attempt,
                        max_retries = self.max_retries,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Request failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
