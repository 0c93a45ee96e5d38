use tokio::time::{sleep, Duration};
use anyhow::Result;
use tracing::{error, warn};

use crate::config::settings::RetryConfig;
use crate::error::ResourceError;

#[derive(Debug, Clone)]
pub struct RetrySettings {
    pub attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl RetrySettings {
    pub fn new(attempts: u32, config: &RetryConfig) -> Self {
        Self {
            attempts: attempts.max(1),
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms,
        }
    }

    /// Backoff before retry number `attempt` (1-based): base, 2*base, 4*base, ... capped at max.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let delay = self
            .base_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_delay_ms);
        Duration::from_millis(delay)
    }

    pub async fn run_with_retry<F, Fut, T>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.attempts && !is_configuration(&e) => {
                    warn!("Attempt {attempt}/{} failed: {e:#}", self.attempts);
                    sleep(self.delay_for_attempt(attempt)).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!("all {attempt} attempts failed: {e:#}");
                    return Err(e);
                }
            }
        }
    }
}

/// Configuration errors fail the same way on every attempt.
fn is_configuration(error: &anyhow::Error) -> bool {
    error
        .downcast_ref::<ResourceError>()
        .is_some_and(ResourceError::is_configuration)
}

impl From<&RetryConfig> for RetrySettings {
    fn from(config: &RetryConfig) -> Self {
        Self::new(1, config)
    }
}
