//! Bounded retry of transient provider failures

use crate::error::{CloudError, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Retry configuration for provider operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts, first call included
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay between retries (milliseconds)
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Maximum delay between retries (milliseconds)
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Backoff multiplier
    #[serde(default = "default_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_delay() -> u64 {
    1000 // 1秒
}
fn default_max_delay() -> u64 {
    30000 // 30秒
}
fn default_multiplier() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            backoff_multiplier: default_multiplier(),
        }
    }
}

impl RetryConfig {
    /// No retries at all
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Base delay before retry number `attempt` (0-based), capped at the maximum
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_millis(delay.min(self.max_delay_ms as f64) as u64)
    }
}

/// Run `operation`, retrying while it fails with a transient error.
///
/// Non-transient errors return immediately. The wait between attempts is
/// jittered to 0.5x..1.5x of the backoff delay and interrupted by `cancel`.
pub async fn retry_transient<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < max_attempts => {
                let base = config.delay_for_attempt(attempt - 1);
                let jitter = rand::thread_rng().gen_range(0.5..1.5);
                let delay = Duration::from_secs_f64(base.as_secs_f64() * jitter);

                tracing::warn!(
                    operation = %operation_name,
                    attempt = attempt,
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "Transient failure, retrying"
                );

                tokio::select! {
                    _ = cancel.cancelled() => {
                        return Err(CloudError::Cancelled(operation_name.to_string()));
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(e) => {
                if e.is_transient() {
                    tracing::error!(
                        operation = %operation_name,
                        attempt = attempt,
                        error = %e,
                        "Operation failed after max retries"
                    );
                }
                return Err(e);
            }
        }
    }
}
