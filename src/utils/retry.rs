//! Backoff retry for startup probes and auto-submits
//!
//! Node-to-node protocol traffic never goes through here: requests, replies
//! and adjustments are not idempotent. Only work that can safely repeat uses
//! it: waiting for peers to answer `/api/health` ([`with_retry`]) and the
//! deadline timer's auto-submit, which is guarded by the session lock.

use anyhow::Result;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Attempts after the first one
    pub max_retries: u32,

    /// Delay before the first retry
    pub base_delay: Duration,

    /// Cap on any single delay
    pub max_delay: Duration,

    pub backoff_multiplier: f64,

    /// Fraction of each delay added as random jitter (0.0 disables)
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            jitter: 0.0,
        }
    }
}

impl RetryConfig {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// Keep retrying at roughly `step` intervals for about `window`.
    pub fn for_window(window: Duration, step: Duration) -> Self {
        let step_ms = step.as_millis().max(1);
        let max_retries = (window.as_millis() / step_ms).min(u32::MAX as u128) as u32;
        Self {
            max_retries,
            base_delay: step,
            max_delay: step,
            backoff_multiplier: 1.0,
            jitter: 0.1,
        }
    }

    /// Delay before retry number `attempt` (0 for the first try).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponential =
            self.base_delay.as_secs_f64() * self.backoff_multiplier.powi((attempt - 1) as i32);
        let capped = exponential.min(self.max_delay.as_secs_f64());
        let jitter = if self.jitter > 0.0 {
            capped * self.jitter * rand::thread_rng().gen::<f64>()
        } else {
            0.0
        };

        Duration::from_secs_f64(capped + jitter)
    }
}

/// Run `operation` until it succeeds or the retries run out.
///
/// Returns the last error when every attempt fails.
pub async fn with_retry<T, F, Fut>(config: &RetryConfig, operation: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_error = None;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let delay = config.delay_for(attempt);
            debug!(attempt, delay_ms = delay.as_millis() as u64, "Retrying");
            tokio::time::sleep(delay).await;
        }

        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                if attempt == config.max_retries {
                    warn!(attempts = attempt + 1, error = %e, "Giving up");
                } else {
                    debug!(attempt, error = %e, "Attempt failed");
                }
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| anyhow::anyhow!("Operation failed with no error details")))
}
