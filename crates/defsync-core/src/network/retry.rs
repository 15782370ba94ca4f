//! Caller-side retry with exponential backoff and jitter.
//!
//! The sync engine surfaces every failure as-is. Front ends that want to
//! retry a whole request wrap it with [`retry_async`], which consults
//! [`crate::DefsError::is_retryable`] to decide whether another attempt is worthwhile.

use crate::config::NetworkConfig;
use crate::Result;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one. Zero behaves as one.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on every following retry.
    pub base_delay: Duration,
    /// Maximum delay cap.
    pub max_delay: Duration,
    /// Whether to scale delays by a random factor in `0.5..1.5`.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: NetworkConfig::MAX_RETRIES,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay after the given failed attempt (0-indexed).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(30) as i32;
        let capped = (self.base_delay.as_secs_f64() * 2f64.powi(exponent))
            .min(self.max_delay.as_secs_f64());

        let secs = if self.jitter {
            let factor: f64 = rand::rng().random_range(0.5..1.5);
            (capped * factor).min(self.max_delay.as_secs_f64())
        } else {
            capped
        };

        Duration::from_secs_f64(secs)
    }
}

/// Outcome details of a retried operation.
#[derive(Debug, Clone, Default)]
pub struct RetryStats {
    pub attempts: u32,
    pub total_delay: Duration,
    pub last_error: Option<String>,
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// runs out of attempts.
pub async fn retry_async<F, Fut, T>(config: &RetryConfig, mut operation: F) -> (Result<T>, RetryStats)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut stats = RetryStats::default();

    loop {
        let attempt = stats.attempts;
        stats.attempts += 1;

        let err = match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!("Operation succeeded after {} attempts", stats.attempts);
                }
                return (Ok(value), stats);
            }
            Err(err) => err,
        };
        stats.last_error = Some(err.to_string());

        if !err.is_retryable() {
            debug!("Error is not retryable: {}", err);
            return (Err(err), stats);
        }
        if stats.attempts >= max_attempts {
            warn!("All {} attempts exhausted. Last error: {}", max_attempts, err);
            return (Err(err), stats);
        }

        let delay = config.delay_after(attempt);
        stats.total_delay += delay;
        warn!(
            "Attempt {}/{} failed: {}. Retrying in {:?}",
            stats.attempts, max_attempts, err, delay
        );
        tokio::time::sleep(delay).await;
    }
}
