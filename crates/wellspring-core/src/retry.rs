//! Consolidated retry/backoff primitive.
//!
//! Every retry loop in the workspace goes through [`RetryPolicy`]; no other
//! module carries its own jitter or backoff formula. Delays follow
//! `min(cap, base * 2^(attempt-1))` scaled by a jitter factor drawn
//! uniformly from `[0.75, 1.25]`.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clock::Clock;
use crate::error::RequestError;

/// Exponent clamp keeping the doubling multiplier inside `u32`.
const MAX_BACKOFF_EXPONENT: u32 = 20;

/// Retry configuration driving [`RetryPolicy::execute`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retries after the initial attempt (0 = no retries)
    pub max_retries: u32,
    /// Base delay before the first retry
    pub base_delay: Duration,
    /// Ceiling applied to the unjittered delay
    pub max_delay: Duration,
    /// Whether to apply the `[0.75, 1.25]` jitter factor
    pub jitter: bool,
    /// Whether network-class failures (including timeouts) are retried.
    /// Rate-limit responses are always retried while attempts remain.
    pub retry_on_network_error: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(10),
            jitter: true,
            retry_on_network_error: true,
        }
    }
}

impl RetryPolicy {
    /// Set the maximum number of retries.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the base delay.
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Set the delay ceiling.
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Enable or disable jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Enable or disable retrying network-class failures.
    pub fn with_retry_on_network_error(mut self, retry: bool) -> Self {
        self.retry_on_network_error = retry;
        self
    }

    /// Unjittered delay for a 1-based attempt number.
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
        let multiplier = 2u32.saturating_pow(exponent);
        self.base_delay.saturating_mul(multiplier).min(self.max_delay)
    }

    /// Delay to sleep before retrying after the given 1-based attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay_for(attempt);
        if !self.jitter {
            return base;
        }
        let factor = rand::thread_rng().gen_range(0.75..=1.25);
        base.mul_f64(factor)
    }

    /// Whether this policy retries the given failure.
    fn retries(&self, error: &RequestError) -> bool {
        if !error.is_retryable() {
            return false;
        }
        if error.is_network_class() {
            return self.retry_on_network_error;
        }
        true
    }

    /// Drive a fallible async operation to completion under this policy.
    ///
    /// The closure receives the 1-based attempt number. A server-suggested
    /// `retry_after` takes precedence over the computed backoff delay. The
    /// final error is returned unchanged, except that a surfaced rate-limit
    /// error carries the total attempt count.
    pub async fn execute<T, F, Fut>(
        &self,
        clock: &dyn Clock,
        mut operation: F,
    ) -> Result<T, RequestError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, RequestError>>,
    {
        let mut attempt = 1u32;
        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(error) if attempt <= self.max_retries && self.retries(&error) => {
                    let delay = error.retry_after().unwrap_or_else(|| self.delay_for(attempt));
                    debug!(attempt, ?delay, error = %error, "retrying after backoff");
                    clock.sleep(delay).await;
                    attempt += 1;
                }
                Err(RequestError::RateLimited { retry_after, .. }) => {
                    return Err(RequestError::RateLimited {
                        retry_after,
                        attempts: attempt,
                    });
                }
                Err(error) => return Err(error),
            }
        }
    }
}
