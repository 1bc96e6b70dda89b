//! Retry logic for transient startup failures
//!
//! Used around connecting and lock acquisition. Schema changes themselves are
//! never wrapped in a retry.

use super::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Trait for errors that can be retried
pub trait RetryableError {
    /// Check if the error is retryable
    fn is_retryable(&self) -> bool;
}

impl RetryableError for Error {
    fn is_retryable(&self) -> bool {
        self.is_retryable()
    }
}

/// Retry policy configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Backoff multiplier (2.0 doubles the delay every attempt)
    pub backoff_multiplier: f32,
    /// Add random jitter to delays
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(5, Duration::from_secs(1))
    }
}

impl RetryPolicy {
    /// Create a policy with fixed delay
    pub fn fixed(attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: attempts,
            initial_delay: delay,
            max_delay: delay,
            backoff_multiplier: 1.0,
            jitter: false,
        }
    }

    /// Create a policy that doubles the delay after every failed attempt
    pub fn exponential(attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: attempts,
            initial_delay: base_delay,
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Calculate delay after the given (1-based) failed attempt
    ///
    /// Never exceeds `max_delay`, however large `attempt` gets.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let cap = self.max_delay.as_secs_f64();
        let mut secs = self.initial_delay.as_secs_f64();

        if self.backoff_multiplier > 1.0 && secs > 0.0 {
            let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
            secs *= f64::from(self.backoff_multiplier).powi(exponent);
        }

        if self.jitter {
            use rand::Rng;
            let mut rng = rand::thread_rng();
            let jitter_factor: f64 = rng.gen_range(0.5..1.5);
            secs = secs.min(cap) * jitter_factor;
        }

        // powi overflows to infinity, never to NaN
        if !secs.is_finite() || secs > cap {
            secs = cap;
        }
        Duration::from_secs_f64(secs)
    }
}

/// Execute an async operation with retry logic
///
/// Non-retryable errors are returned immediately.
pub async fn with_retry<F, Fut, T>(policy: RetryPolicy, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(error) => {
                if !error.is_retryable() || attempt >= max_attempts {
                    return Err(error);
                }

                let delay = policy.calculate_delay(attempt);
                log::warn!(
                    "Attempt {}/{} failed, retrying in {:?}: {}",
                    attempt,
                    max_attempts,
                    delay,
                    error
                );

                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
