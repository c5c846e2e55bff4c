//! Fixed-delay retry policy.
//!
//! Delivery waits for a client that may not have registered yet, so the
//! delay is constant rather than exponential. Sleeps go through
//! `tokio::time`, which lets tests drive the policy with a paused clock.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

/// How many times to retry and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Pause before each retry.
    pub delay: Duration,
    /// Retries after the first attempt.
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(Duration::from_secs(1), 3)
    }
}

/// Result of running an operation under a [`RetryPolicy`].
#[derive(Debug, PartialEq, Eq)]
pub enum RetryOutcome<T, E> {
    /// Operation succeeded on attempt `attempts`.
    Success { value: T, attempts: u32 },
    /// Every attempt failed.
    Exhausted { last_error: E, attempts: u32 },
}

impl<T, E> RetryOutcome<T, E> {
    pub fn is_success(&self) -> bool {
        matches!(self, RetryOutcome::Success { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            RetryOutcome::Success { attempts, .. } | RetryOutcome::Exhausted { attempts, .. } => {
                *attempts
            }
        }
    }
}

impl RetryPolicy {
    pub fn fixed(delay: Duration, max_retries: u32) -> Self {
        Self { delay, max_retries }
    }

    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self::fixed(Duration::ZERO, 0)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Run `operation` until it succeeds or the policy is exhausted.
    pub async fn run<F, Fut, T, E>(&self, operation_name: &str, operation: F) -> RetryOutcome<T, E>
    where
        F: Fn(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt = 1u32;
        loop {
            match operation(attempt).await {
                Ok(value) => {
                    return RetryOutcome::Success {
                        value,
                        attempts: attempt,
                    }
                }
                Err(e) if attempt < self.max_attempts() => {
                    debug!(
                        operation = operation_name,
                        attempt,
                        delay_ms = self.delay.as_millis() as u64,
                        "Attempt failed, retrying: {}",
                        e
                    );
                    tokio::time::sleep(self.delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    return RetryOutcome::Exhausted {
                        last_error: e,
                        attempts: attempt,
                    }
                }
            }
        }
    }
}
