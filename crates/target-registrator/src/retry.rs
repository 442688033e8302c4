//! Bounded exponential-backoff retry for load balancer calls
//!
//! Every retried call site (session setup, discovery, registration,
//! deregistration) goes through one of the two helpers here:
//!
//! - [`retry`] keeps going until the attempt budget is spent
//! - [`retry_cancellable`] additionally gives up as soon as a
//!   [`CancellationToken`] fires, returning [`RegistratorError::Cancelled`]
//!
//! Cancellation is cooperative. An attempt that is already in flight is
//! allowed to finish; the token is consulted before each attempt, after a
//! failed attempt and during the backoff sleep.

use crate::error::{RegistratorError, Result};
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Default number of attempts per call
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default delay before the first retry
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default multiplier applied to the delay after every failed attempt
pub const DEFAULT_BACKOFF_COEFFICIENT: u32 = 2;

/// Attempt budget and backoff schedule for a retried call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    max_attempts: u32,
    /// Delay slept after the first failed attempt
    base_delay: Duration,
    /// Coefficient to multiply the delay with for every further failure
    backoff_coefficient: u32,
}

impl RetryPolicy {
    /// Create a policy with the default doubling backoff
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            backoff_coefficient: DEFAULT_BACKOFF_COEFFICIENT,
        }
    }

    /// Override the backoff coefficient
    pub fn with_backoff_coefficient(mut self, coefficient: u32) -> Self {
        self.backoff_coefficient = coefficient;
        self
    }

    /// Total attempts allowed, including the first one
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before the first retry
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Delay to sleep after the given (1-based) failed attempt
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = self.backoff_coefficient.saturating_pow(exponent);
        self.base_delay.saturating_mul(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_BASE_DELAY)
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// policy's attempt budget is exhausted. Returns the last error seen.
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, operation: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts().max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if !err.is_retryable() {
            debug!(operation, attempt, error = %err, "Not retrying");
            return Err(err);
        }

        if attempt >= max_attempts {
            warn!(operation, attempt, error = %err, "Giving up after final attempt");
            return Err(err);
        }

        let delay = policy.delay_after(attempt);
        warn!(
            operation,
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Attempt failed, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}

/// Like [`retry`], but abandons the remaining attempts once `token` is
/// cancelled and reports [`RegistratorError::Cancelled`] instead of the
/// underlying failure.
///
/// A successful attempt that raced with cancellation still returns `Ok`;
/// the call it made has already taken effect on the backend.
pub async fn retry_cancellable<T, F, Fut>(
    policy: &RetryPolicy,
    token: &CancellationToken,
    operation: &str,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts().max(1);
    let mut attempt = 0;

    loop {
        if token.is_cancelled() {
            debug!(operation, attempt, "Cancelled before attempt");
            return Err(RegistratorError::Cancelled);
        }

        attempt += 1;
        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if token.is_cancelled() {
            debug!(operation, attempt, error = %err, "Cancelled after failed attempt");
            return Err(RegistratorError::Cancelled);
        }

        if !err.is_retryable() {
            debug!(operation, attempt, error = %err, "Not retrying");
            return Err(err);
        }

        if attempt >= max_attempts {
            warn!(operation, attempt, error = %err, "Giving up after final attempt");
            return Err(err);
        }

        let delay = policy.delay_after(attempt);
        warn!(
            operation,
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Attempt failed, retrying"
        );

        tokio::select! {
            _ = token.cancelled() => {
                debug!(operation, attempt, "Cancelled during backoff");
                return Err(RegistratorError::Cancelled);
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
