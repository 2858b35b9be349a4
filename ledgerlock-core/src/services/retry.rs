//! Retry coordinator - bounded, cancellable retries for optimistic transfers

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::domain::result::{Result, TransferError};

/// How many times to try, and how long to wait in between
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one, at least 1
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_backoff: Duration,
    /// Upper bound for any single delay
    pub max_backoff: Duration,
    /// Growth factor applied per further retry (1 = fixed delay)
    pub multiplier: u32,
    /// Draw each delay uniformly from `[delay / 2, delay]`
    pub jitter: bool,
}

impl Default for RetryPolicy {
    /// Three attempts, 50ms apart
    fn default() -> Self {
        Self::fixed(3, Duration::from_millis(50))
    }
}

impl RetryPolicy {
    /// Same delay before every retry
    pub fn fixed(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts,
            initial_backoff: backoff,
            max_backoff: backoff,
            multiplier: 1,
            jitter: false,
        }
    }

    /// Doubling delays capped at `max_backoff`, with jitter
    pub fn exponential(max_attempts: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts,
            initial_backoff,
            max_backoff,
            multiplier: 2,
            jitter: true,
        }
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be at least 1".to_string());
        }
        if self.multiplier == 0 {
            return Err("multiplier must be at least 1".to_string());
        }
        if self.max_backoff < self.initial_backoff {
            return Err("max_backoff must not be below initial_backoff".to_string());
        }
        Ok(())
    }

    /// Nominal delay after failed attempt number `attempt` (1-based), before jitter
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let growth = self
            .multiplier
            .checked_pow(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(growth)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    /// Delay to actually wait after failed attempt number `attempt`
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let delay = self.base_delay(attempt);
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let half = delay / 2;
        rand::thread_rng().gen_range(half..=delay)
    }
}

/// Runs an operation until it succeeds, fails for good, or runs out of attempts
///
/// Only [`TransferError::is_retryable`] errors are retried. Each retry calls
/// the operation again, so it must re-read whatever state it depends on.
#[derive(Debug, Clone)]
pub struct RetryCoordinator {
    policy: RetryPolicy,
}

impl RetryCoordinator {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `op`, passing the 1-based attempt number
    ///
    /// Returns the value and the number of attempts it took. Cancelling
    /// `cancel` while waiting between attempts aborts with
    /// [`TransferError::Cancelled`].
    pub async fn run<T, F, Fut>(&self, cancel: &CancellationToken, mut op: F) -> Result<(T, u32)>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            if cancel.is_cancelled() {
                return Err(TransferError::Cancelled);
            }

            let err = match op(attempt).await {
                Ok(value) => return Ok((value, attempt)),
                Err(e) if e.is_retryable() => e,
                Err(e) => return Err(e),
            };

            if attempt >= max {
                return Err(TransferError::RetryExhausted {
                    attempts: attempt,
                    last: Box::new(err),
                });
            }

            let delay = self.policy.delay_after(attempt);
            warn!(
                attempt,
                max,
                delay_ms = delay.as_millis() as u64,
                "Optimistic conflict, retrying: {}",
                err
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(TransferError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}
