//! Bounded exponential-backoff retry
//!
//! Failures are retried only when their message contains one of the configured
//! substrings (case-insensitive). Cancellation and a missing git binary are
//! never retried.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::error::ErrorKind;
use crate::{Error, Result};

/// Waits between attempts
#[async_trait]
pub trait Delay: Send + Sync {
    /// Sleep for `duration`
    async fn sleep(&self, duration: Duration);
}

/// [`Delay`] backed by the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioDelay;

#[async_trait]
impl Delay for TokioDelay {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Retry budget and backoff shape
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum attempts, including the first (0 is treated as 1)
    pub max_attempts: u32,
    /// Delay after the first failure
    pub base_delay: Duration,
    /// Growth factor per attempt
    pub multiplier: f64,
    /// Ceiling for any single delay
    pub max_delay: Duration,
    /// Case-insensitive substrings that make a failure retryable
    pub retryable_errors: Vec<String>,
}

impl RetryPolicy {
    /// Build a policy from configuration and an attempt budget
    pub fn from_config(config: &RetryConfig, max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: config.base_delay,
            multiplier: config.multiplier,
            max_delay: config.max_delay,
            retryable_errors: config
                .retryable_errors
                .iter()
                .map(|s| s.to_lowercase())
                .collect(),
        }
    }

    /// Delay to wait after failed attempt `attempt` (1-based):
    /// `min(base * multiplier^(attempt-1), max_delay)`
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::try_from_secs_f64(secs)
            .map(|d| d.min(self.max_delay))
            .unwrap_or(self.max_delay)
    }

    /// Whether `error` should be retried
    pub fn is_retryable(&self, error: &Error) -> bool {
        if matches!(error.kind(), ErrorKind::Cancelled | ErrorKind::ToolUnavailable) {
            return false;
        }
        let message = error.to_string().to_lowercase();
        self.retryable_errors
            .iter()
            .any(|pattern| !pattern.is_empty() && message.contains(pattern.as_str()))
    }

    fn attempt_budget(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default(), 3)
    }
}

/// Successful result of a retried operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryOutcome<T> {
    /// Value produced by the successful attempt
    pub value: T,
    /// Number of attempts made, including the successful one
    pub attempts: u32,
}

impl<T> RetryOutcome<T> {
    /// Attempts beyond the first
    pub fn retries_performed(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

/// Runs fallible async operations under a [`RetryPolicy`]
#[derive(Clone)]
pub struct RetryCoordinator {
    policy: RetryPolicy,
    delay: Arc<dyn Delay>,
}

impl std::fmt::Debug for RetryCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryCoordinator")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl RetryCoordinator {
    /// Create a coordinator that sleeps on the tokio timer
    pub fn new(policy: RetryPolicy) -> Self {
        Self::with_delay(policy, Arc::new(TokioDelay))
    }

    /// Create a coordinator with a custom delay (tests use a recording fake)
    pub fn with_delay(policy: RetryPolicy, delay: Arc<dyn Delay>) -> Self {
        Self { policy, delay }
    }

    /// The active policy
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error,
    /// or the attempt budget is spent
    ///
    /// `operation` receives the 1-based attempt number. Cancellation is
    /// checked before every attempt and during every backoff delay.
    pub async fn execute_with_retry<T, F, Fut>(
        &self,
        label: &str,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> Result<RetryOutcome<T>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let budget = self.policy.attempt_budget();
        let mut attempt = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            attempt += 1;

            let error = match operation(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation = label, attempt, "Succeeded after retry");
                    }
                    return Ok(RetryOutcome {
                        value,
                        attempts: attempt,
                    });
                }
                Err(e) => e,
            };

            if !self.policy.is_retryable(&error) {
                debug!(operation = label, attempt, error = %error, "Not retrying");
                return Err(error);
            }
            if attempt >= budget {
                warn!(operation = label, attempts = attempt, error = %error, "Retry budget exhausted");
                return Err(error);
            }

            let wait = self.policy.delay_for_attempt(attempt);
            warn!(
                operation = label,
                attempt,
                max_attempts = budget,
                delay_ms = wait.as_millis() as u64,
                error = %error,
                "Retryable failure, backing off"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = self.delay.sleep(wait) => {}
            }
        }
    }
}
