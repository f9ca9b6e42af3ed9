//! Failure recovery
//!
//! Decides retry vs. reassignment vs. abort when a step fails or its outcome
//! is rejected. Decisions are appended to the execution log before the
//! dispatcher acts on them, so the log always reflects the true dispatch
//! history even under concurrent completions.

use crate::error::ErrorKind;
use std::time::Duration;

/// Retry behavior for transient step failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries per worker after the initial attempt
    pub max_retries: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Multiplier applied per subsequent retry
    pub backoff_multiplier: f64,
    /// Upper bound on any computed delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Create the default policy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the retries-per-worker budget.
    #[must_use]
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set the delay before the first retry.
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the backoff multiplier.
    #[must_use]
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Set the delay ceiling.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Backoff delay before the given retry (1-based).
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        let base = self.initial_delay.as_millis() as f64
            * self.backoff_multiplier.powi(retry.saturating_sub(1) as i32);
        let capped = base.min(self.max_delay.as_millis() as f64) as u64;
        Duration::from_millis(capped)
    }
}

/// What failed: the worker itself, or validation of its outcome.
#[derive(Debug, Clone)]
pub enum FailureCause {
    /// Worker returned an unsuccessful outcome
    Worker(ErrorKind),
    /// Validator rejected an otherwise successful outcome
    Rejected(String),
}

/// Recovery decision for one failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Re-dispatch to the same worker after the backoff delay
    Retry {
        /// Backoff to apply before the attempt
        delay: Duration,
    },
    /// Re-dispatch to the next candidate for the same agent kind
    Reassign,
    /// Mark the step terminally failed; dependents are skipped
    Abort,
}

/// Chooses between retry, reassignment, and abort.
#[derive(Debug, Clone, Default)]
pub struct FailureCoordinator {
    policy: RetryPolicy,
}

impl FailureCoordinator {
    /// Create a coordinator with the given retry policy.
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// The active retry policy.
    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Decide recovery for one failed attempt.
    ///
    /// `failures_on_worker` counts failed attempts on the current candidate;
    /// the retry budget applies per candidate and resets on reassignment.
    /// `fallbacks_remaining` counts unused candidates for the step's kind.
    #[must_use]
    pub fn decide(
        &self,
        cause: &FailureCause,
        failures_on_worker: u32,
        fallbacks_remaining: usize,
    ) -> Decision {
        match cause {
            FailureCause::Worker(kind) if kind.is_transient() => {
                if failures_on_worker <= self.policy.max_retries {
                    Decision::Retry {
                        delay: self.policy.delay_for(failures_on_worker),
                    }
                } else if fallbacks_remaining > 0 {
                    Decision::Reassign
                } else {
                    Decision::Abort
                }
            }
            // a fresh candidate may produce acceptable output; same-worker
            // retries are skipped for rejections
            FailureCause::Rejected(_) => {
                if fallbacks_remaining > 0 {
                    Decision::Reassign
                } else {
                    Decision::Abort
                }
            }
            FailureCause::Worker(_) => Decision::Abort,
        }
    }
}
