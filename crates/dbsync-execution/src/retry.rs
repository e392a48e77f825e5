//! Retry with exponential backoff for transport failures.
//!
//! Only network and authentication failures are retried. Everything else,
//! including engine errors and size mismatches, fails on the first attempt.
//! When attempts run out the last error is returned unchanged.

use crate::supervise::pause;
use dbsync_core::error::FailureClass;
use dbsync_core::{Result, SyncError};
use std::future::Future;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Retry configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts, including the first one
    pub max_attempts: u32,

    /// Delay before the second attempt
    pub initial_delay: Duration,

    /// Upper bound for any single delay
    pub max_delay: Duration,

    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Delay after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let millis = self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
        Duration::from_millis(millis.min(self.max_delay.as_millis() as f64) as u64)
    }
}

/// How an operation may fail, and so whether it may be retried at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationClass {
    /// Talks to the source host; transport failures are retried.
    Network,
    /// Opens a session; rejected credentials are retried.
    Auth,
    /// Runs inside a database engine; never retried.
    Engine,
}

/// A named unit of work with its retry classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryableOperation {
    name: String,
    class: OperationClass,
}

impl RetryableOperation {
    pub fn new(name: impl Into<String>, class: OperationClass) -> Self {
        Self {
            name: name.into(),
            class,
        }
    }

    pub fn network(name: impl Into<String>) -> Self {
        Self::new(name, OperationClass::Network)
    }

    pub fn auth(name: impl Into<String>) -> Self {
        Self::new(name, OperationClass::Auth)
    }

    pub fn engine(name: impl Into<String>) -> Self {
        Self::new(name, OperationClass::Engine)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn class(&self) -> OperationClass {
        self.class
    }
}

/// Where a tracked operation is in its retry cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    Pending,
    Attempting,
    Retrying,
    Succeeded,
    /// Gave up on a failure that is not retryable.
    Failed,
    /// Gave up because the attempts ran out.
    Exhausted,
}

/// What to do after a failed attempt.
#[derive(Debug)]
pub enum RetryDecision {
    Retry { attempt: u32, delay: Duration },
    GiveUp(SyncError),
}

#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// A single attempt, no retries.
    pub fn never() -> Self {
        Self::new(RetryConfig {
            max_attempts: 1,
            ..RetryConfig::default()
        })
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Whether `error`, raised by `operation`, may be tried again.
    pub fn is_retryable(&self, operation: &RetryableOperation, error: &SyncError) -> bool {
        operation.class != OperationClass::Engine
            && matches!(
                error.failure_class(),
                FailureClass::Network | FailureClass::Auth
            )
    }

    /// State machine for loops that need to do work between attempts,
    /// such as reopening a session.
    pub fn tracker<'a>(&'a self, operation: &'a RetryableOperation) -> RetryTracker<'a> {
        RetryTracker {
            policy: self,
            operation,
            failures: 0,
            state: RetryState::Pending,
            started: Instant::now(),
        }
    }

    /// Runs `attempt` until it succeeds, fails deterministically or runs
    /// out of attempts. Backoff sleeps end early on cancellation.
    pub async fn run<F, Fut, T>(
        &self,
        operation: &RetryableOperation,
        cancel: &CancellationToken,
        mut attempt: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut tracker = self.tracker(operation);
        loop {
            tracker.attempting();
            match attempt().await {
                Ok(value) => {
                    tracker.succeeded();
                    return Ok(value);
                }
                Err(error) => match tracker.failed(error) {
                    RetryDecision::Retry { delay, .. } => {
                        pause(delay, cancel, operation.name()).await?
                    }
                    RetryDecision::GiveUp(error) => return Err(error),
                },
            }
        }
    }
}

/// Counts failures of one logical operation.
pub struct RetryTracker<'a> {
    policy: &'a RetryPolicy,
    operation: &'a RetryableOperation,
    failures: u32,
    state: RetryState,
    started: Instant,
}

impl RetryTracker<'_> {
    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn state(&self) -> RetryState {
        self.state
    }

    pub fn attempting(&mut self) {
        self.state = RetryState::Attempting;
    }

    pub fn succeeded(&mut self) {
        self.state = RetryState::Succeeded;
        if self.failures > 0 {
            debug!(
                "[Retry] '{}' succeeded after {} failed attempt(s) in {:?}",
                self.operation.name(),
                self.failures,
                self.started.elapsed()
            );
        }
    }

    /// Records a failure and decides whether to try again.
    pub fn failed(&mut self, error: SyncError) -> RetryDecision {
        self.failures += 1;
        let max = self.policy.config.max_attempts;
        if !self.policy.is_retryable(self.operation, &error) {
            self.state = RetryState::Failed;
            return RetryDecision::GiveUp(error);
        }
        if self.failures >= max {
            self.state = RetryState::Exhausted;
            if self.failures > 1 {
                warn!(
                    "[Retry] '{}' giving up after {} attempt(s): {}",
                    self.operation.name(),
                    self.failures,
                    error
                );
            }
            return RetryDecision::GiveUp(error);
        }
        self.state = RetryState::Retrying;
        let delay = self.policy.config.delay_after(self.failures);
        warn!(
            "[Retry] '{}' failed (attempt {}/{}): {}. Retrying in {:?}",
            self.operation.name(),
            self.failures,
            max,
            error,
            delay
        );
        RetryDecision::Retry {
            attempt: self.failures + 1,
            delay,
        }
    }
}
