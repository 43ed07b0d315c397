//! Retry/backoff state machine for provider calls
//!
//! `Attempting -> Succeeded`, `Attempting -> (transient) -> Attempting` while
//! attempts remain, `Attempting -> (fatal | exhausted) -> Failed`. The machine
//! is driven by the orchestrator and holds no I/O.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use crate::model::RetryConfig;
use crate::service::llm::ProviderError;

/// Cap on the shared throttling multiplier
const MAX_THROTTLE_FACTOR: u32 = 4;

/// Exponential backoff schedule
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Delay before retrying after failed attempt number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.initial_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_delay: config.initial_delay(),
            max_delay: config.max_delay(),
        }
    }
}

/// Rate-limit pressure shared by every request of one orchestrator
///
/// Consecutive rate-limit responses raise it, any success resets it.
#[derive(Debug, Clone, Default)]
pub struct BackoffCounter {
    consecutive_rate_limits: Arc<AtomicU32>,
}

impl BackoffCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_rate_limit(&self) -> u32 {
        self.consecutive_rate_limits.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn record_success(&self) {
        self.consecutive_rate_limits.store(0, Ordering::Release);
    }

    pub fn current(&self) -> u32 {
        self.consecutive_rate_limits.load(Ordering::Acquire)
    }

    /// Stretch `base` by the current pressure, never past `max`
    pub fn scale(&self, base: Duration, max: Duration) -> Duration {
        let factor = 1 + self.current().min(MAX_THROTTLE_FACTOR);
        base.saturating_mul(factor).min(max)
    }
}

/// State of one prompt's provider calls
#[derive(Debug, Clone, PartialEq)]
pub enum RetryState {
    /// About to make call number `attempt` (1-based)
    Attempting { attempt: u32 },
    Succeeded { attempts: u32 },
    Failed { attempts: u32, error: ProviderError },
}

/// What the driver should do after feeding an outcome to the machine
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Done(String),
    RetryAfter(Duration),
    GiveUp(ProviderError),
}

/// Explicit retry state machine for one prompt
#[derive(Debug)]
pub struct RetryMachine<'a> {
    policy: &'a RetryPolicy,
    counter: &'a BackoffCounter,
    state: RetryState,
}

impl<'a> RetryMachine<'a> {
    pub fn new(policy: &'a RetryPolicy, counter: &'a BackoffCounter) -> Self {
        Self {
            policy,
            counter,
            state: RetryState::Attempting { attempt: 1 },
        }
    }

    pub fn state(&self) -> &RetryState {
        &self.state
    }

    /// Calls made so far, including the one in progress
    pub fn attempts(&self) -> u32 {
        match &self.state {
            RetryState::Attempting { attempt } => *attempt,
            RetryState::Succeeded { attempts } | RetryState::Failed { attempts, .. } => *attempts,
        }
    }

    /// Feed the outcome of the current attempt and get the next step
    pub fn on_outcome(&mut self, outcome: Result<String, ProviderError>) -> Step {
        let attempt = self.attempts();

        match outcome {
            Ok(text) => {
                self.counter.record_success();
                self.state = RetryState::Succeeded { attempts: attempt };
                Step::Done(text)
            }
            Err(error) if error.is_retryable() && attempt < self.policy.max_attempts => {
                if error.is_rate_limit() {
                    self.counter.record_rate_limit();
                }
                let delay = self
                    .counter
                    .scale(self.policy.delay_for(attempt), self.policy.max_delay);
                self.state = RetryState::Attempting {
                    attempt: attempt + 1,
                };
                Step::RetryAfter(delay)
            }
            Err(error) => {
                if error.is_rate_limit() {
                    self.counter.record_rate_limit();
                }
                self.state = RetryState::Failed {
                    attempts: attempt,
                    error: error.clone(),
                };
                Step::GiveUp(error)
            }
        }
    }
}
