//! Retry logic.
//!
//! # Responsibilities
//! - Decide whether a failed attempt may be repeated
//! - Compute the delay before the next attempt
//! - Bound the number of physical attempts to `max_retries + 1`
//!
//! # Design Decisions
//! - Never retry non-idempotent requests; a timeout there is reported as unknown
//! - Pool exhaustion is not retried: waiting already happened in acquire
//! - Jittered backoff prevents thundering herd

use std::time::Duration;

use crate::config::RetryConfig;
use crate::executor::OperationOutcome;
use crate::resilience::backoff::calculate_backoff;

/// What to do after an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep `delay`, then run attempt number `attempt` (2-based).
    Retry { attempt: u32, delay: Duration },
    GiveUp,
}

/// Retry settings for one policy.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Effective retry budget.
    pub fn max_retries(&self) -> u32 {
        if self.config.enabled {
            self.config.max_retries
        } else {
            0
        }
    }

    /// Start tracking one logical call.
    pub fn schedule(&self, idempotent: bool) -> RetrySchedule {
        RetrySchedule {
            max_retries: self.max_retries(),
            base_ms: self.config.base_delay_ms,
            max_ms: self.config.max_delay_ms,
            idempotent,
            retries: 0,
        }
    }
}

/// Per-call retry state.
#[derive(Debug, Clone)]
pub struct RetrySchedule {
    max_retries: u32,
    base_ms: u64,
    max_ms: u64,
    idempotent: bool,
    retries: u32,
}

impl RetrySchedule {
    /// Decide after an attempt finished with `outcome`.
    pub fn next(&mut self, outcome: &OperationOutcome) -> RetryDecision {
        if !self.idempotent || !outcome.is_retryable() || self.retries >= self.max_retries {
            return RetryDecision::GiveUp;
        }
        self.retries += 1;
        RetryDecision::Retry {
            attempt: self.retries + 1,
            delay: calculate_backoff(self.retries, self.base_ms, self.max_ms),
        }
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }
}
