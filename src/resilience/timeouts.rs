//! Deadline bookkeeping.
//!
//! A logical call has one overall deadline; each attempt gets at most
//! the remaining time, and backoff sleeps never run past it.

use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
        }
    }

    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }

    /// `budget` clipped to the time left.
    pub fn clip(&self, budget: Duration) -> Duration {
        budget.min(self.remaining())
    }
}
