//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Store call:
//!     → circuit_breaker.rs (fail fast when Open, bounded probes when Half-Open)
//!     → pool lease + executor (timeouts.rs: attempt deadline ≤ lease deadline)
//!     → circuit_breaker.rs (record attempt in rolling window)
//!     → On transient failure: retries.rs (idempotent only, backoff.rs delay)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every store call has a deadline
//! - Retries only for idempotent commands
//! - Circuit breaker prevents hammering an endpoint that is down
//! - policy.rs composes the pieces; each piece is usable on its own

pub mod backoff;
pub mod circuit_breaker;
pub mod policy;
pub mod retries;
pub mod timeouts;

pub use circuit_breaker::{BreakerSnapshot, CircuitBreaker, CircuitOpen, CircuitState};
pub use policy::ResiliencePolicy;
pub use retries::{RetryDecision, RetryPolicy, RetrySchedule};
pub use timeouts::Deadline;
