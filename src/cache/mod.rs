//! Cache facade subsystem.
//!
//! # Data Flow
//! ```text
//! HTTP handler / CLI
//!     → validation.rs (key, value, TTL)
//!     → facade.rs (build OperationRequest, call ResiliencePolicy)
//!     → facade.rs (typed result) or error.rs (CacheError)
//! ```
//!
//! # Design Decisions
//! - Invalid input is rejected before any store call
//! - The facade never re-interprets retry or breaker decisions
//! - A missing key is `Ok(None)` / `Ok(false)`, not an error

pub mod error;
pub mod facade;
pub mod validation;

pub use error::CacheError;
pub use facade::{BatchEntry, CacheFacade};
pub use validation::{parse_ttl_secs, validate_key, validate_ttl, validate_value};
