//! Operation executor subsystem.
//!
//! # Data Flow
//! ```text
//! OperationRequest (command, timeout, idempotent)
//!     → call.rs (run on a leased connection under min(timeout, lease deadline))
//!     → call.rs (decode raw reply for the command)
//!     → OperationOutcome (Success / NotFound / Transient / Permanent / Timeout)
//! ```
//!
//! # Design Decisions
//! - Exactly one physical attempt; retry policy lives in `resilience`
//! - A missing key is `NotFound`, never an error
//! - A timeout on a non-idempotent command reports the outcome as unknown
//! - The executor marks connection health on the lease; the pool acts on it

mod call;
pub mod outcome;
pub mod request;

pub use call::execute;
pub use outcome::{FailureCause, OperationOutcome, OutcomeClass, Value};
pub use request::OperationRequest;
