//! Cache-level errors.

use thiserror::Error;

use crate::executor::{FailureCause, OperationOutcome};

/// Final error surfaced to cache callers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("invalid ttl: {0}")]
    InvalidTtl(String),

    #[error("no store connection available")]
    PoolExhausted,

    #[error("store circuit is open")]
    CircuitOpen,

    #[error("service is shutting down")]
    ShuttingDown,

    #[error("store call timed out")]
    Timeout { outcome_unknown: bool },

    #[error("store temporarily unavailable: {0}")]
    Transient(String),

    #[error("store error: {0}")]
    Permanent(String),

    #[error("request cancelled")]
    Cancelled,
}

impl CacheError {
    /// Translate a failed outcome. `Success` and `NotFound` are handled by
    /// the caller; reaching here with one means the reply had the wrong shape.
    pub fn from_outcome(outcome: OperationOutcome) -> Self {
        match outcome {
            OperationOutcome::TransientFailure(FailureCause::PoolExhausted) => {
                CacheError::PoolExhausted
            }
            OperationOutcome::TransientFailure(cause) => CacheError::Transient(cause.to_string()),
            OperationOutcome::PermanentFailure(FailureCause::CircuitOpen) => CacheError::CircuitOpen,
            OperationOutcome::PermanentFailure(FailureCause::PoolClosed) => {
                CacheError::ShuttingDown
            }
            OperationOutcome::PermanentFailure(cause) => CacheError::Permanent(cause.to_string()),
            OperationOutcome::Timeout { outcome_unknown } => CacheError::Timeout { outcome_unknown },
            OperationOutcome::Cancelled => CacheError::Cancelled,
            other @ (OperationOutcome::Success(_) | OperationOutcome::NotFound) => {
                CacheError::Permanent(format!("unexpected result: {other}"))
            }
        }
    }

    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            CacheError::InvalidKey(_) => "invalid_key",
            CacheError::InvalidValue(_) => "invalid_value",
            CacheError::InvalidTtl(_) => "invalid_ttl",
            CacheError::PoolExhausted => "pool_exhausted",
            CacheError::CircuitOpen => "circuit_open",
            CacheError::ShuttingDown => "shutting_down",
            CacheError::Timeout { .. } => "timeout",
            CacheError::Transient(_) => "transient_failure",
            CacheError::Permanent(_) => "permanent_failure",
            CacheError::Cancelled => "cancelled",
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            CacheError::InvalidKey(_) | CacheError::InvalidValue(_) | CacheError::InvalidTtl(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_outcomes() {
        assert_eq!(
            CacheError::from_outcome(OperationOutcome::TransientFailure(
                FailureCause::PoolExhausted
            )),
            CacheError::PoolExhausted
        );
        assert_eq!(
            CacheError::from_outcome(OperationOutcome::PermanentFailure(FailureCause::CircuitOpen)),
            CacheError::CircuitOpen
        );
        assert_eq!(
            CacheError::from_outcome(OperationOutcome::Timeout {
                outcome_unknown: true
            }),
            CacheError::Timeout {
                outcome_unknown: true
            }
        );
        assert!(matches!(
            CacheError::from_outcome(OperationOutcome::NotFound),
            CacheError::Permanent(_)
        ));
    }
}
