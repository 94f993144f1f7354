//! Operation outcomes and failure causes.

use serde::Serialize;
use std::fmt;

use crate::store::{StoreError, StoreErrorKind};

/// A decoded value returned by a successful operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Unit,
    Text(String),
    Integer(i64),
    Bool(bool),
}

/// Why an operation failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureCause {
    /// Socket-level failure on an established connection.
    Io(String),
    /// A new connection could not be established.
    Connect(String),
    /// The store asked to retry later (loading, failover).
    Busy(String),
    /// The reply did not match the command.
    Protocol(String),
    /// The reply was well-formed but its payload could not be decoded.
    Decode(String),
    /// Credentials rejected.
    Auth(String),
    /// The store returned an error reply for the command.
    Server(String),
    /// No pooled connection became free in time.
    PoolExhausted,
    /// The pool is shutting down.
    PoolClosed,
    /// The circuit breaker is rejecting calls.
    CircuitOpen,
}

impl FailureCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCause::Io(_) => "io",
            FailureCause::Connect(_) => "connect",
            FailureCause::Busy(_) => "busy",
            FailureCause::Protocol(_) => "protocol",
            FailureCause::Decode(_) => "decode",
            FailureCause::Auth(_) => "auth",
            FailureCause::Server(_) => "server",
            FailureCause::PoolExhausted => "pool_exhausted",
            FailureCause::PoolClosed => "pool_closed",
            FailureCause::CircuitOpen => "circuit_open",
        }
    }
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureCause::Io(msg)
            | FailureCause::Connect(msg)
            | FailureCause::Busy(msg)
            | FailureCause::Protocol(msg)
            | FailureCause::Decode(msg)
            | FailureCause::Auth(msg)
            | FailureCause::Server(msg) => write!(f, "{}: {}", self.as_str(), msg),
            FailureCause::PoolExhausted => f.write_str("connection pool exhausted"),
            FailureCause::PoolClosed => f.write_str("connection pool closed"),
            FailureCause::CircuitOpen => f.write_str("circuit open"),
        }
    }
}

/// Result of executing one operation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationOutcome {
    Success(Value),
    /// Valid negative result (missing key), not an error.
    NotFound,
    TransientFailure(FailureCause),
    PermanentFailure(FailureCause),
    /// Deadline exceeded. When `outcome_unknown` is set the command may or
    /// may not have been applied by the store.
    Timeout { outcome_unknown: bool },
    /// The caller went away before the operation finished.
    Cancelled,
}

/// Outcome label for metrics and health accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutcomeClass {
    Success,
    NotFound,
    Transient,
    Permanent,
    Timeout,
    Cancelled,
}

impl OutcomeClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeClass::Success => "success",
            OutcomeClass::NotFound => "not_found",
            OutcomeClass::Transient => "transient_failure",
            OutcomeClass::Permanent => "permanent_failure",
            OutcomeClass::Timeout => "timeout",
            OutcomeClass::Cancelled => "cancelled",
        }
    }

    /// Whether the outcome counts against the error rate.
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            OutcomeClass::Transient | OutcomeClass::Permanent | OutcomeClass::Timeout
        )
    }
}

impl OperationOutcome {
    /// Classify a store error raised while executing a command.
    pub fn from_store_error(err: &StoreError, idempotent: bool) -> Self {
        let message = err.message.clone();
        match err.kind {
            StoreErrorKind::Io => OperationOutcome::TransientFailure(FailureCause::Io(message)),
            StoreErrorKind::Busy => OperationOutcome::TransientFailure(FailureCause::Busy(message)),
            StoreErrorKind::Timeout => OperationOutcome::Timeout {
                outcome_unknown: !idempotent,
            },
            StoreErrorKind::Auth => OperationOutcome::PermanentFailure(FailureCause::Auth(message)),
            StoreErrorKind::Protocol => {
                OperationOutcome::PermanentFailure(FailureCause::Protocol(message))
            }
            StoreErrorKind::Server => {
                OperationOutcome::PermanentFailure(FailureCause::Server(message))
            }
        }
    }

    pub fn class(&self) -> OutcomeClass {
        match self {
            OperationOutcome::Success(_) => OutcomeClass::Success,
            OperationOutcome::NotFound => OutcomeClass::NotFound,
            OperationOutcome::TransientFailure(_) => OutcomeClass::Transient,
            OperationOutcome::PermanentFailure(_) => OutcomeClass::Permanent,
            OperationOutcome::Timeout { .. } => OutcomeClass::Timeout,
            OperationOutcome::Cancelled => OutcomeClass::Cancelled,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, OperationOutcome::Success(_) | OperationOutcome::NotFound)
    }

    /// Whether another attempt could succeed. Idempotency is checked by the
    /// retry schedule, not here.
    pub fn is_retryable(&self) -> bool {
        match self {
            OperationOutcome::TransientFailure(FailureCause::PoolExhausted) => false,
            OperationOutcome::TransientFailure(_) => true,
            OperationOutcome::Timeout { .. } => true,
            _ => false,
        }
    }

    /// How the outcome feeds the circuit breaker window:
    /// `Some(true)` failure, `Some(false)` success, `None` not recorded.
    ///
    /// Only outcomes that say something about the store's health count.
    pub fn circuit_failure(&self) -> Option<bool> {
        match self {
            OperationOutcome::Success(_) | OperationOutcome::NotFound => Some(false),
            OperationOutcome::Timeout { .. } => Some(true),
            OperationOutcome::TransientFailure(FailureCause::PoolExhausted) => None,
            OperationOutcome::TransientFailure(_) => Some(true),
            OperationOutcome::PermanentFailure(cause) => match cause {
                FailureCause::Server(_) | FailureCause::Decode(_) => Some(false),
                FailureCause::CircuitOpen | FailureCause::PoolClosed => None,
                _ => Some(true),
            },
            OperationOutcome::Cancelled => None,
        }
    }
}

impl fmt::Display for OperationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationOutcome::Success(_) => f.write_str("success"),
            OperationOutcome::NotFound => f.write_str("not found"),
            OperationOutcome::TransientFailure(cause) => write!(f, "transient failure ({})", cause),
            OperationOutcome::PermanentFailure(cause) => write!(f, "permanent failure ({})", cause),
            OperationOutcome::Timeout { outcome_unknown: true } => {
                f.write_str("timeout (outcome unknown)")
            }
            OperationOutcome::Timeout { .. } => f.write_str("timeout"),
            OperationOutcome::Cancelled => f.write_str("cancelled"),
        }
    }
}
