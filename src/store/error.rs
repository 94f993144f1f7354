//! Store-level errors.

use std::fmt;
use thiserror::Error;

/// Coarse classification of a store failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    /// Socket-level failure: refused, reset, dropped.
    Io,
    /// The client library gave up waiting.
    Timeout,
    /// The store is loading, failing over or asking us to try again.
    Busy,
    /// Authentication or authorization was rejected.
    Auth,
    /// The reply violated the wire protocol.
    Protocol,
    /// The store answered with an error reply.
    Server,
}

impl StoreErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreErrorKind::Io => "io",
            StoreErrorKind::Timeout => "timeout",
            StoreErrorKind::Busy => "busy",
            StoreErrorKind::Auth => "auth",
            StoreErrorKind::Protocol => "protocol",
            StoreErrorKind::Server => "server",
        }
    }
}

impl fmt::Display for StoreErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by a connector or a connection.
#[derive(Debug, Clone, Error)]
#[error("{kind} error: {message}")]
pub struct StoreError {
    pub kind: StoreErrorKind,
    pub message: String,
}

impl StoreError {
    pub fn new(kind: StoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Io, message)
    }

    /// Whether the same command may succeed if tried again.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            StoreErrorKind::Io | StoreErrorKind::Timeout | StoreErrorKind::Busy
        )
    }

    /// Whether the connection that produced this error can no longer be trusted.
    pub fn breaks_connection(&self) -> bool {
        matches!(
            self.kind,
            StoreErrorKind::Io | StoreErrorKind::Timeout | StoreErrorKind::Protocol
        )
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        use redis::ErrorKind;

        let kind = if err.is_timeout() {
            StoreErrorKind::Timeout
        } else if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
            StoreErrorKind::Io
        } else {
            match err.kind() {
                ErrorKind::AuthenticationFailed => StoreErrorKind::Auth,
                ErrorKind::BusyLoadingError
                | ErrorKind::TryAgain
                | ErrorKind::ClusterDown
                | ErrorKind::MasterDown => StoreErrorKind::Busy,
                ErrorKind::TypeError => StoreErrorKind::Protocol,
                _ => StoreErrorKind::Server,
            }
        };
        Self::new(kind, err.to_string())
    }
}
