//! Operation requests.

use std::time::Duration;

use crate::store::{Command, CommandKind};

/// A single logical store command plus its call policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationRequest {
    pub command: Command,
    /// Deadline for one physical attempt.
    pub timeout: Duration,
    /// Whether automatic retries are allowed.
    pub idempotent: bool,
}

impl OperationRequest {
    /// Create a request; idempotency defaults from the command kind.
    pub fn new(command: Command, timeout: Duration) -> Self {
        let idempotent = command.kind().is_idempotent();
        Self {
            command,
            timeout,
            idempotent,
        }
    }

    /// Override the idempotency flag.
    pub fn with_idempotent(mut self, idempotent: bool) -> Self {
        self.idempotent = idempotent;
        self
    }

    pub fn kind(&self) -> CommandKind {
        self.command.kind()
    }

    pub fn key(&self) -> Option<&str> {
        self.command.key()
    }
}
