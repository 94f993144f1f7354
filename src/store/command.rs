//! Typed store commands.

use std::fmt;
use std::time::Duration;

/// Command label used in telemetry and spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CommandKind {
    Get,
    Set,
    Delete,
    Exists,
    Increment,
    Expire,
    Ping,
}

impl CommandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Get => "get",
            CommandKind::Set => "set",
            CommandKind::Delete => "delete",
            CommandKind::Exists => "exists",
            CommandKind::Increment => "increment",
            CommandKind::Expire => "expire",
            CommandKind::Ping => "ping",
        }
    }

    /// Whether running the command twice leaves the store in the same state
    /// as running it once.
    pub fn is_idempotent(&self) -> bool {
        !matches!(self, CommandKind::Increment)
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single logical store command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Get { key: String },
    Set { key: String, value: String, ttl: Option<Duration> },
    Delete { key: String },
    Exists { key: String },
    Increment { key: String, by: i64 },
    Expire { key: String, ttl: Duration },
    Ping,
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::Get { .. } => CommandKind::Get,
            Command::Set { .. } => CommandKind::Set,
            Command::Delete { .. } => CommandKind::Delete,
            Command::Exists { .. } => CommandKind::Exists,
            Command::Increment { .. } => CommandKind::Increment,
            Command::Expire { .. } => CommandKind::Expire,
            Command::Ping => CommandKind::Ping,
        }
    }

    /// The key this command targets, if any.
    pub fn key(&self) -> Option<&str> {
        match self {
            Command::Get { key }
            | Command::Set { key, .. }
            | Command::Delete { key }
            | Command::Exists { key }
            | Command::Increment { key, .. }
            | Command::Expire { key, .. } => Some(key),
            Command::Ping => None,
        }
    }

    /// Build the RESP command for this operation.
    ///
    /// TTLs are sent in milliseconds (`PX` / `PEXPIRE`).
    pub fn to_redis(&self) -> redis::Cmd {
        match self {
            Command::Get { key } => {
                let mut cmd = redis::cmd("GET");
                cmd.arg(key);
                cmd
            }
            Command::Set { key, value, ttl } => {
                let mut cmd = redis::cmd("SET");
                cmd.arg(key).arg(value);
                if let Some(ttl) = ttl {
                    cmd.arg("PX").arg(ttl_millis(*ttl));
                }
                cmd
            }
            Command::Delete { key } => {
                let mut cmd = redis::cmd("DEL");
                cmd.arg(key);
                cmd
            }
            Command::Exists { key } => {
                let mut cmd = redis::cmd("EXISTS");
                cmd.arg(key);
                cmd
            }
            Command::Increment { key, by } => {
                let mut cmd = redis::cmd("INCRBY");
                cmd.arg(key).arg(*by);
                cmd
            }
            Command::Expire { key, ttl } => {
                let mut cmd = redis::cmd("PEXPIRE");
                cmd.arg(key).arg(ttl_millis(*ttl));
                cmd
            }
            Command::Ping => redis::cmd("PING"),
        }
    }
}

/// Millisecond TTL, never zero (the store rejects `PX 0`). Saturates at the
/// largest value the server accepts instead of wrapping.
fn ttl_millis(ttl: Duration) -> u64 {
    const MAX_MILLIS: u64 = i64::MAX as u64;
    u64::try_from(ttl.as_millis())
        .unwrap_or(MAX_MILLIS)
        .clamp(1, MAX_MILLIS)
}
