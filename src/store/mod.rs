//! Key-value store access subsystem.
//!
//! # Data Flow
//! ```text
//! Pool needs a connection
//!     → Connector::connect (redis.rs or memory.rs)
//!     → Box<dyn StoreConnection> owned by the pool
//!
//! Executor runs a command on a leased connection
//!     → command.rs (typed Command → wire command)
//!     → StoreConnection::execute
//!     → raw Reply or StoreError
//! ```
//!
//! # Design Decisions
//! - The core never sees the wire client; everything goes through `Connector`
//! - Replies stay raw here; the executor decides what a reply means
//! - Errors carry a kind so the resilience layer can classify them

pub mod command;
pub mod error;
pub mod memory;
pub mod redis;

use async_trait::async_trait;

pub use command::{Command, CommandKind};
pub use error::{StoreError, StoreErrorKind};
pub use memory::{Fault, MemoryStore};
pub use self::redis::RedisConnector;

/// Raw reply from the store, before interpretation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Null bulk string / missing key.
    Nil,
    /// The `+OK` status.
    Ok,
    /// Any other status line (e.g. `PONG`).
    Status(String),
    Integer(i64),
    Bulk(Vec<u8>),
    /// A reply shape this layer does not model (arrays, maps, ...).
    Unexpected(String),
}

/// Opens connections to a single store endpoint.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Establish one new session.
    async fn connect(&self) -> Result<Box<dyn StoreConnection>, StoreError>;

    /// Endpoint label used for logs, metrics and circuit breaker identity.
    /// Never contains credentials.
    fn endpoint(&self) -> &str;
}

/// One live session to the store.
#[async_trait]
pub trait StoreConnection: Send {
    /// Send a command and wait for its correlated reply.
    async fn execute(&mut self, command: &Command) -> Result<Reply, StoreError>;
}
