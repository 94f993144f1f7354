//! Connection pool subsystem.
//!
//! # Data Flow
//! ```text
//! caller
//!     → manager.rs (acquire: permit, then idle connection or new one)
//!     → lease.rs (exclusive use, deadline, health marks)
//!     → manager.rs (check_in: back to idle, or discard and refill)
//!
//! maintenance.rs (background)
//!     → PING idle connections, evict, refill to min_size
//! ```
//!
//! # Design Decisions
//! - A semaphore bounds leases; an atomic counter bounds open connections
//! - Leases release on drop, so no exit path can leak a connection
//! - A lease dropped without an explicit release discards its connection
//! - Connections open lazily with backoff; `min_size` are kept warm

pub mod connection;
pub mod lease;
pub mod maintenance;
pub mod manager;

pub use connection::{ConnectionId, HealthState, PooledConnection};
pub use lease::Lease;
pub use maintenance::{MaintenanceReport, PoolMaintenance};
pub use manager::{ConnectionPool, PoolError, PoolStatus};
