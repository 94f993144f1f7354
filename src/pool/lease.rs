//! Scoped connection leases.
//!
//! A [`Lease`] is the only way to reach a pooled connection. It is released
//! exactly once: explicitly through [`Lease::release`], or by `Drop` on every
//! other exit path (early return, error, cancelled future), in which case the
//! connection's state is unknown and it is discarded.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OwnedSemaphorePermit;
use tokio::time::Instant;

use crate::pool::connection::{ConnectionId, HealthState, PooledConnection};
use crate::pool::manager::PoolShared;
use crate::resilience::timeouts::Deadline;

/// Exclusive, temporary grant of one pooled connection.
pub struct Lease {
    shared: Arc<PoolShared>,
    conn: Option<PooledConnection>,
    permit: Option<OwnedSemaphorePermit>,
    acquired_at: Instant,
    deadline: Deadline,
}

impl Lease {
    pub(crate) fn new(
        shared: Arc<PoolShared>,
        conn: PooledConnection,
        permit: OwnedSemaphorePermit,
    ) -> Self {
        let acquired_at = Instant::now();
        let deadline = Deadline::after(shared.config.lease_timeout());
        Self {
            shared,
            conn: Some(conn),
            permit: Some(permit),
            acquired_at,
            deadline,
        }
    }

    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.conn.as_ref().map(PooledConnection::id)
    }

    pub fn acquired_at(&self) -> Instant {
        self.acquired_at
    }

    pub fn deadline(&self) -> Deadline {
        self.deadline
    }

    /// Time left before the lease deadline.
    pub fn remaining(&self) -> Duration {
        self.deadline.remaining()
    }

    pub fn health(&self) -> HealthState {
        self.conn
            .as_ref()
            .map_or(HealthState::Dead, PooledConnection::health)
    }

    /// Downgrade the leased connection; reported to the pool on release.
    pub fn mark(&mut self, health: HealthState) {
        if let Some(conn) = self.conn.as_mut() {
            conn.mark(health);
        }
    }

    pub(crate) fn connection_mut(&mut self) -> Option<&mut PooledConnection> {
        self.conn.as_mut()
    }

    /// Return the connection to the pool. `healthy = false` discards it.
    pub fn release(mut self, healthy: bool) {
        self.finish(healthy);
    }

    fn finish(&mut self, healthy: bool) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        let connection_id = conn.id();
        self.shared.check_in(conn, healthy);
        // Permit goes back after the connection is idle again, so the next
        // waiter finds it instead of opening a new one.
        drop(self.permit.take());

        tracing::trace!(
            connection_id = %connection_id,
            held_ms = self.acquired_at.elapsed().as_millis() as u64,
            healthy,
            "Lease released"
        );
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if self.conn.is_some() {
            tracing::debug!(
                connection_id = ?self.connection_id(),
                "Lease dropped without release; discarding connection"
            );
            self.finish(false);
        }
    }
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("connection", &self.conn)
            .field("remaining", &self.remaining())
            .finish()
    }
}
