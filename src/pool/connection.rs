//! Pooled connection state.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Track per-connection health (Healthy → Degraded → Dead)
//! - Track last use and in-flight count for idle eviction and status

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

use crate::store::{Command, Reply, StoreConnection, StoreError};

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a pooled connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Health of a single connection.
///
/// Only ever downgraded while leased; the pool upgrades a Degraded
/// connection back to Healthy after a successful PING.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HealthState {
    Healthy,
    /// A call timed out on it; must be validated before reuse.
    Degraded,
    /// Broken; will be discarded on release.
    Dead,
}

impl HealthState {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthState::Healthy => "healthy",
            HealthState::Degraded => "degraded",
            HealthState::Dead => "dead",
        }
    }
}

/// One live session owned by the pool.
pub struct PooledConnection {
    id: ConnectionId,
    inner: Box<dyn StoreConnection>,
    health: HealthState,
    created_at: Instant,
    last_used: Instant,
    in_flight: u32,
}

impl PooledConnection {
    pub(crate) fn new(inner: Box<dyn StoreConnection>) -> Self {
        let now = Instant::now();
        Self {
            id: ConnectionId::new(),
            inner,
            health: HealthState::Healthy,
            created_at: now,
            last_used: now,
            in_flight: 0,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn health(&self) -> HealthState {
        self.health
    }

    /// Downgrade health. Never upgrades.
    pub fn mark(&mut self, health: HealthState) {
        if health > self.health {
            tracing::debug!(
                connection_id = %self.id,
                from = self.health.as_str(),
                to = health.as_str(),
                "Connection health downgraded"
            );
            self.health = health;
        }
    }

    pub(crate) fn restore(&mut self) {
        self.health = HealthState::Healthy;
    }

    pub fn in_flight(&self) -> u32 {
        self.in_flight
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn idle_for(&self) -> Duration {
        self.last_used.elapsed()
    }

    pub(crate) fn touch(&mut self) {
        self.last_used = Instant::now();
    }

    /// Run one command on the underlying session.
    pub(crate) async fn execute(&mut self, command: &Command) -> Result<Reply, StoreError> {
        self.in_flight += 1;
        let result = self.inner.execute(command).await;
        self.in_flight -= 1;
        self.last_used = Instant::now();
        result
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("health", &self.health)
            .field("in_flight", &self.in_flight)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Connector, MemoryStore};

    #[test]
    fn connection_id_unique() {
        let id1 = ConnectionId::new();
        let id2 = ConnectionId::new();
        assert_ne!(id1, id2);
        assert!(id1.to_string().starts_with("conn-"));
    }

    #[tokio::test]
    async fn health_only_downgrades() {
        let store = MemoryStore::new();
        let mut conn = PooledConnection::new(store.connect().await.unwrap());

        conn.mark(HealthState::Dead);
        conn.mark(HealthState::Degraded);
        assert_eq!(conn.health(), HealthState::Dead);

        conn.restore();
        assert_eq!(conn.health(), HealthState::Healthy);
    }

    #[tokio::test]
    async fn execute_tracks_in_flight() {
        let store = MemoryStore::new();
        let mut conn = PooledConnection::new(store.connect().await.unwrap());
        let reply = conn.execute(&Command::Ping).await.unwrap();
        assert_eq!(reply, Reply::Status("PONG".into()));
        assert_eq!(conn.in_flight(), 0);
    }
}
