//! Connection pool.
//!
//! # Responsibilities
//! - Bound open connections to `max_size` and leases to the same limit
//! - Hand out idle connections first, open new ones lazily with backoff
//! - Validate degraded connections before reuse, discard dead ones
//! - Keep `min_size` connections warm and replace discarded ones
//! - Drain cleanly on shutdown

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Notify, Semaphore};
use tokio::time::{self, Instant};

use crate::config::PoolConfig;
use crate::pool::connection::{HealthState, PooledConnection};
use crate::pool::lease::Lease;
use crate::resilience::backoff::calculate_backoff;
use crate::store::{Command, Connector, Reply, StoreError, StoreErrorKind};

/// Errors returned by [`ConnectionPool::acquire`].
#[derive(Debug, Clone, Error)]
pub enum PoolError {
    /// Every connection stayed leased for the whole acquire timeout.
    #[error("no connection available within {0:?}")]
    Exhausted(Duration),
    /// A permit was granted but no connection became usable before the
    /// deadline.
    #[error("no usable connection before the deadline")]
    Timeout,
    #[error("unable to connect: {0}")]
    Connect(StoreError),
    #[error("connection pool is shut down")]
    Closed,
}

#[derive(Debug, Default)]
struct PoolCounters {
    acquired: AtomicU64,
    released: AtomicU64,
    created: AtomicU64,
    discarded: AtomicU64,
    exhausted: AtomicU64,
    connect_failures: AtomicU64,
}

/// State shared between the pool handle, leases and the maintenance task.
pub(crate) struct PoolShared {
    connector: Arc<dyn Connector>,
    pub(crate) config: PoolConfig,
    endpoint: String,
    /// One permit per leasable connection.
    permits: Arc<Semaphore>,
    idle: Mutex<VecDeque<PooledConnection>>,
    /// Connections that exist: idle, leased, or being opened or validated.
    open: AtomicUsize,
    leased: AtomicUsize,
    closing: AtomicBool,
    /// False after connect attempts are exhausted, until a connect succeeds.
    reachable: AtomicBool,
    returned: Notify,
    drained: Notify,
    counters: PoolCounters,
}

/// A reserved slot in the `open` count. Released on drop unless committed.
struct OpenSlot<'a> {
    shared: &'a PoolShared,
    armed: bool,
}

impl OpenSlot<'_> {
    fn commit(mut self) {
        self.armed = false;
    }
}

impl Drop for OpenSlot<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.shared.open.fetch_sub(1, Ordering::SeqCst);
            self.shared.returned.notify_one();
        }
    }
}

impl PoolShared {
    fn lock_idle(&self) -> std::sync::MutexGuard<'_, VecDeque<PooledConnection>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pop_idle(&self) -> Option<PooledConnection> {
        self.lock_idle().pop_front()
    }

    fn take_idle(&self) -> Vec<PooledConnection> {
        self.lock_idle().drain(..).collect()
    }

    pub(crate) fn idle_len(&self) -> usize {
        self.lock_idle().len()
    }

    /// Take the oldest idle connection for a background check, unless doing
    /// so would leave a caller with nothing to lease and no room to open.
    pub(crate) fn pop_idle_spare(&self) -> Option<PooledConnection> {
        let mut idle = self.lock_idle();
        if self.is_closing() || self.permits.available_permits() == 0 {
            return None;
        }
        if idle.len() > 1 || self.open_count() < self.config.max_size {
            idle.pop_front()
        } else {
            None
        }
    }

    /// Put back a connection that was taken out for a check or just opened.
    /// Checked under the idle lock so shutdown's drain cannot miss it.
    pub(crate) fn return_idle(&self, conn: PooledConnection) {
        let mut idle = self.lock_idle();
        if self.is_closing() {
            drop(idle);
            self.discard(conn, "shutdown");
            return;
        }
        idle.push_back(conn);
        drop(idle);
        self.returned.notify_one();
    }

    fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    pub(crate) fn open_count(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    /// Reserve room for one more connection, if under `max_size`.
    fn reserve_slot(&self) -> Option<OpenSlot<'_>> {
        let max = self.config.max_size;
        let mut prev = self.open.load(Ordering::SeqCst);
        loop {
            if prev >= max {
                return None;
            }
            match self
                .open
                .compare_exchange_weak(prev, prev + 1, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => break,
                Err(x) => prev = x,
            }
        }
        Some(OpenSlot {
            shared: self,
            armed: true,
        })
    }

    /// Close a connection and free its slot.
    pub(crate) fn discard(&self, conn: PooledConnection, reason: &'static str) {
        self.open.fetch_sub(1, Ordering::SeqCst);
        self.counters.discarded.fetch_add(1, Ordering::Relaxed);
        self.returned.notify_one();
        tracing::debug!(
            endpoint = %self.endpoint,
            connection_id = %conn.id(),
            health = conn.health().as_str(),
            age_ms = conn.age().as_millis() as u64,
            reason,
            "Connection discarded"
        );
    }

    /// PING a connection; restores it to Healthy on PONG.
    pub(crate) async fn validate(&self, conn: &mut PooledConnection) -> bool {
        let probe = time::timeout(
            self.config.health_check_timeout(),
            conn.execute(&Command::Ping),
        );
        match probe.await {
            Ok(Ok(Reply::Status(status))) if status.eq_ignore_ascii_case("PONG") => {
                conn.restore();
                true
            }
            Ok(Ok(reply)) => {
                tracing::warn!(connection_id = %conn.id(), ?reply, "Health check got unexpected reply");
                false
            }
            Ok(Err(e)) => {
                tracing::warn!(connection_id = %conn.id(), error = %e, "Health check failed");
                false
            }
            Err(_) => {
                tracing::warn!(connection_id = %conn.id(), "Health check timed out");
                false
            }
        }
    }

    /// Open one connection, retrying with exponential backoff.
    async fn connect_with_backoff(&self) -> Result<PooledConnection, StoreError> {
        let attempts = self.config.connect_attempts.max(1);
        let mut last_error = StoreError::io("no connection attempt made");

        for attempt in 1..=attempts {
            match time::timeout(self.config.connect_timeout(), self.connector.connect()).await {
                Ok(Ok(inner)) => {
                    let conn = PooledConnection::new(inner);
                    self.counters.created.fetch_add(1, Ordering::Relaxed);
                    if !self.reachable.swap(true, Ordering::SeqCst) {
                        tracing::info!(endpoint = %self.endpoint, "Store reachable again");
                    }
                    tracing::debug!(
                        endpoint = %self.endpoint,
                        connection_id = %conn.id(),
                        attempt,
                        "Connection established"
                    );
                    return Ok(conn);
                }
                Ok(Err(e)) => last_error = e,
                Err(_) => {
                    last_error = StoreError::new(StoreErrorKind::Timeout, "connect timed out")
                }
            }
            self.counters.connect_failures.fetch_add(1, Ordering::Relaxed);

            if attempt < attempts {
                let delay = calculate_backoff(
                    attempt,
                    self.config.connect_backoff_base_ms,
                    self.config.connect_backoff_max_ms,
                );
                tracing::warn!(
                    endpoint = %self.endpoint,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %last_error,
                    "Connection attempt failed, backing off"
                );
                time::sleep(delay).await;
            }
        }

        if self.reachable.swap(false, Ordering::SeqCst) {
            tracing::error!(
                endpoint = %self.endpoint,
                attempts,
                error = %last_error,
                "Store unreachable; pool marked unhealthy"
            );
        }
        Err(last_error)
    }

    /// Get a usable connection. Caller holds a permit.
    async fn checkout(&self) -> Result<PooledConnection, PoolError> {
        loop {
            while let Some(mut conn) = self.pop_idle() {
                if conn.health() == HealthState::Dead {
                    self.discard(conn, "dead");
                    continue;
                }
                if conn.idle_for() >= self.config.idle_timeout() {
                    self.discard(conn, "idle timeout");
                    continue;
                }
                if conn.health() == HealthState::Degraded {
                    // Counted in `open`; the slot frees it if we are cancelled mid-PING.
                    let slot = OpenSlot {
                        shared: self,
                        armed: true,
                    };
                    let ok = self.validate(&mut conn).await;
                    slot.commit();
                    if !ok {
                        self.discard(conn, "failed validation");
                        continue;
                    }
                }
                return Ok(conn);
            }

            if let Some(slot) = self.reserve_slot() {
                let conn = self
                    .connect_with_backoff()
                    .await
                    .map_err(PoolError::Connect)?;
                slot.commit();
                return Ok(conn);
            }

            // At capacity with nothing idle: a connection is mid-return.
            let notified = self.returned.notified();
            if self.lock_idle().is_empty() && self.open_count() >= self.config.max_size {
                notified.await;
            }
        }
    }

    /// Take back a leased connection.
    pub(crate) fn check_in(self: &Arc<Self>, mut conn: PooledConnection, healthy: bool) {
        let reusable = healthy && conn.health() != HealthState::Dead && !self.is_closing();
        if reusable {
            conn.touch();
            self.return_idle(conn);
        } else {
            let reason = if self.is_closing() {
                "shutdown"
            } else {
                "released unhealthy"
            };
            self.discard(conn, reason);
            self.schedule_refill();
        }

        self.counters.released.fetch_add(1, Ordering::Relaxed);
        if self.leased.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.drained.notify_waiters();
        }
        self.record_gauges();
    }

    fn schedule_refill(self: &Arc<Self>) {
        if self.is_closing() || self.open_count() >= self.config.min_size {
            return;
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let shared = Arc::clone(self);
            handle.spawn(async move {
                if let Err(e) = shared.fill_to_min().await {
                    tracing::warn!(endpoint = %shared.endpoint, error = %e, "Pool refill failed");
                }
            });
        }
    }

    /// Open connections until `min_size` exist. Returns how many were added.
    pub(crate) async fn fill_to_min(&self) -> Result<usize, PoolError> {
        let mut added = 0;
        while !self.is_closing() && self.open_count() < self.config.min_size {
            let Some(slot) = self.reserve_slot() else {
                break;
            };
            let conn = self
                .connect_with_backoff()
                .await
                .map_err(PoolError::Connect)?;
            slot.commit();
            self.return_idle(conn);
            added += 1;
        }
        Ok(added)
    }

    fn record_gauges(&self) {
        let leased = self.leased.load(Ordering::Relaxed) as f64;
        let open = self.open.load(Ordering::Relaxed) as f64;
        metrics::gauge!("cache_pool_connections", "endpoint" => self.endpoint.clone(), "state" => "leased")
            .set(leased);
        metrics::gauge!("cache_pool_connections", "endpoint" => self.endpoint.clone(), "state" => "open")
            .set(open);
    }
}

/// Point-in-time pool statistics.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStatus {
    pub endpoint: String,
    pub open: usize,
    pub idle: usize,
    pub leased: usize,
    pub min_size: usize,
    pub max_size: usize,
    pub healthy: bool,
    pub closed: bool,
    pub acquired: u64,
    pub released: u64,
    pub created: u64,
    pub discarded: u64,
    pub exhausted: u64,
    pub connect_failures: u64,
}

/// Bounded set of reusable store connections for one endpoint.
#[derive(Clone)]
pub struct ConnectionPool {
    shared: Arc<PoolShared>,
}

impl ConnectionPool {
    pub fn new(connector: Arc<dyn Connector>, config: PoolConfig) -> Self {
        let endpoint = connector.endpoint().to_string();
        let permits = Arc::new(Semaphore::new(config.max_size));
        Self {
            shared: Arc::new(PoolShared {
                connector,
                config,
                endpoint,
                permits,
                idle: Mutex::new(VecDeque::new()),
                open: AtomicUsize::new(0),
                leased: AtomicUsize::new(0),
                closing: AtomicBool::new(false),
                reachable: AtomicBool::new(true),
                returned: Notify::new(),
                drained: Notify::new(),
                counters: PoolCounters::default(),
            }),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.shared.endpoint
    }

    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    pub(crate) fn shared(&self) -> &Arc<PoolShared> {
        &self.shared
    }

    /// Open `min_size` connections up front.
    pub async fn warm_up(&self) -> Result<(), PoolError> {
        let added = self.shared.fill_to_min().await?;
        tracing::info!(
            endpoint = %self.shared.endpoint,
            connections = added,
            "Connection pool warmed up"
        );
        self.shared.record_gauges();
        Ok(())
    }

    /// Lease a connection, waiting at most `timeout` for one to free up.
    pub async fn acquire(&self, timeout: Duration) -> Result<Lease, PoolError> {
        let shared = &self.shared;
        if shared.is_closing() {
            return Err(PoolError::Closed);
        }
        let deadline = Instant::now() + timeout;

        let permit = match time::timeout_at(deadline, Arc::clone(&shared.permits).acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(PoolError::Closed),
            Err(_) => {
                shared.counters.exhausted.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("cache_pool_exhausted_total", "endpoint" => shared.endpoint.clone())
                    .increment(1);
                tracing::warn!(
                    endpoint = %shared.endpoint,
                    timeout_ms = timeout.as_millis() as u64,
                    leased = shared.leased.load(Ordering::Relaxed),
                    "Connection pool exhausted"
                );
                return Err(PoolError::Exhausted(timeout));
            }
        };

        let conn = match time::timeout_at(deadline, shared.checkout()).await {
            Ok(result) => result?,
            Err(_) => return Err(PoolError::Timeout),
        };

        shared.leased.fetch_add(1, Ordering::SeqCst);
        shared.counters.acquired.fetch_add(1, Ordering::Relaxed);
        shared.record_gauges();
        tracing::trace!(endpoint = %shared.endpoint, connection_id = %conn.id(), "Lease acquired");
        Ok(Lease::new(Arc::clone(shared), conn, permit))
    }

    /// Return a lease. Equivalent to [`Lease::release`].
    pub fn release(&self, lease: Lease, healthy: bool) {
        lease.release(healthy);
    }

    /// Whether the store is reachable and the pool accepts work.
    pub fn is_healthy(&self) -> bool {
        !self.shared.is_closing() && self.shared.reachable.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closing()
    }

    /// Stop handing out leases, wait up to `grace` for outstanding leases,
    /// then close idle connections.
    pub async fn shutdown(&self, grace: Duration) {
        let shared = &self.shared;
        if shared.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        shared.permits.close();
        tracing::info!(
            endpoint = %shared.endpoint,
            leased = shared.leased.load(Ordering::SeqCst),
            "Connection pool shutting down"
        );

        let drained = time::timeout(grace, async {
            loop {
                let notified = shared.drained.notified();
                if shared.leased.load(Ordering::SeqCst) == 0 {
                    break;
                }
                notified.await;
            }
        })
        .await
        .is_ok();

        if !drained {
            tracing::warn!(
                endpoint = %shared.endpoint,
                leased = shared.leased.load(Ordering::SeqCst),
                "Grace period elapsed with leases outstanding"
            );
        }

        for conn in shared.take_idle() {
            shared.discard(conn, "shutdown");
        }
        shared.record_gauges();
        tracing::info!(endpoint = %shared.endpoint, "Connection pool closed");
    }

    pub fn status(&self) -> PoolStatus {
        let shared = &self.shared;
        let counters = &shared.counters;
        PoolStatus {
            endpoint: shared.endpoint.clone(),
            open: shared.open_count(),
            idle: shared.lock_idle().len(),
            leased: shared.leased.load(Ordering::SeqCst),
            min_size: shared.config.min_size,
            max_size: shared.config.max_size,
            healthy: self.is_healthy(),
            closed: self.is_closed(),
            acquired: counters.acquired.load(Ordering::Relaxed),
            released: counters.released.load(Ordering::Relaxed),
            created: counters.created.load(Ordering::Relaxed),
            discarded: counters.discarded.load(Ordering::Relaxed),
            exhausted: counters.exhausted.load(Ordering::Relaxed),
            connect_failures: counters.connect_failures.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("endpoint", &self.shared.endpoint)
            .field("open", &self.shared.open_count())
            .finish()
    }
}
