//! Background pool maintenance.
//!
//! # Responsibilities
//! - Periodically PING idle connections and evict the ones that fail
//! - Evict connections idle longer than `idle_timeout` above `min_size`
//! - Top the pool back up to `min_size`

use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time;

use crate::pool::manager::{ConnectionPool, PoolShared};

/// What one maintenance pass did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub checked: usize,
    pub evicted: usize,
    pub opened: usize,
}

pub struct PoolMaintenance {
    pool: ConnectionPool,
}

impl PoolMaintenance {
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let interval = self.pool.config().health_check_interval();
        tracing::info!(
            endpoint = %self.pool.endpoint(),
            interval_secs = interval.as_secs(),
            "Pool maintenance starting"
        );

        let mut ticker = time::interval(interval);
        // The first tick completes immediately; warm-up already ran.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.run_once().await;
                    if report.evicted > 0 || report.opened > 0 {
                        tracing::info!(
                            endpoint = %self.pool.endpoint(),
                            checked = report.checked,
                            evicted = report.evicted,
                            opened = report.opened,
                            "Pool maintenance pass"
                        );
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Pool maintenance received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Check each idle connection at most once, one at a time, then refill.
    /// A connection is only taken out while callers still have another one
    /// to lease or room to open one.
    pub async fn run_once(&self) -> MaintenanceReport {
        let shared: &Arc<PoolShared> = self.pool.shared();
        if self.pool.is_closed() {
            return MaintenanceReport::default();
        }

        let mut report = MaintenanceReport::default();
        let idle_timeout = self.pool.config().idle_timeout();
        let min_size = self.pool.config().min_size;

        for _ in 0..shared.idle_len() {
            let Some(mut conn) = shared.pop_idle_spare() else {
                break;
            };
            report.checked += 1;
            if conn.idle_for() >= idle_timeout && shared.open_count() > min_size {
                shared.discard(conn, "idle timeout");
                report.evicted += 1;
            } else if shared.validate(&mut conn).await {
                shared.return_idle(conn);
            } else {
                shared.discard(conn, "failed health check");
                report.evicted += 1;
            }
        }

        match shared.fill_to_min().await {
            Ok(opened) => report.opened = opened,
            Err(e) => {
                tracing::warn!(endpoint = %self.pool.endpoint(), error = %e, "Pool refill failed");
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::store::{Fault, MemoryStore};
    use std::time::Duration;

    fn pool(store: &MemoryStore) -> ConnectionPool {
        let config = PoolConfig {
            min_size: 2,
            max_size: 4,
            idle_timeout_secs: 60,
            ..PoolConfig::default()
        };
        ConnectionPool::new(Arc::new(store.clone()), config)
    }

    #[tokio::test(start_paused = true)]
    async fn failed_ping_is_evicted_and_replaced() {
        let store = MemoryStore::new();
        let pool = pool(&store);
        pool.warm_up().await.unwrap();

        store.inject(Fault::Transient);
        let report = PoolMaintenance::new(pool.clone()).run_once().await;

        assert_eq!(report.checked, 2);
        assert_eq!(report.evicted, 1);
        assert_eq!(report.opened, 1);
        assert_eq!(pool.status().open, 2);
        assert_eq!(store.connections(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_connections_above_min_are_evicted() {
        let store = MemoryStore::new();
        let pool = pool(&store);

        let leases = vec![
            pool.acquire(Duration::from_millis(50)).await.unwrap(),
            pool.acquire(Duration::from_millis(50)).await.unwrap(),
            pool.acquire(Duration::from_millis(50)).await.unwrap(),
        ];
        for lease in leases {
            lease.release(true);
        }
        assert_eq!(pool.status().open, 3);

        tokio::time::advance(Duration::from_secs(61)).await;
        let report = PoolMaintenance::new(pool.clone()).run_once().await;

        assert_eq!(report.evicted, 1);
        assert_eq!(pool.status().open, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn sole_connection_is_left_for_callers() {
        let store = MemoryStore::new();
        let pool = ConnectionPool::new(
            Arc::new(store.clone()),
            PoolConfig {
                min_size: 1,
                max_size: 1,
                ..PoolConfig::default()
            },
        );
        pool.warm_up().await.unwrap();
        store.set_latency(Duration::from_millis(300));

        let maintenance = PoolMaintenance::new(pool.clone());
        let pass = tokio::spawn(async move { maintenance.run_once().await });
        tokio::task::yield_now().await;

        let lease = pool.acquire(Duration::from_millis(100)).await.unwrap();
        lease.release(true);
        assert_eq!(pass.await.unwrap().checked, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn caller_opens_a_connection_while_one_is_checked() {
        let store = MemoryStore::new();
        let pool = ConnectionPool::new(
            Arc::new(store.clone()),
            PoolConfig {
                min_size: 1,
                max_size: 2,
                ..PoolConfig::default()
            },
        );
        pool.warm_up().await.unwrap();
        store.set_latency(Duration::from_millis(300));

        let maintenance = PoolMaintenance::new(pool.clone());
        let pass = tokio::spawn(async move { maintenance.run_once().await });
        tokio::time::sleep(Duration::from_millis(10)).await;

        let lease = pool.acquire(Duration::from_millis(100)).await.unwrap();
        assert_eq!(pool.status().open, 2);
        lease.release(true);

        let report = pass.await.unwrap();
        assert_eq!(report.checked, 1);
        assert_eq!(report.evicted, 0);
        assert_eq!(pool.status().idle, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_during_a_pass_closes_the_checked_connection() {
        let store = MemoryStore::new();
        let pool = pool(&store);
        pool.warm_up().await.unwrap();
        store.set_latency(Duration::from_millis(300));

        let maintenance = PoolMaintenance::new(pool.clone());
        let pass = tokio::spawn(async move { maintenance.run_once().await });
        tokio::time::sleep(Duration::from_millis(10)).await;

        pool.shutdown(Duration::from_secs(1)).await;
        pass.await.unwrap();

        let status = pool.status();
        assert_eq!(status.open, 0);
        assert_eq!(status.idle, 0);
    }
}
