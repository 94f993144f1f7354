//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use valkey_gateway::cache::CacheFacade;
use valkey_gateway::config::{GatewayConfig, StoreKind};
use valkey_gateway::lifecycle::{start_with_connector, Components, Shutdown};
use valkey_gateway::pool::ConnectionPool;
use valkey_gateway::resilience::CircuitBreaker;
use valkey_gateway::store::MemoryStore;
use valkey_gateway::telemetry::TelemetrySink;

pub const ADMIN_KEY: &str = "test-admin-key";

/// Config suitable for tests: ephemeral port, small pool, fast backoff.
pub fn test_config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.store.kind = StoreKind::Memory;
    config.pool.min_size = 1;
    config.pool.max_size = 4;
    config.pool.acquire_timeout_ms = 200;
    config.pool.connect_backoff_base_ms = 5;
    config.pool.connect_backoff_max_ms = 20;
    config.retries.base_delay_ms = 5;
    config.retries.max_delay_ms = 20;
    config.telemetry.metrics_enabled = false;
    config.admin.enabled = true;
    config.admin.api_key = ADMIN_KEY.into();
    config.shutdown.grace_period_secs = 2;
    config
}

/// Core components over a fresh memory store, without an HTTP server.
pub fn components(config: &GatewayConfig) -> (MemoryStore, Components) {
    let store = MemoryStore::new();
    let components = Components::new(config, Arc::new(store.clone()));
    (store, components)
}

/// A gateway serving HTTP on an ephemeral port.
pub struct TestGateway {
    pub addr: SocketAddr,
    pub store: MemoryStore,
    pub pool: ConnectionPool,
    pub breaker: Arc<CircuitBreaker>,
    pub telemetry: Arc<TelemetrySink>,
    pub cache: CacheFacade,
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<std::io::Result<()>>>,
}

impl TestGateway {
    pub async fn start(config: GatewayConfig) -> Self {
        let store = MemoryStore::new();
        let shutdown = Shutdown::new();
        let gateway = start_with_connector(config, Arc::new(store.clone()), None, &shutdown)
            .await
            .expect("gateway starts");

        let addr = gateway.local_addr().expect("bound address");
        let components = gateway.components();
        let pool = components.pool.clone();
        let breaker = Arc::clone(&components.breaker);
        let telemetry = Arc::clone(&components.telemetry);
        let cache = components.cache.clone();

        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(gateway.run(shutdown, async move {
            let _ = stopped.await;
        }));

        Self {
            addr,
            store,
            pool,
            breaker,
            telemetry,
            cache,
            stop: Some(stop),
            task: Some(task),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Trigger graceful shutdown and wait for it to finish.
    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(task) = self.task.take() {
            task.await.expect("gateway task").expect("clean shutdown");
        }
    }
}

/// HTTP client that never pools connections between tests.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .build()
        .expect("client")
}
