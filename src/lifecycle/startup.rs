//! Startup orchestration.
//!
//! # Responsibilities
//! - Build the store connector for the configured backend
//! - Initialize subsystems in dependency order (pool, breaker, telemetry,
//!   policy, facade)
//! - Warm the pool and start background maintenance
//! - Bind the listener last, so traffic only arrives once the store is reachable
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Shutdown order mirrors startup: stop accepting, drain, close connections

use metrics_exporter_prometheus::PrometheusHandle;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time;

use crate::cache::CacheFacade;
use crate::config::{GatewayConfig, StoreConfig, StoreKind};
use crate::http::{AppState, HttpServer};
use crate::lifecycle::Shutdown;
use crate::pool::{ConnectionPool, PoolError, PoolMaintenance};
use crate::resilience::{CircuitBreaker, ResiliencePolicy, RetryPolicy};
use crate::store::{Connector, MemoryStore, RedisConnector, StoreError};
use crate::telemetry::TelemetrySink;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("invalid store configuration: {0}")]
    Store(#[from] StoreError),

    #[error("connection pool warm-up failed: {0}")]
    WarmUp(#[from] PoolError),

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },
}

/// Wired-up core, without any I/O performed yet.
pub struct Components {
    pub pool: ConnectionPool,
    pub breaker: Arc<CircuitBreaker>,
    pub telemetry: Arc<TelemetrySink>,
    pub policy: Arc<ResiliencePolicy>,
    pub cache: CacheFacade,
}

impl Components {
    pub fn new(config: &GatewayConfig, connector: Arc<dyn Connector>) -> Self {
        let endpoint = connector.endpoint().to_string();
        let pool = ConnectionPool::new(connector, config.pool.clone());
        let breaker = Arc::new(CircuitBreaker::new(
            endpoint,
            config.circuit_breaker.clone(),
        ));
        let telemetry = Arc::new(TelemetrySink::new(&config.telemetry));
        let policy = Arc::new(ResiliencePolicy::new(
            pool.clone(),
            Arc::clone(&breaker),
            RetryPolicy::new(config.retries.clone()),
            Arc::clone(&telemetry),
        ));
        let cache = CacheFacade::new(Arc::clone(&policy), config.command.clone());
        Self {
            pool,
            breaker,
            telemetry,
            policy,
            cache,
        }
    }
}

/// Connector for the configured store kind.
pub fn build_connector(config: &StoreConfig) -> Result<Arc<dyn Connector>, StoreError> {
    match config.kind {
        StoreKind::Redis => Ok(Arc::new(RedisConnector::from_config(config)?)),
        StoreKind::Memory => {
            tracing::warn!("Using the in-process memory store; data is not persisted");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

/// A started gateway: pool warm, maintenance running, listener bound.
pub struct Gateway {
    config: GatewayConfig,
    components: Components,
    listener: TcpListener,
    server: HttpServer,
    maintenance: JoinHandle<()>,
}

impl Gateway {
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn components(&self) -> &Components {
        &self.components
    }

    /// Serve until `signal` resolves, then shut down in order.
    pub async fn run<S>(self, shutdown: Shutdown, signal: S) -> Result<(), std::io::Error>
    where
        S: Future<Output = ()>,
    {
        let Gateway {
            config,
            components,
            listener,
            server,
            maintenance,
        } = self;
        let grace = config.shutdown.grace_period();

        let mut server_task = tokio::spawn(server.run(listener, shutdown.subscribe()));

        tokio::select! {
            _ = signal => {
                tracing::info!("Shutdown requested");
            }
            result = &mut server_task => {
                // Server exited on its own; nothing left to drain.
                shutdown.trigger();
                components.pool.shutdown(grace).await;
                return result.map_err(std::io::Error::other)?;
            }
        }

        shutdown.trigger();
        match time::timeout(grace, &mut server_task).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => tracing::error!(error = %e, "HTTP server error during shutdown"),
            Ok(Err(e)) => tracing::error!(error = %e, "HTTP server task failed"),
            Err(_) => {
                tracing::warn!(
                    grace_secs = grace.as_secs(),
                    "In-flight requests did not finish within grace period"
                );
                server_task.abort();
            }
        }

        components.pool.shutdown(grace).await;
        if let Err(e) = maintenance.await {
            tracing::error!(error = %e, "Pool maintenance task failed");
        }

        tracing::info!("Shutdown complete");
        Ok(())
    }
}

/// Start with the connector described by `config.store`.
pub async fn start(
    config: GatewayConfig,
    metrics: Option<PrometheusHandle>,
    shutdown: &Shutdown,
) -> Result<Gateway, StartupError> {
    let connector = build_connector(&config.store)?;
    start_with_connector(config, connector, metrics, shutdown).await
}

/// Start with an explicit connector.
pub async fn start_with_connector(
    config: GatewayConfig,
    connector: Arc<dyn Connector>,
    metrics: Option<PrometheusHandle>,
    shutdown: &Shutdown,
) -> Result<Gateway, StartupError> {
    let components = Components::new(&config, connector);

    tracing::info!(
        endpoint = %components.pool.endpoint(),
        min_size = config.pool.min_size,
        max_size = config.pool.max_size,
        "Warming connection pool"
    );
    components.pool.warm_up().await?;

    let maintenance = tokio::spawn(
        PoolMaintenance::new(components.pool.clone()).run(shutdown.subscribe()),
    );

    let state = AppState::new(components.cache.clone(), metrics, &config);
    let server = HttpServer::new(&config, state);

    let listener = TcpListener::bind(&config.listener.bind_address)
        .await
        .map_err(|source| StartupError::Bind {
            address: config.listener.bind_address.clone(),
            source,
        })?;
    tracing::info!(
        address = %config.listener.bind_address,
        "Listening for connections"
    );

    Ok(Gateway {
        config,
        components,
        listener,
        server,
        maintenance,
    })
}
