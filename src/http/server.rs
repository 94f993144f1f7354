//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router with cache, health, metrics and admin routes
//! - Wire up middleware (request id, tracing, timeout, body limit, metrics)
//! - Serve on a listener until the shutdown broadcast fires

use axum::{
    body::Body,
    http::{Request, StatusCode},
    middleware,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::admin::setup_admin_router;
use crate::cache::CacheFacade;
use crate::config::GatewayConfig;
use crate::http::{handlers, request};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub cache: CacheFacade,
    pub metrics: Option<PrometheusHandle>,
    pub admin_api_key: Arc<str>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(cache: CacheFacade, metrics: Option<PrometheusHandle>, config: &GatewayConfig) -> Self {
        Self {
            cache,
            metrics,
            admin_api_key: Arc::from(config.admin.api_key.as_str()),
            started_at: Instant::now(),
        }
    }
}

/// HTTP front end for the cache.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(config: &GatewayConfig, state: AppState) -> Self {
        Self {
            router: Self::build_router(config, state),
        }
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(config: &GatewayConfig, state: AppState) -> Router {
        let mut router = Router::new()
            .route(
                "/api/v1/cache/{key}",
                get(handlers::get_value)
                    .put(handlers::put_value)
                    .delete(handlers::delete_value),
            )
            .route("/api/v1/cache/{key}/exists", get(handlers::exists))
            .route("/api/v1/cache/{key}/incr", post(handlers::increment))
            .route("/api/v1/cache/{key}/expire", post(handlers::expire))
            .route("/api/v1/batch/get", post(handlers::batch_get))
            .route("/health/live", get(handlers::live))
            .route("/health/ready", get(handlers::ready))
            .route("/metrics", get(handlers::metrics))
            .with_state(state.clone());

        if config.admin.enabled {
            router = router.merge(setup_admin_router(state));
        } else {
            tracing::info!("Admin API disabled");
        }

        let request_timeout = Duration::from_millis(config.listener.request_timeout_ms);
        router
            .layer(middleware::from_fn(request::track_requests))
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                    .layer(
                        TraceLayer::new_for_http()
                            .make_span_with(|req: &Request<Body>| request::make_span(req)),
                    )
                    .layer(PropagateRequestIdLayer::x_request_id())
                    // The limit's response body has no Default, so it stays outside the timeout.
                    .layer(RequestBodyLimitLayer::new(config.listener.max_body_size))
                    .layer(TimeoutLayer::with_status_code(
                        StatusCode::GATEWAY_TIMEOUT,
                        request_timeout,
                    )),
            )
    }

    /// The fully layered router, for serving or in-process tests.
    pub fn into_router(self) -> Router {
        self.router
    }

    /// Serve until a shutdown signal is broadcast, then drain in-flight requests.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("HTTP server received shutdown signal, draining");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}
