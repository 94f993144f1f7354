use axum::{extract::State, Json};
use serde::Serialize;

use crate::http::server::AppState;
use crate::pool::PoolStatus;
use crate::resilience::{BreakerSnapshot, CircuitState};
use crate::telemetry::TelemetrySnapshot;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub uptime_secs: u64,
    pub endpoint: String,
    pub circuit: CircuitState,
    pub pool_open: usize,
    pub pool_leased: usize,
    pub telemetry_healthy: bool,
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    let policy = state.cache.policy();
    let pool = policy.pool().status();
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: if policy.is_ready() { "operational" } else { "degraded" },
        uptime_secs: state.started_at.elapsed().as_secs(),
        endpoint: pool.endpoint.clone(),
        circuit: policy.breaker().state(),
        pool_open: pool.open,
        pool_leased: pool.leased,
        telemetry_healthy: policy.telemetry().is_healthy(),
    })
}

pub async fn get_pool(State(state): State<AppState>) -> Json<PoolStatus> {
    Json(state.cache.policy().pool().status())
}

pub async fn get_circuit(State(state): State<AppState>) -> Json<BreakerSnapshot> {
    Json(state.cache.policy().breaker().snapshot())
}

/// Force the breaker closed.
pub async fn reset_circuit(State(state): State<AppState>) -> Json<BreakerSnapshot> {
    let breaker = state.cache.policy().breaker();
    tracing::warn!(endpoint = %breaker.endpoint(), "Circuit breaker reset by admin");
    breaker.reset();
    Json(breaker.snapshot())
}

pub async fn get_telemetry(State(state): State<AppState>) -> Json<TelemetrySnapshot> {
    Json(state.cache.policy().telemetry().snapshot())
}
