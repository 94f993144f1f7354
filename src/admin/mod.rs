//! Admin API.
//!
//! Read-only views of pool, breaker and telemetry state plus a breaker
//! reset, all behind a bearer token. Mounted only when `admin.enabled`.

pub mod auth;
pub mod handlers;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::http::server::AppState;

pub fn setup_admin_router(state: AppState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/pool", get(get_pool))
        .route("/admin/circuit", get(get_circuit))
        .route("/admin/circuit/reset", post(reset_circuit))
        .route("/admin/telemetry", get(get_telemetry))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}
