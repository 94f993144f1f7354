//! Cache, health and metrics endpoints.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::cache::{parse_ttl_secs, CacheError};
use crate::http::response::{status_for, ApiError};
use crate::http::server::AppState;

#[derive(Debug, Deserialize)]
pub struct PutBody {
    pub value: String,
    #[serde(default)]
    pub ttl_secs: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TtlQuery {
    pub ttl_secs: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct IncrBody {
    #[serde(default = "default_increment")]
    pub by: i64,
}

fn default_increment() -> i64 {
    1
}

#[derive(Debug, Deserialize)]
pub struct ExpireBody {
    pub ttl_secs: i64,
}

#[derive(Debug, Deserialize)]
pub struct BatchGetBody {
    pub keys: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct BatchItem {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub found: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

fn parse_json<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(e.to_string()))
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/json"))
}

/// `GET /api/v1/cache/{key}`
pub async fn get_value(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Response, ApiError> {
    match state.cache.get(&key).await? {
        Some(value) => {
            tracing::debug!(key = %key, "Value found");
            Ok((StatusCode::OK, value).into_response())
        }
        None => Err(ApiError::NotFound(format!("key '{key}' not found"))),
    }
}

/// `PUT /api/v1/cache/{key}`
///
/// JSON bodies are `{value, ttl_secs?}`; any other body is stored verbatim
/// with an optional `?ttl_secs=` query parameter.
pub async fn put_value(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<TtlQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let (value, ttl_secs) = if is_json(&headers) {
        let body: PutBody = parse_json(&body)?;
        (body.value, body.ttl_secs)
    } else {
        let value = String::from_utf8(body.to_vec())
            .map_err(|_| ApiError::BadRequest("value must be UTF-8".into()))?;
        (value, query.ttl_secs)
    };
    let ttl = parse_ttl_secs(ttl_secs.unwrap_or(0), state.cache.max_ttl())?;

    state.cache.put(&key, &value, ttl).await?;
    tracing::debug!(key = %key, ttl_secs = ?ttl.map(|t| t.as_secs()), "Value set");
    Ok((StatusCode::CREATED, "Value set successfully").into_response())
}

/// `DELETE /api/v1/cache/{key}`
pub async fn delete_value(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Response, ApiError> {
    if state.cache.delete(&key).await? {
        Ok((StatusCode::OK, "Value deleted successfully").into_response())
    } else {
        Err(ApiError::NotFound(format!("key '{key}' not found")))
    }
}

/// `GET /api/v1/cache/{key}/exists`
pub async fn exists(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let exists = state.cache.exists(&key).await?;
    Ok(Json(serde_json::json!({ "key": key, "exists": exists })))
}

/// `POST /api/v1/cache/{key}/incr`
pub async fn increment(
    State(state): State<AppState>,
    Path(key): Path<String>,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let by = if body.is_empty() {
        default_increment()
    } else {
        parse_json::<IncrBody>(&body)?.by
    };
    let value = state.cache.increment(&key, by).await?;
    Ok(Json(serde_json::json!({ "key": key, "value": value })))
}

/// `POST /api/v1/cache/{key}/expire`
pub async fn expire(
    State(state): State<AppState>,
    Path(key): Path<String>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let body: ExpireBody = parse_json(&body)?;
    let ttl = parse_ttl_secs(body.ttl_secs, state.cache.max_ttl())?
        .ok_or_else(|| CacheError::InvalidTtl("expire requires ttl_secs > 0".into()))?;

    if state.cache.expire(&key, ttl).await? {
        Ok(Json(serde_json::json!({ "key": key, "ttl_secs": ttl.as_secs() })).into_response())
    } else {
        Err(ApiError::NotFound(format!("key '{key}' not found")))
    }
}

/// `POST /api/v1/batch/get`
pub async fn batch_get(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let body: BatchGetBody = parse_json(&body)?;
    let results = state.cache.batch_get(&body.keys).await;

    let items: Vec<BatchItem> = results
        .into_iter()
        .map(|(key, result)| match result {
            Ok(value) => BatchItem {
                key,
                found: Some(value.is_some()),
                value,
                error: None,
                status: None,
            },
            Err(err) => BatchItem {
                key,
                found: None,
                value: None,
                error: Some(err.code()),
                status: Some(status_for(&err).as_u16()),
            },
        })
        .collect();

    Ok(Json(serde_json::json!({ "results": items })))
}

/// `GET /health/live`
pub async fn live() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "UP" }))
}

/// `GET /health/ready`: a PING through the full call path, then the health flags.
pub async fn ready(State(state): State<AppState>) -> Response {
    // The PING always goes through the policy so an Open breaker past its
    // cooldown gets a probe even when no other traffic arrives.
    let ping = state.cache.ping().await;

    let policy = state.cache.policy();
    let pool_healthy = policy.pool().is_healthy();
    let circuit = policy.breaker().state();
    let telemetry_healthy = policy.telemetry().is_healthy();

    let up = ping.is_ok() && policy.is_ready();
    let body = serde_json::json!({
        "status": if up { "UP" } else { "DOWN" },
        "endpoint": policy.pool().endpoint(),
        "pool_healthy": pool_healthy,
        "circuit": circuit,
        "telemetry_healthy": telemetry_healthy,
        "ping": ping.as_ref().map(|_| "PONG").unwrap_or_else(|e| e.code()),
    });
    let status = if up {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body)).into_response()
}

/// `GET /metrics`
pub async fn metrics(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics disabled").into_response(),
    }
}
