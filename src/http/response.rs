//! Error responses.
//!
//! # Design Decisions
//! - Every error body is JSON `{error, message, outcome_unknown?}`
//! - Validation → 400, missing key → 404, overload/breaker/shutdown → 503,
//!   timeout → 504, other store failures → 502

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::cache::CacheError;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome_unknown: Option<bool>,
}

/// Anything a handler can fail with.
#[derive(Debug)]
pub enum ApiError {
    Cache(CacheError),
    BadRequest(String),
    NotFound(String),
}

impl From<CacheError> for ApiError {
    fn from(err: CacheError) -> Self {
        ApiError::Cache(err)
    }
}

/// HTTP status for a cache error.
pub fn status_for(err: &CacheError) -> StatusCode {
    match err {
        CacheError::InvalidKey(_) | CacheError::InvalidValue(_) | CacheError::InvalidTtl(_) => {
            StatusCode::BAD_REQUEST
        }
        CacheError::PoolExhausted
        | CacheError::CircuitOpen
        | CacheError::ShuttingDown
        | CacheError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        CacheError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        CacheError::Transient(_) | CacheError::Permanent(_) => StatusCode::BAD_GATEWAY,
    }
}

impl ApiError {
    fn parts(&self) -> (StatusCode, ErrorBody) {
        match self {
            ApiError::Cache(err) => (
                status_for(err),
                ErrorBody {
                    error: err.code(),
                    message: err.to_string(),
                    outcome_unknown: match err {
                        CacheError::Timeout { outcome_unknown } => Some(*outcome_unknown),
                        _ => None,
                    },
                },
            ),
            ApiError::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    error: "invalid_body",
                    message: message.clone(),
                    outcome_unknown: None,
                },
            ),
            ApiError::NotFound(message) => (
                StatusCode::NOT_FOUND,
                ErrorBody {
                    error: "not_found",
                    message: message.clone(),
                    outcome_unknown: None,
                },
            ),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = self.parts();
        if status.is_server_error() {
            tracing::warn!(status = status.as_u16(), error = body.error, message = %body.message, "Request failed");
        }
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(status_for(&CacheError::InvalidKey("".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(&CacheError::PoolExhausted), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(status_for(&CacheError::CircuitOpen), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            status_for(&CacheError::Timeout { outcome_unknown: false }),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(status_for(&CacheError::Transient("io".into())), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn timeout_body_carries_outcome_flag() {
        let (_, body) = ApiError::Cache(CacheError::Timeout { outcome_unknown: true }).parts();
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["error"], "timeout");
        assert_eq!(json["outcome_unknown"], true);

        let (_, body) = ApiError::NotFound("key not found".into()).parts();
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("outcome_unknown").is_none());
    }
}
