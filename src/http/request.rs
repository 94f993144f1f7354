//! Request identification and per-request telemetry.
//!
//! # Responsibilities
//! - Build the request span (method, path, request id, W3C trace ids)
//! - Count requests by matched route and status
//!
//! # Design Decisions
//! - The request id is set by `SetRequestIdLayer` before the span is built
//! - Routes are labelled by their pattern, never by the raw path (key cardinality)

use axum::{
    body::Body,
    extract::MatchedPath,
    http::{HeaderName, Request},
    middleware::Next,
    response::Response,
};
use tracing::Span;

use crate::telemetry::{metrics, tracing::TraceContext};

pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");
pub const TRACEPARENT: &str = "traceparent";

/// Span for one inbound request; store call spans nest under it.
pub fn make_span<B>(request: &Request<B>) -> Span {
    let request_id = request
        .headers()
        .get(&X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown");

    let span = tracing::info_span!(
        "http.request",
        method = %request.method(),
        path = %request.uri().path(),
        request_id = %request_id,
        trace_id = tracing::field::Empty,
        parent_span_id = tracing::field::Empty,
    );

    if let Some(ctx) = request
        .headers()
        .get(TRACEPARENT)
        .and_then(|v| v.to_str().ok())
        .and_then(TraceContext::parse)
    {
        span.record("trace_id", ctx.trace_id.as_str());
        span.record("parent_span_id", ctx.parent_id.as_str());
    }
    span
}

/// Count every request by method, route pattern and status.
pub async fn track_requests(request: Request<Body>, next: Next) -> Response {
    let method = request.method().to_string();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let response = next.run(request).await;
    metrics::record_http_request(&method, &route, response.status().as_u16());
    response
}
