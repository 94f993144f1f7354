//! Telemetry subsystem.
//!
//! # Data Flow
//! ```text
//! Every store call attempt:
//!     → sink.rs (outcome counters, latency histogram, recent-error window)
//!     → metrics facade (Prometheus exporter installed by metrics.rs)
//!     → span `store.call` (child of the HTTP request span, see tracing.rs)
//!
//! Consumers:
//!     → /metrics (Prometheus scrape)
//!     → /health/ready (sink.is_healthy)
//!     → /admin/telemetry (sink.snapshot)
//! ```
//!
//! # Design Decisions
//! - Recording never fails or blocks the caller; internal faults are counted
//! - Structured logging (JSON) for machine parsing, pretty for development
//! - Request ID and trace ids flow through spans, not function arguments

pub mod logging;
pub mod metrics;
pub mod sink;
pub mod tracing;

pub use sink::{CommandSnapshot, LatencySnapshot, TelemetrySink, TelemetrySnapshot};
