//! HTTP cache gateway in front of a Redis/Valkey store.

pub mod config;
pub mod store;

// Store access
pub mod executor;
pub mod pool;
pub mod resilience;

// Service surface
pub mod admin;
pub mod cache;
pub mod http;

// Cross-cutting concerns
pub mod lifecycle;
pub mod telemetry;

pub use cache::{CacheError, CacheFacade};
pub use config::schema::GatewayConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
