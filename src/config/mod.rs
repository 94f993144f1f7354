//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML, optional)
//!     → loader.rs (parse & deserialize, defaults for missing fields)
//!     → loader.rs (environment overrides: VALKEY_*, GATEWAY_*)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → handed to subsystems at startup
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Secrets (store password, admin key) can come from the environment only
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load, load_config, ConfigError};
pub use schema::{
    AdminConfig, CircuitBreakerConfig, CommandConfig, GatewayConfig, ListenerConfig, LogFormat,
    PoolConfig, RetryConfig, ShutdownConfig, StoreConfig, StoreKind, TelemetryConfig,
};
