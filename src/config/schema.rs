//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the cache gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// HTTP listener configuration.
    pub listener: ListenerConfig,

    /// Key-value store endpoint.
    pub store: StoreConfig,

    /// Connection pool sizing and timeouts.
    pub pool: PoolConfig,

    /// Per-command limits and deadlines.
    pub command: CommandConfig,

    /// Retry configuration.
    pub retries: RetryConfig,

    /// Circuit breaker thresholds.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Logging, metrics and health signal settings.
    pub telemetry: TelemetryConfig,

    /// Admin API settings.
    pub admin: AdminConfig,

    /// Graceful shutdown settings.
    pub shutdown: ShutdownConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Whole-request timeout enforced by the HTTP layer, in milliseconds.
    pub request_timeout_ms: u64,

    /// Maximum request body size in bytes.
    pub max_body_size: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            request_timeout_ms: 10_000,
            max_body_size: 1024 * 1024,
        }
    }
}

/// Which store implementation backs the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// Redis/Valkey over the network.
    Redis,
    /// In-process store, for local runs.
    Memory,
}

/// Store endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    pub kind: StoreKind,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    /// Auth token. Prefer the `VALKEY_PASSWORD` environment variable.
    pub password: Option<String>,
    pub database: u8,
    /// Use TLS (`rediss://`).
    pub tls: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::Redis,
            host: "127.0.0.1".to_string(),
            port: 6379,
            username: None,
            password: None,
            database: 0,
            tls: false,
        }
    }
}

/// Connection pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Connections established at startup and kept alive.
    pub min_size: usize,

    /// Hard cap on live connections (and on concurrent leases).
    pub max_size: usize,

    /// How long `acquire` waits for a free connection, in milliseconds.
    pub acquire_timeout_ms: u64,

    /// Maximum lifetime of a single lease, in milliseconds.
    pub lease_timeout_ms: u64,

    /// Idle connections older than this are evicted (above `min_size`).
    pub idle_timeout_secs: u64,

    /// Interval between background health checks.
    pub health_check_interval_secs: u64,

    /// Deadline for a health-check PING, in milliseconds.
    pub health_check_timeout_ms: u64,

    /// Deadline for establishing one connection, in milliseconds.
    pub connect_timeout_ms: u64,

    /// Connection attempts before the pool reports itself unhealthy.
    pub connect_attempts: u32,

    /// Base delay for connection backoff in milliseconds.
    pub connect_backoff_base_ms: u64,

    /// Maximum delay for connection backoff in milliseconds.
    pub connect_backoff_max_ms: u64,
}

impl PoolConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn lease_timeout(&self) -> Duration {
        Duration::from_millis(self.lease_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_millis(self.health_check_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_size: 2,
            max_size: 16,
            acquire_timeout_ms: 500,
            lease_timeout_ms: 5_000,
            idle_timeout_secs: 300,
            health_check_interval_secs: 15,
            health_check_timeout_ms: 500,
            connect_timeout_ms: 2_000,
            connect_attempts: 3,
            connect_backoff_base_ms: 100,
            connect_backoff_max_ms: 2_000,
        }
    }
}

/// Per-command configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CommandConfig {
    /// Deadline for one physical store call, in milliseconds.
    pub timeout_ms: u64,

    /// Maximum key length in bytes.
    pub max_key_bytes: usize,

    /// Maximum value length in bytes.
    pub max_value_bytes: usize,

    /// Longest TTL a caller may set, in seconds.
    pub max_ttl_secs: u64,
}

impl CommandConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn max_ttl(&self) -> Duration {
        Duration::from_secs(self.max_ttl_secs)
    }
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 1_000,
            max_key_bytes: 512,
            max_value_bytes: 512 * 1024,
            max_ttl_secs: 365 * 24 * 60 * 60,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Enable retries.
    pub enabled: bool,

    /// Retries after the first attempt (idempotent commands only).
    pub max_retries: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 2,
            base_delay_ms: 50,
            max_delay_ms: 1_000,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Enable the breaker. When disabled it never leaves Closed.
    pub enabled: bool,

    /// Number of most recent calls kept in the rolling window.
    pub window_size: usize,

    /// Calls older than this drop out of the window.
    pub window_secs: u64,

    /// Calls required in the window before the rate is evaluated.
    pub minimum_calls: usize,

    /// Failure rate (0.0, 1.0] that trips the breaker.
    pub failure_rate_threshold: f64,

    /// Time spent Open before probing, in milliseconds.
    pub cooldown_ms: u64,

    /// Concurrent probe calls admitted while HalfOpen.
    pub half_open_max_probes: u32,
}

impl CircuitBreakerConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_size: 20,
            window_secs: 30,
            minimum_calls: 10,
            failure_rate_threshold: 0.5,
            cooldown_ms: 5_000,
            half_open_max_probes: 1,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` wins.
    pub log_level: String,

    pub log_format: LogFormat,

    /// Expose `/metrics`.
    pub metrics_enabled: bool,

    /// Outcomes kept for the health signal.
    pub health_window: usize,

    /// Error rate at or above which the service reports unhealthy.
    pub unhealthy_error_rate: f64,

    /// Outcomes required before the error rate is trusted.
    pub health_min_samples: usize,

    /// Outcomes older than this drop out of the health window.
    pub health_window_secs: u64,
}

impl TelemetryConfig {
    pub fn health_window_age(&self) -> Duration {
        Duration::from_secs(self.health_window_secs)
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
            health_window: 100,
            unhealthy_error_rate: 0.5,
            health_min_samples: 10,
            health_window_secs: 60,
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Mount `/admin/*`.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
        }
    }
}

/// Shutdown configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// How long outstanding leases may run after shutdown starts.
    pub grace_period_secs: u64,
}

impl ShutdownConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: 10,
        }
    }
}
