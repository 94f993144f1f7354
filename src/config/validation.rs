//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, sizes ordered, rates in range)
//! - Check the listener address parses
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;
use thiserror::Error;

use crate::config::schema::{GatewayConfig, StoreKind};

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }
    if config.listener.request_timeout_ms == 0 {
        errors.push(ValidationError::new("listener.request_timeout_ms", "must be > 0"));
    }

    if config.store.kind == StoreKind::Redis {
        if config.store.host.trim().is_empty() {
            errors.push(ValidationError::new("store.host", "must not be empty"));
        }
        if config.store.port == 0 {
            errors.push(ValidationError::new("store.port", "must be > 0"));
        }
    }

    let pool = &config.pool;
    if pool.max_size == 0 {
        errors.push(ValidationError::new("pool.max_size", "must be >= 1"));
    }
    if pool.min_size > pool.max_size {
        errors.push(ValidationError::new(
            "pool.min_size",
            format!("{} exceeds pool.max_size {}", pool.min_size, pool.max_size),
        ));
    }
    for (field, value) in [
        ("pool.acquire_timeout_ms", pool.acquire_timeout_ms),
        ("pool.lease_timeout_ms", pool.lease_timeout_ms),
        ("pool.health_check_interval_secs", pool.health_check_interval_secs),
        ("pool.health_check_timeout_ms", pool.health_check_timeout_ms),
        ("pool.connect_timeout_ms", pool.connect_timeout_ms),
        ("command.timeout_ms", config.command.timeout_ms),
        ("command.max_ttl_secs", config.command.max_ttl_secs),
        ("circuit_breaker.cooldown_ms", config.circuit_breaker.cooldown_ms),
        ("circuit_breaker.window_secs", config.circuit_breaker.window_secs),
    ] {
        if value == 0 {
            errors.push(ValidationError::new(field, "must be > 0"));
        }
    }
    if pool.connect_attempts == 0 {
        errors.push(ValidationError::new("pool.connect_attempts", "must be >= 1"));
    }
    if pool.connect_backoff_base_ms > pool.connect_backoff_max_ms {
        errors.push(ValidationError::new(
            "pool.connect_backoff_base_ms",
            "must not exceed pool.connect_backoff_max_ms",
        ));
    }

    if config.command.max_key_bytes == 0 {
        errors.push(ValidationError::new("command.max_key_bytes", "must be >= 1"));
    }

    if config.retries.base_delay_ms > config.retries.max_delay_ms {
        errors.push(ValidationError::new(
            "retries.base_delay_ms",
            "must not exceed retries.max_delay_ms",
        ));
    }

    let breaker = &config.circuit_breaker;
    if breaker.window_size == 0 {
        errors.push(ValidationError::new("circuit_breaker.window_size", "must be >= 1"));
    }
    if breaker.minimum_calls == 0 || breaker.minimum_calls > breaker.window_size {
        errors.push(ValidationError::new(
            "circuit_breaker.minimum_calls",
            format!("must be between 1 and window_size ({})", breaker.window_size),
        ));
    }
    if !(breaker.failure_rate_threshold > 0.0 && breaker.failure_rate_threshold <= 1.0) {
        errors.push(ValidationError::new(
            "circuit_breaker.failure_rate_threshold",
            "must be in (0.0, 1.0]",
        ));
    }
    if breaker.half_open_max_probes == 0 {
        errors.push(ValidationError::new("circuit_breaker.half_open_max_probes", "must be >= 1"));
    }

    let telemetry = &config.telemetry;
    if telemetry.health_window == 0 {
        errors.push(ValidationError::new("telemetry.health_window", "must be >= 1"));
    }
    if telemetry.health_window_secs == 0 {
        errors.push(ValidationError::new("telemetry.health_window_secs", "must be >= 1"));
    }
    if !(telemetry.unhealthy_error_rate > 0.0 && telemetry.unhealthy_error_rate <= 1.0) {
        errors.push(ValidationError::new(
            "telemetry.unhealthy_error_rate",
            "must be in (0.0, 1.0]",
        ));
    }

    if config.admin.enabled && config.admin.api_key.trim().is_empty() {
        errors.push(ValidationError::new("admin.api_key", "required when admin is enabled"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
