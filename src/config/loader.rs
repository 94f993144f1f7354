//! Configuration loading from disk and environment.

use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::config::schema::GatewayConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {var}: '{value}'")]
    Env { var: &'static str, value: String },

    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let mut config: GatewayConfig = toml::from_str(&content)?;

    apply_env_overrides(&mut config, |var| std::env::var(var).ok())?;
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Load configuration from an optional file, falling back to defaults,
/// then apply environment overrides and validate.
pub fn load(path: Option<&Path>) -> Result<GatewayConfig, ConfigError> {
    match path {
        Some(path) => load_config(path),
        None => {
            let mut config = GatewayConfig::default();
            apply_env_overrides(&mut config, |var| std::env::var(var).ok())?;
            validate_config(&config).map_err(ConfigError::Validation)?;
            Ok(config)
        }
    }
}

/// Apply environment variable overrides on top of file values.
///
/// `lookup` is injected so tests do not touch the process environment.
pub fn apply_env_overrides<F>(config: &mut GatewayConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(host) = lookup("VALKEY_HOST") {
        config.store.host = host;
    }
    if let Some(port) = parse_var(&lookup, "VALKEY_PORT")? {
        config.store.port = port;
    }
    if let Some(username) = lookup("VALKEY_USERNAME") {
        config.store.username = Some(username);
    }
    if let Some(password) = lookup("VALKEY_PASSWORD") {
        config.store.password = Some(password);
    }
    if let Some(db) = parse_var(&lookup, "VALKEY_DB")? {
        config.store.database = db;
    }
    if let Some(tls) = parse_var(&lookup, "VALKEY_TLS")? {
        config.store.tls = tls;
    }
    if let Some(min) = parse_var(&lookup, "VALKEY_POOL_MIN")? {
        config.pool.min_size = min;
    }
    if let Some(max) = parse_var(&lookup, "VALKEY_POOL_MAX")? {
        config.pool.max_size = max;
    }
    if let Some(timeout) = parse_var(&lookup, "VALKEY_TIMEOUT_MS")? {
        config.command.timeout_ms = timeout;
    }
    if let Some(bind) = lookup("GATEWAY_BIND") {
        config.listener.bind_address = bind;
    }
    if let Some(key) = lookup("GATEWAY_ADMIN_KEY") {
        config.admin.api_key = key;
    }
    if let Some(level) = lookup("GATEWAY_LOG_LEVEL") {
        config.telemetry.log_level = level;
    }
    Ok(())
}

fn parse_var<F, T>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Env { var, value }),
    }
}
