//! Redis/Valkey connector.
//!
//! # Responsibilities
//! - Build the endpoint URL from configuration (credentials never logged)
//! - Open one multiplexed RESP connection per pooled slot
//! - Translate `redis::Value` into the layer's raw `Reply`

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use url::Url;

use crate::config::StoreConfig;
use crate::store::{Command, Connector, Reply, StoreConnection, StoreError, StoreErrorKind};

/// Connector for a Redis-protocol endpoint.
pub struct RedisConnector {
    client: redis::Client,
    endpoint: String,
}

impl RedisConnector {
    /// Create a connector from store configuration. Does not connect.
    pub fn from_config(config: &StoreConfig) -> Result<Self, StoreError> {
        let url = connection_url(config)?;
        let client = redis::Client::open(url.as_str()).map_err(|e| {
            StoreError::new(StoreErrorKind::Server, format!("invalid store configuration: {}", e))
        })?;

        let endpoint = format!("{}:{}", config.host, config.port);
        tracing::debug!(url = %redact(&url), "Redis connector created");

        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl Connector for RedisConnector {
    async fn connect(&self) -> Result<Box<dyn StoreConnection>, StoreError> {
        let conn = self.client.get_multiplexed_async_connection().await?;
        Ok(Box::new(RedisConnection { conn }))
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

struct RedisConnection {
    conn: MultiplexedConnection,
}

#[async_trait]
impl StoreConnection for RedisConnection {
    async fn execute(&mut self, command: &Command) -> Result<Reply, StoreError> {
        let value: redis::Value = command.to_redis().query_async(&mut self.conn).await?;
        Ok(into_reply(value))
    }
}

fn into_reply(value: redis::Value) -> Reply {
    match value {
        redis::Value::Nil => Reply::Nil,
        redis::Value::Okay => Reply::Ok,
        redis::Value::Int(n) => Reply::Integer(n),
        redis::Value::BulkString(bytes) => Reply::Bulk(bytes),
        redis::Value::SimpleString(status) => Reply::Status(status),
        other => Reply::Unexpected(format!("{:?}", other)),
    }
}

/// Build `redis://` (or `rediss://`) URL with credentials and database.
fn connection_url(config: &StoreConfig) -> Result<Url, StoreError> {
    let scheme = if config.tls { "rediss" } else { "redis" };
    let mut url = Url::parse(&format!("{}://{}:{}/{}", scheme, config.host, config.port, config.database))
        .map_err(|e| StoreError::new(StoreErrorKind::Server, format!("invalid store address: {}", e)))?;

    if let Some(username) = config.username.as_deref().filter(|u| !u.is_empty()) {
        let _ = url.set_username(username);
    }
    if let Some(password) = config.password.as_deref().filter(|p| !p.is_empty()) {
        let _ = url.set_password(Some(password));
    }
    Ok(url)
}

/// Strip the password from a URL for logging.
fn redact(url: &Url) -> String {
    let mut redacted = url.clone();
    if redacted.password().is_some() {
        let _ = redacted.set_password(Some("***"));
    }
    redacted.to_string()
}
