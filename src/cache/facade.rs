//! Typed cache operations over the resilience policy.

use futures_util::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::error::CacheError;
use crate::cache::validation::{validate_key, validate_ttl, validate_value};
use crate::config::CommandConfig;
use crate::executor::{OperationOutcome, OperationRequest, Value};
use crate::resilience::ResiliencePolicy;
use crate::store::Command;

/// Per-key result of a batch read.
pub type BatchEntry = (String, Result<Option<String>, CacheError>);

/// The API surface used by request handlers.
#[derive(Clone)]
pub struct CacheFacade {
    policy: Arc<ResiliencePolicy>,
    limits: CommandConfig,
}

impl CacheFacade {
    pub fn new(policy: Arc<ResiliencePolicy>, limits: CommandConfig) -> Self {
        Self { policy, limits }
    }

    pub fn policy(&self) -> &ResiliencePolicy {
        &self.policy
    }

    pub fn max_ttl(&self) -> Duration {
        self.limits.max_ttl()
    }

    fn request(&self, command: Command) -> OperationRequest {
        OperationRequest::new(command, self.limits.timeout())
    }

    fn check_key(&self, key: &str) -> Result<(), CacheError> {
        validate_key(key, self.limits.max_key_bytes)
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.check_key(key)?;
        let outcome = self
            .policy
            .call(self.request(Command::Get { key: key.to_string() }))
            .await;
        match outcome {
            OperationOutcome::Success(Value::Text(value)) => Ok(Some(value)),
            OperationOutcome::NotFound => Ok(None),
            other => Err(CacheError::from_outcome(other)),
        }
    }

    /// Store `value`; `ttl = None` keeps it until deleted.
    pub async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError> {
        self.check_key(key)?;
        validate_value(value, self.limits.max_value_bytes)?;
        if let Some(ttl) = ttl {
            validate_ttl(ttl, self.limits.max_ttl())?;
        }
        let command = Command::Set {
            key: key.to_string(),
            value: value.to_string(),
            ttl,
        };
        match self.policy.call(self.request(command)).await {
            OperationOutcome::Success(Value::Unit) => Ok(()),
            other => Err(CacheError::from_outcome(other)),
        }
    }

    /// Returns false when the key did not exist.
    pub async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        self.check_key(key)?;
        let outcome = self
            .policy
            .call(self.request(Command::Delete { key: key.to_string() }))
            .await;
        match outcome {
            OperationOutcome::Success(Value::Integer(_)) => Ok(true),
            OperationOutcome::NotFound => Ok(false),
            other => Err(CacheError::from_outcome(other)),
        }
    }

    pub async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        self.check_key(key)?;
        let outcome = self
            .policy
            .call(self.request(Command::Exists { key: key.to_string() }))
            .await;
        match outcome {
            OperationOutcome::Success(Value::Bool(exists)) => Ok(exists),
            other => Err(CacheError::from_outcome(other)),
        }
    }

    /// Add `by` to an integer value (missing keys count as 0). Not retried.
    pub async fn increment(&self, key: &str, by: i64) -> Result<i64, CacheError> {
        self.check_key(key)?;
        let command = Command::Increment {
            key: key.to_string(),
            by,
        };
        match self.policy.call(self.request(command)).await {
            OperationOutcome::Success(Value::Integer(n)) => Ok(n),
            other => Err(CacheError::from_outcome(other)),
        }
    }

    /// Set a TTL on an existing key. Returns false when the key does not exist.
    pub async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CacheError> {
        self.check_key(key)?;
        if ttl.is_zero() {
            return Err(CacheError::InvalidTtl("expire requires a positive ttl".into()));
        }
        validate_ttl(ttl, self.limits.max_ttl())?;
        let command = Command::Expire {
            key: key.to_string(),
            ttl,
        };
        match self.policy.call(self.request(command)).await {
            OperationOutcome::Success(Value::Bool(true)) => Ok(true),
            OperationOutcome::NotFound => Ok(false),
            other => Err(CacheError::from_outcome(other)),
        }
    }

    /// Round-trip a PING through the full call path.
    pub async fn ping(&self) -> Result<(), CacheError> {
        match self.policy.call(self.request(Command::Ping)).await {
            OperationOutcome::Success(Value::Unit) => Ok(()),
            other => Err(CacheError::from_outcome(other)),
        }
    }

    /// Read many keys concurrently.
    ///
    /// Duplicate keys are read once. Results follow the first occurrence of
    /// each key; one key failing never affects another.
    pub async fn batch_get(&self, keys: &[String]) -> Vec<BatchEntry> {
        let mut seen = HashSet::new();
        let unique: Vec<&String> = keys.iter().filter(|k| seen.insert(k.as_str())).collect();

        let reads = unique.iter().map(|key| self.get(key));
        let results = join_all(reads).await;

        unique
            .into_iter()
            .cloned()
            .zip(results)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CircuitBreakerConfig, PoolConfig, RetryConfig, TelemetryConfig};
    use crate::pool::ConnectionPool;
    use crate::resilience::{CircuitBreaker, RetryPolicy};
    use crate::store::MemoryStore;
    use crate::telemetry::TelemetrySink;

    fn facade(store: &MemoryStore) -> CacheFacade {
        let pool = ConnectionPool::new(Arc::new(store.clone()), PoolConfig::default());
        let breaker = Arc::new(CircuitBreaker::new("memory", CircuitBreakerConfig::default()));
        let telemetry = Arc::new(TelemetrySink::new(&TelemetryConfig::default()));
        let policy = ResiliencePolicy::new(
            pool,
            breaker,
            RetryPolicy::new(RetryConfig::default()),
            telemetry,
        );
        CacheFacade::new(Arc::new(policy), CommandConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn put_get_delete() {
        let store = MemoryStore::new();
        let cache = facade(&store);

        assert_eq!(cache.get("k").await, Ok(None));
        cache.put("k", "v", None).await.unwrap();
        assert_eq!(cache.get("k").await, Ok(Some("v".into())));
        assert_eq!(cache.exists("k").await, Ok(true));
        assert_eq!(cache.delete("k").await, Ok(true));
        assert_eq!(cache.delete("k").await, Ok(false));
        assert_eq!(cache.ping().await, Ok(()));
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_expiry() {
        let store = MemoryStore::new();
        let cache = facade(&store);

        cache.put("k", "v", Some(Duration::from_secs(10))).await.unwrap();
        assert_eq!(cache.get("k").await, Ok(Some("v".into())));
        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(cache.get("k").await, Ok(None));
    }

    #[tokio::test(start_paused = true)]
    async fn increment_and_expire() {
        let store = MemoryStore::new();
        let cache = facade(&store);

        assert_eq!(cache.increment("n", 2).await, Ok(2));
        assert_eq!(cache.increment("n", -5).await, Ok(-3));
        assert_eq!(cache.expire("n", Duration::from_secs(1)).await, Ok(true));
        assert_eq!(cache.expire("missing", Duration::from_secs(1)).await, Ok(false));
        assert!(matches!(
            cache.expire("n", Duration::ZERO).await,
            Err(CacheError::InvalidTtl(_))
        ));

        cache.put("text", "abc", None).await.unwrap();
        assert!(matches!(
            cache.increment("text", 1).await,
            Err(CacheError::Permanent(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_at_the_limit_is_accepted() {
        let store = MemoryStore::new();
        let cache = facade(&store);
        let max = cache.max_ttl();

        cache.put("k", "v", Some(max)).await.unwrap();
        assert_eq!(cache.expire("k", max).await, Ok(true));
        assert!(matches!(
            cache.put("k", "v", Some(max + Duration::from_secs(1))).await,
            Err(CacheError::InvalidTtl(_))
        ));
        assert_eq!(cache.get("k").await, Ok(Some("v".into())));
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_input_never_reaches_store() {
        let store = MemoryStore::new();
        let cache = facade(&store);

        assert!(matches!(cache.get("").await, Err(CacheError::InvalidKey(_))));
        let huge = "x".repeat(CommandConfig::default().max_value_bytes + 1);
        assert!(matches!(
            cache.put("k", &huge, None).await,
            Err(CacheError::InvalidValue(_))
        ));
        assert!(matches!(
            cache.put("k", "v", Some(Duration::MAX)).await,
            Err(CacheError::InvalidTtl(_))
        ));
        assert!(matches!(
            cache.expire("k", Duration::from_secs(u64::MAX)).await,
            Err(CacheError::InvalidTtl(_))
        ));
        assert_eq!(store.commands(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn batch_dedupes_and_isolates_failures() {
        let store = MemoryStore::new();
        let cache = facade(&store);
        cache.put("a", "1", None).await.unwrap();
        cache.put("c", "3", None).await.unwrap();

        let keys = vec!["a".to_string(), "".to_string(), "b".to_string(), "a".to_string(), "c".to_string()];
        let results = cache.batch_get(&keys).await;

        let keys: Vec<&str> = results.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["a", "", "b", "c"]);
        assert_eq!(results[0].1, Ok(Some("1".into())));
        assert!(matches!(results[1].1, Err(CacheError::InvalidKey(_))));
        assert_eq!(results[2].1, Ok(None));
        assert_eq!(results[3].1, Ok(Some("3".into())));
    }
}
