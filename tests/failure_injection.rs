//! Failure injection tests for the cache core.

use std::time::Duration;
use tokio::time;

use valkey_gateway::cache::CacheError;
use valkey_gateway::executor::{OperationOutcome, OperationRequest, OutcomeClass};
use valkey_gateway::resilience::CircuitState;
use valkey_gateway::store::{Command, CommandKind, Fault};

mod common;

#[tokio::test(start_paused = true)]
async fn test_pool_exhaustion_fails_fast() {
    let mut config = common::test_config();
    config.pool.min_size = 0;
    config.pool.max_size = 1;
    config.pool.acquire_timeout_ms = 50;
    config.retries.enabled = false;
    let (store, components) = common::components(&config);
    store.set_latency(Duration::from_millis(200));

    let cache = components.cache.clone();
    let slow = tokio::spawn(async move { cache.get("held").await });
    time::sleep(Duration::from_millis(10)).await;

    let started = time::Instant::now();
    let result = components.cache.get("other").await;
    assert_eq!(result, Err(CacheError::PoolExhausted));
    assert!(started.elapsed() < Duration::from_millis(100));

    assert_eq!(slow.await.unwrap(), Ok(None));
    let status = components.pool.status();
    assert_eq!(status.exhausted, 1);
    assert_eq!(status.leased, 0);
    assert_eq!(store.commands(), 1);
}

#[tokio::test]
async fn test_breaker_opens_and_fails_fast() {
    let mut config = common::test_config();
    config.retries.enabled = false;
    config.circuit_breaker.window_size = 5;
    config.circuit_breaker.minimum_calls = 5;
    config.circuit_breaker.failure_rate_threshold = 0.6;
    config.circuit_breaker.cooldown_ms = 60_000;
    let (store, components) = common::components(&config);
    let cache = &components.cache;

    cache.put("a", "1", None).await.unwrap();
    cache.put("b", "2", None).await.unwrap();
    store.inject_many(Fault::Transient, 3);
    for _ in 0..3 {
        assert!(matches!(cache.get("a").await, Err(CacheError::Transient(_))));
    }
    assert_eq!(components.breaker.state(), CircuitState::Open);

    let commands = store.commands();
    let acquired = components.pool.status().acquired;
    assert_eq!(cache.get("a").await, Err(CacheError::CircuitOpen));
    assert_eq!(cache.put("c", "3", None).await, Err(CacheError::CircuitOpen));

    // Rejected calls never reach the pool or the store.
    assert_eq!(store.commands(), commands);
    assert_eq!(components.pool.status().acquired, acquired);
    assert_eq!(components.breaker.snapshot().rejected, 2);
    assert!(!components.policy.is_ready());
}

#[tokio::test(start_paused = true)]
async fn test_breaker_recovers_through_half_open() {
    let mut config = common::test_config();
    config.retries.enabled = false;
    config.circuit_breaker.window_size = 4;
    config.circuit_breaker.minimum_calls = 2;
    config.circuit_breaker.failure_rate_threshold = 0.5;
    config.circuit_breaker.cooldown_ms = 100;
    let (store, components) = common::components(&config);

    store.inject_many(Fault::Transient, 2);
    let _ = components.cache.get("k").await;
    let _ = components.cache.get("k").await;
    assert_eq!(components.breaker.state(), CircuitState::Open);

    time::sleep(Duration::from_millis(150)).await;
    assert_eq!(components.cache.get("k").await, Ok(None));
    assert_eq!(components.breaker.state(), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_failed_probe_reopens_breaker() {
    let mut config = common::test_config();
    config.retries.enabled = false;
    config.circuit_breaker.window_size = 4;
    config.circuit_breaker.minimum_calls = 2;
    config.circuit_breaker.cooldown_ms = 100;
    let (store, components) = common::components(&config);

    store.inject_many(Fault::Transient, 3);
    let _ = components.cache.get("k").await;
    let _ = components.cache.get("k").await;
    time::sleep(Duration::from_millis(150)).await;

    assert!(matches!(components.cache.get("k").await, Err(CacheError::Transient(_))));
    assert_eq!(components.breaker.state(), CircuitState::Open);
}

#[tokio::test(start_paused = true)]
async fn test_retries_are_bounded() {
    let mut config = common::test_config();
    config.retries.max_retries = 2;
    config.circuit_breaker.minimum_calls = 100;
    let (store, components) = common::components(&config);

    store.inject_many(Fault::Transient, 5);
    assert!(matches!(components.cache.get("k").await, Err(CacheError::Transient(_))));
    assert_eq!(store.commands(), 3);

    let snapshot = components.telemetry.snapshot();
    let get = snapshot.command("memory", CommandKind::Get).unwrap();
    assert_eq!(get.outcome(OutcomeClass::Transient), 3);
}

#[tokio::test(start_paused = true)]
async fn test_retry_recovers_from_single_fault() {
    let mut config = common::test_config();
    config.retries.max_retries = 2;
    let (store, components) = common::components(&config);

    components.cache.put("k", "v", None).await.unwrap();
    store.inject(Fault::Transient);
    assert_eq!(components.cache.get("k").await, Ok(Some("v".into())));
    assert_eq!(store.commands(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_non_idempotent_commands_are_not_retried() {
    let mut config = common::test_config();
    config.retries.max_retries = 3;
    let (store, components) = common::components(&config);

    store.inject_many(Fault::Transient, 3);
    assert!(matches!(
        components.cache.increment("counter", 1).await,
        Err(CacheError::Transient(_))
    ));
    assert_eq!(store.commands(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_server_errors_are_permanent_and_keep_breaker_closed() {
    let mut config = common::test_config();
    config.circuit_breaker.minimum_calls = 2;
    let (store, components) = common::components(&config);

    store.inject_many(Fault::Server("ERR wrong kind of value".into()), 3);
    for _ in 0..3 {
        assert!(matches!(components.cache.get("k").await, Err(CacheError::Permanent(_))));
    }
    assert_eq!(store.commands(), 3);
    assert_eq!(components.breaker.state(), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_timeouts_report_unknown_outcome_for_writes() {
    let mut config = common::test_config();
    config.retries.enabled = false;
    config.command.timeout_ms = 100;
    let (store, components) = common::components(&config);

    store.inject(Fault::Hang);
    assert_eq!(
        components.cache.get("k").await,
        Err(CacheError::Timeout { outcome_unknown: false })
    );
    // The timed-out connection is re-validated before reuse.
    assert_eq!(components.cache.get("k").await, Ok(None));

    store.inject(Fault::Hang);
    assert_eq!(
        components.cache.increment("n", 1).await,
        Err(CacheError::Timeout { outcome_unknown: true })
    );
    assert_eq!(components.pool.status().leased, 0);
}

#[tokio::test(start_paused = true)]
async fn test_lease_balance_under_cancellation() {
    let mut config = common::test_config();
    config.pool.min_size = 0;
    config.pool.max_size = 3;
    let (store, components) = common::components(&config);
    store.set_latency(Duration::from_millis(500));

    let mut tasks = Vec::new();
    for i in 0..6 {
        let cache = components.cache.clone();
        tasks.push(tokio::spawn(async move {
            time::timeout(Duration::from_millis(50), cache.get(&format!("k{i}"))).await
        }));
    }
    for task in tasks {
        assert!(task.await.unwrap().is_err());
    }

    let request = OperationRequest::new(Command::Get { key: "k".into() }, Duration::from_secs(1));
    let outcome = components
        .policy
        .call_with_cancel(request, time::sleep(Duration::from_millis(20)))
        .await;
    assert_eq!(outcome, OperationOutcome::Cancelled);

    let status = components.pool.status();
    assert_eq!(status.leased, 0);
    assert_eq!(status.acquired, status.released);
    assert!(status.open <= status.max_size);

    store.set_latency(Duration::ZERO);
    assert_eq!(components.cache.get("k").await, Ok(None));
    assert_eq!(components.pool.status().leased, 0);
}

#[tokio::test(start_paused = true)]
async fn test_ttl_expiry() {
    let config = common::test_config();
    let (_store, components) = common::components(&config);
    let cache = &components.cache;

    cache.put("session", "abc", Some(Duration::from_secs(1))).await.unwrap();
    cache.put("forever", "x", None).await.unwrap();
    assert_eq!(cache.get("session").await, Ok(Some("abc".into())));

    time::advance(Duration::from_millis(1_500)).await;
    assert_eq!(cache.get("session").await, Ok(None));
    assert_eq!(cache.get("forever").await, Ok(Some("x".into())));

    assert!(cache.expire("forever", Duration::from_secs(2)).await.unwrap());
    time::advance(Duration::from_secs(3)).await;
    assert!(!cache.exists("forever").await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_batch_entries_fail_independently() {
    let mut config = common::test_config();
    config.retries.enabled = false;
    let (store, components) = common::components(&config);
    let cache = &components.cache;

    cache.put("a", "1", None).await.unwrap();
    cache.put("b", "2", None).await.unwrap();
    cache.put("c", "3", None).await.unwrap();

    store.inject(Fault::Server("ERR boom".into()));
    let keys: Vec<String> = ["a", "b", "c", "a"].iter().map(|k| k.to_string()).collect();
    let results = cache.batch_get(&keys).await;

    assert_eq!(results.len(), 3);
    let failed = results.iter().filter(|(_, r)| r.is_err()).count();
    assert_eq!(failed, 1);
    for (key, result) in &results {
        if let Ok(value) = result {
            assert!(value.is_some(), "{key} should be found");
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_calls_after_shutdown_are_rejected() {
    let config = common::test_config();
    let (_store, components) = common::components(&config);
    components.pool.warm_up().await.unwrap();

    components.pool.shutdown(Duration::from_secs(1)).await;
    assert_eq!(components.cache.get("k").await, Err(CacheError::ShuttingDown));
    assert_eq!(components.pool.status().open, 0);
}
