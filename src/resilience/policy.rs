//! Resilience policy: circuit check, lease, execute, retry.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, Instant};
use tracing::Instrument;

use crate::executor::{self, FailureCause, OperationOutcome, OperationRequest};
use crate::pool::{ConnectionPool, HealthState, PoolError};
use crate::resilience::circuit_breaker::CircuitBreaker;
use crate::resilience::retries::{RetryDecision, RetryPolicy};
use crate::telemetry::TelemetrySink;

/// Wraps every store call in breaker, pool, retry and telemetry handling.
pub struct ResiliencePolicy {
    pool: ConnectionPool,
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
    telemetry: Arc<TelemetrySink>,
    acquire_timeout: Duration,
}

impl ResiliencePolicy {
    pub fn new(
        pool: ConnectionPool,
        breaker: Arc<CircuitBreaker>,
        retry: RetryPolicy,
        telemetry: Arc<TelemetrySink>,
    ) -> Self {
        let acquire_timeout = pool.config().acquire_timeout();
        Self {
            pool,
            breaker,
            retry,
            telemetry,
            acquire_timeout,
        }
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn telemetry(&self) -> &TelemetrySink {
        &self.telemetry
    }

    /// Health flags: store reachable, breaker not open, recent calls healthy.
    /// Does not touch the store; readiness adds a PING on top.
    pub fn is_ready(&self) -> bool {
        self.pool.is_healthy() && !self.breaker.is_open() && self.telemetry.is_healthy()
    }

    /// Run one logical operation to completion.
    pub async fn call(&self, request: OperationRequest) -> OperationOutcome {
        let span = tracing::info_span!(
            "store.call",
            endpoint = %self.pool.endpoint(),
            command = %request.kind(),
            key = request.key().unwrap_or(""),
            attempts = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );
        self.run(&request).instrument(span).await
    }

    /// Like [`call`](Self::call), but gives up with `Cancelled` as soon as
    /// `cancel` resolves. The in-flight attempt is dropped, which discards
    /// its connection and frees any probe slot.
    pub async fn call_with_cancel<F>(&self, request: OperationRequest, cancel: F) -> OperationOutcome
    where
        F: Future<Output = ()>,
    {
        let kind = request.kind();
        let started = Instant::now();
        tokio::select! {
            biased;
            _ = cancel => {
                let outcome = OperationOutcome::Cancelled;
                self.telemetry.record(&outcome, started.elapsed(), self.pool.endpoint(), kind);
                tracing::debug!(command = %kind, "Store call cancelled");
                outcome
            }
            outcome = self.call(request) => outcome,
        }
    }

    async fn run(&self, request: &OperationRequest) -> OperationOutcome {
        let mut schedule = self.retry.schedule(request.idempotent);
        let mut attempt = 1;
        loop {
            let outcome = self.attempt(request).await;
            match schedule.next(&outcome) {
                RetryDecision::GiveUp => {
                    let span = tracing::Span::current();
                    span.record("attempts", attempt);
                    span.record("outcome", outcome.class().as_str());
                    return outcome;
                }
                RetryDecision::Retry {
                    attempt: next,
                    delay,
                } => {
                    self.telemetry
                        .record_retry(self.pool.endpoint(), request.kind());
                    tracing::debug!(
                        attempt,
                        outcome = %outcome,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying store call"
                    );
                    time::sleep(delay).await;
                    attempt = next;
                }
            }
        }
    }

    /// One physical attempt, recorded in the breaker and telemetry.
    async fn attempt(&self, request: &OperationRequest) -> OperationOutcome {
        let endpoint = self.pool.endpoint();
        let kind = request.kind();

        let permit = match self.breaker.try_acquire() {
            Ok(permit) => permit,
            Err(open) => {
                tracing::debug!(
                    retry_after_ms = open.retry_after.as_millis() as u64,
                    "Circuit open, failing fast"
                );
                let outcome = OperationOutcome::PermanentFailure(FailureCause::CircuitOpen);
                self.telemetry.record(&outcome, Duration::ZERO, endpoint, kind);
                return outcome;
            }
        };

        let started = Instant::now();
        let outcome = match self.pool.acquire(self.acquire_timeout).await {
            Ok(mut lease) => {
                let outcome = executor::execute(&mut lease, request).await;
                let healthy = lease.health() != HealthState::Dead;
                lease.release(healthy);
                outcome
            }
            Err(e) => pool_failure(e),
        };

        match outcome.circuit_failure() {
            Some(failed) => self.breaker.record(permit, failed),
            None => drop(permit),
        }
        self.telemetry.record(&outcome, started.elapsed(), endpoint, kind);
        outcome
    }
}

fn pool_failure(err: PoolError) -> OperationOutcome {
    match err {
        PoolError::Exhausted(_) => OperationOutcome::TransientFailure(FailureCause::PoolExhausted),
        PoolError::Closed => OperationOutcome::PermanentFailure(FailureCause::PoolClosed),
        // Local contention, not evidence about the store.
        PoolError::Timeout => OperationOutcome::TransientFailure(FailureCause::PoolExhausted),
        PoolError::Connect(e) => OperationOutcome::TransientFailure(FailureCause::Connect(e.message)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CircuitBreakerConfig, PoolConfig, RetryConfig, TelemetryConfig};
    use crate::executor::Value;
    use crate::store::{Command, Fault, MemoryStore};

    fn policy(store: &MemoryStore, max_retries: u32) -> ResiliencePolicy {
        let pool = ConnectionPool::new(
            Arc::new(store.clone()),
            PoolConfig {
                min_size: 0,
                max_size: 2,
                ..PoolConfig::default()
            },
        );
        let breaker = Arc::new(CircuitBreaker::new(
            "memory",
            CircuitBreakerConfig {
                minimum_calls: 100,
                ..CircuitBreakerConfig::default()
            },
        ));
        let retry = RetryPolicy::new(RetryConfig {
            enabled: true,
            max_retries,
            base_delay_ms: 10,
            max_delay_ms: 50,
        });
        let telemetry = Arc::new(TelemetrySink::new(&TelemetryConfig::default()));
        ResiliencePolicy::new(pool, breaker, retry, telemetry)
    }

    fn get(key: &str) -> OperationRequest {
        OperationRequest::new(Command::Get { key: key.into() }, Duration::from_millis(100))
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_is_retried() {
        let store = MemoryStore::new();
        let policy = policy(&store, 2);
        store.inject(Fault::Transient);

        assert_eq!(policy.call(get("k")).await, OperationOutcome::NotFound);
        assert_eq!(store.commands(), 2);
        // The reset killed the first connection.
        assert_eq!(store.connections(), 2);
        assert_eq!(policy.telemetry().snapshot().total_records, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_budget() {
        let store = MemoryStore::new();
        let policy = policy(&store, 2);
        store.inject_many(Fault::Transient, 10);

        let outcome = policy.call(get("k")).await;
        assert!(matches!(
            outcome,
            OperationOutcome::TransientFailure(FailureCause::Io(_))
        ));
        assert_eq!(store.commands(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn non_idempotent_runs_once() {
        let store = MemoryStore::new();
        let policy = policy(&store, 5);
        store.inject(Fault::Hang);

        let incr = OperationRequest::new(
            Command::Increment { key: "n".into(), by: 1 },
            Duration::from_millis(100),
        );
        assert_eq!(
            policy.call(incr).await,
            OperationOutcome::Timeout { outcome_unknown: true }
        );
        assert_eq!(store.commands(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_releases_everything() {
        let store = MemoryStore::new();
        let policy = policy(&store, 0);
        store.set_latency(Duration::from_secs(10));

        let outcome = policy
            .call_with_cancel(get("k"), time::sleep(Duration::from_millis(20)))
            .await;
        assert_eq!(outcome, OperationOutcome::Cancelled);

        let status = policy.pool().status();
        assert_eq!(status.leased, 0);
        assert_eq!(status.acquired, status.released);

        store.set_latency(Duration::ZERO);
        let put = OperationRequest::new(
            Command::Set {
                key: "k".into(),
                value: "v".into(),
                ttl: None,
            },
            Duration::from_millis(100),
        );
        assert_eq!(policy.call(put).await, OperationOutcome::Success(Value::Unit));
    }

    #[test]
    fn pool_deadline_is_not_a_store_failure() {
        let outcome = pool_failure(PoolError::Timeout);
        assert_eq!(outcome, OperationOutcome::TransientFailure(FailureCause::PoolExhausted));
        assert_eq!(outcome.circuit_failure(), None);
        assert!(!outcome.is_retryable());
    }
}
