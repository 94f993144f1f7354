//! Circuit breaker for endpoint protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: endpoint assumed down, calls fail fast
//! - Half-Open: probing whether the endpoint recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: calls >= minimum_calls and failure rate >= threshold
//!                within the rolling window
//! Open → Half-Open: first check after cooldown
//! Half-Open → Closed: a probe succeeds
//! Half-Open → Open: a probe fails
//! ```
//!
//! # Design Decisions
//! - One breaker per endpoint, owned by the resilience policy
//! - Fail fast in Open state (no pool access, no waiting)
//! - Bounded concurrent probes in Half-Open
//! - State is read lock-free; transitions happen under a mutex

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;

/// Circuit breaker states.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed = 0,
    Open = 1,
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(val: u8) -> Self {
        match val {
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }

    /// The only legal edges of the state machine.
    pub fn can_transition_to(&self, to: CircuitState) -> bool {
        matches!(
            (self, to),
            (CircuitState::Closed, CircuitState::Open)
                | (CircuitState::Open, CircuitState::HalfOpen)
                | (CircuitState::HalfOpen, CircuitState::Closed)
                | (CircuitState::HalfOpen, CircuitState::Open)
        )
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when the breaker rejects a call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("circuit open for {endpoint}")]
pub struct CircuitOpen {
    pub endpoint: String,
    /// Time until the next probe is allowed; zero when probes are saturated.
    pub retry_after: Duration,
}

#[derive(Debug, Default)]
struct Window {
    /// (finished at, failed)
    calls: VecDeque<(Instant, bool)>,
    opened_at: Option<Instant>,
    probes_in_flight: u32,
    /// Bumped on every entry into Half-Open; probes from older cycles are stale.
    cycle: u64,
}

impl Window {
    fn prune(&mut self, now: Instant, max_age: Duration, max_len: usize) {
        while self
            .calls
            .front()
            .is_some_and(|(at, _)| now.duration_since(*at) > max_age)
        {
            self.calls.pop_front();
        }
        while self.calls.len() > max_len {
            self.calls.pop_front();
        }
    }

    fn failures(&self) -> usize {
        self.calls.iter().filter(|(_, failed)| *failed).count()
    }
}

/// Admission token for one call. Dropping it unrecorded frees its probe slot.
#[must_use = "record the result with CircuitBreaker::record"]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    cycle: u64,
    settled: bool,
}

impl CallPermit<'_> {
    pub fn is_probe(&self) -> bool {
        self.probe
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if self.probe && !self.settled {
            let mut window = self.breaker.lock();
            if window.cycle == self.cycle {
                window.probes_in_flight = window.probes_in_flight.saturating_sub(1);
            }
        }
    }
}

/// Point-in-time breaker view for admin and readiness.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub endpoint: String,
    pub state: CircuitState,
    pub window_calls: usize,
    pub window_failures: usize,
    pub failure_rate: f64,
    pub open_for_ms: Option<u64>,
    pub probes_in_flight: u32,
    pub transitions: u64,
    pub rejected: u64,
}

/// Failure-rate circuit breaker for a single endpoint.
pub struct CircuitBreaker {
    endpoint: String,
    config: CircuitBreakerConfig,
    state: AtomicU8,
    window: Mutex<Window>,
    transitions: AtomicU64,
    rejected: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(endpoint: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let breaker = Self {
            endpoint: endpoint.into(),
            config,
            state: AtomicU8::new(CircuitState::Closed as u8),
            window: Mutex::new(Window::default()),
            transitions: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        };
        breaker.publish_state(CircuitState::Closed);
        breaker
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    fn lock(&self) -> MutexGuard<'_, Window> {
        self.window.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Ask to make a call.
    pub fn try_acquire(&self) -> Result<CallPermit<'_>, CircuitOpen> {
        if !self.config.enabled {
            return Ok(self.permit(false, 0));
        }

        let mut window = self.lock();
        let now = Instant::now();

        if self.state() == CircuitState::Open {
            let elapsed = window
                .opened_at
                .map_or(self.config.cooldown(), |at| now.duration_since(at));
            if elapsed < self.config.cooldown() {
                return Err(self.reject(self.config.cooldown() - elapsed));
            }
            self.transition(&mut window, CircuitState::HalfOpen, now);
        }

        match self.state() {
            CircuitState::Closed => Ok(self.permit(false, window.cycle)),
            CircuitState::HalfOpen => {
                if window.probes_in_flight < self.config.half_open_max_probes {
                    window.probes_in_flight += 1;
                    tracing::debug!(endpoint = %self.endpoint, "Circuit breaker admitting probe");
                    Ok(self.permit(true, window.cycle))
                } else {
                    Err(self.reject(Duration::ZERO))
                }
            }
            CircuitState::Open => Err(self.reject(self.config.cooldown())),
        }
    }

    fn permit(&self, probe: bool, cycle: u64) -> CallPermit<'_> {
        CallPermit {
            breaker: self,
            probe,
            cycle,
            settled: false,
        }
    }

    fn reject(&self, retry_after: Duration) -> CircuitOpen {
        self.rejected.fetch_add(1, Ordering::Relaxed);
        CircuitOpen {
            endpoint: self.endpoint.clone(),
            retry_after,
        }
    }

    /// Record the result of an admitted call.
    pub fn record(&self, mut permit: CallPermit<'_>, failed: bool) {
        permit.settled = true;
        if !self.config.enabled {
            return;
        }

        let mut window = self.lock();
        let now = Instant::now();
        if permit.probe {
            if permit.cycle != window.cycle {
                tracing::debug!(endpoint = %self.endpoint, "Ignoring probe from an earlier half-open cycle");
                return;
            }
            window.probes_in_flight = window.probes_in_flight.saturating_sub(1);
        }

        match self.state() {
            CircuitState::HalfOpen if permit.probe => {
                let to = if failed {
                    CircuitState::Open
                } else {
                    CircuitState::Closed
                };
                self.transition(&mut window, to, now);
            }
            // Calls admitted before the breaker tripped.
            CircuitState::HalfOpen | CircuitState::Open => {}
            CircuitState::Closed => {
                window.calls.push_back((now, failed));
                window.prune(now, self.config.window(), self.config.window_size);

                let calls = window.calls.len();
                if failed && calls >= self.config.minimum_calls {
                    let rate = window.failures() as f64 / calls as f64;
                    if rate >= self.config.failure_rate_threshold {
                        tracing::debug!(
                            endpoint = %self.endpoint,
                            calls,
                            failure_rate = rate,
                            threshold = self.config.failure_rate_threshold,
                            "Circuit breaker failure threshold reached"
                        );
                        self.transition(&mut window, CircuitState::Open, now);
                    }
                }
            }
        }
    }

    /// Force the breaker back to Closed (admin action). Goes through
    /// Half-Open so only legal edges are taken.
    pub fn reset(&self) {
        let mut window = self.lock();
        let now = Instant::now();
        if self.state() == CircuitState::Open {
            self.transition(&mut window, CircuitState::HalfOpen, now);
        }
        if self.state() == CircuitState::HalfOpen {
            self.transition(&mut window, CircuitState::Closed, now);
        }
    }

    fn transition(&self, window: &mut Window, to: CircuitState, now: Instant) {
        let from = self.state();
        if !from.can_transition_to(to) {
            tracing::error!(
                endpoint = %self.endpoint,
                from = from.as_str(),
                to = to.as_str(),
                "Refusing illegal circuit transition"
            );
            return;
        }

        match to {
            CircuitState::Open => {
                window.opened_at = Some(now);
                window.probes_in_flight = 0;
            }
            CircuitState::HalfOpen => {
                window.probes_in_flight = 0;
                window.cycle += 1;
            }
            CircuitState::Closed => {
                window.calls.clear();
                window.opened_at = None;
            }
        }
        self.state.store(to as u8, Ordering::Release);
        self.transitions.fetch_add(1, Ordering::Relaxed);

        if to == CircuitState::Open {
            tracing::warn!(
                endpoint = %self.endpoint,
                from = from.as_str(),
                cooldown_ms = self.config.cooldown_ms,
                "Circuit breaker opened"
            );
        } else {
            tracing::info!(
                endpoint = %self.endpoint,
                from = from.as_str(),
                to = to.as_str(),
                "Circuit breaker transition"
            );
        }
        metrics::counter!(
            "cache_circuit_transitions_total",
            "endpoint" => self.endpoint.clone(),
            "from" => from.as_str(),
            "to" => to.as_str()
        )
        .increment(1);
        self.publish_state(to);
    }

    fn publish_state(&self, state: CircuitState) {
        metrics::gauge!("cache_circuit_state", "endpoint" => self.endpoint.clone())
            .set(state as u8 as f64);
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let mut window = self.lock();
        let now = Instant::now();
        window.prune(now, self.config.window(), self.config.window_size);
        let calls = window.calls.len();
        let failures = window.failures();
        BreakerSnapshot {
            endpoint: self.endpoint.clone(),
            state: self.state(),
            window_calls: calls,
            window_failures: failures,
            failure_rate: if calls == 0 {
                0.0
            } else {
                failures as f64 / calls as f64
            },
            open_for_ms: window
                .opened_at
                .map(|at| now.duration_since(at).as_millis() as u64),
            probes_in_flight: window.probes_in_flight,
            transitions: self.transitions.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("endpoint", &self.endpoint)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(window_size: usize, minimum_calls: usize, threshold: f64) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                enabled: true,
                window_size,
                window_secs: 30,
                minimum_calls,
                failure_rate_threshold: threshold,
                cooldown_ms: 1000,
                half_open_max_probes: 1,
            },
        )
    }

    fn call(breaker: &CircuitBreaker, failed: bool) {
        let permit = breaker.try_acquire().unwrap();
        breaker.record(permit, failed);
    }

    #[test]
    fn transitions_are_restricted() {
        use CircuitState::*;
        assert!(Closed.can_transition_to(Open));
        assert!(Open.can_transition_to(HalfOpen));
        assert!(HalfOpen.can_transition_to(Closed));
        assert!(HalfOpen.can_transition_to(Open));
        assert!(!Closed.can_transition_to(HalfOpen));
        assert!(!Open.can_transition_to(Closed));
    }

    #[tokio::test(start_paused = true)]
    async fn trips_at_failure_rate_once_minimum_reached() {
        let cb = breaker(5, 5, 0.6);
        call(&cb, true);
        call(&cb, false);
        call(&cb, true);
        call(&cb, false);
        assert_eq!(cb.state(), CircuitState::Closed);
        // 3 of 5 failed.
        call(&cb, true);
        assert_eq!(cb.state(), CircuitState::Open);

        let err = cb.try_acquire().err().unwrap();
        assert!(err.retry_after > Duration::ZERO);
        assert_eq!(cb.snapshot().rejected, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn below_minimum_calls_never_trips() {
        let cb = breaker(10, 5, 0.5);
        for _ in 0..4 {
            call(&cb, true);
        }
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn old_calls_leave_the_window() {
        let cb = breaker(10, 3, 0.5);
        call(&cb, true);
        call(&cb, true);
        tokio::time::advance(Duration::from_secs(31)).await;
        call(&cb, true);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.snapshot().window_calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn probe_success_closes() {
        let cb = breaker(2, 2, 0.5);
        call(&cb, true);
        call(&cb, true);
        assert!(cb.is_open());

        tokio::time::advance(Duration::from_millis(1001)).await;
        let probe = cb.try_acquire().unwrap();
        assert!(probe.is_probe());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        // Only one probe at a time.
        assert!(cb.try_acquire().is_err());

        cb.record(probe, false);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.snapshot().window_calls, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn probe_failure_reopens() {
        let cb = breaker(2, 2, 0.5);
        call(&cb, true);
        call(&cb, true);
        tokio::time::advance(Duration::from_millis(1001)).await;

        let probe = cb.try_acquire().unwrap();
        cb.record(probe, true);
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.try_acquire().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_probe_frees_slot() {
        let cb = breaker(2, 2, 0.5);
        call(&cb, true);
        call(&cb, true);
        tokio::time::advance(Duration::from_millis(1001)).await;

        let probe = cb.try_acquire().unwrap();
        drop(probe);
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        let probe = cb.try_acquire().unwrap();
        cb.record(probe, false);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    /// Trip, then wait out the cooldown so the next acquire is a probe.
    async fn reopen_after_cooldown(cb: &CircuitBreaker) {
        call(cb, true);
        call(cb, true);
        assert!(cb.is_open());
        tokio::time::advance(Duration::from_millis(1001)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn late_probe_result_does_not_settle_a_newer_cycle() {
        let cb = breaker(2, 2, 0.5);
        reopen_after_cooldown(&cb).await;
        let stale = cb.try_acquire().unwrap();
        assert!(stale.is_probe());

        cb.reset();
        reopen_after_cooldown(&cb).await;
        let current = cb.try_acquire().unwrap();
        assert!(current.is_probe());

        cb.record(stale, true);
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert_eq!(cb.snapshot().probes_in_flight, 1);
        assert!(cb.try_acquire().is_err());

        cb.record(current, false);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_a_stale_probe_keeps_the_current_slot() {
        let cb = breaker(2, 2, 0.5);
        reopen_after_cooldown(&cb).await;
        let stale = cb.try_acquire().unwrap();

        cb.reset();
        reopen_after_cooldown(&cb).await;
        let current = cb.try_acquire().unwrap();

        drop(stale);
        assert_eq!(cb.snapshot().probes_in_flight, 1);
        assert!(cb.try_acquire().is_err());
        drop(current);
        assert_eq!(cb.snapshot().probes_in_flight, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_closes_open_breaker() {
        let cb = breaker(2, 2, 0.5);
        call(&cb, true);
        call(&cb, true);
        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.snapshot().transitions, 3);
    }

    #[test]
    fn disabled_breaker_admits_everything() {
        let cb = CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                enabled: false,
                ..CircuitBreakerConfig::default()
            },
        );
        for _ in 0..100 {
            call(&cb, true);
        }
        assert_eq!(cb.state(), CircuitState::Closed);
    }
}
