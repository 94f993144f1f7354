//! Telemetry sink.
//!
//! # Responsibilities
//! - Count outcomes and bucket latencies per (endpoint, command)
//! - Track the error rate of the most recent outcomes for readiness, bounded
//!   by count and by age so an idle service recovers on its own
//! - Mirror every record into the `metrics` facade
//!
//! # Design Decisions
//! - Hot path is atomics plus one short mutex for the recent window
//! - A poisoned window lock drops the record and counts it instead of panicking

use dashmap::DashMap;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use crate::config::TelemetryConfig;
use crate::executor::{FailureCause, OperationOutcome, OutcomeClass};
use crate::store::CommandKind;

/// Upper bounds (inclusive, milliseconds) of the internal latency buckets.
const LATENCY_BUCKETS_MS: [u64; 12] = [1, 2, 5, 10, 25, 50, 100, 250, 500, 1000, 2500, 5000];

const CLASSES: [OutcomeClass; 6] = [
    OutcomeClass::Success,
    OutcomeClass::NotFound,
    OutcomeClass::Transient,
    OutcomeClass::Permanent,
    OutcomeClass::Timeout,
    OutcomeClass::Cancelled,
];

fn class_index(class: OutcomeClass) -> usize {
    match class {
        OutcomeClass::Success => 0,
        OutcomeClass::NotFound => 1,
        OutcomeClass::Transient => 2,
        OutcomeClass::Permanent => 3,
        OutcomeClass::Timeout => 4,
        OutcomeClass::Cancelled => 5,
    }
}

#[derive(Debug, Default)]
struct CommandStats {
    outcomes: [AtomicU64; 6],
    /// Last slot counts latencies above the largest bound.
    buckets: [AtomicU64; LATENCY_BUCKETS_MS.len() + 1],
    count: AtomicU64,
    total_micros: AtomicU64,
    max_micros: AtomicU64,
}

impl CommandStats {
    fn record(&self, class: OutcomeClass, latency: Duration) {
        self.outcomes[class_index(class)].fetch_add(1, Ordering::Relaxed);

        let millis = latency.as_millis() as u64;
        let slot = LATENCY_BUCKETS_MS
            .iter()
            .position(|bound| millis <= *bound)
            .unwrap_or(LATENCY_BUCKETS_MS.len());
        self.buckets[slot].fetch_add(1, Ordering::Relaxed);

        let micros = latency.as_micros() as u64;
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_micros.fetch_add(micros, Ordering::Relaxed);
        self.max_micros.fetch_max(micros, Ordering::Relaxed);
    }

    fn snapshot(&self, endpoint: &str, command: CommandKind) -> CommandSnapshot {
        let outcomes = CLASSES
            .iter()
            .map(|class| {
                (
                    class.as_str(),
                    self.outcomes[class_index(*class)].load(Ordering::Relaxed),
                )
            })
            .filter(|(_, n)| *n > 0)
            .collect();

        let counts: Vec<u64> = self
            .buckets
            .iter()
            .map(|b| b.load(Ordering::Relaxed))
            .collect();
        let count = self.count.load(Ordering::Relaxed);
        let total = self.total_micros.load(Ordering::Relaxed);

        CommandSnapshot {
            endpoint: endpoint.to_string(),
            command: command.as_str(),
            outcomes,
            latency: LatencySnapshot {
                count,
                mean_ms: if count == 0 {
                    0.0
                } else {
                    total as f64 / count as f64 / 1000.0
                },
                max_ms: self.max_micros.load(Ordering::Relaxed) as f64 / 1000.0,
                p50_ms: percentile(&counts, count, 0.50),
                p99_ms: percentile(&counts, count, 0.99),
                buckets: LATENCY_BUCKETS_MS
                    .iter()
                    .zip(counts.iter())
                    .map(|(le, n)| (*le, *n))
                    .collect(),
                overflow: counts.last().copied().unwrap_or(0),
            },
        }
    }
}

/// Bucket upper bound containing quantile `q`; `None` when it falls in the
/// overflow bucket or nothing was recorded.
fn percentile(counts: &[u64], total: u64, q: f64) -> Option<u64> {
    if total == 0 {
        return None;
    }
    let rank = ((total as f64) * q).ceil().max(1.0) as u64;
    let mut seen = 0;
    for (i, n) in counts.iter().enumerate() {
        seen += n;
        if seen >= rank {
            return LATENCY_BUCKETS_MS.get(i).copied();
        }
    }
    None
}

#[derive(Debug, Clone, Serialize)]
pub struct LatencySnapshot {
    pub count: u64,
    pub mean_ms: f64,
    pub max_ms: f64,
    pub p50_ms: Option<u64>,
    pub p99_ms: Option<u64>,
    /// (upper bound ms, count)
    pub buckets: Vec<(u64, u64)>,
    pub overflow: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommandSnapshot {
    pub endpoint: String,
    pub command: &'static str,
    pub outcomes: BTreeMap<&'static str, u64>,
    pub latency: LatencySnapshot,
}

impl CommandSnapshot {
    pub fn outcome(&self, class: OutcomeClass) -> u64 {
        self.outcomes.get(class.as_str()).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TelemetrySnapshot {
    pub total_records: u64,
    pub dropped_records: u64,
    pub recent_samples: usize,
    pub recent_error_rate: f64,
    pub healthy: bool,
    pub commands: Vec<CommandSnapshot>,
}

impl TelemetrySnapshot {
    pub fn command(&self, endpoint: &str, command: CommandKind) -> Option<&CommandSnapshot> {
        self.commands
            .iter()
            .find(|c| c.endpoint == endpoint && c.command == command.as_str())
    }
}

/// Collects per-call outcomes and latencies.
pub struct TelemetrySink {
    stats: DashMap<(String, CommandKind), Arc<CommandStats>>,
    /// (recorded at, is error) of the most recent outcomes, newest last.
    recent: Mutex<VecDeque<(Instant, bool)>>,
    health_window: usize,
    health_window_age: Duration,
    unhealthy_error_rate: f64,
    health_min_samples: usize,
    total_records: AtomicU64,
    dropped_records: AtomicU64,
}

impl TelemetrySink {
    pub fn new(config: &TelemetryConfig) -> Self {
        Self {
            stats: DashMap::new(),
            recent: Mutex::new(VecDeque::with_capacity(config.health_window)),
            health_window: config.health_window.max(1),
            health_window_age: config.health_window_age(),
            unhealthy_error_rate: config.unhealthy_error_rate,
            health_min_samples: config.health_min_samples,
            total_records: AtomicU64::new(0),
            dropped_records: AtomicU64::new(0),
        }
    }

    /// Record one attempt. Never fails.
    pub fn record(
        &self,
        outcome: &OperationOutcome,
        latency: Duration,
        endpoint: &str,
        kind: CommandKind,
    ) {
        let class = outcome.class();

        let stats = self
            .stats
            .entry((endpoint.to_string(), kind))
            .or_default()
            .clone();
        stats.record(class, latency);
        self.total_records.fetch_add(1, Ordering::Relaxed);

        metrics::counter!(
            "cache_store_calls_total",
            "endpoint" => endpoint.to_string(),
            "command" => kind.as_str(),
            "outcome" => class.as_str()
        )
        .increment(1);
        metrics::histogram!(
            "cache_store_call_duration_seconds",
            "endpoint" => endpoint.to_string(),
            "command" => kind.as_str()
        )
        .record(latency.as_secs_f64());

        if !reflects_store_health(outcome) {
            return;
        }
        match self.recent.lock() {
            Ok(mut recent) => {
                let now = Instant::now();
                recent.push_back((now, class.is_error()));
                while recent.len() > self.health_window {
                    recent.pop_front();
                }
                self.prune_expired(&mut recent, now);
            }
            Err(_) => {
                self.dropped_records.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Count one retry.
    pub fn record_retry(&self, endpoint: &str, kind: CommandKind) {
        metrics::counter!(
            "cache_retries_total",
            "endpoint" => endpoint.to_string(),
            "command" => kind.as_str()
        )
        .increment(1);
    }

    fn prune_expired(&self, recent: &mut VecDeque<(Instant, bool)>, now: Instant) {
        while recent
            .front()
            .is_some_and(|(at, _)| now.saturating_duration_since(*at) > self.health_window_age)
        {
            recent.pop_front();
        }
    }

    /// (samples, error rate) over the recent window.
    fn recent_error_rate(&self) -> Option<(usize, f64)> {
        let mut recent = self.recent.lock().ok()?;
        self.prune_expired(&mut recent, Instant::now());
        let samples = recent.len();
        if samples == 0 {
            return Some((0, 0.0));
        }
        let errors = recent.iter().filter(|(_, e)| *e).count();
        Some((samples, errors as f64 / samples as f64))
    }

    /// False when enough recent outcomes exist and too many were errors.
    pub fn is_healthy(&self) -> bool {
        match self.recent_error_rate() {
            Some((samples, rate)) => {
                samples < self.health_min_samples || rate < self.unhealthy_error_rate
            }
            None => true,
        }
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        let (recent_samples, recent_error_rate) = self.recent_error_rate().unwrap_or((0, 0.0));
        let mut commands: Vec<CommandSnapshot> = self
            .stats
            .iter()
            .map(|entry| {
                let (endpoint, kind) = entry.key();
                entry.value().snapshot(endpoint, *kind)
            })
            .collect();
        commands.sort_by(|a, b| (&a.endpoint, a.command).cmp(&(&b.endpoint, b.command)));

        TelemetrySnapshot {
            total_records: self.total_records.load(Ordering::Relaxed),
            dropped_records: self.dropped_records.load(Ordering::Relaxed),
            recent_samples,
            recent_error_rate,
            healthy: self.is_healthy(),
            commands,
        }
    }

    pub fn dropped_records(&self) -> u64 {
        self.dropped_records.load(Ordering::Relaxed)
    }
}

/// Local rejections and cancellations say nothing about the store.
fn reflects_store_health(outcome: &OperationOutcome) -> bool {
    !matches!(
        outcome,
        OperationOutcome::Cancelled
            | OperationOutcome::PermanentFailure(FailureCause::CircuitOpen | FailureCause::PoolClosed)
    )
}

impl std::fmt::Debug for TelemetrySink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetrySink")
            .field("total_records", &self.total_records.load(Ordering::Relaxed))
            .finish()
    }
}
