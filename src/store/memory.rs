//! In-process store.
//!
//! # Responsibilities
//! - Serve the command set with key TTLs, for local runs without a server
//! - Inject latency and faults so resilience behavior can be exercised
//! - Count connections and commands so tests can assert on physical calls
//!
//! # Design Decisions
//! - Expiry uses Tokio's clock so paused-time tests can fast-forward TTLs
//! - Faults are consumed in FIFO order, one per command
//! - Clones share state; every connection sees the same keyspace

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

use crate::store::{Command, Connector, Reply, StoreConnection, StoreError, StoreErrorKind};

/// A failure to inject into the next command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Connection reset (transient).
    Transient,
    /// Error reply from the store (permanent).
    Server(String),
    /// A reply that does not fit any command.
    Malformed,
    /// Never answer.
    Hang,
}

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Default)]
struct Inner {
    entries: DashMap<String, Entry>,
    latency_ms: AtomicU64,
    faults: Mutex<VecDeque<Fault>>,
    connect_faults: AtomicU32,
    connections: AtomicU64,
    commands: AtomicU64,
}

/// Shared in-memory keyspace implementing [`Connector`].
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every command by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.inner
            .latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Queue a fault for an upcoming command.
    pub fn inject(&self, fault: Fault) {
        self.inner
            .faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(fault);
    }

    /// Queue `count` copies of `fault`.
    pub fn inject_many(&self, fault: Fault, count: usize) {
        for _ in 0..count {
            self.inject(fault.clone());
        }
    }

    /// Make the next `count` connection attempts fail.
    pub fn fail_connects(&self, count: u32) {
        self.inner.connect_faults.store(count, Ordering::Relaxed);
    }

    /// Number of connections opened so far.
    pub fn connections(&self) -> u64 {
        self.inner.connections.load(Ordering::Relaxed)
    }

    /// Number of commands that reached the store.
    pub fn commands(&self) -> u64 {
        self.inner.commands.load(Ordering::Relaxed)
    }

    /// Number of live (unexpired) keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.inner
            .entries
            .iter()
            .filter(|e| !e.value().is_expired(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn next_fault(&self) -> Option<Fault> {
        self.inner
            .faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    async fn apply(&self, command: &Command) -> Result<Reply, StoreError> {
        self.inner.commands.fetch_add(1, Ordering::Relaxed);

        let latency = self.inner.latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        match self.next_fault() {
            Some(Fault::Transient) => return Err(StoreError::io("connection reset by peer")),
            Some(Fault::Server(message)) => {
                return Err(StoreError::new(StoreErrorKind::Server, message))
            }
            Some(Fault::Malformed) => return Ok(Reply::Unexpected("array of 3 elements".into())),
            Some(Fault::Hang) => std::future::pending::<()>().await,
            None => {}
        }

        self.dispatch(command)
    }

    fn dispatch(&self, command: &Command) -> Result<Reply, StoreError> {
        let now = Instant::now();
        let entries = &self.inner.entries;

        // Lazy expiry on access.
        if let Some(key) = command.key() {
            entries.remove_if(key, |_, entry| entry.is_expired(now));
        }

        let reply = match command {
            Command::Get { key } => entries
                .get(key)
                .map(|e| Reply::Bulk(e.value.clone().into_bytes()))
                .unwrap_or(Reply::Nil),
            Command::Set { key, value, ttl } => {
                entries.insert(
                    key.clone(),
                    Entry {
                        value: value.clone(),
                        expires_at: ttl.and_then(|ttl| now.checked_add(ttl)),
                    },
                );
                Reply::Ok
            }
            Command::Delete { key } => Reply::Integer(entries.remove(key).is_some() as i64),
            Command::Exists { key } => Reply::Integer(entries.contains_key(key) as i64),
            Command::Increment { key, by } => {
                let mut entry = entries.entry(key.clone()).or_insert_with(|| Entry {
                    value: "0".into(),
                    expires_at: None,
                });
                match entry.value.parse::<i64>() {
                    Ok(current) => {
                        let next = current.saturating_add(*by);
                        entry.value = next.to_string();
                        Reply::Integer(next)
                    }
                    Err(_) => {
                        return Err(StoreError::new(
                            StoreErrorKind::Server,
                            "ERR value is not an integer or out of range",
                        ))
                    }
                }
            }
            Command::Expire { key, ttl } => match entries.get_mut(key) {
                Some(mut entry) => {
                    entry.expires_at = now.checked_add(*ttl);
                    Reply::Integer(1)
                }
                None => Reply::Integer(0),
            },
            Command::Ping => Reply::Status("PONG".into()),
        };
        Ok(reply)
    }
}

#[async_trait]
impl Connector for MemoryStore {
    async fn connect(&self) -> Result<Box<dyn StoreConnection>, StoreError> {
        let pending = self.inner.connect_faults.load(Ordering::Relaxed);
        if pending > 0 {
            self.inner.connect_faults.store(pending - 1, Ordering::Relaxed);
            return Err(StoreError::io("connection refused"));
        }
        self.inner.connections.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(MemoryConnection {
            store: self.clone(),
        }))
    }

    fn endpoint(&self) -> &str {
        "memory"
    }
}

struct MemoryConnection {
    store: MemoryStore,
}

#[async_trait]
impl StoreConnection for MemoryConnection {
    async fn execute(&mut self, command: &Command) -> Result<Reply, StoreError> {
        self.store.apply(command).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get(key: &str) -> Command {
        Command::Get { key: key.into() }
    }

    #[tokio::test(start_paused = true)]
    async fn set_get_and_expire() {
        let store = MemoryStore::new();
        let mut conn = store.connect().await.unwrap();

        let set = Command::Set {
            key: "k".into(),
            value: "v".into(),
            ttl: Some(Duration::from_secs(10)),
        };
        assert_eq!(conn.execute(&set).await.unwrap(), Reply::Ok);
        assert_eq!(conn.execute(&get("k")).await.unwrap(), Reply::Bulk(b"v".to_vec()));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(conn.execute(&get("k")).await.unwrap(), Reply::Nil);
        assert_eq!(store.commands(), 3);
    }

    #[tokio::test]
    async fn unrepresentable_ttl_never_expires() {
        let store = MemoryStore::new();
        let mut conn = store.connect().await.unwrap();

        let set = Command::Set {
            key: "k".into(),
            value: "v".into(),
            ttl: Some(Duration::MAX),
        };
        assert_eq!(conn.execute(&set).await.unwrap(), Reply::Ok);
        let expire = Command::Expire {
            key: "k".into(),
            ttl: Duration::from_secs(i64::MAX as u64),
        };
        assert_eq!(conn.execute(&expire).await.unwrap(), Reply::Integer(1));
        assert_eq!(conn.execute(&get("k")).await.unwrap(), Reply::Bulk(b"v".to_vec()));
    }

    #[tokio::test]
    async fn increment_and_delete() {
        let store = MemoryStore::new();
        let mut conn = store.connect().await.unwrap();
        let incr = Command::Increment { key: "n".into(), by: 5 };

        assert_eq!(conn.execute(&incr).await.unwrap(), Reply::Integer(5));
        assert_eq!(conn.execute(&incr).await.unwrap(), Reply::Integer(10));
        assert_eq!(
            conn.execute(&Command::Delete { key: "n".into() }).await.unwrap(),
            Reply::Integer(1)
        );
        assert_eq!(
            conn.execute(&Command::Delete { key: "n".into() }).await.unwrap(),
            Reply::Integer(0)
        );
    }

    #[tokio::test]
    async fn faults_are_consumed_in_order() {
        let store = MemoryStore::new();
        store.inject(Fault::Transient);
        store.inject(Fault::Malformed);
        let mut conn = store.connect().await.unwrap();

        let err = conn.execute(&Command::Ping).await.unwrap_err();
        assert!(err.is_transient());
        assert!(matches!(conn.execute(&Command::Ping).await.unwrap(), Reply::Unexpected(_)));
        assert_eq!(conn.execute(&Command::Ping).await.unwrap(), Reply::Status("PONG".into()));
    }

    #[tokio::test]
    async fn connect_faults() {
        let store = MemoryStore::new();
        store.fail_connects(1);
        assert!(store.connect().await.is_err());
        assert!(store.connect().await.is_ok());
        assert_eq!(store.connections(), 1);
    }
}
