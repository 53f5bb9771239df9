//! Ephemeral keyed store with per-key TTL.
//!
//! Abort flags, progress snapshots, partial results, and idempotency records
//! all live here. The store is a narrow trait so tests and local operation
//! use the in-memory implementation while deployments can substitute a
//! shared cache. Keys are namespaced by run id and never reused.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use super::clock::{Clock, SharedClock};

/// TTL for solver abort flags.
pub const ABORT_TTL_SECS: i64 = 3_600;
/// TTL for solver progress snapshots.
pub const PROGRESS_TTL_SECS: i64 = 7_200;
/// TTL for solver partial/final results.
pub const RESULT_TTL_SECS: i64 = 86_400;

pub fn abort_key(run_id: &str) -> String {
    format!("solver:abort:{}", run_id)
}

pub fn progress_key(run_id: &str) -> String {
    format!("solver:progress:{}", run_id)
}

pub fn result_key(run_id: &str) -> String {
    format!("solver:result:{}", run_id)
}

pub fn idempotency_key(key: &str) -> String {
    format!("idempotency:{}", key)
}

/// Get/set store with TTL semantics.
#[async_trait]
pub trait KeyedStore: Send + Sync {
    /// Fetch a live value. Expired entries behave as absent.
    async fn get(&self, key: &str) -> Option<String>;

    /// Store a value with a TTL.
    async fn set(&self, key: &str, value: String, ttl: Duration);

    /// Store a value only if the key is absent (or expired). Returns whether
    /// the write happened.
    async fn set_nx(&self, key: &str, value: String, ttl: Duration) -> bool;

    async fn delete(&self, key: &str);

    /// Live keys with the given prefix.
    async fn keys_with_prefix(&self, prefix: &str) -> Vec<String>;
}

pub type SharedKeyedStore = Arc<dyn KeyedStore>;

/// In-memory keyed store driven by the injected clock.
pub struct InMemoryKeyedStore {
    entries: RwLock<HashMap<String, Entry>>,
    clock: SharedClock,
}

struct Entry {
    value: String,
    expires_at: DateTime<Utc>,
}

impl InMemoryKeyedStore {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
        }
    }

    fn is_live(&self, entry: &Entry, now: DateTime<Utc>) -> bool {
        entry.expires_at > now
    }

    /// Drop expired entries. Called opportunistically on writes.
    fn sweep(&self, now: DateTime<Utc>) {
        self.entries.write().retain(|_, e| e.expires_at > now);
    }
}

#[async_trait]
impl KeyedStore for InMemoryKeyedStore {
    async fn get(&self, key: &str) -> Option<String> {
        let now = self.clock.now();
        let entries = self.entries.read();
        entries
            .get(key)
            .filter(|e| self.is_live(e, now))
            .map(|e| e.value.clone())
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) {
        let now = self.clock.now();
        self.sweep(now);
        self.entries.write().insert(
            key.to_string(),
            Entry {
                value,
                expires_at: now + ttl,
            },
        );
    }

    async fn set_nx(&self, key: &str, value: String, ttl: Duration) -> bool {
        let now = self.clock.now();
        let mut entries = self.entries.write();
        match entries.get(key) {
            Some(existing) if existing.expires_at > now => false,
            _ => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        value,
                        expires_at: now + ttl,
                    },
                );
                true
            }
        }
    }

    async fn delete(&self, key: &str) {
        self.entries.write().remove(key);
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let now = self.clock.now();
        self.entries
            .read()
            .iter()
            .filter(|(k, e)| k.starts_with(prefix) && self.is_live(e, now))
            .map(|(k, _)| k.clone())
            .collect()
    }
}
