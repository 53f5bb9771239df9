//! Idempotency layer over the keyed store.
//!
//! A request carries a caller-supplied key; the stored record pins the body
//! hash and the response. Retries with the same (key, body-hash) replay the
//! stored response byte-identically until expiry; the same key with a
//! different body fails with a dedicated conflict. Concurrent duplicates
//! race on an atomic claim so exactly one performs the side effect.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use super::checksum;
use super::keyed_store::{idempotency_key, SharedKeyedStore};
use crate::error::{CoreError, CoreResult};

/// Default idempotency record lifetime.
pub const IDEMPOTENCY_TTL_SECS: i64 = 86_400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IdempotencyStatus {
    Pending,
    Completed,
}

/// Stored record for one idempotency key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub key: String,
    pub body_hash: String,
    pub status: IdempotencyStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
}

/// Outcome of attempting to claim an idempotency key.
#[derive(Debug, Clone, PartialEq)]
pub enum Claim {
    /// This caller owns the side effect and must call `complete` (or
    /// `release` on failure).
    Acquired,
    /// A completed response exists; return it verbatim.
    Replay(String),
    /// Another caller holds the key with the same body and has not finished.
    InFlight,
}

pub struct IdempotencyLayer {
    store: SharedKeyedStore,
    ttl: Duration,
}

impl IdempotencyLayer {
    pub fn new(store: SharedKeyedStore) -> Self {
        Self {
            store,
            ttl: Duration::seconds(IDEMPOTENCY_TTL_SECS),
        }
    }

    pub fn with_ttl(store: SharedKeyedStore, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Hash a request body for key matching.
    pub fn hash_body<T: Serialize + std::fmt::Debug>(body: &T) -> String {
        checksum::body_hash(body)
    }

    /// Attempt to claim `key` for a request with `body_hash`.
    ///
    /// Exactly one concurrent caller acquires a fresh key. A key held with a
    /// different body hash fails with `IdempotencyConflict` whatever its
    /// status.
    pub async fn claim(&self, key: &str, body_hash: &str) -> CoreResult<Claim> {
        let storage_key = idempotency_key(key);
        let pending = IdempotencyRecord {
            key: key.to_string(),
            body_hash: body_hash.to_string(),
            status: IdempotencyStatus::Pending,
            response: None,
        };
        let serialized = serde_json::to_string(&pending)
            .map_err(|e| CoreError::internal(e.to_string(), key.to_string()))?;

        if self.store.set_nx(&storage_key, serialized, self.ttl).await {
            return Ok(Claim::Acquired);
        }

        let existing = match self.store.get(&storage_key).await {
            Some(raw) => raw,
            // Raced with an expiry between set_nx and get; try once more.
            None => {
                let pending = serde_json::to_string(&IdempotencyRecord {
                    key: key.to_string(),
                    body_hash: body_hash.to_string(),
                    status: IdempotencyStatus::Pending,
                    response: None,
                })
                .map_err(|e| CoreError::internal(e.to_string(), key.to_string()))?;
                if self.store.set_nx(&storage_key, pending, self.ttl).await {
                    return Ok(Claim::Acquired);
                }
                self.store.get(&storage_key).await.unwrap_or_default()
            }
        };

        let record: IdempotencyRecord = serde_json::from_str(&existing)
            .map_err(|e| CoreError::internal(e.to_string(), key.to_string()))?;

        if record.body_hash != body_hash {
            return Err(CoreError::IdempotencyConflict(format!(
                "idempotency key {} was already used with a different body",
                key
            )));
        }
        match record.status {
            IdempotencyStatus::Completed => Ok(Claim::Replay(record.response.unwrap_or_default())),
            IdempotencyStatus::Pending => Ok(Claim::InFlight),
        }
    }

    /// Store the response for an acquired key. Later claims replay it.
    pub async fn complete(&self, key: &str, body_hash: &str, response: String) -> CoreResult<()> {
        let record = IdempotencyRecord {
            key: key.to_string(),
            body_hash: body_hash.to_string(),
            status: IdempotencyStatus::Completed,
            response: Some(response),
        };
        let serialized = serde_json::to_string(&record)
            .map_err(|e| CoreError::internal(e.to_string(), key.to_string()))?;
        self.store
            .set(&idempotency_key(key), serialized, self.ttl)
            .await;
        Ok(())
    }

    /// Release a claimed key after a failure so a retry can run the side
    /// effect again.
    pub async fn release(&self, key: &str) {
        self.store.delete(&idempotency_key(key)).await;
    }

    /// Wait for an in-flight duplicate to complete, polling the store.
    pub async fn await_response(
        &self,
        key: &str,
        body_hash: &str,
        timeout: std::time::Duration,
    ) -> CoreResult<String> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match self.claim(key, body_hash).await? {
                Claim::Replay(response) => return Ok(response),
                Claim::Acquired => {
                    // The holder released after a failure. Hand the key back
                    // and tell the caller to run the request themselves.
                    self.release(key).await;
                    return Err(CoreError::ConcurrencyConflict(format!(
                        "in-flight request {} failed; retry the operation",
                        key
                    )));
                }
                Claim::InFlight => {
                    if tokio::time::Instant::now() >= deadline {
                        return Err(CoreError::internal(
                            format!("timed out waiting for in-flight request {}", key),
                            key.to_string(),
                        ));
                    }
                    tokio::time::sleep(std::time::Duration::from_millis(25)).await;
                }
            }
        }
    }
}
