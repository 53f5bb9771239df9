//! Run protocol: progress plane, abort plane, and result storage.
//!
//! Every solver invocation gets a run id. Progress snapshots and abort flags
//! live in the ephemeral keyed store under `solver:progress:{run_id}` and
//! `solver:abort:{run_id}`; results are kept 24 hours under
//! `solver:result:{run_id}`. Progress is monotone per run: a snapshot whose
//! iteration or timestamp would regress is refused.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::db::clock::{Clock, SharedClock};
use crate::db::keyed_store::{
    abort_key, progress_key, result_key, SharedKeyedStore, ABORT_TTL_SECS, PROGRESS_TTL_SECS,
    RESULT_TTL_SECS,
};

/// A point-in-time view of a running (or finished) solve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub run_id: String,
    pub iteration: u64,
    pub best_score: f64,
    pub assignments_count: usize,
    pub violations_count: usize,
    pub status: String,
    pub updated_at: DateTime<Utc>,
}

/// Durable abort request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbortRequest {
    pub reason: String,
    pub requested_by: String,
    pub requested_at: DateTime<Utc>,
}

/// Tracker over the keyed store for run lifecycle state.
#[derive(Clone)]
pub struct RunTracker {
    store: SharedKeyedStore,
    clock: SharedClock,
}

impl RunTracker {
    pub fn new(store: SharedKeyedStore, clock: SharedClock) -> Self {
        Self { store, clock }
    }

    pub fn new_run_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }

    /// Request an abort. Ignored when the run already has a stored result:
    /// aborts after completion are no-ops.
    pub async fn request_abort(&self, run_id: &str, reason: &str, requested_by: &str) -> bool {
        if self.store.get(&result_key(run_id)).await.is_some() {
            log::info!("abort for completed run {} ignored", run_id);
            return false;
        }
        let request = AbortRequest {
            reason: reason.to_string(),
            requested_by: requested_by.to_string(),
            requested_at: self.clock.now(),
        };
        let serialized = serde_json::to_string(&request).unwrap_or_else(|_| reason.to_string());
        self.store
            .set(
                &abort_key(run_id),
                serialized,
                Duration::seconds(ABORT_TTL_SECS),
            )
            .await;
        true
    }

    pub async fn abort_requested(&self, run_id: &str) -> Option<AbortRequest> {
        let raw = self.store.get(&abort_key(run_id)).await?;
        serde_json::from_str(&raw).ok()
    }

    /// Publish a progress snapshot, enforcing monotonicity in iteration and
    /// timestamp. Returns whether the snapshot was accepted.
    pub async fn publish_progress(&self, snapshot: &ProgressSnapshot) -> bool {
        if let Some(current) = self.progress(&snapshot.run_id).await {
            if snapshot.iteration < current.iteration || snapshot.updated_at < current.updated_at {
                log::debug!(
                    "refusing regressive progress for run {} (iteration {} < {})",
                    snapshot.run_id,
                    snapshot.iteration,
                    current.iteration
                );
                return false;
            }
        }
        if let Ok(serialized) = serde_json::to_string(snapshot) {
            self.store
                .set(
                    &progress_key(&snapshot.run_id),
                    serialized,
                    Duration::seconds(PROGRESS_TTL_SECS),
                )
                .await;
            true
        } else {
            false
        }
    }

    pub async fn progress(&self, run_id: &str) -> Option<ProgressSnapshot> {
        let raw = self.store.get(&progress_key(run_id)).await?;
        serde_json::from_str(&raw).ok()
    }

    /// Run ids with live progress entries.
    pub async fn active_runs(&self) -> Vec<String> {
        let prefix = "solver:progress:";
        self.store
            .keys_with_prefix(prefix)
            .await
            .into_iter()
            .filter_map(|k| k.strip_prefix(prefix).map(|s| s.to_string()))
            .collect()
    }

    /// Store the serialized result for a run (partial or final).
    pub async fn store_result(&self, run_id: &str, result_json: String) {
        self.store
            .set(
                &result_key(run_id),
                result_json,
                Duration::seconds(RESULT_TTL_SECS),
            )
            .await;
    }

    pub async fn stored_result(&self, run_id: &str) -> Option<String> {
        self.store.get(&result_key(run_id)).await
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

/// Shared in-process abort signal, bridged from the keyed store by a watcher
/// task so synchronous solver loops can poll it cheaply.
#[derive(Clone, Default)]
pub struct AbortSignal {
    flag: Arc<AtomicBool>,
    reason: Arc<parking_lot::RwLock<Option<String>>>,
}

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self, reason: impl Into<String>) {
        *self.reason.write() = Some(reason.into());
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn reason(&self) -> Option<String> {
        self.reason.read().clone()
    }
}
