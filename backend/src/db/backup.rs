//! Backup freshness marker.
//!
//! Backups themselves are produced by an external collaborator; the core only
//! checks the freshness marker before any mutating solver run.

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use std::sync::Arc;

use super::clock::{Clock, SharedClock};

pub trait BackupMarker: Send + Sync {
    /// Age of the most recent backup, or `None` if no backup exists.
    fn latest_backup_age(&self) -> Option<Duration>;
}

pub type SharedBackupMarker = Arc<dyn BackupMarker>;

/// In-memory marker for local operation and tests.
pub struct InMemoryBackupMarker {
    last_backup_at: RwLock<Option<DateTime<Utc>>>,
    clock: SharedClock,
}

impl InMemoryBackupMarker {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            last_backup_at: RwLock::new(None),
            clock,
        }
    }

    /// Marker that reports a backup taken just now.
    pub fn fresh(clock: SharedClock) -> Self {
        let marker = Self::new(clock);
        marker.record_backup();
        marker
    }

    pub fn record_backup(&self) {
        *self.last_backup_at.write() = Some(self.clock.now());
    }

    pub fn set_backup_time(&self, at: DateTime<Utc>) {
        *self.last_backup_at.write() = Some(at);
    }
}

impl BackupMarker for InMemoryBackupMarker {
    fn latest_backup_age(&self) -> Option<Duration> {
        self.last_backup_at
            .read()
            .map(|at| self.clock.now() - at)
    }
}
