//! Persistence and collaborator contracts.
//!
//! Everything the core needs from the outside world lives behind the traits
//! in this module: the transactional assignment store, the ephemeral keyed
//! store, the backup freshness marker, the notification dispatcher, and the
//! injectable clock.

pub mod backup;
pub mod checksum;
pub mod clock;
pub mod error;
pub mod factory;
pub mod idempotency;
pub mod keyed_store;
pub mod notify;
pub mod repo_config;
pub mod repositories;
pub mod repository;
pub mod services;

pub use backup::{BackupMarker, InMemoryBackupMarker, SharedBackupMarker};
pub use clock::{Clock, FakeClock, SharedClock, SystemClock};
pub use error::{ErrorContext, RepositoryError, RepositoryResult};
pub use factory::{RepositoryFactory, RepositoryType};
pub use idempotency::{Claim, IdempotencyLayer, IdempotencyRecord, IdempotencyStatus};
pub use keyed_store::{InMemoryKeyedStore, KeyedStore, SharedKeyedStore};
pub use notify::{
    LogDispatcher, NotificationDispatcher, NotificationEvent, RecordingDispatcher, SharedDispatcher,
};
pub use repo_config::RepositoryConfig;
pub use repository::{
    AssignmentMove, AuditRow, MutationCause, ScheduleRepository, SharedRepository,
};
