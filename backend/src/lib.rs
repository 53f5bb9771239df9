//! # RMS Core
//!
//! Scheduling core for a medical residency workforce management system: a
//! constraint-backed solver that assigns trainees and faculty to half-day
//! clinical blocks, a rolling-window duty-hour compliance validator, an
//! atomic swap engine with compatibility scoring and rollback, and a
//! resilience analyzer scoring schedules against personnel-loss scenarios.
//!
//! ## Architecture
//!
//! The crate is organized into layered modules:
//!
//! - [`models`]: domain entities (people, blocks, rotations, assignments,
//!   absences, swap records) and the read-only [`models::SchedulingContext`]
//!   aggregate every subsystem consumes
//! - [`constraints`]: the four-tier constraint library
//!   (regulatory, institutional, soft, optimization)
//! - [`validator`]: duty-hour compliance reports over rolling 28-day windows
//! - [`engine`]: solver orchestration with algorithm dispatch, an abortable
//!   progress protocol, idempotent retries, and a backup safety gate
//! - [`swap`]: the transactional swap state machine, matching algorithms,
//!   and the emergency-coverage procedure
//! - [`resilience`]: utilization, N-1/N-2 contingency, churn, and ripple
//!   metrics
//! - [`db`]: collaborator contracts (assignment store, ephemeral keyed
//!   store, backup marker, clock, notifier) with in-memory implementations
//! - [`config`]: TOML-backed institutional and regulatory parameter tables
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use rms_rust::config::CoreConfig;
//! use rms_rust::db::{
//!     InMemoryBackupMarker, InMemoryKeyedStore, RepositoryFactory, SystemClock,
//! };
//! use rms_rust::engine::{Algorithm, SchedulingEngine, SolveConfig};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let clock: rms_rust::db::SharedClock = Arc::new(SystemClock);
//! let repo = RepositoryFactory::create_local(clock.clone());
//! let store = Arc::new(InMemoryKeyedStore::new(clock.clone()));
//! let backup = Arc::new(InMemoryBackupMarker::fresh(clock.clone()));
//! let engine = SchedulingEngine::new(repo.clone(), store, backup, clock, CoreConfig::default());
//!
//! let (ctx, validation) =
//!     rms_rust::db::services::load_context(&repo, "2026-03-09".parse()?, "2026-03-13".parse()?)
//!         .await?;
//! assert!(validation.is_valid());
//! let result = engine
//!     .generate(&ctx, &SolveConfig { algorithm: Algorithm::CpSat, ..Default::default() }, None)
//!     .await?;
//! println!("{}: {} assignments", result.status.as_str(), result.assignments.len());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constraints;
pub mod db;
pub mod engine;
pub mod error;
pub mod models;
pub mod resilience;
pub mod swap;
pub mod validator;

pub use error::{CoreError, CoreResult};
