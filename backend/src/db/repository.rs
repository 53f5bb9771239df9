//! Repository trait for the assignment store.
//!
//! The trait is the seam between the core and persistence. Implementations
//! must provide snapshot-consistent reads, atomic multi-row updates, and
//! per-row version counters on assignments (the optimistic-locking basis for
//! conflict-safe swap execution).

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::error::RepositoryResult;
use crate::models::{
    Absence, Assignment, AssignmentId, Block, Person, PersonId, RotationTemplate, SwapId,
    SwapRecord, SwapStatus,
};

/// One row-level reassignment inside an atomic move set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentMove {
    pub assignment_id: AssignmentId,
    /// Version observed when the move was planned. A mismatch at execution
    /// aborts the whole move set.
    pub expected_version: u64,
    pub new_person: PersonId,
}

/// Causal link recorded with every assignment mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "cause", content = "id")]
pub enum MutationCause {
    Swap(SwapId),
    SolverRun(String),
    Manual(String),
}

/// Audit row linking a mutation to its cause and actor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRow {
    pub id: i64,
    pub assignment_id: AssignmentId,
    pub action: String,
    pub actor: String,
    pub cause: MutationCause,
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub details: serde_json::Value,
}

/// Repository for schedule persistence.
///
/// # Thread Safety
/// Implementations must be `Send + Sync`.
///
/// # Error Handling
/// All methods return `RepositoryResult<T>`; optimistic-concurrency failures
/// use the `Conflict` variant, which is retryable.
#[async_trait]
pub trait ScheduleRepository: Send + Sync + std::fmt::Debug {
    // ==================== Health ====================

    /// Check whether the store is reachable and healthy.
    async fn health_check(&self) -> RepositoryResult<bool>;

    // ==================== Roster ====================

    async fn store_people(&self, people: &[Person]) -> RepositoryResult<usize>;
    async fn list_people(&self) -> RepositoryResult<Vec<Person>>;

    async fn store_rotations(&self, rotations: &[RotationTemplate]) -> RepositoryResult<usize>;
    async fn list_rotations(&self) -> RepositoryResult<Vec<RotationTemplate>>;

    async fn store_blocks(&self, blocks: &[Block]) -> RepositoryResult<usize>;
    /// Blocks within the inclusive date range, chronological.
    async fn list_blocks(&self, start: NaiveDate, end: NaiveDate) -> RepositoryResult<Vec<Block>>;

    async fn store_absences(&self, absences: &[Absence]) -> RepositoryResult<usize>;
    async fn list_absences(&self, start: NaiveDate, end: NaiveDate)
        -> RepositoryResult<Vec<Absence>>;

    // ==================== Assignments ====================

    /// Assignments whose block date falls inside the inclusive range.
    async fn list_assignments(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> RepositoryResult<Vec<Assignment>>;

    async fn get_assignment(&self, id: AssignmentId) -> RepositoryResult<Assignment>;

    /// Current optimistic-lock version of an assignment row.
    async fn assignment_version(&self, id: AssignmentId) -> RepositoryResult<u64>;

    /// Insert a batch atomically. Fresh ids are assigned to entries with id
    /// zero. Fails the whole batch if any (person, block) slot is taken.
    async fn insert_assignments(
        &self,
        assignments: &[Assignment],
        cause: MutationCause,
        actor: &str,
    ) -> RepositoryResult<Vec<Assignment>>;

    /// Delete a batch atomically.
    async fn delete_assignments(
        &self,
        ids: &[AssignmentId],
        cause: MutationCause,
        actor: &str,
    ) -> RepositoryResult<usize>;

    /// Apply a move set as a single transaction.
    ///
    /// Every move's `expected_version` must match the current row version,
    /// and the resulting state must keep the unique (person, block) key.
    /// On any mismatch the whole set is rejected with `Conflict` and no row
    /// changes.
    async fn execute_moves(
        &self,
        moves: &[AssignmentMove],
        cause: MutationCause,
        actor: &str,
    ) -> RepositoryResult<Vec<AuditRow>>;

    // ==================== Swap records ====================

    /// Persist a new swap record; assigns the id.
    async fn create_swap(&self, record: SwapRecord) -> RepositoryResult<SwapRecord>;

    async fn get_swap(&self, id: SwapId) -> RepositoryResult<SwapRecord>;

    /// Update a swap record, compare-and-swap on the current status. The
    /// status check is the exclusive-lock equivalent for swap execution: a
    /// concurrent transition loses with `Conflict`.
    async fn update_swap(
        &self,
        record: &SwapRecord,
        expected_status: SwapStatus,
    ) -> RepositoryResult<SwapRecord>;

    async fn list_swaps_with_status(
        &self,
        status: SwapStatus,
    ) -> RepositoryResult<Vec<SwapRecord>>;

    // ==================== Audit ====================

    async fn audit_for_swap(&self, id: SwapId) -> RepositoryResult<Vec<AuditRow>>;
    async fn audit_for_run(&self, run_id: &str) -> RepositoryResult<Vec<AuditRow>>;
}

pub type SharedRepository = std::sync::Arc<dyn ScheduleRepository>;
