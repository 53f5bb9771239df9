//! Assignments: a person scheduled to a rotation in a block.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::block::BlockId;
use super::person::PersonId;
use super::rotation::RotationId;
use super::swap::SwapId;

crate::define_id_type!(i64, AssignmentId);

/// The fact that a person works a rotation in a block.
///
/// At most one assignment may exist per (person, block); the repository
/// enforces the unique key and the context builder re-checks it on load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub id: AssignmentId,
    pub person_id: PersonId,
    pub block_id: BlockId,
    pub rotation_id: RotationId,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    /// Solver run that produced this assignment, when applicable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_run_id: Option<String>,
    /// Swap operation that last moved this assignment, when applicable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_swap_id: Option<SwapId>,
    /// Called-in hours for at-home call, when the caller actualizes them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actualized_hours: Option<f64>,
}

impl Assignment {
    pub fn new(
        id: impl Into<AssignmentId>,
        person_id: impl Into<PersonId>,
        block_id: impl Into<BlockId>,
        rotation_id: impl Into<RotationId>,
        created_at: DateTime<Utc>,
        created_by: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            person_id: person_id.into(),
            block_id: block_id.into(),
            rotation_id: rotation_id.into(),
            created_at,
            created_by: created_by.into(),
            source_run_id: None,
            source_swap_id: None,
            actualized_hours: None,
        }
    }

    pub fn from_run(mut self, run_id: impl Into<String>) -> Self {
        self.source_run_id = Some(run_id.into());
        self
    }

    /// Key under the unique-assignment invariant.
    pub fn slot_key(&self) -> (PersonId, BlockId) {
        (self.person_id, self.block_id)
    }
}
