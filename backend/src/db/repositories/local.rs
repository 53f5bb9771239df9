//! In-memory local repository implementation.
//!
//! Stores all data behind a single `RwLock`, which doubles as the
//! transaction boundary: every mutating method takes the write guard once,
//! validates, then applies, so a failed validation leaves no partial state.
//! Suitable for tests and local operation; a persistent backend plugs in
//! behind the same trait.

use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::db::clock::{Clock, SharedClock};
use crate::db::error::{ErrorContext, RepositoryError, RepositoryResult};
use crate::db::repository::{
    AssignmentMove, AuditRow, MutationCause, ScheduleRepository,
};
use crate::models::{
    Absence, Assignment, AssignmentId, Block, BlockId, Person, PersonId, RotationTemplate, SwapId,
    SwapRecord, SwapStatus,
};

/// In-memory repository.
#[derive(Clone)]
pub struct LocalRepository {
    data: Arc<RwLock<LocalData>>,
    clock: SharedClock,
}

impl std::fmt::Debug for LocalRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalRepository").finish_non_exhaustive()
    }
}

struct VersionedAssignment {
    assignment: Assignment,
    version: u64,
}

#[derive(Default)]
struct LocalData {
    people: Vec<Person>,
    rotations: Vec<RotationTemplate>,
    blocks: Vec<Block>,
    absences: Vec<Absence>,

    assignments: HashMap<AssignmentId, VersionedAssignment>,
    swaps: HashMap<SwapId, SwapRecord>,
    audit: Vec<AuditRow>,

    next_assignment_id: i64,
    next_swap_id: i64,
    next_audit_id: i64,

    is_healthy: bool,
}

impl LocalRepository {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            data: Arc::new(RwLock::new(LocalData {
                next_assignment_id: 1,
                next_swap_id: 1,
                next_audit_id: 1,
                is_healthy: true,
                ..Default::default()
            })),
            clock,
        }
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.data.write().is_healthy = healthy;
    }

    fn block_date(data: &LocalData, block_id: BlockId) -> Option<NaiveDate> {
        data.blocks.iter().find(|b| b.id == block_id).map(|b| b.date)
    }

    fn slot_taken(
        data: &LocalData,
        person: PersonId,
        block: BlockId,
        ignore: Option<AssignmentId>,
    ) -> bool {
        data.assignments.values().any(|row| {
            row.assignment.person_id == person
                && row.assignment.block_id == block
                && Some(row.assignment.id) != ignore
        })
    }

    fn push_audit(
        data: &mut LocalData,
        assignment_id: AssignmentId,
        action: &str,
        actor: &str,
        cause: &MutationCause,
        at: chrono::DateTime<chrono::Utc>,
        details: serde_json::Value,
    ) -> AuditRow {
        let row = AuditRow {
            id: data.next_audit_id,
            assignment_id,
            action: action.to_string(),
            actor: actor.to_string(),
            cause: cause.clone(),
            at,
            details,
        };
        data.next_audit_id += 1;
        data.audit.push(row.clone());
        row
    }
}

#[async_trait]
impl ScheduleRepository for LocalRepository {
    async fn health_check(&self) -> RepositoryResult<bool> {
        Ok(self.data.read().is_healthy)
    }

    async fn store_people(&self, people: &[Person]) -> RepositoryResult<usize> {
        let mut data = self.data.write();
        for person in people {
            match data.people.iter_mut().find(|p| p.id == person.id) {
                Some(existing) => *existing = person.clone(),
                None => data.people.push(person.clone()),
            }
        }
        Ok(people.len())
    }

    async fn list_people(&self) -> RepositoryResult<Vec<Person>> {
        Ok(self.data.read().people.clone())
    }

    async fn store_rotations(&self, rotations: &[RotationTemplate]) -> RepositoryResult<usize> {
        let mut data = self.data.write();
        for rotation in rotations {
            match data.rotations.iter_mut().find(|r| r.id == rotation.id) {
                Some(existing) => *existing = rotation.clone(),
                None => data.rotations.push(rotation.clone()),
            }
        }
        Ok(rotations.len())
    }

    async fn list_rotations(&self) -> RepositoryResult<Vec<RotationTemplate>> {
        Ok(self.data.read().rotations.clone())
    }

    async fn store_blocks(&self, blocks: &[Block]) -> RepositoryResult<usize> {
        let mut data = self.data.write();
        for block in blocks {
            if !data.blocks.iter().any(|b| b.id == block.id) {
                data.blocks.push(*block);
            }
        }
        data.blocks.sort_by_key(|b| (b.date, b.session, b.id.value()));
        Ok(blocks.len())
    }

    async fn list_blocks(&self, start: NaiveDate, end: NaiveDate) -> RepositoryResult<Vec<Block>> {
        Ok(self
            .data
            .read()
            .blocks
            .iter()
            .filter(|b| b.date >= start && b.date <= end)
            .copied()
            .collect())
    }

    async fn store_absences(&self, absences: &[Absence]) -> RepositoryResult<usize> {
        let mut data = self.data.write();
        for absence in absences {
            match data.absences.iter_mut().find(|a| a.id == absence.id) {
                Some(existing) => *existing = absence.clone(),
                None => data.absences.push(absence.clone()),
            }
        }
        Ok(absences.len())
    }

    async fn list_absences(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> RepositoryResult<Vec<Absence>> {
        Ok(self
            .data
            .read()
            .absences
            .iter()
            .filter(|a| a.overlaps(start, end))
            .cloned()
            .collect())
    }

    async fn list_assignments(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> RepositoryResult<Vec<Assignment>> {
        let data = self.data.read();
        let mut assignments: Vec<Assignment> = data
            .assignments
            .values()
            .filter(|row| {
                Self::block_date(&data, row.assignment.block_id)
                    .map_or(false, |d| d >= start && d <= end)
            })
            .map(|row| row.assignment.clone())
            .collect();
        assignments.sort_by_key(|a| a.id.value());
        Ok(assignments)
    }

    async fn get_assignment(&self, id: AssignmentId) -> RepositoryResult<Assignment> {
        self.data
            .read()
            .assignments
            .get(&id)
            .map(|row| row.assignment.clone())
            .ok_or_else(|| {
                RepositoryError::not_found(
                    format!("assignment {} does not exist", id),
                    ErrorContext::new("get_assignment")
                        .with_entity("assignment")
                        .with_entity_id(id),
                )
            })
    }

    async fn assignment_version(&self, id: AssignmentId) -> RepositoryResult<u64> {
        self.data
            .read()
            .assignments
            .get(&id)
            .map(|row| row.version)
            .ok_or_else(|| {
                RepositoryError::not_found(
                    format!("assignment {} does not exist", id),
                    ErrorContext::new("assignment_version")
                        .with_entity("assignment")
                        .with_entity_id(id),
                )
            })
    }

    async fn insert_assignments(
        &self,
        assignments: &[Assignment],
        cause: MutationCause,
        actor: &str,
    ) -> RepositoryResult<Vec<Assignment>> {
        let now = self.clock.now();
        let mut data = self.data.write();

        // Validate the whole batch before touching state.
        for a in assignments {
            if Self::slot_taken(&data, a.person_id, a.block_id, None) {
                return Err(RepositoryError::validation(
                    format!(
                        "person {} already has an assignment in block {}",
                        a.person_id, a.block_id
                    ),
                    ErrorContext::new("insert_assignments")
                        .with_entity("assignment")
                        .with_details("unique (person, block) violated"),
                ));
            }
            if a.id.value() != 0 && data.assignments.contains_key(&a.id) {
                return Err(RepositoryError::validation(
                    format!("assignment id {} already exists", a.id),
                    ErrorContext::new("insert_assignments").with_entity_id(a.id),
                ));
            }
        }
        let mut batch_slots: Vec<(PersonId, BlockId)> = Vec::new();
        for a in assignments {
            if batch_slots.contains(&(a.person_id, a.block_id)) {
                return Err(RepositoryError::validation(
                    format!(
                        "batch assigns person {} twice in block {}",
                        a.person_id, a.block_id
                    ),
                    ErrorContext::new("insert_assignments"),
                ));
            }
            batch_slots.push((a.person_id, a.block_id));
        }

        let mut stored = Vec::with_capacity(assignments.len());
        for a in assignments {
            let mut assignment = a.clone();
            if assignment.id.value() == 0 {
                assignment.id = AssignmentId(data.next_assignment_id);
                data.next_assignment_id += 1;
            } else {
                data.next_assignment_id = data.next_assignment_id.max(assignment.id.value() + 1);
            }
            if let MutationCause::Swap(swap_id) = &cause {
                assignment.source_swap_id = Some(*swap_id);
            }
            Self::push_audit(
                &mut data,
                assignment.id,
                "insert",
                actor,
                &cause,
                now,
                serde_json::Value::Null,
            );
            data.assignments.insert(
                assignment.id,
                VersionedAssignment {
                    assignment: assignment.clone(),
                    version: 1,
                },
            );
            stored.push(assignment);
        }
        Ok(stored)
    }

    async fn delete_assignments(
        &self,
        ids: &[AssignmentId],
        cause: MutationCause,
        actor: &str,
    ) -> RepositoryResult<usize> {
        let now = self.clock.now();
        let mut data = self.data.write();
        for id in ids {
            if !data.assignments.contains_key(id) {
                return Err(RepositoryError::not_found(
                    format!("assignment {} does not exist", id),
                    ErrorContext::new("delete_assignments").with_entity_id(*id),
                ));
            }
        }
        for id in ids {
            data.assignments.remove(id);
            Self::push_audit(
                &mut data,
                *id,
                "delete",
                actor,
                &cause,
                now,
                serde_json::Value::Null,
            );
        }
        Ok(ids.len())
    }

    async fn execute_moves(
        &self,
        moves: &[AssignmentMove],
        cause: MutationCause,
        actor: &str,
    ) -> RepositoryResult<Vec<AuditRow>> {
        let now = self.clock.now();
        let mut data = self.data.write();

        // Phase 1: check versions under the lock.
        for m in moves {
            let row = data.assignments.get(&m.assignment_id).ok_or_else(|| {
                RepositoryError::not_found(
                    format!("assignment {} does not exist", m.assignment_id),
                    ErrorContext::new("execute_moves").with_entity_id(m.assignment_id),
                )
            })?;
            if row.version != m.expected_version {
                return Err(RepositoryError::conflict(
                    format!(
                        "assignment {} is at version {} but the move expected {}",
                        m.assignment_id, row.version, m.expected_version
                    ),
                    ErrorContext::new("execute_moves")
                        .with_entity("assignment")
                        .with_entity_id(m.assignment_id),
                ));
            }
        }

        // Phase 2: the final state must keep the unique (person, block) key.
        let mut final_slots: Vec<(PersonId, BlockId)> = data
            .assignments
            .values()
            .filter(|row| !moves.iter().any(|m| m.assignment_id == row.assignment.id))
            .map(|row| (row.assignment.person_id, row.assignment.block_id))
            .collect();
        for m in moves {
            let block = data.assignments[&m.assignment_id].assignment.block_id;
            let slot = (m.new_person, block);
            if final_slots.contains(&slot) {
                return Err(RepositoryError::validation(
                    format!(
                        "move would give person {} two assignments in block {}",
                        m.new_person, block
                    ),
                    ErrorContext::new("execute_moves"),
                ));
            }
            final_slots.push(slot);
        }

        // Phase 3: apply and audit.
        let mut audit_rows = Vec::with_capacity(moves.len());
        for m in moves {
            let row = data
                .assignments
                .get_mut(&m.assignment_id)
                .expect("checked in phase 1");
            let old_person = row.assignment.person_id;
            row.assignment.person_id = m.new_person;
            if let MutationCause::Swap(swap_id) = &cause {
                row.assignment.source_swap_id = Some(*swap_id);
            }
            row.version += 1;
            let details = serde_json::json!({
                "from_person": old_person,
                "to_person": m.new_person,
            });
            let audit = Self::push_audit(
                &mut data,
                m.assignment_id,
                "reassign",
                actor,
                &cause,
                now,
                details,
            );
            audit_rows.push(audit);
        }
        Ok(audit_rows)
    }

    async fn create_swap(&self, mut record: SwapRecord) -> RepositoryResult<SwapRecord> {
        let mut data = self.data.write();
        record.id = SwapId(data.next_swap_id);
        data.next_swap_id += 1;
        data.swaps.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get_swap(&self, id: SwapId) -> RepositoryResult<SwapRecord> {
        self.data.read().swaps.get(&id).cloned().ok_or_else(|| {
            RepositoryError::not_found(
                format!("swap {} does not exist", id),
                ErrorContext::new("get_swap").with_entity("swap_record").with_entity_id(id),
            )
        })
    }

    async fn update_swap(
        &self,
        record: &SwapRecord,
        expected_status: SwapStatus,
    ) -> RepositoryResult<SwapRecord> {
        let mut data = self.data.write();
        let current = data.swaps.get(&record.id).ok_or_else(|| {
            RepositoryError::not_found(
                format!("swap {} does not exist", record.id),
                ErrorContext::new("update_swap").with_entity_id(record.id),
            )
        })?;
        if current.status != expected_status {
            return Err(RepositoryError::conflict(
                format!(
                    "swap {} is {} but the update expected {}",
                    record.id,
                    current.status.as_str(),
                    expected_status.as_str()
                ),
                ErrorContext::new("update_swap")
                    .with_entity("swap_record")
                    .with_entity_id(record.id),
            ));
        }
        data.swaps.insert(record.id, record.clone());
        Ok(record.clone())
    }

    async fn list_swaps_with_status(
        &self,
        status: SwapStatus,
    ) -> RepositoryResult<Vec<SwapRecord>> {
        let mut swaps: Vec<SwapRecord> = self
            .data
            .read()
            .swaps
            .values()
            .filter(|s| s.status == status)
            .cloned()
            .collect();
        swaps.sort_by_key(|s| s.id.value());
        Ok(swaps)
    }

    async fn audit_for_swap(&self, id: SwapId) -> RepositoryResult<Vec<AuditRow>> {
        Ok(self
            .data
            .read()
            .audit
            .iter()
            .filter(|row| matches!(row.cause, MutationCause::Swap(s) if s == id))
            .cloned()
            .collect())
    }

    async fn audit_for_run(&self, run_id: &str) -> RepositoryResult<Vec<AuditRow>> {
        Ok(self
            .data
            .read()
            .audit
            .iter()
            .filter(|row| matches!(&row.cause, MutationCause::SolverRun(r) if r == run_id))
            .cloned()
            .collect())
    }
}
