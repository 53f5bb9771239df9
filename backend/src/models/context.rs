//! The read-only aggregate handed to solver, validator, and swap engine.
//!
//! A `SchedulingContext` is built by the caller from repository reads before
//! invoking any subsystem. Construction canonicalizes inputs, builds the
//! person/block indices every subsystem needs, and checks the structural
//! invariants (unique assignment per slot, absence exclusion, eligibility).
//! Subsystems borrow the context immutably for the duration of a run.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use super::absence::Absence;
use super::assignment::Assignment;
use super::block::{Block, BlockId};
use super::person::{Person, PersonId};
use super::rotation::{ActivityType, RotationId, RotationTemplate};

/// Per-person scheduling preferences.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersonPreferences {
    /// Hard blackouts: dates the person must not receive solver assignments.
    #[serde(default)]
    pub blackout_dates: BTreeSet<NaiveDate>,
    /// Soft weights per rotation template; higher is more preferred.
    #[serde(default)]
    pub template_weights: HashMap<RotationId, f64>,
}

/// A structural problem found while building a context.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextViolation {
    pub rule: &'static str,
    pub message: String,
    pub person_id: Option<PersonId>,
    pub block_id: Option<BlockId>,
}

/// Errors and warnings collected during context construction.
///
/// Errors are invariant breaches the caller must resolve; warnings flag
/// pre-existing conflicts (e.g. assignments inside an absence window) that
/// are reported but tolerated.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ContextValidation {
    pub errors: Vec<ContextViolation>,
    pub warnings: Vec<ContextViolation>,
}

impl ContextValidation {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Read-only aggregate of everything a run needs.
#[derive(Debug, Clone)]
pub struct SchedulingContext {
    pub horizon: (NaiveDate, NaiveDate),
    pub people: Vec<Person>,
    pub blocks: Vec<Block>,
    pub rotations: Vec<RotationTemplate>,
    pub existing_assignments: Vec<Assignment>,
    pub absences: Vec<Absence>,
    pub preferences: HashMap<PersonId, PersonPreferences>,

    // Derived indices, computed once at construction.
    person_index: HashMap<PersonId, usize>,
    block_index: HashMap<BlockId, usize>,
    rotation_index: HashMap<RotationId, usize>,
    by_person: HashMap<PersonId, Vec<usize>>,
    by_block: HashMap<BlockId, Vec<usize>>,
}

impl SchedulingContext {
    /// Build a context, canonicalizing inputs and checking invariants.
    ///
    /// Returns the context together with the validation outcome. Invariant
    /// errors do not prevent construction (solver behavior on inconsistent
    /// input is unspecified); callers that need a guarantee should refuse to
    /// proceed when `validation.is_valid()` is false.
    pub fn build(
        horizon: (NaiveDate, NaiveDate),
        people: Vec<Person>,
        blocks: Vec<Block>,
        rotations: Vec<RotationTemplate>,
        existing_assignments: Vec<Assignment>,
        absences: Vec<Absence>,
        preferences: HashMap<PersonId, PersonPreferences>,
    ) -> (Self, ContextValidation) {
        let mut ctx = Self {
            horizon,
            people,
            blocks,
            rotations,
            existing_assignments,
            absences,
            preferences,
            person_index: HashMap::new(),
            block_index: HashMap::new(),
            rotation_index: HashMap::new(),
            by_person: HashMap::new(),
            by_block: HashMap::new(),
        };
        // Blocks must be chronological with AM before PM.
        ctx.blocks
            .sort_by_key(|b| (b.date, b.session, b.id.value()));
        ctx.reindex();
        let validation = ctx.check_invariants();
        (ctx, validation)
    }

    fn reindex(&mut self) {
        self.person_index = self
            .people
            .iter()
            .enumerate()
            .map(|(i, p)| (p.id, i))
            .collect();
        self.block_index = self
            .blocks
            .iter()
            .enumerate()
            .map(|(i, b)| (b.id, i))
            .collect();
        self.rotation_index = self
            .rotations
            .iter()
            .enumerate()
            .map(|(i, r)| (r.id, i))
            .collect();
        self.by_person.clear();
        self.by_block.clear();
        for (i, a) in self.existing_assignments.iter().enumerate() {
            self.by_person.entry(a.person_id).or_default().push(i);
            self.by_block.entry(a.block_id).or_default().push(i);
        }
    }

    fn check_invariants(&self) -> ContextValidation {
        let mut validation = ContextValidation::default();

        // Unique (person, block) slot.
        let mut seen: HashMap<(PersonId, BlockId), &Assignment> = HashMap::new();
        for a in &self.existing_assignments {
            if let Some(first) = seen.insert(a.slot_key(), a) {
                validation.errors.push(ContextViolation {
                    rule: "unique_assignment",
                    message: format!(
                        "Person {} holds assignments {} and {} in block {}",
                        a.person_id, first.id, a.id, a.block_id
                    ),
                    person_id: Some(a.person_id),
                    block_id: Some(a.block_id),
                });
            }
        }

        for a in &self.existing_assignments {
            let block = match self.block(a.block_id) {
                Some(b) => b,
                None => {
                    validation.errors.push(ContextViolation {
                        rule: "dangling_block",
                        message: format!("Assignment {} references unknown block {}", a.id, a.block_id),
                        person_id: Some(a.person_id),
                        block_id: Some(a.block_id),
                    });
                    continue;
                }
            };
            let rotation = match self.rotation(a.rotation_id) {
                Some(r) => r,
                None => {
                    validation.errors.push(ContextViolation {
                        rule: "dangling_rotation",
                        message: format!(
                            "Assignment {} references unknown rotation {}",
                            a.id, a.rotation_id
                        ),
                        person_id: Some(a.person_id),
                        block_id: Some(a.block_id),
                    });
                    continue;
                }
            };
            let person = match self.person(a.person_id) {
                Some(p) => p,
                None => {
                    validation.errors.push(ContextViolation {
                        rule: "dangling_person",
                        message: format!("Assignment {} references unknown person {}", a.id, a.person_id),
                        person_id: Some(a.person_id),
                        block_id: Some(a.block_id),
                    });
                    continue;
                }
            };

            // Eligibility.
            if !rotation.eligibility.matches(person) {
                validation.errors.push(ContextViolation {
                    rule: "eligibility",
                    message: format!(
                        "Person {} is not eligible for rotation {} in block {}",
                        person.id, rotation.name, block.id
                    ),
                    person_id: Some(person.id),
                    block_id: Some(block.id),
                });
            }

            // Absence exclusion. Pre-existing overlaps are conflicts, not errors.
            if rotation.activity_type != ActivityType::Absence
                && self.is_absent(a.person_id, block.date)
            {
                validation.warnings.push(ContextViolation {
                    rule: "absence_exclusion",
                    message: format!(
                        "Person {} has a non-absence assignment on {} inside an absence window",
                        person.id, block.date
                    ),
                    person_id: Some(person.id),
                    block_id: Some(block.id),
                });
            }
        }

        validation
    }

    // ==================== Lookups ====================

    pub fn person(&self, id: PersonId) -> Option<&Person> {
        self.person_index.get(&id).map(|&i| &self.people[i])
    }

    pub fn block(&self, id: BlockId) -> Option<&Block> {
        self.block_index.get(&id).map(|&i| &self.blocks[i])
    }

    pub fn rotation(&self, id: RotationId) -> Option<&RotationTemplate> {
        self.rotation_index.get(&id).map(|&i| &self.rotations[i])
    }

    /// Assignments held by a person, in input order.
    pub fn assignments_for(&self, person: PersonId) -> impl Iterator<Item = &Assignment> {
        self.by_person
            .get(&person)
            .into_iter()
            .flatten()
            .map(move |&i| &self.existing_assignments[i])
    }

    /// Assignments on a block, in input order.
    pub fn assignments_on(&self, block: BlockId) -> impl Iterator<Item = &Assignment> {
        self.by_block
            .get(&block)
            .into_iter()
            .flatten()
            .map(move |&i| &self.existing_assignments[i])
    }

    /// Whether the person is inside an absence window on the given date.
    pub fn is_absent(&self, person: PersonId, date: NaiveDate) -> bool {
        self.absences
            .iter()
            .any(|a| a.person_id == person && a.covers(date))
    }

    /// Whether the date falls on a hard preference blackout for the person.
    pub fn is_blackout(&self, person: PersonId, date: NaiveDate) -> bool {
        self.preferences
            .get(&person)
            .map_or(false, |p| p.blackout_dates.contains(&date))
    }

    /// Blocks a person could hold work in: active days inside the horizon
    /// that are not covered by an absence.
    pub fn assignable_blocks(&self, person: PersonId) -> usize {
        self.blocks
            .iter()
            .filter(|b| !self.is_absent(person, b.date))
            .count()
    }

    /// Duty hours attributed per calendar date for a person.
    pub fn duty_hours_by_date(&self, person: PersonId) -> HashMap<NaiveDate, f64> {
        let mut hours: HashMap<NaiveDate, f64> = HashMap::new();
        for a in self.assignments_for(person) {
            let (block, rotation) = match (self.block(a.block_id), self.rotation(a.rotation_id)) {
                (Some(b), Some(r)) => (b, r),
                _ => continue,
            };
            if rotation.activity_type == ActivityType::Absence {
                continue;
            }
            *hours.entry(block.date).or_default() += rotation.hours_for(a.actualized_hours);
        }
        hours
    }

    /// Calendar dates on which the person is on duty.
    pub fn duty_dates(&self, person: PersonId) -> BTreeSet<NaiveDate> {
        self.assignments_for(person)
            .filter_map(|a| {
                let block = self.block(a.block_id)?;
                let rotation = self.rotation(a.rotation_id)?;
                rotation.activity_type.counts_as_duty().then_some(block.date)
            })
            .collect()
    }

    /// All dates in the horizon, inclusive.
    pub fn horizon_dates(&self) -> Vec<NaiveDate> {
        let (start, end) = self.horizon;
        let mut dates = Vec::new();
        let mut day = start;
        while day <= end {
            dates.push(day);
            day += chrono::Duration::days(1);
        }
        dates
    }

    pub fn total_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Clone of this context with a different assignment set, indices rebuilt.
    pub fn with_assignments(&self, assignments: Vec<Assignment>) -> Self {
        let mut ctx = self.clone();
        ctx.existing_assignments = assignments;
        ctx.reindex();
        ctx
    }
}
