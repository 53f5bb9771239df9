//! Solver problem model and objective.
//!
//! The solver only owns half-day clinic work: block-assigned rotations
//! (inpatient, night float, NICU) arrive pre-assigned in the base set and
//! are never variables. The problem enumerates open coverage units per
//! (block, template) up to the template's target headcount; a solution picks
//! a person (or leaves the unit unfilled) for each.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::constraints::Severity;
use crate::engine::config::ObjectiveWeights;
use crate::models::{
    Assignment, BlockId, PersonId, Role, RotationId, SchedulingContext,
};
use crate::validator::ComplianceValidator;

/// One open coverage unit the solver must try to fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenSlot {
    pub block_id: BlockId,
    pub rotation_id: RotationId,
    /// Index within the (block, template) coverage target.
    pub unit: u32,
}

/// A candidate solution: one optional person per open slot.
pub type Solution = Vec<Option<PersonId>>;

/// The solver's immutable view of the work to do.
pub struct SolverProblem<'a> {
    pub ctx: &'a SchedulingContext,
    /// Preserved assignments: existing plus pre-assigned. Never modified.
    pub base: Vec<Assignment>,
    pub slots: Vec<OpenSlot>,
    /// Eligible people per slot, deterministic order.
    pub candidates: Vec<Vec<PersonId>>,
    created_at: DateTime<Utc>,
}

impl<'a> SolverProblem<'a> {
    /// Build the problem from a context and its preserved base set.
    ///
    /// Returns `None` when no solver-owned templates exist (the
    /// INFEASIBLE_NO_TEMPLATES case).
    pub fn build(
        ctx: &'a SchedulingContext,
        base: Vec<Assignment>,
        created_at: DateTime<Utc>,
    ) -> Option<Self> {
        let templates: Vec<_> = ctx.rotations.iter().filter(|r| r.is_solver_owned()).collect();
        if templates.is_empty() {
            return None;
        }

        // Existing coverage per (block, template).
        let mut covered: HashMap<(BlockId, RotationId), u32> = HashMap::new();
        for a in &base {
            *covered.entry((a.block_id, a.rotation_id)).or_default() += 1;
        }
        // Occupied (person, block) slots in the base set.
        let occupied: Vec<(PersonId, BlockId)> =
            base.iter().map(|a| (a.person_id, a.block_id)).collect();

        let mut slots = Vec::new();
        let mut candidates = Vec::new();
        for block in &ctx.blocks {
            for template in &templates {
                let have = covered
                    .get(&(block.id, template.id))
                    .copied()
                    .unwrap_or(0);
                let needed = template.coverage.target.saturating_sub(have);
                if needed == 0 {
                    continue;
                }
                let eligible: Vec<PersonId> = ctx
                    .people
                    .iter()
                    .filter(|p| {
                        template.eligibility.matches(p)
                            && !ctx.is_absent(p.id, block.date)
                            && !ctx.is_blackout(p.id, block.date)
                            && !occupied.contains(&(p.id, block.id))
                    })
                    .map(|p| p.id)
                    .collect();
                for unit in 0..needed {
                    slots.push(OpenSlot {
                        block_id: block.id,
                        rotation_id: template.id,
                        unit,
                    });
                    candidates.push(eligible.clone());
                }
            }
        }

        Some(Self {
            ctx,
            base,
            slots,
            candidates,
            created_at,
        })
    }

    /// Materialize base plus filled slots into a full assignment set.
    ///
    /// Within a solution the same person is never placed twice in one block;
    /// solvers guarantee this by construction and `materialize` drops any
    /// duplicate defensively rather than emitting an invalid set.
    pub fn materialize(&self, solution: &Solution) -> Vec<Assignment> {
        let mut assignments = self.base.clone();
        let mut taken: Vec<(PersonId, BlockId)> = assignments
            .iter()
            .map(|a| (a.person_id, a.block_id))
            .collect();
        for (slot, choice) in self.slots.iter().zip(solution) {
            if let Some(person) = choice {
                let key = (*person, slot.block_id);
                if taken.contains(&key) {
                    continue;
                }
                taken.push(key);
                assignments.push(Assignment::new(
                    0,
                    *person,
                    slot.block_id,
                    slot.rotation_id,
                    self.created_at,
                    "solver",
                ));
            }
        }
        assignments
    }

    /// Units below the template's minimum coverage for a solution.
    pub fn below_min_units(&self, solution: &Solution) -> u32 {
        let mut filled: HashMap<(BlockId, RotationId), u32> = HashMap::new();
        for a in &self.base {
            *filled.entry((a.block_id, a.rotation_id)).or_default() += 1;
        }
        for (slot, choice) in self.slots.iter().zip(solution) {
            if choice.is_some() {
                *filled.entry((slot.block_id, slot.rotation_id)).or_default() += 1;
            }
        }
        let mut shortfall = 0u32;
        for block in &self.ctx.blocks {
            for template in self.ctx.rotations.iter().filter(|r| r.is_solver_owned()) {
                let have = filled.get(&(block.id, template.id)).copied().unwrap_or(0);
                shortfall += template.coverage.min.saturating_sub(have);
            }
        }
        shortfall
    }

    pub fn empty_solution(&self) -> Solution {
        vec![None; self.slots.len()]
    }
}

/// Score components for a candidate solution. Lower total is better.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Score {
    pub total: f64,
    pub hard_violations: usize,
    pub soft_penalty: f64,
    pub fairness_cost: f64,
    pub coverage_cost: f64,
    pub preference_cost: f64,
}

impl Score {
    pub fn worst() -> Self {
        Self {
            total: f64::INFINITY,
            hard_violations: usize::MAX,
            soft_penalty: f64::INFINITY,
            fairness_cost: f64::INFINITY,
            coverage_cost: f64::INFINITY,
            preference_cost: f64::INFINITY,
        }
    }

    pub fn is_feasible(&self) -> bool {
        self.hard_violations == 0 && self.coverage_cost < 1.0
    }
}

/// Weighted objective over the validator's violation ladder plus coverage,
/// fairness, and preference terms.
pub struct Objective<'a> {
    validator: &'a ComplianceValidator,
    weights: ObjectiveWeights,
    penalty_by_kind: HashMap<String, f64>,
}

impl<'a> Objective<'a> {
    pub fn new(validator: &'a ComplianceValidator, weights: ObjectiveWeights) -> Self {
        let penalty_by_kind = validator
            .constraints()
            .iter()
            .map(|c| (c.name().to_string(), c.penalty_weight()))
            .collect();
        Self {
            validator,
            weights,
            penalty_by_kind,
        }
    }

    pub fn score(&self, problem: &SolverProblem<'_>, solution: &Solution) -> Score {
        let assignments = problem.materialize(solution);
        let report = self.validator.validate_candidate(problem.ctx, &assignments);

        let hard_violations = report
            .violations
            .iter()
            .filter(|v| matches!(v.severity, Severity::Critical | Severity::High))
            .count();
        let soft_penalty: f64 = report
            .violations
            .iter()
            .filter(|v| matches!(v.severity, Severity::Medium | Severity::Low))
            .map(|v| self.penalty_by_kind.get(&v.kind).copied().unwrap_or(1.0))
            .sum();

        // Coverage: units below min are near-hard; unfilled target units are
        // strongly discouraged but not invalidating.
        let below_min = problem.below_min_units(solution) as f64;
        let unfilled = solution.iter().filter(|s| s.is_none()).count() as f64;
        let coverage_cost = below_min;

        // Fairness: trainee load spread over solver-owned work.
        let mut loads: HashMap<PersonId, usize> = HashMap::new();
        for person in problem.ctx.people.iter().filter(|p| p.role == Role::Trainee) {
            loads.insert(person.id, 0);
        }
        for a in &assignments {
            if let Some(load) = loads.get_mut(&a.person_id) {
                *load += 1;
            }
        }
        let fairness_cost = if loads.len() >= 2 {
            let max = loads.values().copied().max().unwrap_or(0) as f64;
            let min = loads.values().copied().min().unwrap_or(0) as f64;
            max - min
        } else {
            0.0
        };

        // Preference: a stated template weight below 1.0 costs the shortfall.
        let mut preference_cost = 0.0;
        for a in &assignments {
            if let Some(prefs) = problem.ctx.preferences.get(&a.person_id) {
                if let Some(&w) = prefs.template_weights.get(&a.rotation_id) {
                    preference_cost += (1.0 - w).max(0.0);
                }
            }
        }

        let total = 10_000.0 * hard_violations as f64
            + 10_000.0 * below_min
            + self.weights.coverage * 500.0 * unfilled
            + soft_penalty
            + self.weights.fairness * 10.0 * fairness_cost
            + self.weights.preference * 10.0 * preference_cost;

        Score {
            total,
            hard_violations,
            soft_penalty,
            fairness_cost,
            coverage_cost,
            preference_cost,
        }
    }
}
