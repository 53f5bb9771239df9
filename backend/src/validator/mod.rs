//! Duty-hour compliance validation.
//!
//! The validator evaluates the full constraint ladder against a schedule and
//! produces a [`ComplianceReport`]. It never mutates state, and a fault
//! inside one constraint is contained: it becomes a `VALIDATOR_FAULT`
//! violation while the remaining constraints still run.

pub mod report;

#[cfg(test)]
mod validator_tests;

use chrono::Duration;
use std::collections::{HashMap, HashSet};

use crate::config::CoreConfig;
use crate::constraints::{
    default_constraint_set, Constraint, ScheduleView, Severity, Violation,
};
use crate::models::{Assignment, BlockId, Role, SchedulingContext};

pub use report::{ComplianceReport, PersonMetrics};

/// Evaluates the constraint ladder against schedules.
pub struct ComplianceValidator {
    constraints: Vec<Constraint>,
    weekly_limit: f64,
    window_days: u32,
}

impl ComplianceValidator {
    /// Build a validator with the full default constraint set from config.
    pub fn new(config: &CoreConfig) -> Self {
        Self {
            constraints: default_constraint_set(config),
            weekly_limit: config.limits.max_weekly_hours,
            window_days: config.limits.rolling_window_days,
        }
    }

    /// Validator over an explicit constraint set.
    pub fn with_constraints(constraints: Vec<Constraint>, config: &CoreConfig) -> Self {
        Self {
            constraints,
            weekly_limit: config.limits.max_weekly_hours,
            window_days: config.limits.rolling_window_days,
        }
    }

    /// Validate the context's own assignment set.
    pub fn validate(&self, ctx: &SchedulingContext) -> ComplianceReport {
        self.validate_candidate(ctx, &ctx.existing_assignments)
    }

    /// Validate an arbitrary candidate assignment set against the context.
    pub fn validate_candidate(
        &self,
        ctx: &SchedulingContext,
        assignments: &[Assignment],
    ) -> ComplianceReport {
        let view = ScheduleView::new(ctx, assignments);
        let mut violations = Vec::new();

        for constraint in &self.constraints {
            match constraint.evaluate(&view) {
                Ok(mut found) => violations.append(&mut found),
                Err(fault) => {
                    log::warn!(
                        "constraint {} faulted during evaluation: {}",
                        fault.constraint,
                        fault.message
                    );
                    violations.push(
                        Violation::new(
                            "VALIDATOR_FAULT",
                            Severity::High,
                            format!(
                                "Constraint {} failed to evaluate: {}",
                                fault.constraint, fault.message
                            ),
                        )
                        .with_details(serde_json::json!({
                            "constraint": fault.constraint,
                        })),
                    );
                }
            }
        }

        let violating_blocks = self.violating_blocks(&view, &violations);
        let total_blocks = ctx.total_blocks();
        let per_person = self.per_person_metrics(&view, &violations);

        ComplianceReport {
            compliance_rate: report::compliance_rate(violating_blocks.len(), total_blocks),
            violations,
            per_person,
            total_blocks,
            violating_blocks: violating_blocks.len(),
        }
    }

    /// Blocks implicated in violations. Explicitly referenced blocks count
    /// directly; person-scoped violations without a block implicate the
    /// person's assigned blocks.
    fn violating_blocks(
        &self,
        view: &ScheduleView<'_>,
        violations: &[Violation],
    ) -> HashSet<BlockId> {
        let mut blocks = HashSet::new();
        for v in violations {
            if let Some(block) = v.block_id {
                blocks.insert(block);
            } else if let Some(person) = v.person_id {
                for a in view.assignments_for(person) {
                    blocks.insert(a.block_id);
                }
            }
        }
        blocks
    }

    fn per_person_metrics(
        &self,
        view: &ScheduleView<'_>,
        violations: &[Violation],
    ) -> HashMap<crate::models::PersonId, PersonMetrics> {
        let horizon_days = view.ctx.horizon_dates().len() as u32;
        let weeks_per_window = self.window_days as f64 / 7.0;
        let mut metrics = HashMap::new();

        for person in &view.ctx.people {
            if person.role != Role::Trainee {
                continue;
            }
            let hours = view.duty_hours_by_date(person.id);
            let total: f64 = hours.values().sum();

            let mut max_window_average: f64 = 0.0;
            for window_start in view.ctx.horizon_dates() {
                let window_end = window_start + Duration::days(self.window_days as i64 - 1);
                let sum: f64 = hours.range(window_start..=window_end).map(|(_, h)| h).sum();
                max_window_average = max_window_average.max(sum / weeks_per_window);
            }

            let (longest_run, _) = view.longest_duty_run(person.id);
            let duty_days = view.duty_dates(person.id).len() as u32;
            let violation_count = violations
                .iter()
                .filter(|v| v.person_id == Some(person.id))
                .count();

            metrics.insert(
                person.id,
                PersonMetrics {
                    total_duty_hours: total,
                    max_window_average,
                    longest_duty_run_days: longest_run,
                    days_off: horizon_days.saturating_sub(duty_days),
                    violation_count,
                },
            );
        }
        metrics
    }

    /// The weekly-hours limit this validator enforces.
    pub fn weekly_limit(&self) -> f64 {
        self.weekly_limit
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }
}
