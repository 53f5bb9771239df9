//! Tier-3 and Tier-4 soft constraints.
//!
//! Soft violations never invalidate a schedule; they lower the compliance
//! rate and feed the solver objective with their configured weights.

use chrono::{Datelike, Weekday};
use serde_json::json;
use std::collections::HashMap;

use super::{gini_coefficient, ConstraintResult, ConstraintTier, ScheduleView, Violation};
use crate::models::{ActivityType, Role, RotationId};

/// Preferred minimum spacing between call nights.
#[derive(Debug, Clone)]
pub struct CallSpacing {
    pub min_gap_nights: u32,
    pub weight: f64,
}

impl CallSpacing {
    pub fn evaluate(&self, view: &ScheduleView<'_>) -> ConstraintResult {
        let mut violations = Vec::new();
        for person in view.ctx.people.iter().filter(|p| p.role == Role::Trainee) {
            let calls: Vec<_> = view.call_dates(person.id).into_iter().collect();
            for pair in calls.windows(2) {
                let gap = (pair[1] - pair[0]).num_days();
                if gap < self.min_gap_nights as i64 {
                    violations.push(
                        Violation::new(
                            "CallSpacing",
                            ConstraintTier::Soft.severity(),
                            format!(
                                "Call nights {} and {} are {} days apart; {} preferred",
                                pair[0], pair[1], gap, self.min_gap_nights
                            ),
                        )
                        .for_person(person.id)
                        .with_details(json!({
                            "first": pair[0].to_string(),
                            "second": pair[1].to_string(),
                            "gap_nights": gap,
                        })),
                    );
                }
            }
        }
        Ok(violations)
    }
}

/// Even spread of weekend duty across trainees.
#[derive(Debug, Clone)]
pub struct WeekendDistribution {
    pub weight: f64,
}

impl WeekendDistribution {
    pub fn evaluate(&self, view: &ScheduleView<'_>) -> ConstraintResult {
        let mut weekend_counts: HashMap<crate::models::PersonId, usize> = HashMap::new();
        let trainees: Vec<_> = view
            .ctx
            .people
            .iter()
            .filter(|p| p.role == Role::Trainee)
            .collect();
        if trainees.len() < 2 {
            return Ok(Vec::new());
        }
        for person in &trainees {
            let count = view
                .duty_dates(person.id)
                .iter()
                .filter(|d| matches!(d.weekday(), Weekday::Sat | Weekday::Sun))
                .count();
            weekend_counts.insert(person.id, count);
        }
        let max = weekend_counts.values().copied().max().unwrap_or(0);
        let min = weekend_counts.values().copied().min().unwrap_or(0);
        let mut violations = Vec::new();
        if max > min + 2 {
            let heaviest = weekend_counts
                .iter()
                .max_by_key(|(_, &c)| c)
                .map(|(&p, _)| p);
            let mut v = Violation::new(
                "WeekendDistribution",
                ConstraintTier::Soft.severity(),
                format!(
                    "Weekend duty spread of {} to {} days across trainees",
                    min, max
                ),
            )
            .with_details(json!({ "min_weekends": min, "max_weekends": max }));
            if let Some(p) = heaviest {
                v = v.for_person(p);
            }
            violations.push(v);
        }
        Ok(violations)
    }
}

/// Workload Gini coefficient versus target.
#[derive(Debug, Clone)]
pub struct WorkloadBalance {
    pub target_gini: f64,
    pub weight: f64,
}

impl WorkloadBalance {
    pub fn evaluate(&self, view: &ScheduleView<'_>) -> ConstraintResult {
        let counts = view.workload_counts();
        let trainee_loads: Vec<f64> = view
            .ctx
            .people
            .iter()
            .filter(|p| p.role == Role::Trainee)
            .map(|p| counts.get(&p.id).copied().unwrap_or(0) as f64)
            .collect();
        if trainee_loads.len() < 2 {
            return Ok(Vec::new());
        }
        let gini = gini_coefficient(&trainee_loads);
        if gini > self.target_gini {
            return Ok(vec![Violation::new(
                "WorkloadBalance",
                ConstraintTier::Optimization.severity(),
                format!(
                    "Workload Gini {:.3} exceeds the {:.3} target",
                    gini, self.target_gini
                ),
            )
            .with_details(json!({ "gini": gini, "target": self.target_gini }))]);
        }
        Ok(Vec::new())
    }
}

/// Honor hard blackout preferences; the solver treats them as forbidden,
/// the validator reports any that slipped through.
#[derive(Debug, Clone)]
pub struct PreferenceHonor {
    pub weight: f64,
}

impl PreferenceHonor {
    pub fn evaluate(&self, view: &ScheduleView<'_>) -> ConstraintResult {
        let mut violations = Vec::new();
        for a in view.assignments {
            let block = match view.ctx.block(a.block_id) {
                Some(b) => b,
                None => continue,
            };
            let rotation = match view.ctx.rotation(a.rotation_id) {
                Some(r) => r,
                None => continue,
            };
            if rotation.activity_type == ActivityType::Absence {
                continue;
            }
            if view.ctx.is_blackout(a.person_id, block.date) {
                violations.push(
                    Violation::new(
                        "PreferenceHonor",
                        ConstraintTier::Optimization.severity(),
                        format!(
                            "Assignment on {} falls on a blackout date for person {}",
                            block.date, a.person_id
                        ),
                    )
                    .for_person(a.person_id)
                    .for_block(block.id)
                    .with_details(json!({ "date": block.date.to_string() })),
                );
            }
        }
        Ok(violations)
    }
}

/// Prevent degenerate solver outputs where one template absorbs nearly all
/// solver-owned assignments.
#[derive(Debug, Clone)]
pub struct TemplateBalance {
    pub weight: f64,
}

impl TemplateBalance {
    pub fn evaluate(&self, view: &ScheduleView<'_>) -> ConstraintResult {
        let solver_templates: Vec<RotationId> = view
            .ctx
            .rotations
            .iter()
            .filter(|r| r.is_solver_owned())
            .map(|r| r.id)
            .collect();
        if solver_templates.len() < 2 {
            return Ok(Vec::new());
        }
        let mut per_template: HashMap<RotationId, usize> = HashMap::new();
        let mut total = 0usize;
        for a in view.assignments {
            if solver_templates.contains(&a.rotation_id) {
                *per_template.entry(a.rotation_id).or_default() += 1;
                total += 1;
            }
        }
        if total == 0 {
            return Ok(Vec::new());
        }
        let (&heaviest, &load) = match per_template.iter().max_by_key(|(_, &c)| c) {
            Some(entry) => entry,
            None => return Ok(Vec::new()),
        };
        let share = load as f64 / total as f64;
        // A single template holding more than 70% of optimized work is the
        // everyone-on-one-template degeneracy.
        if share > 0.7 {
            let name = view
                .ctx
                .rotation(heaviest)
                .map(|r| r.name.clone())
                .unwrap_or_else(|| heaviest.to_string());
            return Ok(vec![Violation::new(
                "TemplateBalance",
                ConstraintTier::Optimization.severity(),
                format!("Template {} holds {:.0}% of optimized assignments", name, share * 100.0),
            )
            .with_details(json!({ "template": name, "share": share }))]);
        }
        Ok(Vec::new())
    }
}
