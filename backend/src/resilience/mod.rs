//! Resilience analysis: utilization, N-k contingency, churn, and ripple.
//!
//! The analyzer is read-only and failure-tolerant: a metric that cannot be
//! computed degrades to an error annotation on the report instead of
//! failing the whole analysis.

#[cfg(test)]
mod resilience_tests;

use chrono::Duration;
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

use crate::config::CoreConfig;
use crate::constraints::Severity;
use crate::db::clock::{Clock, SharedClock};
use crate::engine::{greedy, NoopCallback, SolverProblem};
use crate::models::{
    ActivityType, Assignment, AssignmentId, PersonId, RotationId, SchedulingContext,
};
use crate::validator::ComplianceValidator;

/// Utilization band thresholds. The 0.80 boundary is the hard operational
/// target; past it queueing delay grows superlinearly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UtilizationBand {
    Green,
    Yellow,
    Orange,
    Red,
    Black,
}

impl UtilizationBand {
    pub fn for_value(utilization: f64) -> Self {
        if utilization < 0.70 {
            UtilizationBand::Green
        } else if utilization < 0.80 {
            UtilizationBand::Yellow
        } else if utilization < 0.85 {
            UtilizationBand::Orange
        } else if utilization < 0.90 {
            UtilizationBand::Red
        } else {
            UtilizationBand::Black
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UtilizationBand::Green => "GREEN",
            UtilizationBand::Yellow => "YELLOW",
            UtilizationBand::Orange => "ORANGE",
            UtilizationBand::Red => "RED",
            UtilizationBand::Black => "BLACK",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonUtilization {
    pub person_id: PersonId,
    pub assigned_blocks: usize,
    pub assignable_blocks: usize,
    pub utilization: f64,
    pub band: UtilizationBand,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NkVulnerability {
    /// Fraction of removal scenarios leaving a hard violation or a coverage
    /// shortfall that greedy backfill cannot repair.
    pub score: f64,
    pub scenarios_evaluated: usize,
    pub scenarios_vulnerable: usize,
    pub sampled: bool,
    /// 95% confidence half-width when sampling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_half_width: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResilienceReport {
    pub system_utilization: f64,
    pub system_band: UtilizationBand,
    pub per_person: Vec<PersonUtilization>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n1: Option<NkVulnerability>,
    pub n1_vulnerable_people: Vec<PersonId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n2: Option<NkVulnerability>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub churn_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ripple_factor: Option<f64>,
    pub degraded_mode_recommended: bool,
    /// Non-fatal metric failures.
    pub errors: Vec<String>,
}

pub struct ResilienceAnalyzer {
    config: CoreConfig,
    clock: SharedClock,
}

impl ResilienceAnalyzer {
    pub fn new(config: CoreConfig, clock: SharedClock) -> Self {
        Self { config, clock }
    }

    /// Full analysis over a context. Individual metric failures degrade to
    /// report annotations.
    pub fn analyze(&self, ctx: &SchedulingContext) -> ResilienceReport {
        let mut errors = Vec::new();

        let per_person = self.utilization(ctx);
        let (assigned, assignable) = per_person.iter().fold((0usize, 0usize), |acc, u| {
            (acc.0 + u.assigned_blocks, acc.1 + u.assignable_blocks)
        });
        let system_utilization = if assignable == 0 {
            0.0
        } else {
            assigned as f64 / assignable as f64
        };

        let (n1, n1_vulnerable_people) = match self.n1_vulnerability(ctx) {
            Ok(result) => (Some(result.0), result.1),
            Err(message) => {
                warn!("N-1 analysis failed: {}", message);
                errors.push(format!("n1: {}", message));
                (None, Vec::new())
            }
        };
        let n2 = match self.n2_vulnerability(ctx) {
            Ok(result) => Some(result),
            Err(message) => {
                warn!("N-2 analysis failed: {}", message);
                errors.push(format!("n2: {}", message));
                None
            }
        };

        let degraded = system_utilization > self.config.resilience.degraded_utilization
            || n1
                .as_ref()
                .map_or(false, |n| n.score > self.config.resilience.degraded_n1_vulnerability);

        ResilienceReport {
            system_utilization,
            system_band: UtilizationBand::for_value(system_utilization),
            per_person,
            n1,
            n1_vulnerable_people,
            n2,
            churn_rate: None,
            ripple_factor: None,
            degraded_mode_recommended: degraded,
            errors,
        }
    }

    /// Analysis including change metrics against a previous assignment set.
    pub fn analyze_with_history(
        &self,
        ctx: &SchedulingContext,
        previous: Option<&[Assignment]>,
        modified: &[AssignmentId],
    ) -> ResilienceReport {
        let mut report = self.analyze(ctx);
        if let Some(prev) = previous {
            report.churn_rate = Some(churn_rate(prev, &ctx.existing_assignments));
        }
        if !modified.is_empty() {
            report.ripple_factor = Some(ripple_factor(
                ctx,
                modified,
                self.config.resilience.churn_window_days as i64,
            ));
        }
        report
    }

    /// Per-person utilization: assigned blocks over assignable blocks.
    pub fn utilization(&self, ctx: &SchedulingContext) -> Vec<PersonUtilization> {
        ctx.people
            .iter()
            .filter(|p| p.active)
            .map(|p| {
                let assigned = ctx
                    .assignments_for(p.id)
                    .filter(|a| {
                        ctx.rotation(a.rotation_id)
                            .map_or(false, |r| r.activity_type != ActivityType::Absence)
                    })
                    .count();
                let assignable = ctx.assignable_blocks(p.id);
                let utilization = if assignable == 0 {
                    0.0
                } else {
                    assigned as f64 / assignable as f64
                };
                PersonUtilization {
                    person_id: p.id,
                    assigned_blocks: assigned,
                    assignable_blocks: assignable,
                    utilization,
                    band: UtilizationBand::for_value(utilization),
                }
            })
            .collect()
    }

    /// Whether removing `removed` leaves an unrepairable schedule: greedy
    /// backfill (bounded by the configured cap) still shows a hard violation
    /// or a coverage shortfall.
    fn removal_is_vulnerable(&self, ctx: &SchedulingContext, removed: &[PersonId]) -> bool {
        let remaining: Vec<Assignment> = ctx
            .existing_assignments
            .iter()
            .filter(|a| !removed.contains(&a.person_id))
            .cloned()
            .collect();
        let mut scenario = ctx.with_assignments(remaining);
        for person in scenario.people.iter_mut() {
            if removed.contains(&person.id) {
                person.active = false;
            }
        }

        let created_at = self.clock.now();
        let deadline =
            created_at + Duration::seconds(self.config.resilience.backfill_cap_secs as i64);
        let base = scenario.existing_assignments.clone();
        let solution = match SolverProblem::build(&scenario, base, created_at) {
            Some(problem) => {
                let pass = greedy::solve_greedy(
                    &problem,
                    &NoopCallback,
                    self.clock.as_ref(),
                    deadline,
                    "n-k-backfill",
                );
                if problem.below_min_units(&pass.solution) > 0 {
                    return true;
                }
                problem.materialize(&pass.solution)
            }
            // No solver-owned templates: judge the remaining schedule as-is.
            None => scenario.existing_assignments.clone(),
        };

        let validator = ComplianceValidator::new(&self.config);
        let report = validator.validate_candidate(&scenario, &solution);
        report
            .violations
            .iter()
            .any(|v| matches!(v.severity, Severity::Critical | Severity::High))
    }

    fn n1_vulnerability(
        &self,
        ctx: &SchedulingContext,
    ) -> Result<(NkVulnerability, Vec<PersonId>), String> {
        let people: Vec<PersonId> = ctx
            .people
            .iter()
            .filter(|p| p.active)
            .map(|p| p.id)
            .collect();
        if people.is_empty() {
            return Err("no active people in context".to_string());
        }
        let mut vulnerable = Vec::new();
        for person in &people {
            if self.removal_is_vulnerable(ctx, &[*person]) {
                vulnerable.push(*person);
            }
        }
        Ok((
            NkVulnerability {
                score: vulnerable.len() as f64 / people.len() as f64,
                scenarios_evaluated: people.len(),
                scenarios_vulnerable: vulnerable.len(),
                sampled: false,
                confidence_half_width: None,
            },
            vulnerable,
        ))
    }

    fn n2_vulnerability(&self, ctx: &SchedulingContext) -> Result<NkVulnerability, String> {
        let people: Vec<PersonId> = ctx
            .people
            .iter()
            .filter(|p| p.active)
            .map(|p| p.id)
            .collect();
        if people.len() < 2 {
            return Err("need at least two active people".to_string());
        }

        let mut pairs: Vec<(PersonId, PersonId)> = Vec::new();
        for i in 0..people.len() {
            for j in (i + 1)..people.len() {
                pairs.push((people[i], people[j]));
            }
        }

        let sampled = people.len() > self.config.resilience.n2_sampling_threshold;
        let evaluated: Vec<(PersonId, PersonId)> = if sampled {
            // Deterministic stride sample of at least the configured size.
            let want = self.config.resilience.n2_min_samples.min(pairs.len());
            let stride = (pairs.len() / want).max(1);
            pairs.iter().step_by(stride).take(want).copied().collect()
        } else {
            pairs
        };

        let mut vulnerable = 0usize;
        for (a, b) in &evaluated {
            if self.removal_is_vulnerable(ctx, &[*a, *b]) {
                vulnerable += 1;
            }
        }
        let score = vulnerable as f64 / evaluated.len() as f64;
        let confidence_half_width = if sampled {
            Some(1.96 * (score * (1.0 - score) / evaluated.len() as f64).sqrt())
        } else {
            None
        };
        Ok(NkVulnerability {
            score,
            scenarios_evaluated: evaluated.len(),
            scenarios_vulnerable: vulnerable,
            sampled,
            confidence_half_width,
        })
    }
}

/// Churn rate between two assignment sets:
/// (added + removed + modified) / (previous + new).
pub fn churn_rate(previous: &[Assignment], current: &[Assignment]) -> f64 {
    let denominator = previous.len() + current.len();
    if denominator == 0 {
        return 0.0;
    }
    let prev_by_id: HashMap<AssignmentId, &Assignment> =
        previous.iter().map(|a| (a.id, a)).collect();
    let curr_by_id: HashMap<AssignmentId, &Assignment> =
        current.iter().map(|a| (a.id, a)).collect();

    let added = current.iter().filter(|a| !prev_by_id.contains_key(&a.id)).count();
    let removed = previous.iter().filter(|a| !curr_by_id.contains_key(&a.id)).count();
    let modified = current
        .iter()
        .filter(|a| {
            prev_by_id.get(&a.id).map_or(false, |old| {
                old.person_id != a.person_id
                    || old.block_id != a.block_id
                    || old.rotation_id != a.rotation_id
            })
        })
        .count();
    (added + removed + modified) as f64 / denominator as f64
}

/// Ripple factor: mean shortest-path distance from each modified assignment
/// to the other assignments it can affect within the same seven-day window.
/// Assignments are adjacent when they share a person or a block.
pub fn ripple_factor(
    ctx: &SchedulingContext,
    modified: &[AssignmentId],
    window_days: i64,
) -> f64 {
    if modified.is_empty() {
        return 0.0;
    }
    let assignments = &ctx.existing_assignments;
    let index_of: HashMap<AssignmentId, usize> = assignments
        .iter()
        .enumerate()
        .map(|(i, a)| (a.id, i))
        .collect();

    // Adjacency: shared person or shared block.
    let mut by_person: HashMap<PersonId, Vec<usize>> = HashMap::new();
    let mut by_block: HashMap<crate::models::BlockId, Vec<usize>> = HashMap::new();
    for (i, a) in assignments.iter().enumerate() {
        by_person.entry(a.person_id).or_default().push(i);
        by_block.entry(a.block_id).or_default().push(i);
    }

    let mut total_distance = 0.0f64;
    let mut sources_with_reach = 0usize;
    for id in modified {
        let start = match index_of.get(id) {
            Some(&i) => i,
            None => continue,
        };
        let start_date = match ctx.block(assignments[start].block_id) {
            Some(b) => b.date,
            None => continue,
        };

        // BFS over the dependency graph, restricted to the time window.
        let mut distance: HashMap<usize, usize> = HashMap::new();
        let mut queue = VecDeque::new();
        distance.insert(start, 0);
        queue.push_back(start);
        while let Some(node) = queue.pop_front() {
            let a = &assignments[node];
            let neighbors = by_person
                .get(&a.person_id)
                .into_iter()
                .flatten()
                .chain(by_block.get(&a.block_id).into_iter().flatten());
            for &next in neighbors {
                if distance.contains_key(&next) {
                    continue;
                }
                let in_window = ctx
                    .block(assignments[next].block_id)
                    .map_or(false, |b| (b.date - start_date).num_days().abs() <= window_days);
                if !in_window {
                    continue;
                }
                distance.insert(next, distance[&node] + 1);
                queue.push_back(next);
            }
        }

        let reached: Vec<usize> = distance
            .iter()
            .filter(|(&node, _)| node != start)
            .map(|(_, &d)| d)
            .collect();
        if !reached.is_empty() {
            total_distance += reached.iter().sum::<usize>() as f64 / reached.len() as f64;
            sources_with_reach += 1;
        }
    }
    if sources_with_reach == 0 {
        0.0
    } else {
        total_distance / sources_with_reach as f64
    }
}

/// Activity kinds to shed first under overload, most sheddable first.
/// Patient-safety templates are never in the list.
pub fn sacrifice_hierarchy(ctx: &SchedulingContext) -> Vec<RotationId> {
    let shed_order = [
        ActivityType::Elective,
        ActivityType::Conference,
        ActivityType::Clinic,
        ActivityType::Inpatient,
    ];
    let mut ordered = Vec::new();
    for activity in shed_order {
        let mut ids: Vec<RotationId> = ctx
            .rotations
            .iter()
            .filter(|r| r.activity_type == activity && !is_patient_safety_critical(&r.name))
            .map(|r| r.id)
            .collect();
        ids.sort_by_key(|id| id.value());
        ordered.extend(ids);
    }
    ordered
}

/// Emergency and intensive-care services are never sheddable.
pub fn is_patient_safety_critical(template_name: &str) -> bool {
    let name = template_name.to_ascii_uppercase();
    const CRITICAL_MARKERS: [&str; 4] = ["ICU", "NICU", "EMERGENCY", "ED"];
    CRITICAL_MARKERS
        .iter()
        .any(|marker| name.split_whitespace().any(|word| word == *marker))
        || name.contains("INTENSIVE CARE")
}

/// Degraded-mode signal from a finished report.
pub fn degraded_mode_recommended(report: &ResilienceReport, config: &CoreConfig) -> bool {
    report.system_utilization > config.resilience.degraded_utilization
        || report
            .n1
            .as_ref()
            .map_or(false, |n| n.score > config.resilience.degraded_n1_vulnerability)
}

