//! Compatibility scoring for swap candidates.
//!
//! A candidate pair scores in [0, 1] as a weighted combination of schedule
//! compatibility, preference alignment, workload balance, credential match,
//! and temporal proximity. A perfect bilateral pair scores exactly 1.0.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::constraints::gini_coefficient;
use crate::models::{Assignment, PersonId, Role, SchedulingContext};

pub const WEIGHT_SCHEDULE: f64 = 0.30;
pub const WEIGHT_PREFERENCE: f64 = 0.20;
pub const WEIGHT_WORKLOAD: f64 = 0.20;
pub const WEIGHT_CREDENTIALS: f64 = 0.20;
pub const WEIGHT_PROXIMITY: f64 = 0.10;

/// Component scores plus the weighted total.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub schedule_compatibility: f64,
    pub preference_alignment: f64,
    pub workload_balance: f64,
    pub credential_match: f64,
    pub temporal_proximity: f64,
    pub total: f64,
}

/// One side of a proposed exchange: a person giving up a week.
#[derive(Debug, Clone)]
pub struct SwapSide {
    pub person: PersonId,
    pub week: NaiveDate,
    /// The person's assignments inside that week.
    pub assignments: Vec<Assignment>,
}

fn clamp01(x: f64) -> f64 {
    x.clamp(0.0, 1.0)
}

/// Score an exchange where `a`'s week goes to `b.person` and vice versa.
pub fn score_exchange(ctx: &SchedulingContext, a: &SwapSide, b: &SwapSide) -> ScoreBreakdown {
    let schedule_compatibility = schedule_component(ctx, a, b);
    let preference_alignment = preference_component(ctx, a, b);
    let workload_balance = workload_component(ctx, a, b);
    let credential_match = credential_component(ctx, a, b);
    let temporal_proximity = proximity_component(a.week, b.week);

    let total = WEIGHT_SCHEDULE * schedule_compatibility
        + WEIGHT_PREFERENCE * preference_alignment
        + WEIGHT_WORKLOAD * workload_balance
        + WEIGHT_CREDENTIALS * credential_match
        + WEIGHT_PROXIMITY * temporal_proximity;

    ScoreBreakdown {
        schedule_compatibility,
        preference_alignment,
        workload_balance,
        credential_match,
        temporal_proximity,
        total,
    }
}

/// Conflict absence and coverage equivalence.
///
/// Each moved assignment needs its recipient free in that block; weeks with
/// matching assignment counts trade coverage one for one.
fn schedule_component(ctx: &SchedulingContext, a: &SwapSide, b: &SwapSide) -> f64 {
    let moved = a.assignments.len() + b.assignments.len();
    if moved == 0 {
        return 0.0;
    }
    let mut conflict_free = 0usize;
    for assignment in &a.assignments {
        if !has_conflict(ctx, b.person, assignment) {
            conflict_free += 1;
        }
    }
    for assignment in &b.assignments {
        if !has_conflict(ctx, a.person, assignment) {
            conflict_free += 1;
        }
    }
    let conflict_score = conflict_free as f64 / moved as f64;

    let coverage_score = if a.assignments.len() == b.assignments.len() {
        1.0
    } else {
        let min = a.assignments.len().min(b.assignments.len()) as f64;
        let max = a.assignments.len().max(b.assignments.len()) as f64;
        min / max
    };
    clamp01(0.5 * conflict_score + 0.5 * coverage_score)
}

fn has_conflict(ctx: &SchedulingContext, recipient: PersonId, moved: &Assignment) -> bool {
    let date = match ctx.block(moved.block_id) {
        Some(b) => b.date,
        None => return true,
    };
    if ctx.is_absent(recipient, date) {
        return true;
    }
    ctx.assignments_for(recipient)
        .any(|a| a.block_id == moved.block_id && a.id != moved.id)
}

/// Honored preference deltas: moved work landing on a recipient blackout
/// date costs, everything else is neutral.
fn preference_component(ctx: &SchedulingContext, a: &SwapSide, b: &SwapSide) -> f64 {
    let moved = a.assignments.len() + b.assignments.len();
    if moved == 0 {
        return 1.0;
    }
    let mut honored = 0usize;
    for (recipient, side) in [(b.person, a), (a.person, b)] {
        for assignment in &side.assignments {
            let blackout = ctx
                .block(assignment.block_id)
                .map_or(false, |block| ctx.is_blackout(recipient, block.date));
            if !blackout {
                honored += 1;
            }
        }
    }
    honored as f64 / moved as f64
}

/// Gini-coefficient change over trainee workloads; a swap that worsens the
/// spread loses credit.
fn workload_component(ctx: &SchedulingContext, a: &SwapSide, b: &SwapSide) -> f64 {
    let loads_before = trainee_loads(ctx, None);
    let gini_before = gini_coefficient(&loads_before);

    let delta_a = b.assignments.len() as i64 - a.assignments.len() as i64;
    let loads_after = trainee_loads(ctx, Some((a.person, b.person, delta_a)));
    let gini_after = gini_coefficient(&loads_after);

    clamp01(1.0 - (gini_after - gini_before).max(0.0) * 5.0)
}

fn trainee_loads(
    ctx: &SchedulingContext,
    adjustment: Option<(PersonId, PersonId, i64)>,
) -> Vec<f64> {
    ctx.people
        .iter()
        .filter(|p| p.role == Role::Trainee)
        .map(|p| {
            let mut load = ctx.assignments_for(p.id).count() as i64;
            if let Some((person_a, person_b, delta_a)) = adjustment {
                if p.id == person_a {
                    load += delta_a;
                }
                if p.id == person_b {
                    load -= delta_a;
                }
            }
            load.max(0) as f64
        })
        .collect()
}

/// Fraction of moved assignments whose recipient meets the rotation's
/// eligibility predicate.
fn credential_component(ctx: &SchedulingContext, a: &SwapSide, b: &SwapSide) -> f64 {
    let moved = a.assignments.len() + b.assignments.len();
    if moved == 0 {
        return 0.0;
    }
    let mut eligible = 0usize;
    for (recipient, side) in [(b.person, a), (a.person, b)] {
        let person = match ctx.person(recipient) {
            Some(p) => p,
            None => continue,
        };
        for assignment in &side.assignments {
            if ctx
                .rotation(assignment.rotation_id)
                .map_or(false, |r| r.eligibility.matches(person))
            {
                eligible += 1;
            }
        }
    }
    eligible as f64 / moved as f64
}

/// Distance in weeks, harmonically discounted.
fn proximity_component(week_a: NaiveDate, week_b: NaiveDate) -> f64 {
    let weeks_apart = ((week_b - week_a).num_days().abs() / 7) as f64;
    1.0 / (1.0 + weeks_apart)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        generate_blocks, ActivityType, Coverage, Eligibility, Person, PersonPreferences,
        RotationTemplate, SchedulingContext, Session,
    };
    use chrono::{TimeZone, Utc};
    use std::collections::HashMap;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn ts() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap()
    }

    /// P1 holds clinic Tuesday AM, P2 holds clinic Thursday PM, same week.
    fn exchange_fixture() -> (SchedulingContext, SwapSide, SwapSide) {
        let clinic = RotationTemplate::new(1, "CLINIC", ActivityType::Clinic)
            .with_coverage(Coverage::exact(1))
            .with_eligibility(Eligibility::trainees_only());
        let blocks = generate_blocks(d("2026-03-09"), d("2026-03-13"), 1);
        let tuesday_am = blocks
            .iter()
            .find(|b| b.date == d("2026-03-10") && b.session == Session::Am)
            .unwrap()
            .id;
        let thursday_pm = blocks
            .iter()
            .find(|b| b.date == d("2026-03-12") && b.session == Session::Pm)
            .unwrap()
            .id;
        let a1 = Assignment::new(1, 1, tuesday_am, 1, ts(), "seed");
        let a2 = Assignment::new(2, 2, thursday_pm, 1, ts(), "seed");
        let (ctx, _) = SchedulingContext::build(
            (d("2026-03-09"), d("2026-03-13")),
            vec![Person::trainee(1, "P1", 2), Person::trainee(2, "P2", 2)],
            blocks,
            vec![clinic],
            vec![a1.clone(), a2.clone()],
            vec![],
            HashMap::new(),
        );
        let side_a = SwapSide {
            person: PersonId(1),
            week: d("2026-03-09"),
            assignments: vec![a1],
        };
        let side_b = SwapSide {
            person: PersonId(2),
            week: d("2026-03-09"),
            assignments: vec![a2],
        };
        (ctx, side_a, side_b)
    }

    #[test]
    fn perfect_bilateral_pair_scores_one() {
        let (ctx, a, b) = exchange_fixture();
        let score = score_exchange(&ctx, &a, &b);
        assert!((score.total - 1.0).abs() < 1e-9, "{:?}", score);
        assert_eq!(score.schedule_compatibility, 1.0);
        assert_eq!(score.credential_match, 1.0);
        assert_eq!(score.temporal_proximity, 1.0);
    }

    #[test]
    fn blackout_dates_reduce_preference_alignment() {
        let (mut ctx, a, b) = exchange_fixture();
        let mut prefs = PersonPreferences::default();
        // P2 blacked out the day of P1's assignment.
        prefs.blackout_dates.insert(d("2026-03-10"));
        ctx.preferences.insert(PersonId(2), prefs);

        let score = score_exchange(&ctx, &a, &b);
        assert!(score.preference_alignment < 1.0);
        assert!(score.total < 1.0);
    }

    #[test]
    fn conflicting_recipient_blocks_reduce_schedule_component() {
        let (ctx, a, mut b) = exchange_fixture();
        // Pretend P2 already holds P1's block too.
        b.assignments.push(a.assignments[0].clone());
        let score = score_exchange(&ctx, &a, &b);
        assert!(score.schedule_compatibility < 1.0);
    }

    #[test]
    fn ineligible_recipient_fails_credential_component() {
        let (mut ctx, a, b) = exchange_fixture();
        // Make P2 a faculty member; trainee-only clinic no longer fits.
        ctx.people[1] = Person::faculty(2, "F2");
        let score = score_exchange(&ctx, &a, &b);
        assert!(score.credential_match < 1.0);
    }

    #[test]
    fn distant_weeks_discount_proximity() {
        assert_eq!(proximity_component(d("2026-03-09"), d("2026-03-09")), 1.0);
        assert_eq!(proximity_component(d("2026-03-09"), d("2026-03-16")), 0.5);
        assert!(proximity_component(d("2026-03-09"), d("2026-04-20")) < 0.2);
    }
}
