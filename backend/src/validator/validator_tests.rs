use chrono::{NaiveDate, TimeZone, Utc};
use std::collections::HashMap;

use super::*;
use crate::config::CoreConfig;
use crate::constraints::{Constraint, MaxWeeklyHours};
use crate::models::{
    generate_blocks, ActivityType, Assignment, Person, PersonId, RotationTemplate,
    SchedulingContext, Session,
};

fn d(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

fn ts() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap()
}

fn build_ctx(
    horizon: (NaiveDate, NaiveDate),
    people: Vec<Person>,
    rotations: Vec<RotationTemplate>,
    assignments: Vec<Assignment>,
) -> SchedulingContext {
    let blocks = generate_blocks(horizon.0, horizon.1, 1);
    let (ctx, _) = SchedulingContext::build(
        horizon,
        people,
        blocks,
        rotations,
        assignments,
        vec![],
        HashMap::new(),
    );
    ctx
}

/// Mon-Fri both sessions on the given rotation for the whole horizon.
fn workweek_assignments(ctx: &SchedulingContext, person: i64, rotation: i64) -> Vec<Assignment> {
    let mut assignments = Vec::new();
    for (i, block) in ctx.blocks.iter().enumerate() {
        if block.weekday().num_days_from_monday() < 5 {
            assignments.push(Assignment::new(i as i64 + 1, person, block.id, rotation, ts(), "test"));
        }
    }
    assignments
}

#[test]
fn clean_schedule_scores_full_compliance() {
    let clinic = RotationTemplate::new(1, "CLINIC", ActivityType::Clinic).with_hours(5.0);
    let horizon = (d("2026-03-09"), d("2026-03-13"));
    let seed = build_ctx(horizon, vec![], vec![clinic], vec![]);
    // Alternate blocks between the two trainees.
    let assignments: Vec<Assignment> = seed
        .blocks
        .iter()
        .enumerate()
        .map(|(i, b)| {
            Assignment::new(i as i64 + 1, if i % 2 == 0 { 1 } else { 2 }, b.id, 1, ts(), "test")
        })
        .collect();
    let people = vec![Person::trainee(1, "P1", 2), Person::trainee(2, "P2", 2)];
    let ctx = build_ctx(horizon, people, seed.rotations.clone(), assignments);

    let validator = ComplianceValidator::new(&CoreConfig::default());
    let report = validator.validate(&ctx);
    assert!(report.is_valid(), "violations: {:?}", report.violations);
    assert_eq!(report.compliance_rate, 100.0);
    assert_eq!(report.per_person[&PersonId(1)].total_duty_hours, 25.0);
    assert_eq!(report.per_person[&PersonId(2)].total_duty_hours, 25.0);
}

#[test]
fn weekly_hours_scenario_reports_earliest_window() {
    // One trainee at 85 h/week over a four-week horizon.
    let clinic = RotationTemplate::new(1, "CLINIC", ActivityType::Clinic).with_hours(8.5);
    let horizon = (d("2026-03-01"), d("2026-03-28"));
    let seed = build_ctx(horizon, vec![], vec![clinic], vec![]);
    let assignments = workweek_assignments(&seed, 1, 1);
    let ctx = build_ctx(
        horizon,
        vec![Person::trainee(1, "P1", 2)],
        seed.rotations.clone(),
        assignments,
    );

    let validator = ComplianceValidator::new(&CoreConfig::default());
    let report = validator.validate(&ctx);

    assert!(!report.is_valid());
    let v = report
        .violations_of("MaxWeeklyHours")
        .next()
        .expect("weekly hours violation");
    assert_eq!(v.severity, crate::constraints::Severity::Critical);
    assert_eq!(v.details["window_start"], "2026-03-01");
    assert!((v.details["average_weekly_hours"].as_f64().unwrap() - 85.0).abs() < 1e-9);
    assert!(report.compliance_rate < 100.0);
    assert!(report.per_person[&PersonId(1)].max_window_average > 80.0);
}

#[test]
fn validator_fault_is_contained() {
    // A zero-width rolling window is a configuration fault inside the
    // constraint. It must surface as VALIDATOR_FAULT while the remaining
    // constraints still run.
    let clinic = RotationTemplate::new(1, "CLINIC", ActivityType::Clinic);
    let horizon = (d("2026-03-09"), d("2026-03-13"));
    let seed = build_ctx(horizon, vec![], vec![clinic], vec![]);
    // Assign every block to one trainee so the consecutive-days rule fires too.
    let assignments: Vec<Assignment> = seed
        .blocks
        .iter()
        .enumerate()
        .map(|(i, b)| Assignment::new(i as i64 + 1, 1, b.id, 1, ts(), "test"))
        .collect();
    let ctx = build_ctx(
        horizon,
        vec![Person::trainee(1, "P1", 2)],
        seed.rotations.clone(),
        assignments,
    );
    let validator = ComplianceValidator::with_constraints(
        vec![
            Constraint::MaxWeeklyHours(MaxWeeklyHours {
                limit: 80.0,
                window_days: 0,
            }),
            Constraint::MaxConsecutiveDutyDays(crate::constraints::MaxConsecutiveDutyDays {
                limit: 3,
            }),
        ],
        &CoreConfig::default(),
    );
    let report = validator.validate(&ctx);

    let fault = report
        .violations_of("VALIDATOR_FAULT")
        .next()
        .expect("fault surfaced as violation");
    assert_eq!(fault.details["constraint"], "MaxWeeklyHours");
    assert!(
        report.violations_of("MaxConsecutiveDutyDays").next().is_some(),
        "later constraints still evaluated"
    );
    assert!(!report.is_valid());
}

#[test]
fn compliance_rate_counts_implicated_blocks() {
    // Supervision violation on one specific inpatient block out of ten.
    let wards = RotationTemplate::new(1, "WARDS", ActivityType::Inpatient);
    let horizon = (d("2026-03-09"), d("2026-03-13"));
    let seed = build_ctx(horizon, vec![], vec![wards], vec![]);
    let am = seed.blocks[0].id;
    let people = vec![
        Person::trainee(1, "I1", 1),
        Person::trainee(2, "I2", 1),
        Person::trainee(3, "I3", 1),
        Person::faculty(4, "F1"),
    ];
    let assignments = vec![
        Assignment::new(1, 1, am, 1, ts(), "test"),
        Assignment::new(2, 2, am, 1, ts(), "test"),
        Assignment::new(3, 3, am, 1, ts(), "test"),
        Assignment::new(4, 4, am, 1, ts(), "test"),
    ];
    let ctx = build_ctx(horizon, people, seed.rotations.clone(), assignments);

    let validator = ComplianceValidator::new(&CoreConfig::default());
    let report = validator.validate(&ctx);
    assert!(!report.is_valid());
    assert!(report.violations_of("SupervisionRatio").next().is_some());
    // One implicated block out of ten: 90.0.
    assert_eq!(report.violating_blocks, 1);
    assert_eq!(report.compliance_rate, 90.0);
}

#[test]
fn absence_blocks_carry_no_duty_hours() {
    let leave = RotationTemplate::new(1, "LEAVE", ActivityType::Absence);
    let horizon = (d("2026-03-09"), d("2026-03-13"));
    let seed = build_ctx(horizon, vec![], vec![leave], vec![]);
    let assignments: Vec<Assignment> = seed
        .blocks
        .iter()
        .enumerate()
        .map(|(i, b)| Assignment::new(i as i64 + 1, 1, b.id, 1, ts(), "test"))
        .collect();
    let ctx = build_ctx(
        horizon,
        vec![Person::trainee(1, "P1", 2)],
        seed.rotations.clone(),
        assignments,
    );

    let validator = ComplianceValidator::new(&CoreConfig::default());
    let report = validator.validate(&ctx);
    assert!(report.is_valid());
    assert_eq!(report.per_person[&PersonId(1)].total_duty_hours, 0.0);
    assert_eq!(report.per_person[&PersonId(1)].days_off, 5);
}

#[test]
fn validate_candidate_leaves_context_untouched() {
    let clinic = RotationTemplate::new(1, "CLINIC", ActivityType::Clinic);
    let horizon = (d("2026-03-09"), d("2026-03-09"));
    let seed = build_ctx(horizon, vec![], vec![clinic], vec![]);
    let am = seed
        .blocks
        .iter()
        .find(|b| b.session == Session::Am)
        .unwrap()
        .id;
    let ctx = build_ctx(
        horizon,
        vec![Person::trainee(1, "P1", 2)],
        seed.rotations.clone(),
        vec![],
    );
    let candidate = vec![Assignment::new(1, 1, am, 1, ts(), "test")];

    let validator = ComplianceValidator::new(&CoreConfig::default());
    let report = validator.validate_candidate(&ctx, &candidate);
    assert!(report.is_valid());
    assert!(ctx.existing_assignments.is_empty());
}
