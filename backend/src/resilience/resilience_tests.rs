use chrono::{NaiveDate, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::Arc;

use super::*;
use crate::config::CoreConfig;
use crate::db::clock::FakeClock;
use crate::models::{generate_blocks, Coverage, Eligibility, Person, RotationTemplate};

fn d(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

fn ts() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap()
}

fn analyzer() -> ResilienceAnalyzer {
    let clock = FakeClock::at(ts());
    ResilienceAnalyzer::new(CoreConfig::default(), Arc::new(clock))
}

fn ctx_with(
    people: Vec<Person>,
    rotations: Vec<RotationTemplate>,
    assignments: Vec<Assignment>,
    horizon: (NaiveDate, NaiveDate),
) -> SchedulingContext {
    SchedulingContext::build(
        horizon,
        people,
        generate_blocks(horizon.0, horizon.1, 1),
        rotations,
        assignments,
        vec![],
        HashMap::new(),
    )
    .0
}

#[test]
fn utilization_bands_cover_thresholds() {
    assert_eq!(UtilizationBand::for_value(0.10), UtilizationBand::Green);
    assert_eq!(UtilizationBand::for_value(0.70), UtilizationBand::Yellow);
    assert_eq!(UtilizationBand::for_value(0.80), UtilizationBand::Orange);
    assert_eq!(UtilizationBand::for_value(0.85), UtilizationBand::Red);
    assert_eq!(UtilizationBand::for_value(0.90), UtilizationBand::Black);
    assert_eq!(UtilizationBand::for_value(0.95), UtilizationBand::Black);
}

#[test]
fn per_person_utilization_counts_assignable_blocks() {
    let clinic = RotationTemplate::new(1, "CLINIC", ActivityType::Clinic)
        .with_eligibility(Eligibility::trainees_only());
    let horizon = (d("2026-03-09"), d("2026-03-13"));
    let blocks = generate_blocks(horizon.0, horizon.1, 1);
    let assignments: Vec<Assignment> = blocks
        .iter()
        .take(4)
        .enumerate()
        .map(|(i, b)| Assignment::new(i as i64 + 1, 1, b.id, 1, ts(), "seed"))
        .collect();
    let ctx = ctx_with(
        vec![Person::trainee(1, "P1", 2), Person::trainee(2, "P2", 2)],
        vec![clinic],
        assignments,
        horizon,
    );

    let report = analyzer().utilization(&ctx);
    let p1 = report.iter().find(|u| u.person_id == PersonId(1)).unwrap();
    assert_eq!(p1.assigned_blocks, 4);
    assert_eq!(p1.assignable_blocks, 10);
    assert!((p1.utilization - 0.4).abs() < 1e-9);
    assert_eq!(p1.band, UtilizationBand::Green);
}

#[test]
fn n1_flags_single_points_of_failure() {
    // Two trainees cover a min-1 clinic; only one is eligible per seat half
    // the time. With both present the greedy backfill always repairs a
    // removal; restrict eligibility so removing the only senior fails.
    let clinic = RotationTemplate::new(1, "CLINIC", ActivityType::Clinic)
        .with_coverage(Coverage::range(1, 1, 1))
        .with_eligibility(Eligibility {
            roles: vec![crate::models::Role::Trainee],
            min_pgy: Some(3),
            max_pgy: None,
            required_credentials: vec![],
        });
    let horizon = (d("2026-03-09"), d("2026-03-10"));
    let ctx = ctx_with(
        vec![Person::trainee(1, "Senior", 3), Person::trainee(2, "Intern", 1)],
        vec![clinic],
        vec![],
        horizon,
    );

    let report = analyzer().analyze(&ctx);
    let n1 = report.n1.expect("n1 computed");
    // Removing the senior strands the clinic; removing the intern is fine.
    assert_eq!(n1.scenarios_evaluated, 2);
    assert_eq!(n1.scenarios_vulnerable, 1);
    assert!((n1.score - 0.5).abs() < 1e-9);
    assert_eq!(report.n1_vulnerable_people, vec![PersonId(1)]);
    assert!(report.degraded_mode_recommended, "0.5 exceeds the 0.30 signal");
}

#[test]
fn n1_is_clean_when_capacity_is_redundant() {
    let clinic = RotationTemplate::new(1, "CLINIC", ActivityType::Clinic)
        .with_coverage(Coverage::range(1, 1, 1))
        .with_eligibility(Eligibility::trainees_only());
    let horizon = (d("2026-03-09"), d("2026-03-10"));
    let ctx = ctx_with(
        vec![
            Person::trainee(1, "A", 2),
            Person::trainee(2, "B", 2),
            Person::trainee(3, "C", 2),
        ],
        vec![clinic],
        vec![],
        horizon,
    );
    let report = analyzer().analyze(&ctx);
    let n1 = report.n1.expect("n1 computed");
    assert_eq!(n1.scenarios_vulnerable, 0);
    assert!(!report.degraded_mode_recommended);
}

#[test]
fn n2_samples_large_rosters() {
    let clinic = RotationTemplate::new(1, "CLINIC", ActivityType::Clinic)
        .with_eligibility(Eligibility::trainees_only());
    let horizon = (d("2026-03-09"), d("2026-03-09"));
    let people: Vec<Person> = (1i64..=40)
        .map(|i| Person::trainee(i, format!("P{}", i), 2))
        .collect();
    let ctx = ctx_with(people, vec![clinic], vec![], horizon);

    let report = analyzer().analyze(&ctx);
    let n2 = report.n2.expect("n2 computed");
    assert!(n2.sampled);
    assert!(n2.scenarios_evaluated >= 100);
    assert!(n2.confidence_half_width.is_some());
}

#[test]
fn churn_counts_added_removed_and_modified() {
    let horizon = (d("2026-03-09"), d("2026-03-10"));
    let blocks = generate_blocks(horizon.0, horizon.1, 1);
    let previous = vec![
        Assignment::new(1, 1, blocks[0].id, 1, ts(), "seed"),
        Assignment::new(2, 2, blocks[1].id, 1, ts(), "seed"),
    ];
    let mut modified = previous[0].clone();
    modified.person_id = PersonId(2);
    let current = vec![
        modified,
        Assignment::new(3, 1, blocks[2].id, 1, ts(), "seed"),
    ];

    // removed id=2, added id=3, modified id=1 over 2+2 assignments.
    let churn = churn_rate(&previous, &current);
    assert!((churn - 0.75).abs() < 1e-9);

    assert_eq!(churn_rate(&[], &[]), 0.0);
    assert_eq!(churn_rate(&previous, &previous), 0.0);
}

#[test]
fn ripple_factor_measures_propagation_distance() {
    let clinic = RotationTemplate::new(1, "CLINIC", ActivityType::Clinic);
    let horizon = (d("2026-03-09"), d("2026-03-13"));
    let blocks = generate_blocks(horizon.0, horizon.1, 1);
    // a1 shares a block with a2 (distance 1); a2 shares a person with a3
    // (distance 2 from a1). a4 floats unconnected.
    let assignments = vec![
        Assignment::new(1, 1, blocks[0].id, 1, ts(), "seed"),
        Assignment::new(2, 2, blocks[0].id, 1, ts(), "seed"),
        Assignment::new(3, 2, blocks[4].id, 1, ts(), "seed"),
        Assignment::new(4, 3, blocks[8].id, 1, ts(), "seed"),
    ];
    let ctx = ctx_with(
        vec![
            Person::trainee(1, "A", 2),
            Person::trainee(2, "B", 2),
            Person::trainee(3, "C", 2),
        ],
        vec![clinic],
        assignments,
        horizon,
    );

    let ripple = ripple_factor(&ctx, &[crate::models::AssignmentId(1)], 7);
    assert!((ripple - 1.5).abs() < 1e-9, "got {}", ripple);

    assert_eq!(ripple_factor(&ctx, &[], 7), 0.0);
}

#[test]
fn sacrifice_hierarchy_orders_activities_and_protects_critical_care() {
    let elective = RotationTemplate::new(1, "DERM ELECTIVE", ActivityType::Elective);
    let conference = RotationTemplate::new(2, "DIDACTICS", ActivityType::Conference);
    let clinic = RotationTemplate::new(3, "CLINIC", ActivityType::Clinic);
    let wards = RotationTemplate::new(4, "WARDS", ActivityType::Inpatient);
    let icu = RotationTemplate::new(5, "ICU", ActivityType::Inpatient);
    let ed = RotationTemplate::new(6, "EMERGENCY DEPT", ActivityType::Inpatient);
    let ctx = ctx_with(
        vec![],
        vec![elective, conference, clinic, wards, icu, ed],
        vec![],
        (d("2026-03-09"), d("2026-03-09")),
    );

    let order = sacrifice_hierarchy(&ctx);
    let values: Vec<i64> = order.iter().map(|id| id.value()).collect();
    assert_eq!(values, vec![1, 2, 3, 4], "ICU and ED are never sheddable");
}

#[test]
fn patient_safety_name_matching() {
    assert!(is_patient_safety_critical("ICU"));
    assert!(is_patient_safety_critical("NICU"));
    assert!(is_patient_safety_critical("Emergency Ward"));
    assert!(is_patient_safety_critical("Medical Intensive Care Unit"));
    assert!(!is_patient_safety_critical("CLINIC"));
    assert!(!is_patient_safety_critical("WARDS"));
}

#[test]
fn history_metrics_attach_to_the_report() {
    let clinic = RotationTemplate::new(1, "CLINIC", ActivityType::Clinic)
        .with_eligibility(Eligibility::trainees_only());
    let horizon = (d("2026-03-09"), d("2026-03-10"));
    let blocks = generate_blocks(horizon.0, horizon.1, 1);
    let current = vec![Assignment::new(1, 1, blocks[0].id, 1, ts(), "seed")];
    let ctx = ctx_with(
        vec![Person::trainee(1, "A", 2), Person::trainee(2, "B", 2)],
        vec![clinic],
        current,
        horizon,
    );

    let report = analyzer().analyze_with_history(
        &ctx,
        Some(&[]),
        &[crate::models::AssignmentId(1)],
    );
    assert_eq!(report.churn_rate, Some(1.0));
    assert_eq!(report.ripple_factor, Some(0.0));
}
