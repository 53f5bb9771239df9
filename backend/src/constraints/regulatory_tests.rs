use chrono::{NaiveDate, TimeZone, Utc};
use std::collections::HashMap;

use super::*;
use crate::models::{
    generate_blocks, ActivityType, Assignment, Eligibility, Person, RotationTemplate,
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

/// Assign `person` to both sessions Monday through Friday for every week in
/// the horizon, on the given rotation.
fn assign_workweeks(ctx: &SchedulingContext, person: i64, rotation: i64) -> Vec<Assignment> {
    let mut assignments = Vec::new();
    let mut next_id = 1i64;
    for block in &ctx.blocks {
        let weekday = block.weekday().num_days_from_monday();
        if weekday < 5 {
            assignments.push(Assignment::new(next_id, person, block.id, rotation, ts(), "test"));
            next_id += 1;
        }
    }
    assignments
}

#[test]
fn weekly_hours_at_limit_pass() {
    let clinic = RotationTemplate::new(1, "CLINIC", ActivityType::Clinic).with_hours(8.0);
    let horizon = (d("2026-03-01"), d("2026-03-28"));
    let ctx = build_ctx(horizon, vec![Person::trainee(1, "P1", 2)], vec![clinic], vec![]);
    let assignments = assign_workweeks(&ctx, 1, 1);
    let ctx = build_ctx(horizon, vec![Person::trainee(1, "P1", 2)], ctx.rotations.clone(), assignments);

    let rule = MaxWeeklyHours {
        limit: 80.0,
        window_days: 28,
    };
    let violations = rule.evaluate(&ScheduleView::of_context(&ctx)).unwrap();
    assert!(violations.is_empty(), "exactly 80.0 h/week must pass");
}

#[test]
fn weekly_hours_over_limit_reports_earliest_window() {
    // 10 blocks per week at 8.5 h each is 85 h/week.
    let clinic = RotationTemplate::new(1, "CLINIC", ActivityType::Clinic).with_hours(8.5);
    let horizon = (d("2026-03-01"), d("2026-03-28"));
    let seed = build_ctx(horizon, vec![Person::trainee(1, "P1", 2)], vec![clinic], vec![]);
    let assignments = assign_workweeks(&seed, 1, 1);
    let ctx = build_ctx(horizon, vec![Person::trainee(1, "P1", 2)], seed.rotations.clone(), assignments);

    let rule = MaxWeeklyHours {
        limit: 80.0,
        window_days: 28,
    };
    let violations = rule.evaluate(&ScheduleView::of_context(&ctx)).unwrap();
    assert_eq!(violations.len(), 1);
    let v = &violations[0];
    assert_eq!(v.kind, "MaxWeeklyHours");
    assert_eq!(v.severity, Severity::Critical);
    assert_eq!(v.details["window_start"], "2026-03-01");
    assert!((v.details["average_weekly_hours"].as_f64().unwrap() - 85.0).abs() < 1e-9);
}

#[test]
fn weekly_hours_barely_over_fails() {
    let clinic = RotationTemplate::new(1, "CLINIC", ActivityType::Clinic).with_hours(8.001);
    let horizon = (d("2026-03-01"), d("2026-03-28"));
    let seed = build_ctx(horizon, vec![Person::trainee(1, "P1", 2)], vec![clinic], vec![]);
    let assignments = assign_workweeks(&seed, 1, 1);
    let ctx = build_ctx(horizon, vec![Person::trainee(1, "P1", 2)], seed.rotations.clone(), assignments);

    let rule = MaxWeeklyHours {
        limit: 80.0,
        window_days: 28,
    };
    let violations = rule.evaluate(&ScheduleView::of_context(&ctx)).unwrap();
    assert_eq!(violations.len(), 1, "80.01 h/week must fail");
    assert_eq!(violations[0].details["window_start"], "2026-03-01");
}

#[test]
fn consecutive_duty_days_limit() {
    let clinic = RotationTemplate::new(1, "CLINIC", ActivityType::Clinic);
    let horizon = (d("2026-03-02"), d("2026-03-15"));
    let seed = build_ctx(horizon, vec![Person::trainee(1, "P1", 2)], vec![clinic], vec![]);
    // AM block every day 2026-03-02 through 2026-03-08: seven straight days.
    let mut assignments = Vec::new();
    for (i, block) in seed.blocks.iter().enumerate() {
        if block.session == Session::Am && block.date <= d("2026-03-08") {
            assignments.push(Assignment::new(i as i64 + 1, 1, block.id, 1, ts(), "test"));
        }
    }
    let ctx = build_ctx(horizon, vec![Person::trainee(1, "P1", 2)], seed.rotations.clone(), assignments);

    let rule = MaxConsecutiveDutyDays { limit: 6 };
    let violations = rule.evaluate(&ScheduleView::of_context(&ctx)).unwrap();
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].details["consecutive_days"], 7);

    let relaxed = MaxConsecutiveDutyDays { limit: 7 };
    assert!(relaxed.evaluate(&ScheduleView::of_context(&ctx)).unwrap().is_empty());
}

#[test]
fn duty_period_cap_is_pgy_stratified() {
    // Night float runs 19:00 to 07:00 and chains into the next full day:
    // one 23-hour continuous period.
    let nf = RotationTemplate::new(1, "NIGHT FLOAT", ActivityType::NightFloat);
    let clinic = RotationTemplate::new(2, "CLINIC", ActivityType::Clinic);
    let horizon = (d("2026-03-09"), d("2026-03-10"));
    let seed = build_ctx(horizon, vec![], vec![nf, clinic], vec![]);
    let pm_monday = seed
        .blocks
        .iter()
        .find(|b| b.date == d("2026-03-09") && b.session == Session::Pm)
        .unwrap()
        .id;
    let am_tuesday = seed
        .blocks
        .iter()
        .find(|b| b.date == d("2026-03-10") && b.session == Session::Am)
        .unwrap()
        .id;
    let pm_tuesday = seed
        .blocks
        .iter()
        .find(|b| b.date == d("2026-03-10") && b.session == Session::Pm)
        .unwrap()
        .id;
    let assignments = vec![
        Assignment::new(1, 1, pm_monday, 1, ts(), "test"),
        Assignment::new(2, 1, am_tuesday, 2, ts(), "test"),
        Assignment::new(3, 1, pm_tuesday, 2, ts(), "test"),
    ];
    let rule = MaxDutyPeriodHours {
        pgy1_limit: 16.0,
        pgy2plus_limit: 24.0,
        transition_hours: 4.0,
    };

    let intern_ctx = build_ctx(
        horizon,
        vec![Person::trainee(1, "Intern", 1)],
        seed.rotations.clone(),
        assignments.clone(),
    );
    let violations = rule.evaluate(&ScheduleView::of_context(&intern_ctx)).unwrap();
    assert_eq!(violations.len(), 1, "23 h period breaks the 16+4 intern cap");
    assert!(violations[0].details["period_hours"].as_f64().unwrap() > 20.0);

    let senior_ctx = build_ctx(
        horizon,
        vec![Person::trainee(1, "Senior", 3)],
        seed.rotations.clone(),
        assignments,
    );
    assert!(
        rule.evaluate(&ScheduleView::of_context(&senior_ctx)).unwrap().is_empty(),
        "23 h fits inside the 24+4 senior cap"
    );
}

#[test]
fn rest_between_shifts() {
    // Call ends 07:00; clinic that afternoon starts 13:00. Six hours of rest.
    let call = RotationTemplate::new(1, "CALL", ActivityType::Call);
    let clinic = RotationTemplate::new(2, "CLINIC", ActivityType::Clinic);
    let horizon = (d("2026-03-09"), d("2026-03-10"));
    let seed = build_ctx(horizon, vec![], vec![call, clinic], vec![]);
    let pm_monday = seed
        .blocks
        .iter()
        .find(|b| b.date == d("2026-03-09") && b.session == Session::Pm)
        .unwrap()
        .id;
    let pm_tuesday = seed
        .blocks
        .iter()
        .find(|b| b.date == d("2026-03-10") && b.session == Session::Pm)
        .unwrap()
        .id;
    let assignments = vec![
        Assignment::new(1, 1, pm_monday, 1, ts(), "test"),
        Assignment::new(2, 1, pm_tuesday, 2, ts(), "test"),
    ];
    let ctx = build_ctx(
        horizon,
        vec![Person::trainee(1, "P1", 2)],
        seed.rotations.clone(),
        assignments,
    );

    let rule = MinRestBetweenShifts {
        pgy1_min: 10.0,
        pgy2plus_min: 8.0,
    };
    let violations = rule.evaluate(&ScheduleView::of_context(&ctx)).unwrap();
    assert_eq!(violations.len(), 1);
    assert!((violations[0].details["rest_hours"].as_f64().unwrap() - 6.0).abs() < 1e-9);
}

#[test]
fn consecutive_nights_cap() {
    let nf = RotationTemplate::new(1, "NIGHT FLOAT", ActivityType::NightFloat);
    let horizon = (d("2026-03-02"), d("2026-03-15"));
    let seed = build_ctx(horizon, vec![], vec![nf], vec![]);
    let mut assignments = Vec::new();
    for (i, block) in seed.blocks.iter().enumerate() {
        if block.session == Session::Pm && block.date <= d("2026-03-08") {
            assignments.push(Assignment::new(i as i64 + 1, 1, block.id, 1, ts(), "test"));
        }
    }
    let ctx = build_ctx(
        horizon,
        vec![Person::trainee(1, "P1", 2)],
        seed.rotations.clone(),
        assignments,
    );

    let rule = MaxConsecutiveNights { limit: 6 };
    let violations = rule.evaluate(&ScheduleView::of_context(&ctx)).unwrap();
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].details["consecutive_nights"], 7);
}

#[test]
fn call_frequency_ratio() {
    let call = RotationTemplate::new(1, "CALL", ActivityType::Call);
    let horizon = (d("2026-03-02"), d("2026-03-10"));
    let seed = build_ctx(horizon, vec![], vec![call], vec![]);
    // Call every night of a nine-day horizon.
    let mut assignments = Vec::new();
    for (i, block) in seed.blocks.iter().enumerate() {
        if block.session == Session::Pm {
            assignments.push(Assignment::new(i as i64 + 1, 1, block.id, 1, ts(), "test"));
        }
    }
    let ctx = build_ctx(
        horizon,
        vec![Person::trainee(1, "P1", 2)],
        seed.rotations.clone(),
        assignments,
    );

    let rule = MaxCallFrequency { ratio: 1.0 / 3.0 };
    let violations = rule.evaluate(&ScheduleView::of_context(&ctx)).unwrap();
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].details["call_nights"], 9);
}

#[test]
fn supervision_ratio_per_inpatient_block() {
    let wards = RotationTemplate::new(1, "WARDS", ActivityType::Inpatient)
        .with_eligibility(Eligibility::any());
    let horizon = (d("2026-03-09"), d("2026-03-09"));
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
    let ctx = build_ctx(horizon, people.clone(), seed.rotations.clone(), assignments);

    let rule = SupervisionRatio {
        pgy1_max_per_faculty: 2,
        pgy2plus_max_per_faculty: 4,
    };
    let violations = rule.evaluate(&ScheduleView::of_context(&ctx)).unwrap();
    assert_eq!(violations.len(), 1, "three interns under one faculty breaks 2:1");
    assert_eq!(violations[0].details["pgy1"], 3);
    assert_eq!(violations[0].details["faculty"], 1);

    // Two interns are within ratio.
    let assignments = vec![
        Assignment::new(1, 1, am, 1, ts(), "test"),
        Assignment::new(2, 2, am, 1, ts(), "test"),
        Assignment::new(4, 4, am, 1, ts(), "test"),
    ];
    let ctx = build_ctx(horizon, people, seed.rotations.clone(), assignments);
    assert!(rule.evaluate(&ScheduleView::of_context(&ctx)).unwrap().is_empty());
}
