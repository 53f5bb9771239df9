//! Benchmarks for the compliance validator hot path.

use chrono::{NaiveDate, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::collections::HashMap;

use rms_rust::config::CoreConfig;
use rms_rust::models::{
    generate_blocks, ActivityType, Assignment, Eligibility, Person, RotationTemplate,
    SchedulingContext,
};
use rms_rust::validator::ComplianceValidator;

fn d(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

/// Four-week horizon, twelve trainees, clinic work spread evenly.
fn benchmark_context() -> SchedulingContext {
    let clinic = RotationTemplate::new(1, "CLINIC", ActivityType::Clinic)
        .with_eligibility(Eligibility::trainees_only())
        .with_hours(5.0);
    let horizon = (d("2026-03-01"), d("2026-03-28"));
    let blocks = generate_blocks(horizon.0, horizon.1, 1);
    let people: Vec<Person> = (1i64..=12)
        .map(|i| Person::trainee(i, format!("P{}", i), ((i % 3) + 1) as u8))
        .collect();
    let ts = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
    let assignments: Vec<Assignment> = blocks
        .iter()
        .enumerate()
        .map(|(i, b)| {
            Assignment::new(i as i64 + 1, (i % 12) as i64 + 1, b.id, 1, ts, "bench")
        })
        .collect();
    SchedulingContext::build(
        horizon,
        people,
        blocks,
        vec![clinic],
        assignments,
        vec![],
        HashMap::new(),
    )
    .0
}

fn bench_validate(c: &mut Criterion) {
    let ctx = benchmark_context();
    let validator = ComplianceValidator::new(&CoreConfig::default());

    c.bench_function("validate_4_week_12_trainees", |b| {
        b.iter(|| {
            let report = validator.validate(black_box(&ctx));
            black_box(report.compliance_rate)
        })
    });
}

fn bench_context_build(c: &mut Criterion) {
    c.bench_function("context_build_4_weeks", |b| {
        b.iter(|| black_box(benchmark_context().total_blocks()))
    });
}

criterion_group!(benches, bench_validate, bench_context_build);
criterion_main!(benches);
