//! End-to-end integration tests over the public API: repository seeding,
//! context loading, schedule generation, compliance validation, swaps, and
//! resilience analysis together.

use chrono::{NaiveDate, TimeZone, Utc};
use std::sync::Arc;

use rms_rust::config::CoreConfig;
use rms_rust::db::services::load_context;
use rms_rust::db::{
    FakeClock, InMemoryBackupMarker, InMemoryKeyedStore, MutationCause, RepositoryFactory,
    ScheduleRepository, SharedClock, SharedRepository,
};
use rms_rust::engine::{Algorithm, SchedulingEngine, SolveConfig, SolveStatus};
use rms_rust::models::{
    generate_blocks, ActivityType, Coverage, Eligibility, Person, PersonId, RotationTemplate,
    SwapType,
};
use rms_rust::resilience::ResilienceAnalyzer;
use rms_rust::swap::{SwapEngine, SwapSpec};
use rms_rust::validator::ComplianceValidator;

fn d(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

struct Stack {
    repo: SharedRepository,
    engine: SchedulingEngine,
    swap_engine: SwapEngine,
    clock: FakeClock,
    config: CoreConfig,
}

async fn stack() -> Stack {
    let clock = FakeClock::at(Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap());
    let shared_clock: SharedClock = Arc::new(clock.clone());
    let repo = RepositoryFactory::create_local(shared_clock.clone());
    let store = Arc::new(InMemoryKeyedStore::new(shared_clock.clone()));
    let backup = Arc::new(InMemoryBackupMarker::fresh(shared_clock.clone()));
    let config = CoreConfig::default();

    let engine = SchedulingEngine::new(
        repo.clone(),
        store,
        backup,
        shared_clock.clone(),
        config.clone(),
    );
    let swap_engine = SwapEngine::new(
        repo.clone(),
        shared_clock,
        Arc::new(rms_rust::db::LogDispatcher),
        config.clone(),
    );

    repo.store_people(&[
        Person::trainee(1, "P1", 2),
        Person::trainee(2, "P2", 2),
        Person::faculty(10, "F1"),
    ])
    .await
    .unwrap();
    repo.store_rotations(&[RotationTemplate::new(1, "CLINIC", ActivityType::Clinic)
        .with_coverage(Coverage::exact(1))
        .with_eligibility(Eligibility::trainees_only())
        .with_hours(5.0)])
        .await
        .unwrap();
    repo.store_blocks(&generate_blocks(d("2026-03-09"), d("2026-03-13"), 1))
        .await
        .unwrap();

    Stack {
        repo,
        engine,
        swap_engine,
        clock,
        config,
    }
}

#[tokio::test]
async fn generate_validate_and_analyze_round_trip() {
    let s = stack().await;
    let (ctx, validation) = load_context(&s.repo, d("2026-03-09"), d("2026-03-13"))
        .await
        .unwrap();
    assert!(validation.is_valid());

    let result = s
        .engine
        .generate(
            &ctx,
            &SolveConfig {
                algorithm: Algorithm::CpSat,
                timeout_seconds: 600,
                num_workers: 2,
                ..SolveConfig::default()
            },
            None,
        )
        .await
        .unwrap();
    assert_eq!(result.status, SolveStatus::Optimal);
    assert_eq!(result.assignments.len(), 10);
    assert_eq!(result.compliance_rate, 100.0);

    // Reload and validate the persisted schedule.
    let (ctx, _) = load_context(&s.repo, d("2026-03-09"), d("2026-03-13"))
        .await
        .unwrap();
    assert_eq!(ctx.existing_assignments.len(), 10);
    let report = ComplianceValidator::new(&s.config).validate(&ctx);
    assert!(report.is_valid());
    assert_eq!(report.compliance_rate, 100.0);

    // Resilience over the committed schedule: two interchangeable trainees
    // mean no single point of failure.
    let analyzer = ResilienceAnalyzer::new(s.config.clone(), Arc::new(s.clock.clone()));
    let resilience = analyzer.analyze(&ctx);
    assert!(resilience.errors.is_empty());
    assert_eq!(
        resilience.n1.as_ref().map(|n| n.scenarios_vulnerable),
        Some(0)
    );
}

#[tokio::test]
async fn swap_after_generation_preserves_block_rotation_keys() {
    let s = stack().await;
    let (ctx, _) = load_context(&s.repo, d("2026-03-09"), d("2026-03-13"))
        .await
        .unwrap();
    s.engine
        .generate(
            &ctx,
            &SolveConfig {
                algorithm: Algorithm::Greedy,
                timeout_seconds: 600,
                ..SolveConfig::default()
            },
            None,
        )
        .await
        .unwrap();

    let (ctx, _) = load_context(&s.repo, d("2026-03-09"), d("2026-03-13"))
        .await
        .unwrap();
    let keys_before: Vec<(i64, i64)> = {
        let mut keys: Vec<(i64, i64)> = ctx
            .existing_assignments
            .iter()
            .map(|a| (a.block_id.value(), a.rotation_id.value()))
            .collect();
        keys.sort_unstable();
        keys
    };

    let record = s
        .swap_engine
        .request_swap(
            SwapSpec {
                source_person: PersonId(1),
                source_week: d("2026-03-09"),
                target_person: PersonId(2),
                target_week: Some(d("2026-03-09")),
                swap_type: SwapType::OneToOne,
                reason: "integration".to_string(),
                requested_by: "test".to_string(),
            },
            None,
        )
        .await
        .unwrap();
    let (ok, violations) = s.swap_engine.validate_swap(&ctx, record.id).await.unwrap();
    assert!(ok, "{:?}", violations);
    s.swap_engine
        .execute_swap(&ctx, record.id, "test")
        .await
        .unwrap();

    // The multiset of (block, rotation) keys is untouched by the swap.
    let (ctx, _) = load_context(&s.repo, d("2026-03-09"), d("2026-03-13"))
        .await
        .unwrap();
    let keys_after: Vec<(i64, i64)> = {
        let mut keys: Vec<(i64, i64)> = ctx
            .existing_assignments
            .iter()
            .map(|a| (a.block_id.value(), a.rotation_id.value()))
            .collect();
        keys.sort_unstable();
        keys
    };
    assert_eq!(keys_before, keys_after);

    // And the unique-slot invariant still holds.
    let mut slots: Vec<(i64, i64)> = ctx
        .existing_assignments
        .iter()
        .map(|a| (a.person_id.value(), a.block_id.value()))
        .collect();
    slots.sort_unstable();
    let len = slots.len();
    slots.dedup();
    assert_eq!(slots.len(), len);
}

#[tokio::test]
async fn manual_writes_and_solver_runs_share_the_audit_trail() {
    let s = stack().await;
    let blocks = s.repo.list_blocks(d("2026-03-09"), d("2026-03-13")).await.unwrap();
    let now = Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap();
    s.repo
        .insert_assignments(
            &[rms_rust::models::Assignment::new(0, 1, blocks[0].id, 1, now, "admin")],
            MutationCause::Manual("ticket-123".into()),
            "admin",
        )
        .await
        .unwrap();

    let (ctx, _) = load_context(&s.repo, d("2026-03-09"), d("2026-03-13"))
        .await
        .unwrap();
    let result = s
        .engine
        .generate(
            &ctx,
            &SolveConfig {
                algorithm: Algorithm::Greedy,
                timeout_seconds: 600,
                ..SolveConfig::default()
            },
            None,
        )
        .await
        .unwrap();
    assert!(result.status.is_success());

    // Solver-created rows carry the run id; the manual row does not.
    let run_audit = s.repo.audit_for_run(&result.run_id).await.unwrap();
    assert!(!run_audit.is_empty());
    let all = s
        .repo
        .list_assignments(d("2026-03-09"), d("2026-03-13"))
        .await
        .unwrap();
    let manual = all.iter().find(|a| a.created_by == "admin").unwrap();
    assert!(manual.source_run_id.is_none());
    assert!(all
        .iter()
        .filter(|a| a.created_by != "admin")
        .all(|a| a.source_run_id.as_deref() == Some(result.run_id.as_str())));
}
