use chrono::{Duration, NaiveDate, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::Arc;

use super::*;
use crate::config::CoreConfig;
use crate::db::backup::InMemoryBackupMarker;
use crate::db::clock::FakeClock;
use crate::db::keyed_store::InMemoryKeyedStore;
use crate::db::repositories::LocalRepository;
use crate::db::repository::ScheduleRepository;
use crate::models::{
    generate_blocks, Absence, AbsenceReason, ActivityType, Coverage, Eligibility, Person, PersonId,
    RotationTemplate, SchedulingContext,
};

fn d(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

struct Harness {
    engine: SchedulingEngine,
    repo: Arc<LocalRepository>,
    clock: FakeClock,
    backup: Arc<InMemoryBackupMarker>,
    store: Arc<InMemoryKeyedStore>,
}

fn harness() -> Harness {
    let clock = FakeClock::at(Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap());
    let shared_clock: crate::db::SharedClock = Arc::new(clock.clone());
    let repo = Arc::new(LocalRepository::new(shared_clock.clone()));
    let store = Arc::new(InMemoryKeyedStore::new(shared_clock.clone()));
    let backup = Arc::new(InMemoryBackupMarker::fresh(shared_clock.clone()));
    let engine = SchedulingEngine::new(
        repo.clone(),
        store.clone(),
        backup.clone(),
        shared_clock,
        CoreConfig::default(),
    );
    Harness {
        engine,
        repo,
        clock,
        backup,
        store,
    }
}

/// Scenario fixture: P1/P2 (PGY-2) and one faculty over Mon-Fri with a
/// single exact-coverage clinic template.
fn trivial_ctx() -> SchedulingContext {
    let clinic = RotationTemplate::new(1, "CLINIC", ActivityType::Clinic)
        .with_coverage(Coverage::exact(1))
        .with_eligibility(Eligibility::trainees_only());
    let (ctx, validation) = SchedulingContext::build(
        (d("2026-03-09"), d("2026-03-13")),
        vec![
            Person::trainee(1, "P1", 2),
            Person::trainee(2, "P2", 2),
            Person::faculty(3, "F1"),
        ],
        generate_blocks(d("2026-03-09"), d("2026-03-13"), 1),
        vec![clinic],
        vec![],
        vec![],
        HashMap::new(),
    );
    assert!(validation.is_valid());
    ctx
}

fn quick_config(algorithm: Algorithm) -> SolveConfig {
    SolveConfig {
        algorithm,
        timeout_seconds: 3_600,
        num_workers: 2,
        ..SolveConfig::default()
    }
}

#[tokio::test]
async fn trivial_feasible_scenario_is_optimal_and_balanced() {
    let h = harness();
    let ctx = trivial_ctx();
    let result = h
        .engine
        .generate(&ctx, &quick_config(Algorithm::CpSat), None)
        .await
        .unwrap();

    assert_eq!(result.status, SolveStatus::Optimal);
    assert_eq!(result.assignments.len(), 10);
    assert!(result
        .assignments
        .iter()
        .all(|a| a.rotation_id.value() == 1));
    assert_eq!(result.compliance_rate, 100.0);

    let p1 = result
        .assignments
        .iter()
        .filter(|a| a.person_id == PersonId(1))
        .count();
    let p2 = result
        .assignments
        .iter()
        .filter(|a| a.person_id == PersonId(2))
        .count();
    assert!(p1.abs_diff(p2) <= 1, "split {} vs {}", p1, p2);

    // Committed under the run id in one transaction.
    let stored = h
        .repo
        .list_assignments(d("2026-03-09"), d("2026-03-13"))
        .await
        .unwrap();
    assert_eq!(stored.len(), 10);
    assert!(stored
        .iter()
        .all(|a| a.source_run_id.as_deref() == Some(result.run_id.as_str())));
}

#[tokio::test]
async fn greedy_and_annealing_also_cover_the_horizon() {
    for algorithm in [Algorithm::Greedy, Algorithm::QuantumSa, Algorithm::Pulp] {
        let h = harness();
        let ctx = trivial_ctx();
        let result = h
            .engine
            .generate(&ctx, &quick_config(algorithm), None)
            .await
            .unwrap();
        assert!(
            result.status.is_success(),
            "{}: {:?}",
            algorithm.as_str(),
            result.status
        );
        assert_eq!(result.assignments.len(), 10, "{}", algorithm.as_str());
    }
}

#[tokio::test]
async fn annealing_reports_its_classical_backend() {
    let h = harness();
    let ctx = trivial_ctx();
    let result = h
        .engine
        .generate(&ctx, &quick_config(Algorithm::QuantumSa), None)
        .await
        .unwrap();
    assert_eq!(result.statistics.backend, "simulated_annealing");
    assert_eq!(result.statistics.algorithm, "quantum_sa");
    assert_eq!(result.status, SolveStatus::Feasible);
}

#[tokio::test]
async fn stale_backup_refuses_before_any_write() {
    let h = harness();
    h.backup
        .set_backup_time(h.clock.now() - Duration::hours(3));
    let ctx = trivial_ctx();
    let err = h
        .engine
        .generate(&ctx, &quick_config(Algorithm::CpSat), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "NO_RECENT_BACKUP");
    assert!(h
        .repo
        .list_assignments(d("2026-03-09"), d("2026-03-13"))
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn no_clinic_templates_reports_dedicated_status() {
    let h = harness();
    let wards = RotationTemplate::new(1, "WARDS", ActivityType::Inpatient);
    let (ctx, _) = SchedulingContext::build(
        (d("2026-03-09"), d("2026-03-09")),
        vec![Person::trainee(1, "P1", 2)],
        generate_blocks(d("2026-03-09"), d("2026-03-09"), 1),
        vec![wards],
        vec![],
        vec![],
        HashMap::new(),
    );
    let result = h
        .engine
        .generate(&ctx, &quick_config(Algorithm::CpSat), None)
        .await
        .unwrap();
    assert_eq!(result.status, SolveStatus::InfeasibleNoTemplates);
    assert!(result.assignments.is_empty());
}

#[tokio::test]
async fn fully_absent_roster_is_infeasible_with_no_assignments() {
    let h = harness();
    let clinic = RotationTemplate::new(1, "CLINIC", ActivityType::Clinic)
        .with_coverage(Coverage::exact(1))
        .with_eligibility(Eligibility::trainees_only());
    let (ctx, _) = SchedulingContext::build(
        (d("2026-03-09"), d("2026-03-09")),
        vec![Person::trainee(1, "P1", 2), Person::trainee(2, "P2", 2)],
        generate_blocks(d("2026-03-09"), d("2026-03-09"), 1),
        vec![clinic],
        vec![],
        vec![
            Absence::new(1, 1, d("2026-03-09"), d("2026-03-09"), AbsenceReason::Leave),
            Absence::new(2, 2, d("2026-03-09"), d("2026-03-09"), AbsenceReason::Tdy),
        ],
        HashMap::new(),
    );
    let result = h
        .engine
        .generate(&ctx, &quick_config(Algorithm::CpSat), None)
        .await
        .unwrap();
    assert_eq!(result.status, SolveStatus::Infeasible);
    assert!(result.assignments.is_empty());
}

#[tokio::test]
async fn idempotent_retry_replays_byte_identical_response() {
    let h = harness();
    let ctx = trivial_ctx();
    let config = quick_config(Algorithm::Greedy);

    let first = h
        .engine
        .generate(&ctx, &config, Some("gen-key-1"))
        .await
        .unwrap();
    let second = h
        .engine
        .generate(&ctx, &config, Some("gen-key-1"))
        .await
        .unwrap();

    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
    // Exactly one side effect.
    assert_eq!(
        h.repo
            .list_assignments(d("2026-03-09"), d("2026-03-13"))
            .await
            .unwrap()
            .len(),
        10
    );
}

#[tokio::test]
async fn same_key_different_body_conflicts() {
    let h = harness();
    let ctx = trivial_ctx();
    h.engine
        .generate(&ctx, &quick_config(Algorithm::Greedy), Some("gen-key-2"))
        .await
        .unwrap();

    let err = h
        .engine
        .generate(&ctx, &quick_config(Algorithm::CpSat), Some("gen-key-2"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "IDEMPOTENCY_CONFLICT");
}

#[tokio::test]
async fn abort_after_completion_is_ignored_and_result_kept() {
    let h = harness();
    let ctx = trivial_ctx();
    let result = h
        .engine
        .generate(&ctx, &quick_config(Algorithm::Greedy), None)
        .await
        .unwrap();
    assert!(result.status.is_success());

    // Abort after completion is ignored.
    let accepted = h
        .engine
        .abort_run(&result.run_id, "too late", "operator")
        .await;
    assert!(!accepted);

    // The result stays under solver:result:{run_id} for later retrieval.
    use crate::db::keyed_store::{result_key, KeyedStore};
    let raw = h.store.get(&result_key(&result.run_id)).await;
    assert!(raw.is_some());
    let parsed: SolveResult = serde_json::from_str(&raw.unwrap()).unwrap();
    assert_eq!(parsed.status, result.status);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn abort_during_long_run_returns_aborted_with_partial_result() {
    let h = harness();

    // A horizon large enough that local search keeps iterating while the
    // abort lands through the durable flag.
    let clinic = RotationTemplate::new(1, "CLINIC", ActivityType::Clinic)
        .with_coverage(Coverage::exact(2))
        .with_eligibility(Eligibility::trainees_only());
    let people: Vec<Person> = (1i64..=8)
        .map(|i| Person::trainee(i, format!("P{}", i), 2))
        .collect();
    let (ctx, _) = SchedulingContext::build(
        (d("2026-03-02"), d("2026-03-27")),
        people,
        generate_blocks(d("2026-03-02"), d("2026-03-27"), 1),
        vec![clinic],
        vec![],
        vec![],
        HashMap::new(),
    );

    // Issue the abort as soon as the engine registers live progress.
    let tracker = h.engine.tracker().clone();
    let aborter = tokio::spawn(async move {
        loop {
            let runs = tracker.active_runs().await;
            if let Some(run_id) = runs.first() {
                tracker.request_abort(run_id, "operator", "ops").await;
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    });

    let result = h
        .engine
        .generate(&ctx, &quick_config(Algorithm::CpSat), None)
        .await
        .unwrap();
    aborter.abort();

    // Either the abort landed mid-run, or the run finished first; both are
    // legal outcomes of the race. When aborted, best-so-far is preserved.
    if result.status == SolveStatus::Aborted {
        assert!(result.statistics.best_score >= 0.0);
        assert!(h.engine.tracker().stored_result(&result.run_id).await.is_some());
    } else {
        assert!(result.status.is_success());
    }
}

#[tokio::test]
async fn progress_snapshots_are_monotone_and_terminal() {
    let h = harness();
    let ctx = trivial_ctx();
    let result = h
        .engine
        .generate(&ctx, &quick_config(Algorithm::Greedy), None)
        .await
        .unwrap();

    let progress = h.engine.progress(&result.run_id).await.unwrap();
    assert_eq!(progress.status, result.status.as_str());
    assert_eq!(progress.iteration, result.statistics.iterations);
    assert!(progress.iteration > 0);
}

#[tokio::test]
async fn pareto_returns_non_dominated_frontier() {
    let h = harness();
    let ctx = trivial_ctx();
    let grid = [
        ObjectiveWeights {
            fairness: 5.0,
            coverage: 1.0,
            preference: 1.0,
        },
        ObjectiveWeights {
            fairness: 1.0,
            coverage: 5.0,
            preference: 1.0,
        },
    ];
    let frontier = h
        .engine
        .generate_pareto(&ctx, &grid, &quick_config(Algorithm::Greedy))
        .await
        .unwrap();
    assert!(!frontier.is_empty());
    assert!(frontier.len() <= 2);
    // Pareto runs never persist.
    assert!(h
        .repo
        .list_assignments(d("2026-03-09"), d("2026-03-13"))
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn optimize_rebalances_a_skewed_schedule() {
    let h = harness();
    let ctx = trivial_ctx();

    // All ten blocks on P1.
    let ts = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
    let skewed: Vec<_> = ctx
        .blocks
        .iter()
        .enumerate()
        .map(|(i, b)| crate::models::Assignment::new(i as i64 + 1, 1, b.id, 1, ts, "seed"))
        .collect();

    let mut config = quick_config(Algorithm::CpSat);
    config.persist = false;
    let result = h.engine.optimize(&ctx, skewed, &config).await.unwrap();
    assert!(result.status.is_success());
    let p1 = result
        .assignments
        .iter()
        .filter(|a| a.person_id == PersonId(1))
        .count();
    let p2 = result
        .assignments
        .iter()
        .filter(|a| a.person_id == PersonId(2))
        .count();
    assert!(p1.abs_diff(p2) <= 1, "optimize split {} vs {}", p1, p2);
}
