//! Scheduling engine: solver orchestration, run protocol, and safety gates.
//!
//! `generate` is the main entry point: it gates on backup freshness, claims
//! the idempotency key, fixes the institutional preserve set, dispatches the
//! configured algorithm with an abort/progress bridge, validates the
//! outcome, commits assignments transactionally, and stores the result under
//! the run's ephemeral key.

pub mod callback;
pub mod config;
pub mod cp_sat;
pub mod greedy;
pub mod preassign;
pub mod problem;
pub mod qubo;
pub mod runs;

#[cfg(test)]
mod engine_tests;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use log::{info, warn};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::config::CoreConfig;
use crate::db::backup::SharedBackupMarker;
use crate::db::clock::{Clock, SharedClock};
use crate::db::idempotency::{Claim, IdempotencyLayer};
use crate::db::keyed_store::SharedKeyedStore;
use crate::db::repository::{MutationCause, SharedRepository};
use crate::error::{CoreError, CoreResult};
use crate::models::{ActivityType, Assignment, Role, SchedulingContext};
use crate::validator::ComplianceValidator;

pub use callback::{NoopCallback, SolutionCallback};
pub use config::{
    Algorithm, ObjectiveWeights, PreserveSets, SolveConfig, SolveResult, SolveStatistics,
    SolveStatus,
};
pub use greedy::{LoopEnd, SolverPass};
pub use preassign::{PreassignOutcome, Preassigner};
pub use problem::{Objective, OpenSlot, Score, Solution, SolverProblem};
pub use runs::{AbortSignal, ProgressSnapshot, RunTracker};

/// Serializable request body used for idempotency hashing.
#[derive(Debug, Clone, Serialize)]
struct GenerateRequestBody<'a> {
    horizon: (NaiveDate, NaiveDate),
    config: &'a SolveConfig,
}

/// Bridges solver loops to the run protocol: progress flows out through a
/// channel, aborts flow in through the shared signal.
struct EngineCallback {
    signal: AbortSignal,
    progress_tx: mpsc::UnboundedSender<ProgressSnapshot>,
}

impl SolutionCallback for EngineCallback {
    fn on_iteration(&self, progress: &ProgressSnapshot) {
        let _ = self.progress_tx.send(progress.clone());
    }

    fn should_abort(&self) -> Option<String> {
        if self.signal.is_triggered() {
            Some(self.signal.reason().unwrap_or_else(|| "aborted".to_string()))
        } else {
            None
        }
    }
}

pub struct SchedulingEngine {
    repo: SharedRepository,
    tracker: RunTracker,
    idempotency: IdempotencyLayer,
    backup: SharedBackupMarker,
    clock: SharedClock,
    config: CoreConfig,
}

impl SchedulingEngine {
    pub fn new(
        repo: SharedRepository,
        store: SharedKeyedStore,
        backup: SharedBackupMarker,
        clock: SharedClock,
        config: CoreConfig,
    ) -> Self {
        Self {
            repo,
            tracker: RunTracker::new(store.clone(), clock.clone()),
            idempotency: IdempotencyLayer::new(store),
            backup,
            clock,
            config,
        }
    }

    pub fn tracker(&self) -> &RunTracker {
        &self.tracker
    }

    // ==================== Control plane ====================

    /// Request an abort for a run. Returns false when the run already has a
    /// stored result (aborts after completion are ignored).
    pub async fn abort_run(&self, run_id: &str, reason: &str, actor: &str) -> bool {
        self.tracker.request_abort(run_id, reason, actor).await
    }

    pub async fn progress(&self, run_id: &str) -> Option<ProgressSnapshot> {
        self.tracker.progress(run_id).await
    }

    pub async fn active_runs(&self) -> Vec<String> {
        self.tracker.active_runs().await
    }

    // ==================== Public operations ====================

    /// Produce a schedule for the context, honoring the run protocol.
    pub async fn generate(
        &self,
        ctx: &SchedulingContext,
        solve_config: &SolveConfig,
        idempotency_key: Option<&str>,
    ) -> CoreResult<SolveResult> {
        if solve_config.timeout_seconds == 0 {
            return Err(CoreError::InputError(
                "timeout_seconds must be positive".to_string(),
            ));
        }

        // Idempotency: replay stored responses byte-for-byte; conflicting
        // bodies under the same key fail before any side effect.
        let body_hash = IdempotencyLayer::hash_body(&GenerateRequestBody {
            horizon: ctx.horizon,
            config: solve_config,
        });
        if let Some(key) = idempotency_key {
            match self.idempotency.claim(key, &body_hash).await? {
                Claim::Acquired => {}
                Claim::Replay(stored) => {
                    return serde_json::from_str(&stored).map_err(|e| {
                        CoreError::internal(
                            format!("stored idempotent response is unreadable: {}", e),
                            key.to_string(),
                        )
                    });
                }
                Claim::InFlight => {
                    let stored = self
                        .idempotency
                        .await_response(key, &body_hash, std::time::Duration::from_secs(30))
                        .await?;
                    return serde_json::from_str(&stored).map_err(|e| {
                        CoreError::internal(
                            format!("stored idempotent response is unreadable: {}", e),
                            key.to_string(),
                        )
                    });
                }
            }
        }

        let result = self.generate_inner(ctx, solve_config).await;
        match (&result, idempotency_key) {
            (Ok(solve_result), Some(key)) => {
                let serialized = serde_json::to_string(solve_result)
                    .map_err(|e| CoreError::internal(e.to_string(), key.to_string()))?;
                self.idempotency.complete(key, &body_hash, serialized).await?;
            }
            (Err(_), Some(key)) => {
                // Errors are not cacheable outcomes; let a retry run again.
                self.idempotency.release(key).await;
            }
            _ => {}
        }
        result
    }

    async fn generate_inner(
        &self,
        ctx: &SchedulingContext,
        solve_config: &SolveConfig,
    ) -> CoreResult<SolveResult> {
        // Mandatory safety gate before any mutating run.
        if solve_config.persist {
            self.check_backup_gate()?;
        }

        let run_id = self.tracker.new_run_id();
        let started_at = self.clock.now();
        info!(
            "run {} starting: algorithm={} horizon={}..{}",
            run_id,
            solve_config.algorithm.as_str(),
            ctx.horizon.0,
            ctx.horizon.1
        );

        // The preserve set: existing assignments carried through untouched.
        // Categories switched off in the config are dropped from the run's
        // output instead of being re-planned; the solver never owns them.
        let mut base: Vec<Assignment> = ctx
            .existing_assignments
            .iter()
            .filter(|a| {
                let activity = ctx.rotation(a.rotation_id).map(|r| r.activity_type);
                match activity {
                    Some(ActivityType::Absence) => solve_config.preserve.absences,
                    Some(ActivityType::Inpatient) | Some(ActivityType::NightFloat) => {
                        let held_by_faculty = ctx
                            .person(a.person_id)
                            .map_or(false, |p| p.role == Role::Faculty);
                        if held_by_faculty {
                            solve_config.preserve.faculty_rotations
                        } else {
                            solve_config.preserve.inpatient
                        }
                    }
                    _ => true,
                }
            })
            .cloned()
            .collect();
        if solve_config.preassign {
            let outcome = Preassigner::new(ctx, &self.config, started_at).run();
            info!(
                "run {}: preassigned {} block-assigned slots",
                run_id,
                outcome.assignments.len()
            );
            base.extend(outcome.assignments);
        }

        let problem = match SolverProblem::build(ctx, base, started_at) {
            Some(p) => p,
            None => {
                let result = self
                    .finish_run(
                        &run_id,
                        ctx,
                        solve_config,
                        Vec::new(),
                        SolveStatus::InfeasibleNoTemplates,
                        SolveStatistics {
                            algorithm: solve_config.algorithm.as_str().to_string(),
                            backend: "none".to_string(),
                            workers: solve_config.num_workers,
                            ..Default::default()
                        },
                        started_at,
                    )
                    .await?;
                return Ok(result);
            }
        };

        let validator = ComplianceValidator::new(&self.config);
        let objective = Objective::new(&validator, solve_config.weights);
        let deadline = started_at + Duration::seconds(solve_config.timeout_seconds as i64);

        // Abort bridge: a watcher task mirrors the durable abort flag into
        // the in-process signal the solver polls.
        let signal = AbortSignal::new();
        if let Some(request) = self.tracker.abort_requested(&run_id).await {
            signal.trigger(request.reason);
        }
        let watcher = {
            let tracker = self.tracker.clone();
            let signal = signal.clone();
            let run_id = run_id.clone();
            tokio::spawn(async move {
                loop {
                    if let Some(request) = tracker.abort_requested(&run_id).await {
                        signal.trigger(request.reason);
                        return;
                    }
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                }
            })
        };

        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
        let engine_callback = EngineCallback {
            signal: signal.clone(),
            progress_tx,
        };
        // Publisher task keeps the progress plane live while solver compute
        // occupies this thread; the tracker enforces monotonicity.
        let publisher = {
            let tracker = self.tracker.clone();
            tokio::spawn(async move {
                while let Some(snapshot) = progress_rx.recv().await {
                    tracker.publish_progress(&snapshot).await;
                }
            })
        };

        let (pass, score, backend) = self.dispatch(
            solve_config,
            &problem,
            &objective,
            &engine_callback,
            deadline,
            &run_id,
        );
        watcher.abort();
        drop(engine_callback);
        let _ = publisher.await;

        let assignments = problem.materialize(&pass.solution);
        let status = match &pass.end {
            LoopEnd::Aborted(_) => SolveStatus::Aborted,
            LoopEnd::TimedOut => SolveStatus::Timeout,
            LoopEnd::Completed => {
                if score.hard_violations > 0 || problem.below_min_units(&pass.solution) > 0 {
                    SolveStatus::Infeasible
                } else if solve_config.algorithm == Algorithm::QuantumSa {
                    // Annealing does not prove optimality.
                    SolveStatus::Feasible
                } else {
                    SolveStatus::Optimal
                }
            }
        };

        let statistics = SolveStatistics {
            algorithm: solve_config.algorithm.as_str().to_string(),
            backend: backend.to_string(),
            iterations: pass.iterations,
            best_score: score.total,
            elapsed_ms: (self.clock.now() - started_at).num_milliseconds().max(0) as u64,
            workers: solve_config.num_workers,
            fairness_cost: score.fairness_cost,
            coverage_cost: score.coverage_cost,
            preference_cost: score.preference_cost,
        };

        // Infeasible runs surface the diagnostic violations but no schedule.
        let result_assignments = if status == SolveStatus::Infeasible {
            Vec::new()
        } else {
            assignments
        };

        self.finish_run(
            &run_id,
            ctx,
            solve_config,
            result_assignments,
            status,
            statistics,
            started_at,
        )
        .await
    }

    fn dispatch(
        &self,
        solve_config: &SolveConfig,
        problem: &SolverProblem<'_>,
        objective: &Objective<'_>,
        callback: &dyn SolutionCallback,
        deadline: DateTime<Utc>,
        run_id: &str,
    ) -> (SolverPass, Score, &'static str) {
        match solve_config.algorithm {
            Algorithm::Greedy => {
                let pass = greedy::solve_greedy(problem, callback, self.clock.as_ref(), deadline, run_id);
                let score = objective.score(problem, &pass.solution);
                (pass, score, "greedy")
            }
            Algorithm::CpSat => {
                let (pass, score) = cp_sat::solve_local_search(
                    problem,
                    objective,
                    callback,
                    self.clock.as_ref(),
                    deadline,
                    run_id,
                    solve_config.num_workers,
                    cp_sat::SearchSchedule::SteepestDescent,
                );
                (pass, score, "local_search_steepest")
            }
            Algorithm::Pulp => {
                let (pass, score) = cp_sat::solve_local_search(
                    problem,
                    objective,
                    callback,
                    self.clock.as_ref(),
                    deadline,
                    run_id,
                    solve_config.num_workers,
                    cp_sat::SearchSchedule::FirstImprovement,
                );
                (pass, score, "local_search_first_improvement")
            }
            Algorithm::QuantumSa => {
                let pass = qubo::solve_annealing(
                    problem,
                    callback,
                    self.clock.as_ref(),
                    deadline,
                    run_id,
                    0x5EED_CAFE,
                );
                let score = objective.score(problem, &pass.solution);
                (pass, score, "simulated_annealing")
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn finish_run(
        &self,
        run_id: &str,
        ctx: &SchedulingContext,
        solve_config: &SolveConfig,
        mut assignments: Vec<Assignment>,
        status: SolveStatus,
        statistics: SolveStatistics,
        started_at: DateTime<Utc>,
    ) -> CoreResult<SolveResult> {
        let validator = ComplianceValidator::new(&self.config);
        let report = validator.validate_candidate(ctx, &assignments);

        // Commit only successful runs; the insert is a single transaction,
        // so a failure leaves no partial writes.
        if solve_config.persist && status.is_success() && !assignments.is_empty() {
            // Only rows the solver created; preserved input rows are already
            // persisted.
            let new_rows: Vec<Assignment> = assignments
                .iter()
                .filter(|a| a.id.value() == 0)
                .cloned()
                .map(|a| a.from_run(run_id.to_string()))
                .collect();
            let stored = self
                .repo
                .insert_assignments(
                    &new_rows,
                    MutationCause::SolverRun(run_id.to_string()),
                    "solver",
                )
                .await
                .map_err(|e| {
                    warn!("run {}: commit failed: {}", run_id, e);
                    CoreError::internal(format!("assignment commit failed: {}", e), run_id)
                })?;
            let preserved: Vec<Assignment> = assignments
                .iter()
                .filter(|a| a.id.value() != 0)
                .cloned()
                .collect();
            assignments = preserved.into_iter().chain(stored).collect();
        }

        let result = SolveResult {
            run_id: run_id.to_string(),
            status,
            assignments,
            violations: report.violations.clone(),
            statistics,
            compliance_rate: report.compliance_rate,
        };

        // Terminal progress and durable (ephemeral-store) result. The result
        // is stored before the abort key is consulted again, so late aborts
        // land after completion and are ignored.
        let final_snapshot = ProgressSnapshot {
            run_id: run_id.to_string(),
            iteration: result.statistics.iterations,
            best_score: result.statistics.best_score,
            assignments_count: result.assignments.len(),
            violations_count: result.violations.len(),
            status: result.status.as_str().to_string(),
            updated_at: self.clock.now(),
        };
        if let Ok(serialized) = serde_json::to_string(&result) {
            self.tracker.store_result(run_id, serialized).await;
        }
        self.tracker.publish_progress(&final_snapshot).await;

        info!(
            "run {} finished: status={} assignments={} violations={} elapsed={}ms",
            run_id,
            result.status.as_str(),
            result.assignments.len(),
            result.violations.len(),
            (self.clock.now() - started_at).num_milliseconds()
        );
        Ok(result)
    }

    /// Improve an existing schedule by local search under the same contract.
    ///
    /// Solver-owned assignments in `existing` become variables again;
    /// everything else is preserved.
    pub async fn optimize(
        &self,
        ctx: &SchedulingContext,
        existing: Vec<Assignment>,
        solve_config: &SolveConfig,
    ) -> CoreResult<SolveResult> {
        let solver_owned: Vec<bool> = existing
            .iter()
            .map(|a| {
                ctx.rotation(a.rotation_id)
                    .map_or(false, |r| r.is_solver_owned())
            })
            .collect();
        let preserved: Vec<Assignment> = existing
            .iter()
            .zip(&solver_owned)
            .filter(|(_, owned)| !**owned)
            .map(|(a, _)| a.clone())
            .collect();

        // Re-solve the solver-owned portion from the preserved base.
        let optimize_ctx = ctx.with_assignments(preserved);
        let mut config = solve_config.clone();
        config.preassign = false;
        self.generate_inner(&optimize_ctx, &config).await
    }

    /// Sweep a weights grid and return the non-dominated frontier over
    /// (fairness, coverage, preference-match).
    pub async fn generate_pareto(
        &self,
        ctx: &SchedulingContext,
        weights_grid: &[ObjectiveWeights],
        solve_config: &SolveConfig,
    ) -> CoreResult<Vec<SolveResult>> {
        if weights_grid.is_empty() {
            return Err(CoreError::InputError("weights grid is empty".to_string()));
        }
        let mut results = Vec::new();
        for weights in weights_grid {
            let mut config = solve_config.clone();
            config.weights = *weights;
            config.persist = false;
            results.push(self.generate_inner(ctx, &config).await?);
        }

        let dominated: Vec<bool> = results
            .iter()
            .map(|candidate| {
                results.iter().any(|other| {
                    !std::ptr::eq(other, candidate) && dominates(&other.statistics, &candidate.statistics)
                })
            })
            .collect();
        Ok(results
            .into_iter()
            .zip(dominated)
            .filter(|(_, is_dominated)| !is_dominated)
            .map(|(r, _)| r)
            .collect())
    }

    fn check_backup_gate(&self) -> CoreResult<()> {
        let max_age = Duration::hours(self.config.engine.backup_max_age_hours as i64);
        match self.backup.latest_backup_age() {
            Some(age) if age < max_age => Ok(()),
            Some(age) => Err(CoreError::BackupMissing(format!(
                "latest backup is {} minutes old; at most {} minutes allowed",
                age.num_minutes(),
                max_age.num_minutes()
            ))),
            None => Err(CoreError::BackupMissing(
                "no backup of the assignment store exists".to_string(),
            )),
        }
    }
}

/// Strict Pareto dominance on the three objective axes (lower is better).
fn dominates(a: &SolveStatistics, b: &SolveStatistics) -> bool {
    let at_least_as_good = a.fairness_cost <= b.fairness_cost
        && a.coverage_cost <= b.coverage_cost
        && a.preference_cost <= b.preference_cost;
    let strictly_better = a.fairness_cost < b.fairness_cost
        || a.coverage_cost < b.coverage_cost
        || a.preference_cost < b.preference_cost;
    at_least_as_good && strictly_better
}
