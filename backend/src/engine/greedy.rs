//! Greedy constructive solver.
//!
//! Blocks are visited in chronological order; each open coverage unit takes
//! the eligible person with the lowest current load, tie-broken by fewest
//! assignments on that template and then by person id for determinism. The
//! abort flag is polled every ten placements.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use super::callback::SolutionCallback;
use super::problem::{Solution, SolverProblem};
use super::runs::ProgressSnapshot;
use crate::db::clock::Clock;
use crate::models::{BlockId, PersonId, RotationId};

/// How a solver loop ended.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopEnd {
    Completed,
    Aborted(String),
    TimedOut,
}

/// Raw outcome of one solver pass, before validation and status mapping.
#[derive(Debug, Clone)]
pub struct SolverPass {
    pub solution: Solution,
    pub iterations: u64,
    pub end: LoopEnd,
}

pub fn solve_greedy(
    problem: &SolverProblem<'_>,
    callback: &dyn SolutionCallback,
    clock: &dyn Clock,
    deadline: DateTime<Utc>,
    run_id: &str,
) -> SolverPass {
    let mut solution = problem.empty_solution();
    let mut load: HashMap<PersonId, usize> = HashMap::new();
    let mut template_load: HashMap<(PersonId, RotationId), usize> = HashMap::new();
    let mut block_taken: Vec<(PersonId, BlockId)> = Vec::new();

    for a in &problem.base {
        *load.entry(a.person_id).or_default() += 1;
        *template_load.entry((a.person_id, a.rotation_id)).or_default() += 1;
        block_taken.push((a.person_id, a.block_id));
    }

    let mut placements: u64 = 0;
    for (i, slot) in problem.slots.iter().enumerate() {
        // Abort and clock checks every 10 placements.
        if placements % 10 == 0 {
            if let Some(reason) = callback.should_abort() {
                return SolverPass {
                    solution,
                    iterations: placements,
                    end: LoopEnd::Aborted(reason),
                };
            }
            if clock.now() >= deadline {
                return SolverPass {
                    solution,
                    iterations: placements,
                    end: LoopEnd::TimedOut,
                };
            }
        }

        let choice = problem.candidates[i]
            .iter()
            .filter(|p| !block_taken.contains(&(**p, slot.block_id)))
            .min_by_key(|p| {
                (
                    load.get(*p).copied().unwrap_or(0),
                    template_load
                        .get(&(**p, slot.rotation_id))
                        .copied()
                        .unwrap_or(0),
                    p.value(),
                )
            })
            .copied();

        if let Some(person) = choice {
            solution[i] = Some(person);
            *load.entry(person).or_default() += 1;
            *template_load.entry((person, slot.rotation_id)).or_default() += 1;
            block_taken.push((person, slot.block_id));
        }
        placements += 1;

        callback.on_iteration(&ProgressSnapshot {
            run_id: run_id.to_string(),
            iteration: placements,
            best_score: 0.0,
            assignments_count: solution.iter().filter(|s| s.is_some()).count()
                + problem.base.len(),
            violations_count: 0,
            status: "RUNNING".to_string(),
            updated_at: clock.now(),
        });
    }

    SolverPass {
        solution,
        iterations: placements,
        end: LoopEnd::Completed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::callback::NoopCallback;
    use crate::db::clock::FakeClock;
    use crate::models::{
        generate_blocks, ActivityType, Coverage, Person, RotationTemplate, SchedulingContext,
    };
    use chrono::{Duration, NaiveDate, TimeZone};
    use std::collections::HashMap as StdHashMap;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn ctx() -> SchedulingContext {
        let clinic = RotationTemplate::new(1, "CLINIC", ActivityType::Clinic)
            .with_coverage(Coverage::exact(1));
        let (ctx, _) = SchedulingContext::build(
            (d("2026-03-09"), d("2026-03-13")),
            vec![Person::trainee(1, "P1", 2), Person::trainee(2, "P2", 2)],
            generate_blocks(d("2026-03-09"), d("2026-03-13"), 1),
            vec![clinic],
            vec![],
            vec![],
            StdHashMap::new(),
        );
        ctx
    }

    #[test]
    fn fills_all_slots_evenly() {
        let ctx = ctx();
        let created = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let problem = SolverProblem::build(&ctx, vec![], created).unwrap();
        let clock = FakeClock::at(created);
        let pass = solve_greedy(
            &problem,
            &NoopCallback,
            &clock,
            created + Duration::seconds(60),
            "run-1",
        );

        assert_eq!(pass.end, LoopEnd::Completed);
        let filled: Vec<_> = pass.solution.iter().flatten().collect();
        assert_eq!(filled.len(), 10);
        let p1 = filled.iter().filter(|p| p.value() == 1).count();
        let p2 = filled.iter().filter(|p| p.value() == 2).count();
        assert_eq!(p1, 5);
        assert_eq!(p2, 5);
    }

    #[test]
    fn abort_in_first_iteration_returns_best_so_far() {
        struct AbortNow;
        impl SolutionCallback for AbortNow {
            fn on_iteration(&self, _p: &ProgressSnapshot) {}
            fn should_abort(&self) -> Option<String> {
                Some("operator".to_string())
            }
        }

        let ctx = ctx();
        let created = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let problem = SolverProblem::build(&ctx, vec![], created).unwrap();
        let clock = FakeClock::at(created);
        let pass = solve_greedy(
            &problem,
            &AbortNow,
            &clock,
            created + Duration::seconds(60),
            "run-1",
        );
        assert_eq!(pass.end, LoopEnd::Aborted("operator".to_string()));
        assert!(pass.solution.iter().all(|s| s.is_none()));
    }

    #[test]
    fn expired_deadline_times_out() {
        let ctx = ctx();
        let created = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let problem = SolverProblem::build(&ctx, vec![], created).unwrap();
        let clock = FakeClock::at(created);
        let pass = solve_greedy(&problem, &NoopCallback, &clock, created, "run-1");
        assert_eq!(pass.end, LoopEnd::TimedOut);
    }

    #[test]
    fn progress_reported_each_placement() {
        struct Counter(AtomicU64);
        impl SolutionCallback for Counter {
            fn on_iteration(&self, _p: &ProgressSnapshot) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
            fn should_abort(&self) -> Option<String> {
                None
            }
        }

        let ctx = ctx();
        let created = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let problem = SolverProblem::build(&ctx, vec![], created).unwrap();
        let clock = FakeClock::at(created);
        let counter = Counter(AtomicU64::new(0));
        solve_greedy(
            &problem,
            &counter,
            &clock,
            created + Duration::seconds(60),
            "run-1",
        );
        assert_eq!(counter.0.load(Ordering::SeqCst), 10);
    }
}
