//! Constraint-programming style solver: constructive start plus local search
//! over the x[p,b,t] assignment variables.
//!
//! Hard constraints are enforced through the objective's dominance weights
//! (a hard violation always outweighs any soft gain), the at-most-one-per-
//! block rule is structural, and the soft tier rides in the weighted
//! objective, including the template-balance term. The callback fires on
//! every improving solution; the abort flag is observed once per iteration.
//!
//! Runs `num_workers` perturbed searches in parallel and keeps the best.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;

use super::callback::SolutionCallback;
use super::greedy::{solve_greedy, LoopEnd, SolverPass};
use super::problem::{Objective, Score, Solution, SolverProblem};
use super::runs::ProgressSnapshot;
use crate::db::clock::Clock;
use crate::models::PersonId;

/// Improvement schedule for the local search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchSchedule {
    /// Evaluate every move, take the best. The cp_sat path.
    SteepestDescent,
    /// Take the first improving move found. The pulp path.
    FirstImprovement,
}

pub fn solve_local_search(
    problem: &SolverProblem<'_>,
    objective: &Objective<'_>,
    callback: &dyn SolutionCallback,
    clock: &dyn Clock,
    deadline: DateTime<Utc>,
    run_id: &str,
    num_workers: usize,
    schedule: SearchSchedule,
) -> (SolverPass, Score) {
    // Constructive start.
    let start = solve_greedy(problem, callback, clock, deadline, run_id);
    if !matches!(start.end, LoopEnd::Completed) {
        let score = objective.score(problem, &start.solution);
        return (start, score);
    }

    let workers = num_workers.max(1).min(8);
    let best: Mutex<(Solution, Score, u64, LoopEnd)> = Mutex::new((
        start.solution.clone(),
        objective.score(problem, &start.solution),
        start.iterations,
        LoopEnd::Completed,
    ));

    std::thread::scope(|scope| {
        for worker in 0..workers {
            let best = &best;
            let start_solution = start.solution.clone();
            scope.spawn(move || {
                let solution = perturb(problem, start_solution, worker as u64);
                let pass = descend(
                    problem, objective, callback, clock, deadline, run_id, solution, schedule,
                );
                let score = objective.score(problem, &pass.solution);
                let mut guard = best.lock();
                let combined_iterations = guard.2 + pass.iterations;
                if score.total < guard.1.total {
                    *guard = (pass.solution, score, combined_iterations, pass.end);
                } else {
                    guard.2 = combined_iterations;
                    // An abort or timeout in any worker ends the whole run early.
                    if !matches!(pass.end, LoopEnd::Completed) {
                        guard.3 = pass.end;
                    }
                }
            });
        }
    });

    let (solution, score, iterations, end) = best.into_inner();
    (
        SolverPass {
            solution,
            iterations,
            end,
        },
        score,
    )
}

/// Deterministic perturbation: worker k reassigns every k-th filled slot to
/// the next candidate in its list, giving each worker a distinct basin.
fn perturb(problem: &SolverProblem<'_>, mut solution: Solution, worker: u64) -> Solution {
    if worker == 0 {
        return solution;
    }
    let step = worker as usize + 1;
    for i in (0..solution.len()).step_by(step) {
        if let Some(current) = solution[i] {
            let candidates = &problem.candidates[i];
            if let Some(pos) = candidates.iter().position(|p| *p == current) {
                let next = candidates[(pos + worker as usize) % candidates.len()];
                if fits(problem, &solution, i, next) {
                    solution[i] = Some(next);
                }
            }
        }
    }
    solution
}

/// Whether placing `person` in slot `i` keeps the one-per-block rule.
fn fits(problem: &SolverProblem<'_>, solution: &Solution, i: usize, person: PersonId) -> bool {
    let block = problem.slots[i].block_id;
    let in_base = problem
        .base
        .iter()
        .any(|a| a.person_id == person && a.block_id == block);
    if in_base {
        return false;
    }
    !problem
        .slots
        .iter()
        .zip(solution)
        .enumerate()
        .any(|(j, (slot, choice))| j != i && slot.block_id == block && *choice == Some(person))
}

#[allow(clippy::too_many_arguments)]
fn descend(
    problem: &SolverProblem<'_>,
    objective: &Objective<'_>,
    callback: &dyn SolutionCallback,
    clock: &dyn Clock,
    deadline: DateTime<Utc>,
    run_id: &str,
    mut solution: Solution,
    schedule: SearchSchedule,
) -> SolverPass {
    let mut current = objective.score(problem, &solution);
    let mut iterations: u64 = 0;

    loop {
        iterations += 1;
        if let Some(reason) = callback.should_abort() {
            return SolverPass {
                solution,
                iterations,
                end: LoopEnd::Aborted(reason),
            };
        }
        if clock.now() >= deadline {
            return SolverPass {
                solution,
                iterations,
                end: LoopEnd::TimedOut,
            };
        }

        let mut best_move: Option<(usize, Option<PersonId>, Score)> = None;
        'moves: for i in 0..solution.len() {
            let mut alternatives: Vec<Option<PersonId>> = problem.candidates[i]
                .iter()
                .filter(|p| solution[i] != Some(**p) && fits(problem, &solution, i, **p))
                .map(|p| Some(*p))
                .collect();
            if solution[i].is_some() {
                alternatives.push(None);
            }
            for alt in alternatives {
                let previous = solution[i];
                solution[i] = alt;
                let score = objective.score(problem, &solution);
                solution[i] = previous;
                if score.total < current.total
                    && best_move.as_ref().map_or(true, |(_, _, b)| score.total < b.total)
                {
                    best_move = Some((i, alt, score));
                    if schedule == SearchSchedule::FirstImprovement {
                        break 'moves;
                    }
                }
            }
        }

        match best_move {
            Some((i, alt, score)) => {
                solution[i] = alt;
                current = score;
                callback.on_iteration(&ProgressSnapshot {
                    run_id: run_id.to_string(),
                    iteration: iterations,
                    best_score: current.total,
                    assignments_count: solution.iter().filter(|s| s.is_some()).count()
                        + problem.base.len(),
                    violations_count: current.hard_violations,
                    status: "RUNNING".to_string(),
                    updated_at: clock.now(),
                });
            }
            // Local optimum.
            None => {
                return SolverPass {
                    solution,
                    iterations,
                    end: LoopEnd::Completed,
                }
            }
        }
    }
}

/// Loads per person, exposed for statistics.
pub fn load_spread(problem: &SolverProblem<'_>, solution: &Solution) -> HashMap<PersonId, usize> {
    let mut loads: HashMap<PersonId, usize> = HashMap::new();
    for a in &problem.base {
        *loads.entry(a.person_id).or_default() += 1;
    }
    for choice in solution.iter().flatten() {
        *loads.entry(*choice).or_default() += 1;
    }
    loads
}
