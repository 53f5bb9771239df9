//! QUBO formulation with a simulated-annealing solver.
//!
//! Builds a sparse quadratic model over the open-slot/person variables with
//! the documented penalty ladder (hard 10_000, regulatory proxy 5_000, soft
//! 100) and anneals a bitstring over it. Annealing hardware is not a
//! dependency of this crate, so the classical fallback always runs; the
//! statistics record `simulated_annealing` as the backend actually used so
//! the substitution is visible to callers.

use chrono::{DateTime, Datelike, Utc};
use std::collections::HashMap;

use super::callback::SolutionCallback;
use super::greedy::{LoopEnd, SolverPass};
use super::problem::{Solution, SolverProblem};
use super::runs::ProgressSnapshot;
use crate::db::clock::Clock;

pub const HARD_PENALTY: f64 = 10_000.0;
pub const REGULATORY_PENALTY: f64 = 5_000.0;
pub const SOFT_PENALTY: f64 = 100.0;

/// Sparse QUBO: linear terms on the diagonal, pairwise terms upper-triangular.
pub struct Qubo {
    pub linear: Vec<f64>,
    pub quadratic: HashMap<(usize, usize), f64>,
}

impl Qubo {
    fn add_pair(&mut self, i: usize, j: usize, weight: f64) {
        let key = if i < j { (i, j) } else { (j, i) };
        *self.quadratic.entry(key).or_default() += weight;
    }

    pub fn energy(&self, state: &[bool]) -> f64 {
        let mut energy: f64 = self
            .linear
            .iter()
            .zip(state)
            .filter(|(_, &x)| x)
            .map(|(w, _)| w)
            .sum();
        for (&(i, j), w) in &self.quadratic {
            if state[i] && state[j] {
                energy += w;
            }
        }
        energy
    }

    /// Energy change from flipping one bit. Linear scan over the pair list;
    /// the model stays small enough that an adjacency index is not worth it.
    fn flip_delta(&self, state: &[bool], bit: usize) -> f64 {
        let sign = if state[bit] { -1.0 } else { 1.0 };
        let mut delta = sign * self.linear[bit];
        for (&(i, j), w) in &self.quadratic {
            if i == bit && state[j] {
                delta += sign * w;
            } else if j == bit && state[i] {
                delta += sign * w;
            }
        }
        delta
    }
}

/// Variable index map: one binary per (slot, candidate) pair.
pub struct QuboModel {
    pub qubo: Qubo,
    /// (slot index, person index within the slot's candidate list).
    pub variables: Vec<(usize, usize)>,
}

/// Build the QUBO from the solver problem.
///
/// - exactly-one per coverage unit: reward the diagonal, punish pairs inside
///   the unit (hard penalty)
/// - one-assignment-per-block per person across units: hard penalty
/// - duty-hour proxy: same person twice on one date is a heavy day, punished
///   at the regulatory weight scaled by the day's combined hours
/// - load spreading: any same-person pair costs the soft weight
pub fn build_qubo(problem: &SolverProblem<'_>) -> QuboModel {
    let mut variables = Vec::new();
    for (slot_idx, candidates) in problem.candidates.iter().enumerate() {
        for cand_idx in 0..candidates.len() {
            variables.push((slot_idx, cand_idx));
        }
    }

    let mut qubo = Qubo {
        linear: vec![0.0; variables.len()],
        quadratic: HashMap::new(),
    };

    // Filling a unit is rewarded; the pairwise terms below make a second
    // fill of the same unit a net loss.
    for w in qubo.linear.iter_mut() {
        *w = -HARD_PENALTY;
    }

    for v1 in 0..variables.len() {
        for v2 in (v1 + 1)..variables.len() {
            let (slot1, cand1) = variables[v1];
            let (slot2, cand2) = variables[v2];
            let person1 = problem.candidates[slot1][cand1];
            let person2 = problem.candidates[slot2][cand2];
            let block1 = problem.slots[slot1].block_id;
            let block2 = problem.slots[slot2].block_id;

            if slot1 == slot2 {
                // At most one person per coverage unit.
                qubo.add_pair(v1, v2, 2.0 * HARD_PENALTY);
                continue;
            }
            if person1 != person2 {
                continue;
            }
            if block1 == block2 {
                // One assignment per block per person.
                qubo.add_pair(v1, v2, 2.0 * HARD_PENALTY);
                continue;
            }
            let date1 = problem.ctx.block(block1).map(|b| b.date);
            let date2 = problem.ctx.block(block2).map(|b| b.date);
            match (date1, date2) {
                (Some(d1), Some(d2)) if d1 == d2 => {
                    // Both sessions of one day: tolerated, but weighted so a
                    // run of heavy days yields to the duty-hour rules.
                    let hours: f64 = [slot1, slot2]
                        .iter()
                        .filter_map(|&s| problem.ctx.rotation(problem.slots[s].rotation_id))
                        .map(|r| r.hours_per_block)
                        .sum();
                    if hours > 16.0 {
                        qubo.add_pair(v1, v2, REGULATORY_PENALTY);
                    } else {
                        qubo.add_pair(v1, v2, SOFT_PENALTY);
                    }
                }
                (Some(d1), Some(d2)) if d1.iso_week() == d2.iso_week() => {
                    qubo.add_pair(v1, v2, SOFT_PENALTY);
                }
                _ => {}
            }
        }
    }

    QuboModel { qubo, variables }
}

/// SplitMix64: tiny deterministic PRNG, fixed-seeded so runs reproduce.
struct SplitMix64(u64);

impl SplitMix64 {
    fn next_u64(&mut self) -> u64 {
        self.0 = self.0.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.0;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    fn next_below(&mut self, n: usize) -> usize {
        (self.next_u64() % n as u64) as usize
    }
}

/// Anneal the QUBO and decode a solution.
pub fn solve_annealing(
    problem: &SolverProblem<'_>,
    callback: &dyn SolutionCallback,
    clock: &dyn Clock,
    deadline: DateTime<Utc>,
    run_id: &str,
    seed: u64,
) -> SolverPass {
    let model = build_qubo(problem);
    let n = model.variables.len();
    if n == 0 {
        return SolverPass {
            solution: problem.empty_solution(),
            iterations: 0,
            end: LoopEnd::Completed,
        };
    }

    let mut rng = SplitMix64(seed.wrapping_add(0x5EED));
    let mut state = vec![false; n];
    let mut energy = 0.0;
    let mut best_state = state.clone();
    let mut best_energy = energy;

    let mut temperature = HARD_PENALTY;
    let cooling = 0.95;
    let steps_per_temperature = (n * 4).max(64);
    let mut iterations: u64 = 0;
    let mut end = LoopEnd::Completed;

    'anneal: while temperature > 0.5 {
        for _ in 0..steps_per_temperature {
            iterations += 1;
            let bit = rng.next_below(n);
            let delta = model.qubo.flip_delta(&state, bit);
            if delta <= 0.0 || rng.next_f64() < (-delta / temperature).exp() {
                state[bit] = !state[bit];
                energy += delta;
                if energy < best_energy {
                    best_energy = energy;
                    best_state = state.clone();
                    callback.on_iteration(&ProgressSnapshot {
                        run_id: run_id.to_string(),
                        iteration: iterations,
                        best_score: best_energy,
                        assignments_count: best_state.iter().filter(|&&x| x).count()
                            + problem.base.len(),
                        violations_count: 0,
                        status: "RUNNING".to_string(),
                        updated_at: clock.now(),
                    });
                }
            }
        }
        if let Some(reason) = callback.should_abort() {
            end = LoopEnd::Aborted(reason);
            break 'anneal;
        }
        if clock.now() >= deadline {
            end = LoopEnd::TimedOut;
            break 'anneal;
        }
        temperature *= cooling;
    }

    SolverPass {
        solution: decode(problem, &model, &best_state),
        iterations,
        end,
    }
}

/// Decode the bitstring: first set candidate per slot wins; conflicting
/// extra bits are ignored (materialize also drops block duplicates).
fn decode(problem: &SolverProblem<'_>, model: &QuboModel, state: &[bool]) -> Solution {
    let mut solution = problem.empty_solution();
    for (v, &(slot_idx, cand_idx)) in model.variables.iter().enumerate() {
        if state[v] && solution[slot_idx].is_none() {
            solution[slot_idx] = Some(problem.candidates[slot_idx][cand_idx]);
        }
    }
    solution
}
