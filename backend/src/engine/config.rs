//! Solver configuration and result types.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::constraints::Violation;
use crate::models::Assignment;

/// Solver algorithm selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    CpSat,
    Greedy,
    Pulp,
    QuantumSa,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::CpSat => "cp_sat",
            Algorithm::Greedy => "greedy",
            Algorithm::Pulp => "pulp",
            Algorithm::QuantumSa => "quantum_sa",
        }
    }
}

impl FromStr for Algorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cp_sat" | "cpsat" => Ok(Algorithm::CpSat),
            "greedy" => Ok(Algorithm::Greedy),
            "pulp" => Ok(Algorithm::Pulp),
            "quantum_sa" | "qubo" => Ok(Algorithm::QuantumSa),
            other => Err(format!("Unknown algorithm: {}", other)),
        }
    }
}

/// Which assignment categories the solver must not touch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreserveSets {
    #[serde(default = "default_true")]
    pub absences: bool,
    #[serde(default = "default_true")]
    pub inpatient: bool,
    #[serde(default = "default_true")]
    pub faculty_rotations: bool,
}

fn default_true() -> bool {
    true
}

impl Default for PreserveSets {
    fn default() -> Self {
        Self {
            absences: true,
            inpatient: true,
            faculty_rotations: true,
        }
    }
}

/// Objective weights swept by the Pareto endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveWeights {
    pub fairness: f64,
    pub coverage: f64,
    pub preference: f64,
}

impl Default for ObjectiveWeights {
    fn default() -> Self {
        Self {
            fairness: 1.0,
            coverage: 1.0,
            preference: 1.0,
        }
    }
}

/// One solver invocation's configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolveConfig {
    pub algorithm: Algorithm,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_workers")]
    pub num_workers: usize,
    #[serde(default)]
    pub preserve: PreserveSets,
    #[serde(default)]
    pub weights: ObjectiveWeights,
    /// Whether the run commits assignments to the repository.
    #[serde(default = "default_true")]
    pub persist: bool,
    /// Run the institutional pre-assignment pass before solving.
    #[serde(default = "default_true")]
    pub preassign: bool,
}

fn default_timeout() -> u64 {
    120
}

fn default_workers() -> usize {
    8
}

impl Default for SolveConfig {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::CpSat,
            timeout_seconds: default_timeout(),
            num_workers: default_workers(),
            preserve: PreserveSets::default(),
            weights: ObjectiveWeights::default(),
            persist: true,
            preassign: true,
        }
    }
}

/// Terminal status of a solver run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SolveStatus {
    Optimal,
    Feasible,
    Timeout,
    Infeasible,
    InfeasibleNoTemplates,
    Aborted,
    InternalError,
}

impl SolveStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SolveStatus::Optimal => "OPTIMAL",
            SolveStatus::Feasible => "FEASIBLE",
            SolveStatus::Timeout => "TIMEOUT",
            SolveStatus::Infeasible => "INFEASIBLE",
            SolveStatus::InfeasibleNoTemplates => "INFEASIBLE_NO_TEMPLATES",
            SolveStatus::Aborted => "ABORTED",
            SolveStatus::InternalError => "INTERNAL_ERROR",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, SolveStatus::Optimal | SolveStatus::Feasible)
    }
}

/// Statistics attached to every solver result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SolveStatistics {
    pub algorithm: String,
    /// The backend that actually ran (e.g. simulated annealing standing in
    /// for annealing hardware).
    pub backend: String,
    pub iterations: u64,
    pub best_score: f64,
    pub elapsed_ms: u64,
    pub workers: usize,
    /// Pareto axes: lower is better for each.
    pub fairness_cost: f64,
    pub coverage_cost: f64,
    pub preference_cost: f64,
}

/// Result of one solver run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolveResult {
    pub run_id: String,
    pub status: SolveStatus,
    pub assignments: Vec<Assignment>,
    pub violations: Vec<Violation>,
    pub statistics: SolveStatistics,
    pub compliance_rate: f64,
}
