//! Compliance report types.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::constraints::{ConstraintTier, Severity, Violation};
use crate::models::PersonId;

/// Per-person duty-hour metrics included in every report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersonMetrics {
    pub total_duty_hours: f64,
    /// Worst 28-day rolling average of weekly hours.
    pub max_window_average: f64,
    pub longest_duty_run_days: u32,
    pub days_off: u32,
    pub violation_count: usize,
}

/// Result of a compliance validation pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceReport {
    pub violations: Vec<Violation>,
    /// 100 minus the percentage of blocks implicated in violations, rounded
    /// to one decimal.
    pub compliance_rate: f64,
    pub per_person: HashMap<PersonId, PersonMetrics>,
    pub total_blocks: usize,
    pub violating_blocks: usize,
}

impl ComplianceReport {
    /// A schedule is valid iff it has no Tier-1 (regulatory) violations.
    /// Validator faults also invalidate: an unevaluated rule proves nothing.
    pub fn is_valid(&self) -> bool {
        !self
            .violations
            .iter()
            .any(|v| v.severity == Severity::Critical || v.kind == "VALIDATOR_FAULT")
    }

    pub fn violations_of(&self, kind: &str) -> impl Iterator<Item = &Violation> {
        let kind = kind.to_string();
        self.violations.iter().filter(move |v| v.kind == kind)
    }

    pub fn hard_violation_count(&self) -> usize {
        self.violations
            .iter()
            .filter(|v| matches!(v.severity, Severity::Critical | Severity::High))
            .count()
    }
}

/// Round a rate to one decimal place.
pub(crate) fn round_rate(rate: f64) -> f64 {
    (rate * 10.0).round() / 10.0
}

/// Compliance rate from block counts.
pub(crate) fn compliance_rate(violating_blocks: usize, total_blocks: usize) -> f64 {
    if total_blocks == 0 {
        return 100.0;
    }
    round_rate(100.0 - 100.0 * violating_blocks as f64 / total_blocks as f64)
}

/// Severity implied by a tier, re-exported for report consumers.
pub fn severity_for_tier(tier: ConstraintTier) -> Severity {
    tier.severity()
}
