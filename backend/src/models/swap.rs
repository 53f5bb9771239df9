//! Swap records: requests to exchange or absorb week-level assignments.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::person::PersonId;

crate::define_id_type!(i64, SwapId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SwapType {
    /// Bilateral exchange of two weeks.
    OneToOne,
    /// Target absorbs the source week without a return leg.
    Absorb,
    /// Edge in a multi-party cycle.
    Chain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SwapStatus {
    Pending,
    Validated,
    Executed,
    Rejected,
    RolledBack,
}

impl SwapStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SwapStatus::Pending => "PENDING",
            SwapStatus::Validated => "VALIDATED",
            SwapStatus::Executed => "EXECUTED",
            SwapStatus::Rejected => "REJECTED",
            SwapStatus::RolledBack => "ROLLED_BACK",
        }
    }

    /// Terminal states accept no further transitions except
    /// EXECUTED -> ROLLED_BACK inside the rollback window.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SwapStatus::Rejected | SwapStatus::RolledBack)
    }

    pub fn can_transition_to(&self, next: SwapStatus) -> bool {
        use SwapStatus::*;
        matches!(
            (self, next),
            (Pending, Validated)
                | (Pending, Rejected)
                | (Validated, Executed)
                | (Validated, Rejected)
                | (Executed, RolledBack)
        )
    }
}

/// A request to exchange or absorb assignments between two people.
///
/// Weeks are Monday-normalized; the engine resolves the week to the concrete
/// assignments it contains at validation and execution time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapRecord {
    pub id: SwapId,
    pub source_person: PersonId,
    pub source_week: NaiveDate,
    pub target_person: PersonId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_week: Option<NaiveDate>,
    pub swap_type: SwapType,
    pub status: SwapStatus,
    pub reason: String,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executed_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rolled_back_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_reason: Option<String>,
}

impl SwapRecord {
    pub fn is_pending(&self) -> bool {
        self.status == SwapStatus::Pending
    }

    pub fn is_executed(&self) -> bool {
        self.status == SwapStatus::Executed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_machine_transitions() {
        use SwapStatus::*;
        assert!(Pending.can_transition_to(Validated));
        assert!(Pending.can_transition_to(Rejected));
        assert!(Validated.can_transition_to(Executed));
        assert!(Executed.can_transition_to(RolledBack));

        assert!(!Pending.can_transition_to(Executed));
        assert!(!Executed.can_transition_to(Pending));
        assert!(!RolledBack.can_transition_to(Executed));
        assert!(!Rejected.can_transition_to(Validated));
    }

    #[test]
    fn terminal_states() {
        assert!(SwapStatus::Rejected.is_terminal());
        assert!(SwapStatus::RolledBack.is_terminal());
        assert!(!SwapStatus::Executed.is_terminal());
        assert!(!SwapStatus::Pending.is_terminal());
    }
}
