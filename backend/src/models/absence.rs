//! Scheduled unavailability windows.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::person::PersonId;

crate::define_id_type!(i64, AbsenceId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbsenceReason {
    Leave,
    Tdy,
    Deployment,
    Sick,
}

impl AbsenceReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AbsenceReason::Leave => "leave",
            AbsenceReason::Tdy => "tdy",
            AbsenceReason::Deployment => "deployment",
            AbsenceReason::Sick => "sick",
        }
    }
}

/// A person's unavailability over an inclusive date range.
///
/// During an absence window the person holds no assignments other than
/// `absence`-typed ones; pre-existing overlaps are surfaced as conflicts by
/// the context builder rather than silently dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Absence {
    pub id: AbsenceId,
    pub person_id: PersonId,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub reason: AbsenceReason,
}

impl Absence {
    pub fn new(
        id: impl Into<AbsenceId>,
        person_id: impl Into<PersonId>,
        start_date: NaiveDate,
        end_date: NaiveDate,
        reason: AbsenceReason,
    ) -> Self {
        Self {
            id: id.into(),
            person_id: person_id.into(),
            start_date,
            end_date,
            reason,
        }
    }

    pub fn covers(&self, date: NaiveDate) -> bool {
        self.start_date <= date && date <= self.end_date
    }

    pub fn overlaps(&self, start: NaiveDate, end: NaiveDate) -> bool {
        self.start_date <= end && start <= self.end_date
    }
}
