//! Rotation templates: the kinds of work a block can hold.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::person::{Person, Role};

crate::define_id_type!(i64, RotationId);

/// Canonical activity classification for a rotation template.
///
/// The set is closed: context construction rejects unknown values instead of
/// carrying free-form strings through the solver. `"outpatient"` is accepted
/// as a legacy alias of `clinic` during parsing and nowhere else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    Inpatient,
    Clinic,
    Elective,
    Absence,
    Conference,
    Call,
    Procedure,
    NightFloat,
}

impl ActivityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityType::Inpatient => "inpatient",
            ActivityType::Clinic => "clinic",
            ActivityType::Elective => "elective",
            ActivityType::Absence => "absence",
            ActivityType::Conference => "conference",
            ActivityType::Call => "call",
            ActivityType::Procedure => "procedure",
            ActivityType::NightFloat => "night_float",
        }
    }

    /// Activity types that count as on-duty for consecutive-day rules.
    pub fn counts_as_duty(&self) -> bool {
        matches!(
            self,
            ActivityType::Inpatient
                | ActivityType::Clinic
                | ActivityType::Call
                | ActivityType::Procedure
                | ActivityType::Conference
                | ActivityType::NightFloat
        )
    }

    /// Overnight activities extend past the nominal PM session end.
    pub fn is_overnight(&self) -> bool {
        matches!(self, ActivityType::NightFloat | ActivityType::Call)
    }
}

impl fmt::Display for ActivityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActivityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "inpatient" => Ok(ActivityType::Inpatient),
            // Historical seed data used both names for the same activity.
            "clinic" | "outpatient" => Ok(ActivityType::Clinic),
            "elective" => Ok(ActivityType::Elective),
            "absence" => Ok(ActivityType::Absence),
            "conference" => Ok(ActivityType::Conference),
            "call" => Ok(ActivityType::Call),
            "procedure" => Ok(ActivityType::Procedure),
            "night_float" | "nightfloat" => Ok(ActivityType::NightFloat),
            other => Err(format!("Unknown activity type: {}", other)),
        }
    }
}

/// Scheduling unit size for a rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    /// One AM/PM session at a time; owned by the half-day solver.
    HalfDay,
    /// Two-week unit (half of a four-week block), e.g. night float.
    HalfBlock,
    /// Full four-week block, e.g. inpatient services.
    FullBlock,
}

/// Headcount requirements per block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coverage {
    pub min: u32,
    pub target: u32,
    pub max: u32,
}

impl Coverage {
    pub fn exact(n: u32) -> Self {
        Self {
            min: n,
            target: n,
            max: n,
        }
    }

    pub fn range(min: u32, target: u32, max: u32) -> Self {
        Self { min, target, max }
    }
}

/// Who may hold an assignment on a rotation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Eligibility {
    /// Allowed roles; empty means any role.
    #[serde(default)]
    pub roles: Vec<Role>,
    #[serde(default)]
    pub min_pgy: Option<u8>,
    #[serde(default)]
    pub max_pgy: Option<u8>,
    /// Every listed credential tag must be held.
    #[serde(default)]
    pub required_credentials: Vec<String>,
}

impl Eligibility {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn trainees_only() -> Self {
        Self {
            roles: vec![Role::Trainee],
            ..Self::default()
        }
    }

    pub fn faculty_only() -> Self {
        Self {
            roles: vec![Role::Faculty],
            ..Self::default()
        }
    }

    pub fn matches(&self, person: &Person) -> bool {
        if !person.active {
            return false;
        }
        if !self.roles.is_empty() && !self.roles.contains(&person.role) {
            return false;
        }
        if let Some(min) = self.min_pgy {
            match person.pgy_level {
                Some(pgy) if pgy >= min => {}
                _ => return false,
            }
        }
        if let Some(max) = self.max_pgy {
            match person.pgy_level {
                Some(pgy) if pgy <= max => {}
                // Faculty have no PGY level; an upper bound does not exclude them
                // unless the role filter already did.
                None => {}
                _ => return false,
            }
        }
        self.required_credentials
            .iter()
            .all(|c| person.has_credential(c))
    }
}

/// The kind of work performed in a block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationTemplate {
    pub id: RotationId,
    pub name: String,
    pub activity_type: ActivityType,
    pub granularity: Granularity,
    pub eligibility: Eligibility,
    pub coverage: Coverage,
    /// Nominal duty hours attributed per assigned block.
    pub hours_per_block: f64,
    /// At-home call: hours count only when called in. Absent actualized
    /// hours on the assignment, nominal `hours_per_block` is attributed.
    pub at_home_call: bool,
}

impl RotationTemplate {
    pub fn new(
        id: impl Into<RotationId>,
        name: impl Into<String>,
        activity_type: ActivityType,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            activity_type,
            granularity: match activity_type {
                ActivityType::Inpatient => Granularity::FullBlock,
                ActivityType::NightFloat => Granularity::HalfBlock,
                _ => Granularity::HalfDay,
            },
            eligibility: Eligibility::any(),
            coverage: Coverage::range(0, 1, u32::MAX),
            hours_per_block: default_hours(activity_type),
            at_home_call: false,
        }
    }

    pub fn with_coverage(mut self, coverage: Coverage) -> Self {
        self.coverage = coverage;
        self
    }

    pub fn with_eligibility(mut self, eligibility: Eligibility) -> Self {
        self.eligibility = eligibility;
        self
    }

    pub fn with_hours(mut self, hours_per_block: f64) -> Self {
        self.hours_per_block = hours_per_block;
        self
    }

    /// Duty hours to attribute for one assigned block.
    ///
    /// `actualized` overrides the nominal figure when the caller supplies
    /// called-in hours for at-home call. Without it the nominal template
    /// hours apply, including for at-home call templates.
    pub fn hours_for(&self, actualized: Option<f64>) -> f64 {
        actualized.unwrap_or(self.hours_per_block)
    }

    /// Whether the half-day solver owns this template's assignments.
    pub fn is_solver_owned(&self) -> bool {
        self.activity_type == ActivityType::Clinic && self.granularity == Granularity::HalfDay
    }
}

fn default_hours(activity: ActivityType) -> f64 {
    match activity {
        ActivityType::Absence => 0.0,
        ActivityType::Conference => 4.0,
        ActivityType::NightFloat => 12.0,
        ActivityType::Call => 12.0,
        _ => 5.0,
    }
}
