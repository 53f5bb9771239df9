//! Tiered constraint library.
//!
//! Constraints are enumerated variants behind one capability surface:
//! `evaluate` produces violations against a candidate assignment set,
//! `tier`/`is_hard`/`penalty_weight` drive solver objectives and report
//! severity. Registration is explicit construction via
//! [`default_constraint_set`]; there are no string-keyed registries.
//!
//! Penalty dominance is fixed: Regulatory >> Institutional >> Soft >>
//! Optimization. A fault inside one constraint never unwinds evaluation of
//! the others; it surfaces as a `VALIDATOR_FAULT` violation instead.

pub mod institutional;
pub mod regulatory;
pub mod soft;

#[cfg(test)]
mod regulatory_tests;

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::config::CoreConfig;
use crate::models::{
    ActivityType, Assignment, BlockId, PersonId, SchedulingContext, Session,
};

pub use institutional::*;
pub use regulatory::*;
pub use soft::*;

/// Constraint tier, in dominance order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintTier {
    Regulatory,
    Institutional,
    Soft,
    Optimization,
}

impl ConstraintTier {
    /// Severity reported for violations of this tier.
    pub fn severity(&self) -> Severity {
        match self {
            ConstraintTier::Regulatory => Severity::Critical,
            ConstraintTier::Institutional => Severity::High,
            ConstraintTier::Soft => Severity::Medium,
            ConstraintTier::Optimization => Severity::Low,
        }
    }

    /// Penalty dominance base for solver objectives.
    pub fn dominance_weight(&self) -> f64 {
        match self {
            ConstraintTier::Regulatory => 10_000.0,
            ConstraintTier::Institutional => 1_000.0,
            ConstraintTier::Soft => 10.0,
            ConstraintTier::Optimization => 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Critical = 1,
    High = 2,
    Medium = 3,
    Low = 4,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "CRITICAL",
            Severity::High => "HIGH",
            Severity::Medium => "MEDIUM",
            Severity::Low => "LOW",
        }
    }
}

/// A single constraint violation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    #[serde(rename = "type")]
    pub kind: String,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub person_id: Option<PersonId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_id: Option<BlockId>,
    pub message: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub details: serde_json::Value,
}

impl Violation {
    pub fn new(kind: impl Into<String>, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            severity,
            person_id: None,
            block_id: None,
            message: message.into(),
            details: serde_json::Value::Null,
        }
    }

    pub fn for_person(mut self, person: PersonId) -> Self {
        self.person_id = Some(person);
        self
    }

    pub fn for_block(mut self, block: BlockId) -> Self {
        self.block_id = Some(block);
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// A fault raised inside a constraint's own evaluation.
///
/// Converted to a `VALIDATOR_FAULT` violation by the validator so that one
/// broken rule cannot take down the whole report.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintFault {
    pub constraint: &'static str,
    pub message: String,
}

pub type ConstraintResult = Result<Vec<Violation>, ConstraintFault>;

/// A candidate schedule under evaluation: the context plus the full
/// assignment set being judged (existing plus proposed).
pub struct ScheduleView<'a> {
    pub ctx: &'a SchedulingContext,
    pub assignments: &'a [Assignment],
    by_person: HashMap<PersonId, Vec<usize>>,
    by_block: HashMap<BlockId, Vec<usize>>,
}

impl<'a> ScheduleView<'a> {
    pub fn new(ctx: &'a SchedulingContext, assignments: &'a [Assignment]) -> Self {
        let mut by_person: HashMap<PersonId, Vec<usize>> = HashMap::new();
        let mut by_block: HashMap<BlockId, Vec<usize>> = HashMap::new();
        for (i, a) in assignments.iter().enumerate() {
            by_person.entry(a.person_id).or_default().push(i);
            by_block.entry(a.block_id).or_default().push(i);
        }
        Self {
            ctx,
            assignments,
            by_person,
            by_block,
        }
    }

    /// View over the context's own assignment set.
    pub fn of_context(ctx: &'a SchedulingContext) -> Self {
        Self::new(ctx, &ctx.existing_assignments)
    }

    pub fn assignments_for(&self, person: PersonId) -> impl Iterator<Item = &Assignment> {
        self.by_person
            .get(&person)
            .into_iter()
            .flatten()
            .map(move |&i| &self.assignments[i])
    }

    pub fn assignments_on(&self, block: BlockId) -> impl Iterator<Item = &Assignment> {
        self.by_block
            .get(&block)
            .into_iter()
            .flatten()
            .map(move |&i| &self.assignments[i])
    }

    /// Duty hours attributed per calendar date.
    pub fn duty_hours_by_date(&self, person: PersonId) -> BTreeMap<NaiveDate, f64> {
        let mut hours: BTreeMap<NaiveDate, f64> = BTreeMap::new();
        for a in self.assignments_for(person) {
            let (block, rotation) = match (self.ctx.block(a.block_id), self.ctx.rotation(a.rotation_id))
            {
                (Some(b), Some(r)) => (b, r),
                _ => continue,
            };
            if rotation.activity_type == ActivityType::Absence {
                continue;
            }
            *hours.entry(block.date).or_default() += rotation.hours_for(a.actualized_hours);
        }
        hours
    }

    /// Dates with at least one on-duty assignment.
    pub fn duty_dates(&self, person: PersonId) -> BTreeSet<NaiveDate> {
        self.assignments_for(person)
            .filter_map(|a| {
                let block = self.ctx.block(a.block_id)?;
                let rotation = self.ctx.rotation(a.rotation_id)?;
                rotation.activity_type.counts_as_duty().then_some(block.date)
            })
            .collect()
    }

    /// Dates with an overnight assignment (night float or call).
    pub fn night_dates(&self, person: PersonId) -> BTreeSet<NaiveDate> {
        self.assignments_for(person)
            .filter_map(|a| {
                let block = self.ctx.block(a.block_id)?;
                let rotation = self.ctx.rotation(a.rotation_id)?;
                rotation.activity_type.is_overnight().then_some(block.date)
            })
            .collect()
    }

    /// Dates with a call assignment.
    pub fn call_dates(&self, person: PersonId) -> BTreeSet<NaiveDate> {
        self.assignments_for(person)
            .filter_map(|a| {
                let block = self.ctx.block(a.block_id)?;
                let rotation = self.ctx.rotation(a.rotation_id)?;
                (rotation.activity_type == ActivityType::Call).then_some(block.date)
            })
            .collect()
    }

    /// Concrete work interval of an assignment.
    ///
    /// Overnight activity in a PM session runs 19:00 through 07:00 the next
    /// morning; everything else keeps the nominal session window.
    pub fn assignment_interval(&self, a: &Assignment) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let block = self.ctx.block(a.block_id)?;
        let rotation = self.ctx.rotation(a.rotation_id)?;
        if rotation.activity_type == ActivityType::Absence {
            return None;
        }
        if rotation.activity_type.is_overnight() && block.session == Session::Pm {
            let start = chrono::Utc.from_utc_datetime(
                &block
                    .date
                    .and_time(chrono::NaiveTime::from_hms_opt(19, 0, 0).unwrap()),
            );
            let end = chrono::Utc.from_utc_datetime(
                &(block.date + Duration::days(1))
                    .and_time(chrono::NaiveTime::from_hms_opt(7, 0, 0).unwrap()),
            );
            return Some((start, end));
        }
        Some((block.starts_at(), block.ends_at()))
    }

    /// Maximal continuous duty periods: runs of intervals where the next
    /// start is within one hour of the previous end.
    pub fn duty_periods(&self, person: PersonId) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
        let mut intervals: Vec<(DateTime<Utc>, DateTime<Utc>)> = self
            .assignments_for(person)
            .filter_map(|a| self.assignment_interval(a))
            .collect();
        intervals.sort();

        let mut periods: Vec<(DateTime<Utc>, DateTime<Utc>)> = Vec::new();
        for (start, end) in intervals {
            match periods.last_mut() {
                Some((_, period_end)) if start <= *period_end + Duration::hours(1) => {
                    if end > *period_end {
                        *period_end = end;
                    }
                }
                _ => periods.push((start, end)),
            }
        }
        periods
    }

    /// Longest run of consecutive on-duty days.
    pub fn longest_duty_run(&self, person: PersonId) -> (u32, Option<NaiveDate>) {
        let dates = self.duty_dates(person);
        let mut best: u32 = 0;
        let mut best_start = None;
        let mut run: u32 = 0;
        let mut run_start = None;
        let mut prev: Option<NaiveDate> = None;
        for date in dates {
            if prev.map_or(false, |p| p + Duration::days(1) == date) {
                run += 1;
            } else {
                run = 1;
                run_start = Some(date);
            }
            if run > best {
                best = run;
                best_start = run_start;
            }
            prev = Some(date);
        }
        (best, best_start)
    }

    /// Workload per person: count of on-duty assignments.
    pub fn workload_counts(&self) -> HashMap<PersonId, usize> {
        let mut counts: HashMap<PersonId, usize> = HashMap::new();
        for a in self.assignments {
            if let Some(rotation) = self.ctx.rotation(a.rotation_id) {
                if rotation.activity_type.counts_as_duty() {
                    *counts.entry(a.person_id).or_default() += 1;
                }
            }
        }
        counts
    }
}

/// Gini coefficient of a workload distribution. Zero for perfectly even
/// loads, approaching one as load concentrates on a single person.
pub fn gini_coefficient(values: &[f64]) -> f64 {
    let n = values.len();
    if n == 0 {
        return 0.0;
    }
    let sum: f64 = values.iter().sum();
    if sum <= f64::EPSILON {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let weighted: f64 = sorted
        .iter()
        .enumerate()
        .map(|(i, v)| (2.0 * (i as f64 + 1.0) - n as f64 - 1.0) * v)
        .sum();
    weighted / (n as f64 * sum)
}

/// Every constraint variant the core understands.
#[derive(Debug, Clone)]
pub enum Constraint {
    MaxWeeklyHours(MaxWeeklyHours),
    MinDaysOffInWindow(MinDaysOffInWindow),
    MaxConsecutiveDutyDays(MaxConsecutiveDutyDays),
    MaxDutyPeriodHours(MaxDutyPeriodHours),
    MinRestBetweenShifts(MinRestBetweenShifts),
    MaxConsecutiveNights(MaxConsecutiveNights),
    MaxCallFrequency(MaxCallFrequency),
    SupervisionRatio(SupervisionRatio),
    FmitFacultyRotation(FmitFacultyRotation),
    NightFloatHeadcount(NightFloatHeadcount),
    PgyClinicDay(PgyClinicDay),
    PostCallBlocking(PostCallBlocking),
    CallSpacing(CallSpacing),
    WeekendDistribution(WeekendDistribution),
    WorkloadBalance(WorkloadBalance),
    PreferenceHonor(PreferenceHonor),
    TemplateBalance(TemplateBalance),
}

impl Constraint {
    pub fn name(&self) -> &'static str {
        match self {
            Constraint::MaxWeeklyHours(_) => "MaxWeeklyHours",
            Constraint::MinDaysOffInWindow(_) => "MinDaysOffInWindow",
            Constraint::MaxConsecutiveDutyDays(_) => "MaxConsecutiveDutyDays",
            Constraint::MaxDutyPeriodHours(_) => "MaxDutyPeriodHours",
            Constraint::MinRestBetweenShifts(_) => "MinRestBetweenShifts",
            Constraint::MaxConsecutiveNights(_) => "MaxConsecutiveNights",
            Constraint::MaxCallFrequency(_) => "MaxCallFrequency",
            Constraint::SupervisionRatio(_) => "SupervisionRatio",
            Constraint::FmitFacultyRotation(_) => "FmitFacultyRotation",
            Constraint::NightFloatHeadcount(_) => "NightFloatHeadcount",
            Constraint::PgyClinicDay(_) => "PgyClinicDay",
            Constraint::PostCallBlocking(_) => "PostCallBlocking",
            Constraint::CallSpacing(_) => "CallSpacing",
            Constraint::WeekendDistribution(_) => "WeekendDistribution",
            Constraint::WorkloadBalance(_) => "WorkloadBalance",
            Constraint::PreferenceHonor(_) => "PreferenceHonor",
            Constraint::TemplateBalance(_) => "TemplateBalance",
        }
    }

    pub fn tier(&self) -> ConstraintTier {
        match self {
            Constraint::MaxWeeklyHours(_)
            | Constraint::MinDaysOffInWindow(_)
            | Constraint::MaxConsecutiveDutyDays(_)
            | Constraint::MaxDutyPeriodHours(_)
            | Constraint::MinRestBetweenShifts(_)
            | Constraint::MaxConsecutiveNights(_)
            | Constraint::MaxCallFrequency(_)
            | Constraint::SupervisionRatio(_) => ConstraintTier::Regulatory,
            Constraint::FmitFacultyRotation(_)
            | Constraint::NightFloatHeadcount(_)
            | Constraint::PgyClinicDay(_)
            | Constraint::PostCallBlocking(_) => ConstraintTier::Institutional,
            Constraint::CallSpacing(_) | Constraint::WeekendDistribution(_) => ConstraintTier::Soft,
            Constraint::WorkloadBalance(_)
            | Constraint::PreferenceHonor(_)
            | Constraint::TemplateBalance(_) => ConstraintTier::Optimization,
        }
    }

    pub fn is_hard(&self) -> bool {
        matches!(
            self.tier(),
            ConstraintTier::Regulatory | ConstraintTier::Institutional
        )
    }

    /// Weight contributed per violation in solver objectives.
    pub fn penalty_weight(&self) -> f64 {
        let specific = match self {
            Constraint::CallSpacing(c) => c.weight,
            Constraint::WeekendDistribution(c) => c.weight,
            Constraint::WorkloadBalance(c) => c.weight,
            Constraint::PreferenceHonor(c) => c.weight,
            Constraint::TemplateBalance(c) => c.weight,
            _ => 1.0,
        };
        self.tier().dominance_weight() * specific
    }

    pub fn evaluate(&self, view: &ScheduleView<'_>) -> ConstraintResult {
        match self {
            Constraint::MaxWeeklyHours(c) => c.evaluate(view),
            Constraint::MinDaysOffInWindow(c) => c.evaluate(view),
            Constraint::MaxConsecutiveDutyDays(c) => c.evaluate(view),
            Constraint::MaxDutyPeriodHours(c) => c.evaluate(view),
            Constraint::MinRestBetweenShifts(c) => c.evaluate(view),
            Constraint::MaxConsecutiveNights(c) => c.evaluate(view),
            Constraint::MaxCallFrequency(c) => c.evaluate(view),
            Constraint::SupervisionRatio(c) => c.evaluate(view),
            Constraint::FmitFacultyRotation(c) => c.evaluate(view),
            Constraint::NightFloatHeadcount(c) => c.evaluate(view),
            Constraint::PgyClinicDay(c) => c.evaluate(view),
            Constraint::PostCallBlocking(c) => c.evaluate(view),
            Constraint::CallSpacing(c) => c.evaluate(view),
            Constraint::WeekendDistribution(c) => c.evaluate(view),
            Constraint::WorkloadBalance(c) => c.evaluate(view),
            Constraint::PreferenceHonor(c) => c.evaluate(view),
            Constraint::TemplateBalance(c) => c.evaluate(view),
        }
    }
}

/// Build the full tier ladder from configuration.
pub fn default_constraint_set(config: &CoreConfig) -> Vec<Constraint> {
    let limits = &config.limits;
    let inst = &config.institutional;
    let soft = &config.soft;
    vec![
        Constraint::MaxWeeklyHours(MaxWeeklyHours {
            limit: limits.max_weekly_hours,
            window_days: limits.rolling_window_days,
        }),
        Constraint::MinDaysOffInWindow(MinDaysOffInWindow {
            min_days: limits.min_days_off_in_window,
            window_days: limits.days_off_window_days,
        }),
        Constraint::MaxConsecutiveDutyDays(MaxConsecutiveDutyDays {
            limit: limits.max_consecutive_duty_days,
        }),
        Constraint::MaxDutyPeriodHours(MaxDutyPeriodHours {
            pgy1_limit: limits.pgy1_duty_period_hours,
            pgy2plus_limit: limits.pgy2plus_duty_period_hours,
            transition_hours: limits.transition_hours,
        }),
        Constraint::MinRestBetweenShifts(MinRestBetweenShifts {
            pgy1_min: limits.pgy1_min_rest_hours,
            pgy2plus_min: limits.pgy2plus_min_rest_hours,
        }),
        Constraint::MaxConsecutiveNights(MaxConsecutiveNights {
            limit: limits.max_consecutive_nights,
        }),
        Constraint::MaxCallFrequency(MaxCallFrequency {
            ratio: limits.max_call_ratio,
        }),
        Constraint::SupervisionRatio(SupervisionRatio {
            pgy1_max_per_faculty: limits.pgy1_max_per_faculty,
            pgy2plus_max_per_faculty: limits.pgy2plus_max_per_faculty,
        }),
        Constraint::FmitFacultyRotation(FmitFacultyRotation {
            max_consecutive_weeks: inst.fmit_max_consecutive_weeks,
            post_fmit_blocked_days: inst.post_fmit_blocked_days,
            template_name: "FMIT".to_string(),
        }),
        Constraint::NightFloatHeadcount(NightFloatHeadcount {
            exact: inst.night_float_headcount,
        }),
        Constraint::PgyClinicDay(PgyClinicDay {
            rules: inst.clinic_days.clone(),
        }),
        Constraint::PostCallBlocking(PostCallBlocking {
            excluded_activities: inst
                .post_call_excluded_activities
                .iter()
                .filter_map(|s| s.parse().ok())
                .collect(),
        }),
        Constraint::CallSpacing(CallSpacing {
            min_gap_nights: soft.call_spacing_min_gap_nights,
            weight: soft.call_spacing,
        }),
        Constraint::WeekendDistribution(WeekendDistribution {
            weight: soft.weekend_distribution,
        }),
        Constraint::WorkloadBalance(WorkloadBalance {
            target_gini: soft.workload_target_gini,
            weight: soft.workload_balance,
        }),
        Constraint::PreferenceHonor(PreferenceHonor {
            weight: soft.preference_honor,
        }),
        Constraint::TemplateBalance(TemplateBalance {
            weight: soft.template_balance,
        }),
    ]
}
