//! Tier-2 institutional constraints.
//!
//! Hard rules local to the program rather than the regulator: FMIT faculty
//! rotation cadence, night-float headcount, PGY clinic days, and post-call
//! activity blocking. All parameters come from configuration.

use chrono::Duration;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};

use super::{ConstraintResult, ConstraintTier, ScheduleView, Violation};
use crate::config::ClinicDayRule;
use crate::models::{ActivityType, Role};

/// FMIT faculty-week cadence: no faculty covers consecutive FMIT weeks, and
/// the days immediately after an FMIT week are blocked for that faculty.
#[derive(Debug, Clone)]
pub struct FmitFacultyRotation {
    pub max_consecutive_weeks: u32,
    pub post_fmit_blocked_days: u32,
    /// Rotation template name identifying the FMIT service.
    pub template_name: String,
}

impl FmitFacultyRotation {
    pub fn evaluate(&self, view: &ScheduleView<'_>) -> ConstraintResult {
        let mut violations = Vec::new();
        for person in view.ctx.people.iter().filter(|p| p.role == Role::Faculty) {
            // Monday-normalized weeks in which this faculty holds FMIT work.
            let mut weeks: BTreeSet<chrono::NaiveDate> = BTreeSet::new();
            for a in view.assignments_for(person.id) {
                let (block, rotation) =
                    match (view.ctx.block(a.block_id), view.ctx.rotation(a.rotation_id)) {
                        (Some(b), Some(r)) => (b, r),
                        _ => continue,
                    };
                if rotation.name == self.template_name {
                    weeks.insert(block.week_start());
                }
            }

            let mut run: u32 = 0;
            let mut prev = None;
            for &week in &weeks {
                run = match prev {
                    Some(p) if p + Duration::days(7) == week => run + 1,
                    _ => 1,
                };
                if run > self.max_consecutive_weeks {
                    violations.push(
                        Violation::new(
                            "FmitFacultyRotation",
                            ConstraintTier::Institutional.severity(),
                            format!(
                                "Faculty {} covers {} consecutive FMIT weeks ending {}",
                                person.id, run, week
                            ),
                        )
                        .for_person(person.id)
                        .with_details(json!({
                            "consecutive_weeks": run,
                            "week_start": week.to_string(),
                        })),
                    );
                }
                prev = Some(week);
            }

            // Post-FMIT blocking: the Sunday after the FMIT week opens a
            // blocked window of `post_fmit_blocked_days` days.
            for &week in &weeks {
                let blocked_start = week + Duration::days(6);
                let blocked_end = blocked_start + Duration::days(self.post_fmit_blocked_days as i64);
                for a in view.assignments_for(person.id) {
                    let (block, rotation) =
                        match (view.ctx.block(a.block_id), view.ctx.rotation(a.rotation_id)) {
                            (Some(b), Some(r)) => (b, r),
                            _ => continue,
                        };
                    if rotation.name == self.template_name
                        || !rotation.activity_type.counts_as_duty()
                    {
                        continue;
                    }
                    if block.date > blocked_start && block.date <= blocked_end {
                        violations.push(
                            Violation::new(
                                "FmitFacultyRotation",
                                ConstraintTier::Institutional.severity(),
                                format!(
                                    "Faculty {} assigned on {} inside the post-FMIT blocked window",
                                    person.id, block.date
                                ),
                            )
                            .for_person(person.id)
                            .for_block(block.id)
                            .with_details(json!({
                                "fmit_week": week.to_string(),
                                "blocked_until": blocked_end.to_string(),
                            })),
                        );
                    }
                }
            }
        }
        Ok(violations)
    }
}

/// Exactly `exact` trainees on night float per night.
#[derive(Debug, Clone)]
pub struct NightFloatHeadcount {
    pub exact: u32,
}

impl NightFloatHeadcount {
    pub fn evaluate(&self, view: &ScheduleView<'_>) -> ConstraintResult {
        let mut per_night: BTreeMap<chrono::NaiveDate, u32> = BTreeMap::new();
        let mut any_nf = false;
        for a in view.assignments {
            let (block, rotation) =
                match (view.ctx.block(a.block_id), view.ctx.rotation(a.rotation_id)) {
                    (Some(b), Some(r)) => (b, r),
                    _ => continue,
                };
            if rotation.activity_type == ActivityType::NightFloat {
                any_nf = true;
                *per_night.entry(block.date).or_default() += 1;
            }
        }
        if !any_nf {
            return Ok(Vec::new());
        }
        let mut violations = Vec::new();
        for (date, count) in per_night {
            if count != self.exact {
                violations.push(
                    Violation::new(
                        "NightFloatHeadcount",
                        ConstraintTier::Institutional.severity(),
                        format!(
                            "{} night-float trainees on {}; exactly {} required",
                            count, date, self.exact
                        ),
                    )
                    .with_details(json!({
                        "date": date.to_string(),
                        "count": count,
                        "required": self.exact,
                    })),
                );
            }
        }
        Ok(violations)
    }
}

/// PGY-level continuity-clinic day.
///
/// The mapped weekday and session is the trainee's protected clinic slot:
/// when they are scheduled in it at all, the work must be clinic (or an
/// absence). Other activities squatting on the continuity slot violate.
#[derive(Debug, Clone)]
pub struct PgyClinicDay {
    pub rules: Vec<ClinicDayRule>,
}

impl PgyClinicDay {
    pub fn evaluate(&self, view: &ScheduleView<'_>) -> ConstraintResult {
        let mut violations = Vec::new();
        for person in view.ctx.people.iter().filter(|p| p.role == Role::Trainee) {
            let pgy = match person.pgy_level {
                Some(p) => p,
                None => continue,
            };
            let slot = self
                .rules
                .iter()
                .find(|r| r.pgy == pgy)
                .and_then(|r| r.weekday_parsed().map(|w| (w, r.session)));
            let (weekday, session) = match slot {
                Some(s) => s,
                None => continue,
            };
            for a in view.assignments_for(person.id) {
                let (block, rotation) =
                    match (view.ctx.block(a.block_id), view.ctx.rotation(a.rotation_id)) {
                        (Some(b), Some(r)) => (b, r),
                        _ => continue,
                    };
                if block.weekday() != weekday || block.session != session {
                    continue;
                }
                if !matches!(
                    rotation.activity_type,
                    ActivityType::Clinic | ActivityType::Absence
                ) {
                    violations.push(
                        Violation::new(
                            "PgyClinicDay",
                            ConstraintTier::Institutional.severity(),
                            format!(
                                "PGY-{} scheduled for {} on the protected {:?} {} clinic slot",
                                pgy,
                                rotation.name,
                                weekday,
                                session.as_str()
                            ),
                        )
                        .for_person(person.id)
                        .for_block(block.id)
                        .with_details(json!({
                            "pgy": pgy,
                            "date": block.date.to_string(),
                            "activity": rotation.activity_type.as_str(),
                            "expected_weekday": format!("{:?}", weekday),
                            "expected_session": session.as_str(),
                        })),
                    );
                }
            }
        }
        Ok(violations)
    }
}

/// No excluded activity on the day after an overnight duty ends.
#[derive(Debug, Clone)]
pub struct PostCallBlocking {
    pub excluded_activities: Vec<ActivityType>,
}

impl PostCallBlocking {
    pub fn evaluate(&self, view: &ScheduleView<'_>) -> ConstraintResult {
        let mut violations = Vec::new();
        for person in view.ctx.people.iter().filter(|p| p.role == Role::Trainee) {
            let nights = view.night_dates(person.id);
            for night in &nights {
                let post_call_day = *night + Duration::days(1);
                // The morning after a continued overnight run is still on
                // duty; only the end of the run creates a post-call day.
                if nights.contains(&post_call_day) {
                    continue;
                }
                for a in view.assignments_for(person.id) {
                    let (block, rotation) =
                        match (view.ctx.block(a.block_id), view.ctx.rotation(a.rotation_id)) {
                            (Some(b), Some(r)) => (b, r),
                            _ => continue,
                        };
                    if block.date == post_call_day
                        && self.excluded_activities.contains(&rotation.activity_type)
                    {
                        violations.push(
                            Violation::new(
                                "PostCallBlocking",
                                ConstraintTier::Institutional.severity(),
                                format!(
                                    "Person {} assigned {} on post-call day {}",
                                    person.id, rotation.name, post_call_day
                                ),
                            )
                            .for_person(person.id)
                            .for_block(block.id)
                            .with_details(json!({
                                "post_call_day": post_call_day.to_string(),
                                "activity": rotation.activity_type.as_str(),
                            })),
                        );
                    }
                }
            }
        }
        Ok(violations)
    }
}
