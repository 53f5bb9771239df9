//! Tier-1 regulatory (ACGME) constraints.
//!
//! These are hard rules: any violation makes a schedule invalid. Person-level
//! rules apply to trainees; supervision ratios apply per inpatient block.

use chrono::Duration;
use serde_json::json;

use super::{ConstraintFault, ConstraintResult, ConstraintTier, ScheduleView, Violation};
use crate::models::{ActivityType, Role};

/// Rolling-window weekly hours cap.
///
/// The average is computed over every `window_days`-day sliding window whose
/// start lies in the horizon; calendar months are never used. Only the
/// earliest violating window is reported per person.
#[derive(Debug, Clone)]
pub struct MaxWeeklyHours {
    pub limit: f64,
    pub window_days: u32,
}

impl MaxWeeklyHours {
    pub fn evaluate(&self, view: &ScheduleView<'_>) -> ConstraintResult {
        if self.window_days == 0 {
            return Err(ConstraintFault {
                constraint: "MaxWeeklyHours",
                message: "window_days must be positive".to_string(),
            });
        }
        let mut violations = Vec::new();
        let weeks_per_window = self.window_days as f64 / 7.0;
        for person in view.ctx.people.iter().filter(|p| p.role == Role::Trainee) {
            let hours = view.duty_hours_by_date(person.id);
            for window_start in view.ctx.horizon_dates() {
                let window_end = window_start + Duration::days(self.window_days as i64 - 1);
                let total: f64 = hours
                    .range(window_start..=window_end)
                    .map(|(_, h)| h)
                    .sum();
                let average = total / weeks_per_window;
                if average > self.limit {
                    violations.push(
                        Violation::new(
                            "MaxWeeklyHours",
                            ConstraintTier::Regulatory.severity(),
                            format!(
                                "Average {:.1} h/week over the {} days starting {} exceeds the {:.0} h limit",
                                average, self.window_days, window_start, self.limit
                            ),
                        )
                        .for_person(person.id)
                        .with_details(json!({
                            "window_start": window_start.to_string(),
                            "average_weekly_hours": average,
                            "limit": self.limit,
                        })),
                    );
                    // Earliest violating window identifies the breach.
                    break;
                }
            }
        }
        Ok(violations)
    }
}

/// Minimum days free of duty inside every rolling window.
#[derive(Debug, Clone)]
pub struct MinDaysOffInWindow {
    pub min_days: u32,
    pub window_days: u32,
}

impl MinDaysOffInWindow {
    pub fn evaluate(&self, view: &ScheduleView<'_>) -> ConstraintResult {
        if self.window_days == 0 {
            return Err(ConstraintFault {
                constraint: "MinDaysOffInWindow",
                message: "window_days must be positive".to_string(),
            });
        }
        let mut violations = Vec::new();
        let (_, horizon_end) = view.ctx.horizon;
        for person in view.ctx.people.iter().filter(|p| p.role == Role::Trainee) {
            let duty = view.duty_dates(person.id);
            for window_start in view.ctx.horizon_dates() {
                let window_end = window_start + Duration::days(self.window_days as i64 - 1);
                if window_end > horizon_end {
                    // Partial trailing windows cannot demand days off beyond the horizon.
                    break;
                }
                let on_duty = duty.range(window_start..=window_end).count() as u32;
                let days_off = self.window_days - on_duty;
                if days_off < self.min_days {
                    violations.push(
                        Violation::new(
                            "MinDaysOffInWindow",
                            ConstraintTier::Regulatory.severity(),
                            format!(
                                "Only {} days off in the {} days starting {}; {} required",
                                days_off, self.window_days, window_start, self.min_days
                            ),
                        )
                        .for_person(person.id)
                        .with_details(json!({
                            "window_start": window_start.to_string(),
                            "days_off": days_off,
                            "required": self.min_days,
                        })),
                    );
                    break;
                }
            }
        }
        Ok(violations)
    }
}

/// Longest permitted run of consecutive on-duty days.
#[derive(Debug, Clone)]
pub struct MaxConsecutiveDutyDays {
    pub limit: u32,
}

impl MaxConsecutiveDutyDays {
    pub fn evaluate(&self, view: &ScheduleView<'_>) -> ConstraintResult {
        let mut violations = Vec::new();
        for person in view.ctx.people.iter().filter(|p| p.role == Role::Trainee) {
            let (run, run_start) = view.longest_duty_run(person.id);
            if run > self.limit {
                violations.push(
                    Violation::new(
                        "MaxConsecutiveDutyDays",
                        ConstraintTier::Regulatory.severity(),
                        format!(
                            "{} consecutive duty days exceeds the limit of {}",
                            run, self.limit
                        ),
                    )
                    .for_person(person.id)
                    .with_details(json!({
                        "consecutive_days": run,
                        "run_start": run_start.map(|d| d.to_string()),
                        "limit": self.limit,
                    })),
                );
            }
        }
        Ok(violations)
    }
}

/// Continuous duty-period length caps, PGY-stratified.
///
/// A duty period is a maximal run of assignments whose end is within one hour
/// of the next start. The transition allowance is post-primary-work only, so
/// the enforced ceiling is `limit + transition_hours`.
#[derive(Debug, Clone)]
pub struct MaxDutyPeriodHours {
    pub pgy1_limit: f64,
    pub pgy2plus_limit: f64,
    pub transition_hours: f64,
}

impl MaxDutyPeriodHours {
    pub fn evaluate(&self, view: &ScheduleView<'_>) -> ConstraintResult {
        let mut violations = Vec::new();
        for person in view.ctx.people.iter().filter(|p| p.role == Role::Trainee) {
            let limit = if person.is_pgy1() {
                self.pgy1_limit
            } else {
                self.pgy2plus_limit
            };
            let ceiling = limit + self.transition_hours;
            for (start, end) in view.duty_periods(person.id) {
                let hours = (end - start).num_minutes() as f64 / 60.0;
                if hours > ceiling {
                    violations.push(
                        Violation::new(
                            "MaxDutyPeriodHours",
                            ConstraintTier::Regulatory.severity(),
                            format!(
                                "Duty period of {:.1} h starting {} exceeds {:.0} h (+{:.0} h transition)",
                                hours, start, limit, self.transition_hours
                            ),
                        )
                        .for_person(person.id)
                        .with_details(json!({
                            "period_start": start.to_rfc3339(),
                            "period_hours": hours,
                            "limit": limit,
                            "transition_hours": self.transition_hours,
                        })),
                    );
                }
            }
        }
        Ok(violations)
    }
}

/// Minimum rest between consecutive duty periods, PGY-stratified.
#[derive(Debug, Clone)]
pub struct MinRestBetweenShifts {
    pub pgy1_min: f64,
    pub pgy2plus_min: f64,
}

impl MinRestBetweenShifts {
    pub fn evaluate(&self, view: &ScheduleView<'_>) -> ConstraintResult {
        let mut violations = Vec::new();
        for person in view.ctx.people.iter().filter(|p| p.role == Role::Trainee) {
            let min_rest = if person.is_pgy1() {
                self.pgy1_min
            } else {
                self.pgy2plus_min
            };
            let periods = view.duty_periods(person.id);
            for pair in periods.windows(2) {
                let rest = (pair[1].0 - pair[0].1).num_minutes() as f64 / 60.0;
                if rest < min_rest {
                    violations.push(
                        Violation::new(
                            "MinRestBetweenShifts",
                            ConstraintTier::Regulatory.severity(),
                            format!(
                                "Only {:.1} h rest after the duty period ending {}; {:.0} h required",
                                rest, pair[0].1, min_rest
                            ),
                        )
                        .for_person(person.id)
                        .with_details(json!({
                            "rest_hours": rest,
                            "required": min_rest,
                            "period_end": pair[0].1.to_rfc3339(),
                        })),
                    );
                }
            }
        }
        Ok(violations)
    }
}

/// Cap on consecutive overnight assignments.
#[derive(Debug, Clone)]
pub struct MaxConsecutiveNights {
    pub limit: u32,
}

impl MaxConsecutiveNights {
    pub fn evaluate(&self, view: &ScheduleView<'_>) -> ConstraintResult {
        let mut violations = Vec::new();
        for person in view.ctx.people.iter().filter(|p| p.role == Role::Trainee) {
            let nights = view.night_dates(person.id);
            let mut run: u32 = 0;
            let mut prev = None;
            let mut worst: u32 = 0;
            for date in nights {
                run = match prev {
                    Some(p) if p + Duration::days(1) == date => run + 1,
                    _ => 1,
                };
                worst = worst.max(run);
                prev = Some(date);
            }
            if worst > self.limit {
                violations.push(
                    Violation::new(
                        "MaxConsecutiveNights",
                        ConstraintTier::Regulatory.severity(),
                        format!(
                            "{} consecutive nights exceeds the limit of {}",
                            worst, self.limit
                        ),
                    )
                    .for_person(person.id)
                    .with_details(json!({ "consecutive_nights": worst, "limit": self.limit })),
                );
            }
        }
        Ok(violations)
    }
}

/// Call frequency cap as a fraction of horizon days (e.g. 1/3 for
/// no-more-than-every-third-night).
#[derive(Debug, Clone)]
pub struct MaxCallFrequency {
    pub ratio: f64,
}

impl MaxCallFrequency {
    pub fn evaluate(&self, view: &ScheduleView<'_>) -> ConstraintResult {
        let horizon_days = view.ctx.horizon_dates().len();
        if horizon_days == 0 {
            return Ok(Vec::new());
        }
        let mut violations = Vec::new();
        for person in view.ctx.people.iter().filter(|p| p.role == Role::Trainee) {
            let calls = view.call_dates(person.id).len();
            let frequency = calls as f64 / horizon_days as f64;
            if frequency > self.ratio {
                violations.push(
                    Violation::new(
                        "MaxCallFrequency",
                        ConstraintTier::Regulatory.severity(),
                        format!(
                            "{} call nights over {} days ({:.2}) exceeds the {:.2} ratio",
                            calls, horizon_days, frequency, self.ratio
                        ),
                    )
                    .for_person(person.id)
                    .with_details(json!({
                        "call_nights": calls,
                        "horizon_days": horizon_days,
                        "frequency": frequency,
                        "ratio": self.ratio,
                    })),
                );
            }
        }
        Ok(violations)
    }
}

/// Faculty supervision ratios per inpatient block.
#[derive(Debug, Clone)]
pub struct SupervisionRatio {
    pub pgy1_max_per_faculty: u32,
    pub pgy2plus_max_per_faculty: u32,
}

impl SupervisionRatio {
    pub fn evaluate(&self, view: &ScheduleView<'_>) -> ConstraintResult {
        let mut violations = Vec::new();
        for block in &view.ctx.blocks {
            let mut faculty = 0u32;
            let mut pgy1 = 0u32;
            let mut pgy2plus = 0u32;
            let mut inpatient = false;
            for a in view.assignments_on(block.id) {
                let rotation = match view.ctx.rotation(a.rotation_id) {
                    Some(r) => r,
                    None => continue,
                };
                if rotation.activity_type != ActivityType::Inpatient {
                    continue;
                }
                inpatient = true;
                match view.ctx.person(a.person_id) {
                    Some(p) if p.role == Role::Faculty => faculty += 1,
                    Some(p) if p.is_pgy1() => pgy1 += 1,
                    Some(p) if p.is_senior_trainee() => pgy2plus += 1,
                    _ => {}
                }
            }
            if !inpatient {
                continue;
            }
            let pgy1_cap = faculty * self.pgy1_max_per_faculty;
            let pgy2plus_cap = faculty * self.pgy2plus_max_per_faculty;
            if pgy1 > pgy1_cap || pgy2plus > pgy2plus_cap {
                violations.push(
                    Violation::new(
                        "SupervisionRatio",
                        ConstraintTier::Regulatory.severity(),
                        format!(
                            "Block {}: {} PGY-1 and {} PGY-2+ trainees under {} faculty",
                            block.id, pgy1, pgy2plus, faculty
                        ),
                    )
                    .for_block(block.id)
                    .with_details(json!({
                        "faculty": faculty,
                        "pgy1": pgy1,
                        "pgy2plus": pgy2plus,
                        "pgy1_cap": pgy1_cap,
                        "pgy2plus_cap": pgy2plus_cap,
                    })),
                );
            }
        }
        Ok(violations)
    }
}
