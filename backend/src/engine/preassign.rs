//! Institutional pre-assignment pass.
//!
//! Block-assigned rotations are not solver variables: FMIT faculty weeks,
//! night-float pairing, the NICU clinic lock, and PGY clinic days are fixed
//! here, before any solver runs, and land in the preserve set. All
//! parameters come from configuration; templates are located by activity
//! type or, for FMIT and NICU, by their configured names.

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use log::debug;
use std::collections::HashSet;

use crate::config::CoreConfig;
use crate::models::{
    monday_of, ActivityType, Assignment, Block, BlockId, Person, PersonId, Role, RotationTemplate,
    SchedulingContext, Session,
};

/// Assignments fixed ahead of the solver.
#[derive(Debug, Clone, Default)]
pub struct PreassignOutcome {
    pub assignments: Vec<Assignment>,
    /// Trainee post-call dates (day after a night-float stretch ends).
    pub post_call_days: Vec<(PersonId, NaiveDate)>,
}

pub struct Preassigner<'a> {
    ctx: &'a SchedulingContext,
    config: &'a CoreConfig,
    created_at: chrono::DateTime<chrono::Utc>,
    taken: HashSet<(PersonId, BlockId)>,
    coverage: std::collections::HashMap<(BlockId, crate::models::RotationId), u32>,
}

impl<'a> Preassigner<'a> {
    pub fn new(
        ctx: &'a SchedulingContext,
        config: &'a CoreConfig,
        created_at: chrono::DateTime<chrono::Utc>,
    ) -> Self {
        let taken = ctx
            .existing_assignments
            .iter()
            .map(|a| a.slot_key())
            .collect();
        let mut coverage = std::collections::HashMap::new();
        for a in &ctx.existing_assignments {
            *coverage.entry((a.block_id, a.rotation_id)).or_insert(0u32) += 1;
        }
        Self {
            ctx,
            config,
            created_at,
            taken,
            coverage,
        }
    }

    /// Run every configured rule and collect the fixed assignments.
    pub fn run(mut self) -> PreassignOutcome {
        let mut outcome = PreassignOutcome::default();
        self.assign_fmit_weeks(&mut outcome);
        self.assign_night_float(&mut outcome);
        self.assign_nicu_clinic_lock(&mut outcome);
        self.assign_pgy_clinic_days(&mut outcome);
        outcome
    }

    fn template_by_name(&self, name: &str) -> Option<&'a RotationTemplate> {
        self.ctx.rotations.iter().find(|r| r.name == name)
    }

    fn template_by_activity(&self, activity: ActivityType) -> Option<&'a RotationTemplate> {
        self.ctx.rotations.iter().find(|r| r.activity_type == activity)
    }

    fn blocks_on(&self, date: NaiveDate, session: Option<Session>) -> Vec<&'a Block> {
        self.ctx
            .blocks
            .iter()
            .filter(|b| b.date == date && session.map_or(true, |s| b.session == s))
            .collect()
    }

    /// Monday of each week intersecting the horizon.
    fn horizon_weeks(&self) -> Vec<NaiveDate> {
        let (start, end) = self.ctx.horizon;
        let mut weeks = Vec::new();
        let mut monday = monday_of(start);
        while monday <= end {
            weeks.push(monday);
            monday += Duration::days(7);
        }
        weeks
    }

    fn try_assign(
        &mut self,
        outcome_assignments: &mut Vec<Assignment>,
        person: &Person,
        block: &Block,
        template: &RotationTemplate,
    ) -> bool {
        if self.taken.contains(&(person.id, block.id)) {
            return false;
        }
        if self.ctx.is_absent(person.id, block.date) {
            return false;
        }
        if !template.eligibility.matches(person) {
            return false;
        }
        let filled = self
            .coverage
            .get(&(block.id, template.id))
            .copied()
            .unwrap_or(0);
        if filled >= template.coverage.max {
            return false;
        }
        *self.coverage.entry((block.id, template.id)).or_insert(0) += 1;
        self.taken.insert((person.id, block.id));
        outcome_assignments.push(Assignment::new(
            0,
            person.id,
            block.id,
            template.id,
            self.created_at,
            "preassign",
        ));
        true
    }

    /// One faculty per academic week on FMIT, never two consecutive weeks,
    /// with mandatory Friday and Saturday call.
    fn assign_fmit_weeks(&mut self, outcome: &mut PreassignOutcome) {
        let fmit = match self.template_by_name("FMIT") {
            Some(t) => t,
            None => {
                debug!("no FMIT template; skipping faculty week rotation");
                return;
            }
        };
        let call = self.template_by_activity(ActivityType::Call);
        let faculty: Vec<Person> = self
            .ctx
            .people
            .iter()
            .filter(|p| p.role == Role::Faculty && p.active)
            .cloned()
            .collect();
        if faculty.is_empty() {
            return;
        }

        let mut previous: Option<PersonId> = None;
        for (week_idx, monday) in self.horizon_weeks().into_iter().enumerate() {
            // Round-robin, skipping whoever covered last week.
            let pick = (0..faculty.len())
                .map(|offset| &faculty[(week_idx + offset) % faculty.len()])
                .find(|f| Some(f.id) != previous);
            let person = match pick {
                Some(p) => p.clone(),
                None => continue,
            };

            for day_offset in 0..5 {
                let date = monday + Duration::days(day_offset);
                for block in self.blocks_on(date, None) {
                    self.try_assign(&mut outcome.assignments, &person, block, fmit);
                }
            }
            // Friday and Saturday call are part of the FMIT week.
            if let Some(call_template) = call {
                for day_offset in [4i64, 5] {
                    let date = monday + Duration::days(day_offset);
                    for block in self.blocks_on(date, Some(Session::Pm)) {
                        if !self.taken.contains(&(person.id, block.id)) {
                            self.try_assign(&mut outcome.assignments, &person, block, call_template);
                        }
                    }
                }
            }
            previous = Some(person.id);
        }
    }

    /// Exactly one trainee per two-week night-float half, mirrored inside a
    /// four-week block: the partner works a mini-rotation in the half they
    /// are not on nights, and each stretch ends in a post-call day.
    fn assign_night_float(&mut self, outcome: &mut PreassignOutcome) {
        let nf = match self.template_by_activity(ActivityType::NightFloat) {
            Some(t) => t,
            None => {
                debug!("no night-float template; skipping pairing");
                return;
            }
        };
        let mini = self.template_by_activity(ActivityType::Elective);
        let trainees: Vec<Person> = self
            .ctx
            .people
            .iter()
            .filter(|p| p.role == Role::Trainee && p.active && nf.eligibility.matches(p))
            .cloned()
            .collect();
        if trainees.len() < 2 {
            debug!("fewer than two night-float-eligible trainees; skipping pairing");
            return;
        }

        let weeks = self.horizon_weeks();
        let mut pair_cursor = 0usize;
        for cycle in weeks.chunks(4) {
            let first = trainees[pair_cursor % trainees.len()].clone();
            let second = trainees[(pair_cursor + 1) % trainees.len()].clone();
            pair_cursor += 2;

            let halves: [(Person, Person, &[NaiveDate]); 2] = [
                (first.clone(), second.clone(), &cycle[..cycle.len().min(2)]),
                (
                    second.clone(),
                    first.clone(),
                    if cycle.len() > 2 { &cycle[2..] } else { &[] },
                ),
            ];
            for (on_nights, on_mini, half_weeks) in halves {
                let mut last_night: Option<NaiveDate> = None;
                for monday in half_weeks {
                    for day_offset in 0..7 {
                        let date = *monday + Duration::days(day_offset);
                        for block in self.blocks_on(date, Some(Session::Pm)) {
                            if self.try_assign(&mut outcome.assignments, &on_nights, block, nf) {
                                last_night = Some(date);
                            }
                        }
                        // Mini-rotation keeps the partner in daytime work.
                        if let Some(mini_template) = mini {
                            if date.weekday().num_days_from_monday() < 5 {
                                for block in self.blocks_on(date, Some(Session::Am)) {
                                    self.try_assign(
                                        &mut outcome.assignments,
                                        &on_mini,
                                        block,
                                        mini_template,
                                    );
                                }
                            }
                        }
                    }
                }
                if let Some(end) = last_night {
                    outcome
                        .post_call_days
                        .push((on_nights.id, end + Duration::days(1)));
                }
            }
        }
    }

    /// The NICU trainee holds a Friday PM clinic slot in each NICU week.
    fn assign_nicu_clinic_lock(&mut self, outcome: &mut PreassignOutcome) {
        let nicu = match self.template_by_name("NICU") {
            Some(t) => t,
            None => return,
        };
        let clinic = match self
            .ctx
            .rotations
            .iter()
            .find(|r| r.is_solver_owned())
        {
            Some(t) => t,
            None => return,
        };

        // Weeks in which each trainee has NICU work.
        let mut nicu_weeks: Vec<(PersonId, NaiveDate)> = Vec::new();
        for a in &self.ctx.existing_assignments {
            if a.rotation_id == nicu.id {
                if let Some(block) = self.ctx.block(a.block_id) {
                    let key = (a.person_id, block.week_start());
                    if !nicu_weeks.contains(&key) {
                        nicu_weeks.push(key);
                    }
                }
            }
        }

        for (person_id, monday) in nicu_weeks {
            let person = match self.ctx.person(person_id) {
                Some(p) => p.clone(),
                None => continue,
            };
            let friday = monday + Duration::days(4);
            for block in self.blocks_on(friday, Some(Session::Pm)) {
                if block.weekday() == Weekday::Fri {
                    self.try_assign(&mut outcome.assignments, &person, block, clinic);
                }
            }
        }
    }

    /// Seed each trainee's configured continuity-clinic slot week by week.
    fn assign_pgy_clinic_days(&mut self, outcome: &mut PreassignOutcome) {
        let clinic = match self.ctx.rotations.iter().find(|r| r.is_solver_owned()) {
            Some(t) => t,
            None => return,
        };
        let trainees: Vec<Person> = self
            .ctx
            .people
            .iter()
            .filter(|p| p.role == Role::Trainee && p.active)
            .cloned()
            .collect();

        for monday in self.horizon_weeks() {
            for person in &trainees {
                let slot = person
                    .pgy_level
                    .and_then(|pgy| self.config.clinic_day_for(pgy));
                let (weekday, session) = match slot {
                    Some(s) => s,
                    None => continue,
                };
                let date = monday + Duration::days(weekday.num_days_from_monday() as i64);
                for block in self.blocks_on(date, Some(session)) {
                    self.try_assign(&mut outcome.assignments, person, block, clinic);
                }
            }
        }
    }
}
