//! Service helpers between the repository and the engines.
//!
//! The main job is assembling a [`SchedulingContext`] from repository reads
//! so the solver, validator, swap engine, and analyzer all see the same
//! snapshot.

use chrono::NaiveDate;
use log::{info, warn};
use std::collections::HashMap;

use super::repository::SharedRepository;
use crate::error::{CoreError, CoreResult};
use crate::models::{ContextValidation, PersonPreferences, SchedulingContext};

/// Load a scheduling context for a horizon from the repository.
///
/// Returns the context and its validation outcome. Invariant errors are
/// logged and surfaced; callers decide whether to proceed.
pub async fn load_context(
    repo: &SharedRepository,
    start: NaiveDate,
    end: NaiveDate,
) -> CoreResult<(SchedulingContext, ContextValidation)> {
    if end < start {
        return Err(CoreError::InputError(format!(
            "horizon end {} precedes start {}",
            end, start
        )));
    }

    let people = repo.list_people().await?;
    let rotations = repo.list_rotations().await?;
    let blocks = repo.list_blocks(start, end).await?;
    let assignments = repo.list_assignments(start, end).await?;
    let absences = repo.list_absences(start, end).await?;

    if blocks.is_empty() {
        return Err(CoreError::InputError(format!(
            "no blocks exist between {} and {}",
            start, end
        )));
    }

    info!(
        "loaded context {}..{}: {} people, {} blocks, {} rotations, {} assignments, {} absences",
        start,
        end,
        people.len(),
        blocks.len(),
        rotations.len(),
        assignments.len(),
        absences.len()
    );

    let (ctx, validation) = SchedulingContext::build(
        (start, end),
        people,
        blocks,
        rotations,
        assignments,
        absences,
        HashMap::<crate::models::PersonId, PersonPreferences>::new(),
    );

    if !validation.is_valid() {
        warn!(
            "context {}..{} has {} invariant errors",
            start,
            end,
            validation.errors.len()
        );
    }
    Ok((ctx, validation))
}
