//! Atomic swap engine.
//!
//! Swaps move through a strict state machine (PENDING, VALIDATED, EXECUTED,
//! REJECTED, ROLLED_BACK). Execution is a single transactional move set over
//! versioned assignment rows: a concurrent writer that touches any affected
//! row first wins, and the loser surfaces a retryable stale-swap conflict.
//! Rollback applies the inverse moves within the configured window unless a
//! successor swap already touched the rows.

pub mod chains;
pub mod matching;
pub mod scoring;


use chrono::{Duration, NaiveDate};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::config::CoreConfig;
use crate::constraints::{Severity, Violation};
use crate::db::clock::{Clock, SharedClock};
use crate::db::idempotency::{Claim, IdempotencyLayer};
use crate::db::notify::{NotificationEvent, SharedDispatcher};
use crate::db::repository::{AssignmentMove, MutationCause, SharedRepository};
use crate::error::{CoreError, CoreResult};
use crate::models::{
    monday_of, ActivityType, Assignment, PersonId, Role, SchedulingContext, SwapId, SwapRecord,
    SwapStatus, SwapType,
};
use crate::validator::ComplianceValidator;

pub use chains::{Chain, ChainEdge};
pub use matching::{maximum_weight_matching, stable_matching, ScoredPair};
pub use scoring::{score_exchange, ScoreBreakdown, SwapSide};

/// A request to create a swap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapSpec {
    pub source_person: PersonId,
    pub source_week: NaiveDate,
    pub target_person: PersonId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_week: Option<NaiveDate>,
    pub swap_type: SwapType,
    pub reason: String,
    pub requested_by: String,
}

/// A scored auto-match candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateMatch {
    pub swap_id: SwapId,
    pub partner: PersonId,
    pub partner_week: NaiveDate,
    pub score: ScoreBreakdown,
}

/// Outcome of the emergency-coverage search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmergencyPlan {
    /// 1 = backup pool, 2 = broadcast absorb, 3 = bounded extension,
    /// 4 = escalation.
    pub tier: u8,
    pub description: String,
    pub candidates: Vec<PersonId>,
    pub escalated: bool,
}

pub struct SwapEngine {
    repo: SharedRepository,
    clock: SharedClock,
    dispatcher: SharedDispatcher,
    config: CoreConfig,
    idempotency: Option<IdempotencyLayer>,
}

impl SwapEngine {
    pub fn new(
        repo: SharedRepository,
        clock: SharedClock,
        dispatcher: SharedDispatcher,
        config: CoreConfig,
    ) -> Self {
        Self {
            repo,
            clock,
            dispatcher,
            config,
            idempotency: None,
        }
    }

    /// Enable idempotent request handling backed by the keyed store.
    pub fn with_idempotency(mut self, store: crate::db::SharedKeyedStore) -> Self {
        self.idempotency = Some(IdempotencyLayer::new(store));
        self
    }

    // ==================== Lifecycle ====================

    /// Create a swap request in PENDING state. Weeks are Monday-normalized.
    ///
    /// With an idempotency key, a retry carrying the same spec replays the
    /// stored record; the same key with a different spec conflicts.
    pub async fn request_swap(
        &self,
        spec: SwapSpec,
        idempotency_key: Option<&str>,
    ) -> CoreResult<SwapRecord> {
        match (idempotency_key, &self.idempotency) {
            (Some(key), Some(layer)) => {
                let body_hash = IdempotencyLayer::hash_body(&spec);
                match layer.claim(key, &body_hash).await? {
                    Claim::Acquired => {
                        let result = self.create_swap_record(spec).await;
                        match &result {
                            Ok(record) => {
                                let serialized = serde_json::to_string(record).map_err(|e| {
                                    CoreError::internal(e.to_string(), key.to_string())
                                })?;
                                layer.complete(key, &body_hash, serialized).await?;
                            }
                            Err(_) => layer.release(key).await,
                        }
                        result
                    }
                    Claim::Replay(stored) => serde_json::from_str(&stored).map_err(|e| {
                        CoreError::internal(
                            format!("stored idempotent response is unreadable: {}", e),
                            key.to_string(),
                        )
                    }),
                    Claim::InFlight => {
                        let stored = layer
                            .await_response(key, &body_hash, std::time::Duration::from_secs(10))
                            .await?;
                        serde_json::from_str(&stored).map_err(|e| {
                            CoreError::internal(
                                format!("stored idempotent response is unreadable: {}", e),
                                key.to_string(),
                            )
                        })
                    }
                }
            }
            (Some(_), None) => Err(CoreError::InputError(
                "idempotency keys need an attached keyed store".to_string(),
            )),
            (None, _) => self.create_swap_record(spec).await,
        }
    }

    async fn create_swap_record(&self, spec: SwapSpec) -> CoreResult<SwapRecord> {
        if spec.source_person == spec.target_person {
            return Err(CoreError::InputError(
                "source and target person are the same".to_string(),
            ));
        }
        if spec.swap_type == SwapType::OneToOne && spec.target_week.is_none() {
            return Err(CoreError::InputError(
                "one-to-one swaps need a target week".to_string(),
            ));
        }
        let now = self.clock.now();
        let record = SwapRecord {
            id: SwapId(0),
            source_person: spec.source_person,
            source_week: monday_of(spec.source_week),
            target_person: spec.target_person,
            target_week: spec.target_week.map(monday_of),
            swap_type: spec.swap_type,
            status: SwapStatus::Pending,
            reason: spec.reason,
            created_at: now,
            created_by: spec.requested_by,
            updated_at: now,
            executed_at: None,
            executed_by: None,
            rolled_back_at: None,
            rollback_reason: None,
        };
        let created = self.repo.create_swap(record).await?;
        info!(
            "swap {} created: {} week {} -> {} ({:?})",
            created.id,
            created.source_person,
            created.source_week,
            created.target_person,
            created.swap_type
        );
        Ok(created)
    }

    /// Validate a pending swap and transition it to VALIDATED or REJECTED.
    pub async fn validate_swap(
        &self,
        ctx: &SchedulingContext,
        swap_id: SwapId,
    ) -> CoreResult<(bool, Vec<Violation>)> {
        let record = self.repo.get_swap(swap_id).await?;
        if record.status != SwapStatus::Pending {
            return Err(CoreError::InputError(format!(
                "swap {} is {}, not PENDING",
                swap_id,
                record.status.as_str()
            )));
        }

        let violations = self.simulate(ctx, &record)?;
        let ok = violations
            .iter()
            .all(|v| !matches!(v.severity, Severity::Critical | Severity::High));

        let mut updated = record.clone();
        updated.status = if ok {
            SwapStatus::Validated
        } else {
            SwapStatus::Rejected
        };
        updated.updated_at = self.clock.now();
        self.repo.update_swap(&updated, SwapStatus::Pending).await?;
        info!(
            "swap {} validated: ok={} violations={}",
            swap_id,
            ok,
            violations.len()
        );
        Ok((ok, violations))
    }

    /// Execute a validated swap atomically.
    ///
    /// Re-validates against the current repository snapshot, then applies
    /// the move set in one transaction keyed on row versions. A concurrent
    /// writer on any affected assignment wins the race; this caller gets a
    /// retryable stale conflict. Replaying an already-executed swap returns
    /// the committed record unchanged with no new audit rows.
    pub async fn execute_swap(
        &self,
        ctx: &SchedulingContext,
        swap_id: SwapId,
        actor: &str,
    ) -> CoreResult<SwapRecord> {
        let record = self.repo.get_swap(swap_id).await?;
        match record.status {
            SwapStatus::Executed => return Ok(record),
            SwapStatus::Validated => {}
            other => {
                return Err(CoreError::InputError(format!(
                    "swap {} is {}, not VALIDATED",
                    swap_id,
                    other.as_str()
                )))
            }
        }

        // Optimistic re-validation on the current snapshot.
        let violations = self.simulate(ctx, &record)?;
        if violations
            .iter()
            .any(|v| matches!(v.severity, Severity::Critical | Severity::High))
        {
            return Err(CoreError::ConcurrencyConflict(format!(
                "swap {} no longer validates against the current schedule",
                swap_id
            )));
        }

        // The transactional window is bounded; an expired timer aborts the
        // whole move set before the record transitions.
        let execute_window =
            std::time::Duration::from_secs(self.config.swap.execute_timeout_secs);
        let (moves, originals) = tokio::time::timeout(execute_window, async {
            let moves = self.plan_moves(ctx, &record).await?;
            if moves.is_empty() {
                return Err(CoreError::InputError(format!(
                    "swap {} has no assignments to exchange",
                    swap_id
                )));
            }
            // Remember the original holders in case the record update below
            // loses its race and the moves must be undone.
            let mut originals = Vec::with_capacity(moves.len());
            for m in &moves {
                let current = self.repo.get_assignment(m.assignment_id).await?;
                originals.push((m.assignment_id, current.person_id));
            }
            self.repo
                .execute_moves(&moves, MutationCause::Swap(swap_id), actor)
                .await?;
            Ok((moves, originals))
        })
        .await
        .map_err(|_| {
            CoreError::Timeout(format!(
                "swap {} execution exceeded {} seconds",
                swap_id, self.config.swap.execute_timeout_secs
            ))
        })??;

        let mut executed = record.clone();
        executed.status = SwapStatus::Executed;
        executed.executed_at = Some(self.clock.now());
        executed.executed_by = Some(actor.to_string());
        executed.updated_at = self.clock.now();
        match self
            .repo
            .update_swap(&executed, SwapStatus::Validated)
            .await
        {
            Ok(saved) => {
                info!("swap {} executed by {} ({} moves)", swap_id, actor, moves.len());
                Ok(saved)
            }
            Err(err) => {
                // The moves landed but the record CAS lost; undo the moves so
                // state and record stay consistent.
                warn!("swap {}: record update failed after moves, reverting", swap_id);
                let mut inverse = Vec::with_capacity(originals.len());
                for (assignment_id, original_person) in originals {
                    let version = self.repo.assignment_version(assignment_id).await?;
                    inverse.push(AssignmentMove {
                        assignment_id,
                        expected_version: version,
                        new_person: original_person,
                    });
                }
                self.repo
                    .execute_moves(&inverse, MutationCause::Swap(swap_id), actor)
                    .await?;
                Err(err.into())
            }
        }
    }

    /// Roll back an executed swap within the configured window.
    pub async fn rollback_swap(
        &self,
        swap_id: SwapId,
        reason: &str,
        actor: &str,
    ) -> CoreResult<SwapRecord> {
        let record = self.repo.get_swap(swap_id).await?;
        if record.status != SwapStatus::Executed {
            return Err(CoreError::InputError(format!(
                "swap {} is {}, not EXECUTED",
                swap_id,
                record.status.as_str()
            )));
        }
        let executed_at = record.executed_at.ok_or_else(|| {
            CoreError::internal("executed swap has no execution timestamp", swap_id.to_string())
        })?;
        let window = Duration::hours(self.config.swap.rollback_window_hours as i64);
        if self.clock.now() - executed_at > window {
            return Err(CoreError::InputError(format!(
                "swap {} left its {}-hour rollback window",
                swap_id, self.config.swap.rollback_window_hours
            )));
        }

        // Reconstruct the applied moves from the audit trail and invert
        // them. A successor swap on any row blocks the rollback.
        let audit = self.repo.audit_for_swap(swap_id).await?;
        let mut inverse = Vec::new();
        for row in audit.iter().filter(|r| r.action == "reassign") {
            let from_person = row.details["from_person"].as_i64().ok_or_else(|| {
                CoreError::internal("audit row lacks from_person", swap_id.to_string())
            })?;
            let current = self.repo.get_assignment(row.assignment_id).await?;
            if current.source_swap_id != Some(swap_id) {
                return Err(CoreError::RollbackBlocked(format!(
                    "assignment {} was modified by a later swap",
                    row.assignment_id
                )));
            }
            let version = self.repo.assignment_version(row.assignment_id).await?;
            inverse.push(AssignmentMove {
                assignment_id: row.assignment_id,
                expected_version: version,
                new_person: PersonId(from_person),
            });
        }
        if inverse.is_empty() {
            return Err(CoreError::internal(
                "executed swap has no reassign audit rows",
                swap_id.to_string(),
            ));
        }
        self.repo
            .execute_moves(&inverse, MutationCause::Swap(swap_id), actor)
            .await?;

        let mut rolled_back = record.clone();
        rolled_back.status = SwapStatus::RolledBack;
        rolled_back.rolled_back_at = Some(self.clock.now());
        rolled_back.rollback_reason = Some(reason.to_string());
        rolled_back.updated_at = self.clock.now();
        let saved = self
            .repo
            .update_swap(&rolled_back, SwapStatus::Executed)
            .await?;
        info!("swap {} rolled back: {}", swap_id, reason);
        Ok(saved)
    }

    // ==================== Matching ====================

    /// Score a spec against every pending request and return candidates at
    /// or above the auto-match threshold, best first.
    pub async fn find_matches(
        &self,
        ctx: &SchedulingContext,
        spec: &SwapSpec,
    ) -> CoreResult<Vec<CandidateMatch>> {
        let pending = self.repo.list_swaps_with_status(SwapStatus::Pending).await?;
        let my_side = self.side_of(ctx, spec.source_person, monday_of(spec.source_week));

        let mut matches = Vec::new();
        for request in pending {
            if request.source_person == spec.source_person {
                continue;
            }
            let their_side = self.side_of(ctx, request.source_person, request.source_week);
            let score = score_exchange(ctx, &my_side, &their_side);
            if score.total >= self.config.swap.auto_match_threshold {
                matches.push(CandidateMatch {
                    swap_id: request.id,
                    partner: request.source_person,
                    partner_week: request.source_week,
                    score,
                });
            }
        }
        matches.sort_by(|a, b| {
            b.score
                .total
                .partial_cmp(&a.score.total)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(matches)
    }

    /// Pair the whole pending queue by maximum-weight matching.
    pub async fn match_pending_queue(
        &self,
        ctx: &SchedulingContext,
    ) -> CoreResult<Vec<(SwapRecord, SwapRecord, f64)>> {
        let pending = self.repo.list_swaps_with_status(SwapStatus::Pending).await?;
        let sides: Vec<SwapSide> = pending
            .iter()
            .map(|r| self.side_of(ctx, r.source_person, r.source_week))
            .collect();

        let mut pairs = Vec::new();
        for i in 0..pending.len() {
            for j in (i + 1)..pending.len() {
                if pending[i].source_person == pending[j].source_person {
                    continue;
                }
                let score = score_exchange(ctx, &sides[i], &sides[j]);
                pairs.push(ScoredPair {
                    a: i,
                    b: j,
                    score: score.total,
                });
            }
        }

        // Exact mutual pairs win outright; the weight matching covers the rest.
        let exact = matching::exact_mutual_matches(&pairs);
        let chosen = if exact.is_empty() {
            maximum_weight_matching(pending.len(), &pairs, self.config.swap.auto_match_threshold)
        } else {
            exact
        };
        Ok(chosen
            .into_iter()
            .map(|p| (pending[p.a].clone(), pending[p.b].clone(), p.score))
            .collect())
    }

    /// Preference-based pairing of the pending queue by stable matching.
    ///
    /// Each request ranks the others by compatibility; the resulting pairs
    /// are stable (no two requests mutually prefer each other over their
    /// assigned partners).
    pub async fn stable_match_queue(
        &self,
        ctx: &SchedulingContext,
    ) -> CoreResult<Vec<(SwapRecord, SwapRecord)>> {
        let pending = self.repo.list_swaps_with_status(SwapStatus::Pending).await?;
        let sides: Vec<SwapSide> = pending
            .iter()
            .map(|r| self.side_of(ctx, r.source_person, r.source_week))
            .collect();

        let threshold = self.config.swap.auto_match_threshold;
        let preferences: Vec<Vec<usize>> = (0..pending.len())
            .map(|i| {
                let mut ranked: Vec<(usize, f64)> = (0..pending.len())
                    .filter(|&j| j != i && pending[i].source_person != pending[j].source_person)
                    .map(|j| (j, score_exchange(ctx, &sides[i], &sides[j]).total))
                    .filter(|(_, score)| *score >= threshold)
                    .collect();
                ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
                ranked.into_iter().map(|(j, _)| j).collect()
            })
            .collect();

        let matched = stable_matching(&preferences, &preferences);
        // Each stable pair appears once per direction; keep one orientation.
        Ok(matched
            .into_iter()
            .filter(|(proposer, acceptor)| proposer < acceptor)
            .map(|(proposer, acceptor)| (pending[proposer].clone(), pending[acceptor].clone()))
            .collect())
    }

    /// Detect executable swap chains in the pending queue.
    pub async fn find_chain_candidates(
        &self,
        ctx: &SchedulingContext,
    ) -> CoreResult<Vec<(Chain, Vec<SwapRecord>)>> {
        let pending = self.repo.list_swaps_with_status(SwapStatus::Pending).await?;
        let sides: Vec<SwapSide> = pending
            .iter()
            .map(|r| self.side_of(ctx, r.source_person, r.source_week))
            .collect();

        // Edge i -> j when i wants the week j is giving up.
        let mut edges = Vec::new();
        for (i, request) in pending.iter().enumerate() {
            let wanted = match request.target_week {
                Some(week) => week,
                None => continue,
            };
            for (j, other) in pending.iter().enumerate() {
                if i == j || other.source_week != wanted {
                    continue;
                }
                let score = score_exchange(ctx, &sides[i], &sides[j]);
                edges.push(ChainEdge {
                    from: i,
                    to: j,
                    score: score.total,
                });
            }
        }

        let chains = chains::find_chains(
            &edges,
            self.config.swap.max_chain_length,
            self.config.swap.auto_match_threshold,
        );
        let mut executable = Vec::new();
        for chain in chains {
            let members: Vec<SwapRecord> =
                chain.members.iter().map(|&i| pending[i].clone()).collect();
            if self.chain_preserves_invariants(ctx, &members) {
                executable.push((chain, members));
            }
        }
        Ok(executable)
    }

    // ==================== Emergency coverage ====================

    /// Four-tier rapid-coverage search. The consent step is skipped by
    /// definition here; callers set `emergency` only under operational need.
    pub async fn emergency_coverage(
        &self,
        ctx: &SchedulingContext,
        week: NaiveDate,
        reason: &str,
    ) -> CoreResult<EmergencyPlan> {
        let week = monday_of(week);
        let week_end = week + Duration::days(6);

        // Tier 1: backup-marked personnel with open capacity that week.
        let mut backup: Vec<PersonId> = ctx
            .people
            .iter()
            .filter(|p| p.active && p.backup_pool)
            .filter(|p| {
                let busy = ctx
                    .assignments_for(p.id)
                    .filter_map(|a| ctx.block(a.block_id))
                    .filter(|b| b.date >= week && b.date <= week_end)
                    .count();
                let absent = (0..7).any(|d| ctx.is_absent(p.id, week + Duration::days(d)));
                busy < 10 && !absent
            })
            .map(|p| p.id)
            .collect();
        backup.sort_unstable_by_key(|p| p.value());
        if !backup.is_empty() {
            return Ok(EmergencyPlan {
                tier: 1,
                description: "backup personnel with available capacity".to_string(),
                candidates: backup,
                escalated: false,
            });
        }

        // Tier 2: broadcast absorb offer.
        let eligible: Vec<PersonId> = ctx
            .people
            .iter()
            .filter(|p| p.active && p.role == Role::Trainee)
            .filter(|p| !(0..7).any(|d| ctx.is_absent(p.id, week + Duration::days(d))))
            .map(|p| p.id)
            .collect();
        if !eligible.is_empty() {
            self.dispatcher.dispatch(
                NotificationEvent::new(
                    "broadcast_absorb_offer",
                    format!("emergency coverage needed for week {}: {}", week, reason),
                )
                .with_payload(serde_json::json!({ "week": week.to_string() })),
            );
            return Ok(EmergencyPlan {
                tier: 2,
                description: "broadcast absorb offer to eligible personnel".to_string(),
                candidates: eligible,
                escalated: false,
            });
        }

        // Tier 3: bounded extension of adjacent shifts, respecting rest.
        let extendable: Vec<PersonId> = ctx
            .people
            .iter()
            .filter(|p| p.active && p.role == Role::Trainee)
            .filter(|p| !(0..7).any(|d| ctx.is_absent(p.id, week + Duration::days(d))))
            .filter(|p| {
                let view = crate::constraints::ScheduleView::of_context(ctx);
                let periods = view.duty_periods(p.id);
                let min_rest = if p.is_pgy1() {
                    self.config.limits.pgy1_min_rest_hours
                } else {
                    self.config.limits.pgy2plus_min_rest_hours
                };
                // A four-hour extension must leave the following rest intact.
                periods.windows(2).all(|pair| {
                    let rest = (pair[1].0 - pair[0].1).num_minutes() as f64 / 60.0;
                    rest - 4.0 >= min_rest
                })
            })
            .map(|p| p.id)
            .collect();
        if !extendable.is_empty() {
            return Ok(EmergencyPlan {
                tier: 3,
                description: "extend adjacent shifts by at most four hours".to_string(),
                candidates: extendable,
                escalated: false,
            });
        }

        // Tier 4: escalate to the notification collaborator.
        self.dispatcher.dispatch(
            NotificationEvent::new(
                "coverage_escalation",
                format!("no emergency coverage found for week {}: {}", week, reason),
            )
            .with_payload(serde_json::json!({ "week": week.to_string() })),
        );
        Ok(EmergencyPlan {
            tier: 4,
            description: "escalated: no coverage candidates".to_string(),
            candidates: Vec::new(),
            escalated: true,
        })
    }

    // ==================== Internals ====================

    fn side_of(&self, ctx: &SchedulingContext, person: PersonId, week: NaiveDate) -> SwapSide {
        SwapSide {
            person,
            week,
            assignments: week_assignments(ctx, person, week),
        }
    }

    /// Simulate the record's exchange over the context and report the
    /// violations it would introduce (eligibility, slot conflicts, and any
    /// new hard compliance violations).
    fn simulate(&self, ctx: &SchedulingContext, record: &SwapRecord) -> CoreResult<Vec<Violation>> {
        for person in [record.source_person, record.target_person] {
            if ctx.person(person).is_none() {
                return Err(CoreError::InputError(format!(
                    "person {} is not in the scheduling context",
                    person
                )));
            }
        }

        let source_side = self.side_of(ctx, record.source_person, record.source_week);
        let target_week = record.target_week.unwrap_or(record.source_week);
        let target_side = self.side_of(ctx, record.target_person, target_week);

        if source_side.assignments.is_empty() {
            return Ok(vec![Violation::new(
                "SwapEmptySourceWeek",
                Severity::High,
                format!(
                    "person {} has nothing to give up in week {}",
                    record.source_person, record.source_week
                ),
            )]);
        }

        let mut violations = Vec::new();

        // Eligibility and slot conflicts per moved assignment.
        let moves: Vec<(PersonId, &Assignment)> = match record.swap_type {
            SwapType::OneToOne | SwapType::Chain => source_side
                .assignments
                .iter()
                .map(|a| (record.target_person, a))
                .chain(
                    target_side
                        .assignments
                        .iter()
                        .map(|a| (record.source_person, a)),
                )
                .collect(),
            SwapType::Absorb => source_side
                .assignments
                .iter()
                .map(|a| (record.target_person, a))
                .collect(),
        };
        for (recipient, assignment) in &moves {
            let person = ctx.person(*recipient).expect("checked above");
            if let Some(rotation) = ctx.rotation(assignment.rotation_id) {
                if !rotation.eligibility.matches(person) {
                    violations.push(
                        Violation::new(
                            "SwapEligibility",
                            Severity::High,
                            format!(
                                "person {} is not eligible for rotation {} in block {}",
                                recipient, rotation.name, assignment.block_id
                            ),
                        )
                        .for_person(*recipient)
                        .for_block(assignment.block_id),
                    );
                }
            }
            let blocked = ctx
                .assignments_for(*recipient)
                .any(|other| other.block_id == assignment.block_id && other.id != assignment.id);
            let moved_away = moves
                .iter()
                .any(|(_, m)| m.block_id == assignment.block_id && m.person_id == *recipient);
            if blocked && !moved_away {
                violations.push(
                    Violation::new(
                        "SwapSlotConflict",
                        Severity::High,
                        format!(
                            "person {} already works block {}",
                            recipient, assignment.block_id
                        ),
                    )
                    .for_person(*recipient)
                    .for_block(assignment.block_id),
                );
            }
            if let Some(block) = ctx.block(assignment.block_id) {
                if ctx.is_absent(*recipient, block.date) {
                    violations.push(
                        Violation::new(
                            "SwapAbsenceConflict",
                            Severity::High,
                            format!("person {} is absent on {}", recipient, block.date),
                        )
                        .for_person(*recipient)
                        .for_block(assignment.block_id),
                    );
                }
            }
        }

        // Full compliance check on the simulated assignment set: the swap
        // must not add hard violations the baseline does not have.
        let validator = ComplianceValidator::new(&self.config);
        let baseline_hard = validator
            .validate(ctx)
            .violations
            .into_iter()
            .filter(|v| matches!(v.severity, Severity::Critical | Severity::High))
            .count();
        let mut simulated: Vec<Assignment> = ctx.existing_assignments.clone();
        for a in &mut simulated {
            if let Some((recipient, _)) = moves.iter().find(|(_, m)| m.id == a.id) {
                a.person_id = *recipient;
            }
        }
        let after = validator.validate_candidate(ctx, &simulated);
        let after_hard: Vec<Violation> = after
            .violations
            .into_iter()
            .filter(|v| matches!(v.severity, Severity::Critical | Severity::High))
            .collect();
        if after_hard.len() > baseline_hard {
            violations.extend(after_hard);
        }

        Ok(violations)
    }

    /// Plan the move set from the repository's current snapshot.
    ///
    /// The caller's context is the snapshot the swap was validated against:
    /// if the repository's rows for either week no longer match it, another
    /// writer got there first and this plan is stale.
    async fn plan_moves(
        &self,
        ctx: &SchedulingContext,
        record: &SwapRecord,
    ) -> CoreResult<Vec<AssignmentMove>> {
        let mut moves = Vec::new();

        let mut sides: Vec<(PersonId, NaiveDate, PersonId)> = vec![(
            record.source_person,
            record.source_week,
            record.target_person,
        )];
        if record.swap_type != SwapType::Absorb {
            if let Some(target_week) = record.target_week {
                sides.push((record.target_person, target_week, record.source_person));
            }
        }

        for (holder, week, recipient) in sides {
            let current = self
                .repo
                .list_assignments(week, week + Duration::days(6))
                .await?;
            let repo_side: Vec<&Assignment> = current
                .iter()
                .filter(|a| a.person_id == holder)
                .filter(|a| {
                    ctx.rotation(a.rotation_id)
                        .map_or(false, |r| r.activity_type != ActivityType::Absence)
                })
                .collect();
            let snapshot_side = week_assignments(ctx, holder, week);

            let mut repo_ids: Vec<i64> = repo_side.iter().map(|a| a.id.value()).collect();
            let mut snapshot_ids: Vec<i64> =
                snapshot_side.iter().map(|a| a.id.value()).collect();
            repo_ids.sort_unstable();
            snapshot_ids.sort_unstable();
            if repo_ids != snapshot_ids {
                return Err(CoreError::ConcurrencyConflict(format!(
                    "week {} of person {} changed since validation",
                    week, holder
                )));
            }

            for a in repo_side {
                let version = self.repo.assignment_version(a.id).await?;
                moves.push(AssignmentMove {
                    assignment_id: a.id,
                    expected_version: version,
                    new_person: recipient,
                });
            }
        }
        Ok(moves)
    }

    fn chain_preserves_invariants(
        &self,
        ctx: &SchedulingContext,
        members: &[SwapRecord],
    ) -> bool {
        // Rotate each member's week to the next member around the cycle and
        // validate the concatenated result.
        let mut simulated: Vec<Assignment> = ctx.existing_assignments.clone();
        for (i, member) in members.iter().enumerate() {
            let next = &members[(i + 1) % members.len()];
            let week_end = member.source_week + Duration::days(6);
            for a in &mut simulated {
                let date = match ctx.block(a.block_id) {
                    Some(b) => b.date,
                    None => continue,
                };
                if a.person_id == member.source_person
                    && date >= member.source_week
                    && date <= week_end
                {
                    a.person_id = next.source_person;
                }
            }
        }
        // Unique slots after rotation.
        let mut slots: Vec<(PersonId, crate::models::BlockId)> =
            simulated.iter().map(|a| (a.person_id, a.block_id)).collect();
        slots.sort();
        let before = slots.len();
        slots.dedup();
        if slots.len() != before {
            return false;
        }

        let validator = ComplianceValidator::new(&self.config);
        let baseline = validator.validate(ctx).hard_violation_count();
        let report = validator.validate_candidate(ctx, &simulated);
        report.hard_violation_count() <= baseline
    }
}

/// A person's non-absence assignments inside a Monday-based week.
pub fn week_assignments(
    ctx: &SchedulingContext,
    person: PersonId,
    week: NaiveDate,
) -> Vec<Assignment> {
    let week_end = week + Duration::days(6);
    ctx.assignments_for(person)
        .filter(|a| {
            ctx.block(a.block_id)
                .map_or(false, |b| b.date >= week && b.date <= week_end)
        })
        .filter(|a| {
            ctx.rotation(a.rotation_id)
                .map_or(false, |r| r.activity_type != crate::models::ActivityType::Absence)
        })
        .cloned()
        .collect()
}
