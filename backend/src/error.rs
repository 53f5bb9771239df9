//! Error taxonomy for the scheduling core.
//!
//! Every error carries a stable machine-readable kind plus a human-readable
//! message. Constraint violations are never errors; they travel in result
//! violation lists. Transient conditions are retried inside the engine (see
//! [`retry_with_backoff`]) before being surfaced.

use std::future::Future;
use std::time::Duration;

use crate::db::RepositoryError;

/// Result alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Malformed request: bad shape, missing fields, invalid dates.
    #[error("Invalid input: {0}")]
    InputError(String),

    /// Precondition breach detected in the input context.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// No hard-constraint-satisfying solution exists.
    #[error("Infeasible: {0}")]
    Infeasible(String),

    /// Wall-clock limit reached; partial result available on the run record.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Operator abort; partial result available on the run record.
    #[error("Aborted: {0}")]
    Aborted(String),

    /// Stale read during swap execution. Retryable by the caller.
    #[error("Concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    /// Same idempotency key seen with a different body. Terminal for the key.
    #[error("Idempotency conflict: {0}")]
    IdempotencyConflict(String),

    /// Safety gate failed: no sufficiently fresh backup of the assignment store.
    #[error("Backup missing: {0}")]
    BackupMissing(String),

    /// Rollback refused because a later swap touched the same assignments.
    #[error("Rollback blocked: {0}")]
    RollbackBlocked(String),

    /// Solver or storage fault. No partial writes were committed.
    #[error("Internal error [{correlation_id}]: {message}")]
    InternalError {
        message: String,
        correlation_id: String,
    },
}

impl CoreError {
    /// Stable machine-readable kind string.
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::InputError(_) => "INPUT_ERROR",
            CoreError::InvariantViolation(_) => "INVARIANT_VIOLATION",
            CoreError::Infeasible(_) => "INFEASIBLE",
            CoreError::Timeout(_) => "TIMEOUT",
            CoreError::Aborted(_) => "ABORTED",
            CoreError::ConcurrencyConflict(_) => "SWAP_STALE",
            CoreError::IdempotencyConflict(_) => "IDEMPOTENCY_CONFLICT",
            CoreError::BackupMissing(_) => "NO_RECENT_BACKUP",
            CoreError::RollbackBlocked(_) => "ROLLBACK_BLOCKED_BY_SUCCESSOR",
            CoreError::InternalError { .. } => "INTERNAL_ERROR",
        }
    }

    /// Whether the caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::ConcurrencyConflict(_))
    }

    pub fn internal(message: impl Into<String>, correlation_id: impl Into<String>) -> Self {
        CoreError::InternalError {
            message: message.into(),
            correlation_id: correlation_id.into(),
        }
    }

    /// CLI exit code mapping.
    pub fn exit_code(&self) -> i32 {
        match self {
            CoreError::InputError(_) | CoreError::InvariantViolation(_) => 2,
            CoreError::Infeasible(_) => 3,
            CoreError::Aborted(_) => 4,
            CoreError::Timeout(_) => 5,
            _ => 10,
        }
    }
}

impl From<RepositoryError> for CoreError {
    fn from(err: RepositoryError) -> Self {
        match &err {
            RepositoryError::Conflict { message, .. } => {
                CoreError::ConcurrencyConflict(message.clone())
            }
            RepositoryError::NotFound { message, .. } => CoreError::InputError(message.clone()),
            _ => CoreError::internal(err.to_string(), "repository"),
        }
    }
}

/// Retry policy for transient failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(50),
        }
    }
}

/// Run `op` until it succeeds, the error is not retryable, or `policy.max_attempts`
/// is exhausted. Delay doubles between attempts.
pub async fn retry_with_backoff<T, F, Fut>(policy: RetryPolicy, mut op: F) -> CoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = CoreResult<T>>,
{
    let mut delay = policy.base_delay;
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < policy.max_attempts => {
                log::debug!(
                    "retryable failure on attempt {}/{}: {}",
                    attempt,
                    policy.max_attempts,
                    err
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn kinds_are_stable() {
        assert_eq!(CoreError::InputError("x".into()).kind(), "INPUT_ERROR");
        assert_eq!(
            CoreError::ConcurrencyConflict("x".into()).kind(),
            "SWAP_STALE"
        );
        assert_eq!(
            CoreError::BackupMissing("x".into()).kind(),
            "NO_RECENT_BACKUP"
        );
        assert_eq!(
            CoreError::internal("x", "corr-1").kind(),
            "INTERNAL_ERROR"
        );
    }

    #[test]
    fn exit_codes_follow_operational_contract() {
        assert_eq!(CoreError::InputError("x".into()).exit_code(), 2);
        assert_eq!(CoreError::Infeasible("x".into()).exit_code(), 3);
        assert_eq!(CoreError::Aborted("x".into()).exit_code(), 4);
        assert_eq!(CoreError::Timeout("x".into()).exit_code(), 5);
        assert_eq!(CoreError::internal("x", "c").exit_code(), 10);
    }

    #[tokio::test]
    async fn retry_stops_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: CoreResult<()> = retry_with_backoff(
            RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
            },
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(CoreError::ConcurrencyConflict("stale".into())) }
            },
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_does_not_repeat_terminal_errors() {
        let calls = AtomicU32::new(0);
        let result: CoreResult<()> = retry_with_backoff(RetryPolicy::default(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(CoreError::Infeasible("no".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
