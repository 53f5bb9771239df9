//! Solution callback: the bridge between solver loops and the run protocol.
//!
//! Solvers are synchronous loops; the control plane is asynchronous. The
//! callback carries progress out and abort requests in, with no suspension
//! semantics: solvers call `on_iteration` at least once per iteration and
//! poll `should_abort` at their documented cadence.

use crate::engine::runs::ProgressSnapshot;

pub trait SolutionCallback: Send + Sync {
    /// Called on every iteration (greedy) or every improving solution
    /// (constructive/local-search solvers).
    fn on_iteration(&self, progress: &ProgressSnapshot);

    /// Non-blocking abort poll. `Some(reason)` means stop now and return
    /// best-so-far.
    fn should_abort(&self) -> Option<String>;
}

/// Callback that ignores progress and never aborts.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCallback;

impl SolutionCallback for NoopCallback {
    fn on_iteration(&self, _progress: &ProgressSnapshot) {}

    fn should_abort(&self) -> Option<String> {
        None
    }
}
