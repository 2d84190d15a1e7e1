//! Error types for the orchestrator.

use thiserror::Error;

/// Orchestrator-level errors.
///
/// Lock contention and absent capabilities are deliberately not represented
/// here: a busy lock is a normal `TriggerOutcome::Busy`, and the typed
/// registry makes "capability absent" unrepresentable at call time. An
/// individual agent failing its turn is caught at the cycle boundary and
/// logged, so it never surfaces through this type either.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("orchestrator database error: {0}")]
    Database(#[from] sqlx::Error),

    /// An event-batch fetch from the marketplace database failed. Fatal to
    /// the cycle that requested it: the lock is released and the watermark
    /// does not advance.
    #[error("event collection failed: {0}")]
    Collector(String),

    #[error("unknown agent: {0}")]
    UnknownAgent(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T, E = OrchestratorError> = std::result::Result<T, E>;
