//! Persistence error taxonomy.

use thiserror::Error;

/// Errors a [`crate::PersistenceGateway`] can report.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PersistenceError {
    /// No `AgentExecution` exists with the given id.
    #[error("unknown agent execution: {0}")]
    UnknownExecution(String),
    /// The execution has already left `in_progress`; new rows may not
    /// be appended (§3 invariant 5).
    #[error("agent execution {0} is no longer in progress")]
    ExecutionClosed(String),
    /// No `ToolExecution` exists with the given id.
    #[error("unknown tool execution: {0}")]
    UnknownToolExecution(String),
    /// The block projector rejected a write (decision-first ordering
    /// violated).
    #[error(transparent)]
    Projection(#[from] compass_blocks::ProjectorError),
}
