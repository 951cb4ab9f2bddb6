//! The loop's error taxonomy (§7): what's retryable against the
//! invalid-retry breaker, what's fatal, and what wraps an underlying
//! collaborator's own error type.

use thiserror::Error;

/// Errors produced while driving one [`crate::RunRequest`] through the
/// loop.
#[derive(Debug, Error)]
pub enum LoopError {
    /// The assembled `PlannerInput` failed validation before being
    /// handed to the planner. Counted against `max_invalid_retries`.
    #[error(transparent)]
    InputValidation(#[from] compass_planner::InputValidationError),

    /// The planner call itself failed (provider error, not a malformed
    /// decision payload).
    #[error(transparent)]
    PlannerInvocation(#[from] compass_planner::PlannerInvocationError),

    /// A finalized decision carried `plan_type = action` but no
    /// `action`. Counted against `max_invalid_retries`.
    #[error("planner finalized an action decision with no action")]
    MissingAction,

    /// The selected action named a tool the registry doesn't know, or
    /// one whose category doesn't permit the decision's plan type.
    /// Counted against `max_invalid_retries`.
    #[error("action '{name}' could not be resolved for plan type {plan_type}")]
    ResolveError {
        /// The action's tool name.
        name: String,
        /// The plan type under which the action was attempted.
        plan_type: String,
    },

    /// The context hub could not render a snapshot.
    #[error(transparent)]
    Context(#[from] compass_context::ContextError),

    /// A tool attempt failed after exhausting its retry policy.
    #[error(transparent)]
    ToolRuntime(#[from] compass_tool::ToolError),

    /// A persistence write failed. These are fatal per §4.10's split:
    /// decision/tool-execution rows must land for the run to be
    /// considered durable.
    #[error(transparent)]
    Persistence(#[from] compass_persistence::PersistenceError),

    /// A circuit breaker tripped: repeated failures of the same tool,
    /// or the same successful action repeating without making
    /// progress.
    #[error("circuit breaker tripped: {0}")]
    CircuitBreaker(String),

    /// The run's cancellation token fired.
    #[error("execution was cancelled")]
    Cancelled,
}

impl LoopError {
    /// Whether this error should be retried under the invalid-retry
    /// breaker rather than failing the run outright. Provider/tool/
    /// persistence failures and a tripped circuit breaker are never
    /// retried here — those already carry their own retry policy (the
    /// planner invocation itself, or `compass_tool::run_with_policies`)
    /// or are terminal by construction.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LoopError::InputValidation(_) | LoopError::MissingAction | LoopError::ResolveError { .. }
        )
    }
}
