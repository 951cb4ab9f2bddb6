#![deny(missing_docs)]
//! Tool registry, metadata catalog, and streaming runtime for the compass
//! orchestration core.
//!
//! Defines the [`ToolDyn`] trait for object-safe tool abstraction,
//! [`ToolRegistry`] for per-plan-type catalog filtering, and the
//! [`Tool`] streaming contract with retry and timeout policies applied
//! uniformly by [`run_with_policies`].

mod descriptor;
mod registry;
mod runtime;

pub use descriptor::{ObservationPolicy, PlanType, ToolCategory, ToolDescriptor};
pub use registry::ToolRegistry;
pub use runtime::{
    run_with_policies, Observation, ObservationError, RetryPolicy, RuntimeContext, Tool,
    ToolEvent, TimeoutPolicy,
};

use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors from tool operations.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ToolError {
    /// The requested tool was not found in the registry.
    #[error("tool not found: {0}")]
    NotFound(String),

    /// The tool is not permitted for the requested plan type.
    #[error("tool {tool} not permitted for plan type {plan_type}")]
    NotPermitted {
        /// Name of the tool.
        tool: String,
        /// The plan type it was invoked under.
        plan_type: String,
    },

    /// Tool execution failed.
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// The tool exceeded one of its timeout bounds.
    #[error("timeout: {0}")]
    Timeout(String),

    /// The tool's stream ended without emitting a terminal `tool.end`/`tool.error` event.
    #[error("tool stream ended without a terminal event")]
    MissingEnd,

    /// The input provided to the tool was invalid.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Execution was aborted by the sigkill signal.
    #[error("cancelled")]
    Cancelled,

    /// Catch-all for other errors.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl ToolError {
    /// Whether this error is classified as transient and safe to retry
    /// even for a non-idempotent tool (network hiccups, timeouts, and
    /// the like). Tool-specific execution failures are not retryable
    /// unless the tool itself is idempotent.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ToolError::Timeout(_) | ToolError::MissingEnd)
    }
}

/// Object-safe trait for request/response tool implementations that do
/// not need to stream intermediate events. Most simple tools implement
/// this; [`Tool`] is the richer streaming contract used by the runtime.
pub trait ToolDyn: Send + Sync {
    /// The tool's unique name.
    fn name(&self) -> &str;

    /// Human-readable description of what the tool does.
    fn description(&self) -> &str;

    /// JSON Schema for the tool's input parameters.
    fn input_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given input.
    fn call(
        &self,
        input: serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = Result<serde_json::Value, ToolError>> + Send + '_>>;
}
