//! Event name constants.
//!
//! Event names are opaque strings by design — clients filter by name,
//! not by matching a closed enum. These constants exist so producers
//! inside this workspace don't typo them.

/// A planner decision has produced a new partial (non-empty reasoning
/// or assistant text since the last emission for this decision).
pub const DECISION_PARTIAL: &str = "decision.partial";
/// A planner decision has finalized.
pub const DECISION_FINAL: &str = "decision.final";
/// A completion block was created or updated.
pub const BLOCK_UPSERT: &str = "block.upsert";
/// An incremental text delta for a block's reasoning or content.
pub const BLOCK_DELTA_ARTIFACT: &str = "block.delta.artifact";
/// A tool invocation has begun.
pub const TOOL_STARTED: &str = "tool.started";
/// A tool reported an intermediate progress marker.
pub const TOOL_PROGRESS: &str = "tool.progress";
/// A tool emitted a partial structured result.
pub const TOOL_PARTIAL: &str = "tool.partial";
/// A tool emitted raw incremental text output.
pub const TOOL_STDOUT: &str = "tool.stdout";
/// A tool invocation has finished (success or error).
pub const TOOL_FINISHED: &str = "tool.finished";
/// The planner produced invalid output and a retry is being attempted.
pub const PLANNER_RETRY: &str = "planner.retry";
/// The agent execution has started.
pub const COMPLETION_STARTED: &str = "completion.started";
/// The agent execution has finished (terminal event for the run).
pub const COMPLETION_FINISHED: &str = "completion.finished";
/// The agent execution ended in an unrecoverable error.
pub const COMPLETION_ERROR: &str = "completion.error";
/// A query was created by a tool's side effects.
pub const QUERY_CREATED: &str = "query.created";
/// A visualization was created by a tool's side effects.
pub const VISUALIZATION_CREATED: &str = "visualization.created";
/// A visualization was updated by a tool's side effects.
pub const VISUALIZATION_UPDATED: &str = "visualization.updated";
/// The instruction-suggestion agent has started.
pub const INSTRUCTIONS_SUGGEST_STARTED: &str = "instructions.suggest.started";
/// The instruction-suggestion agent yielded a partial draft.
pub const INSTRUCTIONS_SUGGEST_PARTIAL: &str = "instructions.suggest.partial";
/// The instruction-suggestion agent has finished.
pub const INSTRUCTIONS_SUGGEST_FINISHED: &str = "instructions.suggest.finished";
