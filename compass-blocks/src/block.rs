//! The [`CompletionBlock`] entity: one render-ready transcript unit.

use serde::{Deserialize, Serialize};

/// Which kind of upstream record a block was projected from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// Projected from a [finalized] plan decision.
    Decision,
    /// Projected from a tool execution, annotating its owning decision block.
    Tool,
}

/// Render status of a block, independent of the underlying row's own
/// status vocabulary (decisions don't have a `stopped` state; blocks do,
/// for the sigkill path).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockStatus {
    /// Still streaming / the owning action hasn't resolved.
    InProgress,
    /// Resolved successfully.
    Completed,
    /// Resolved with an error.
    Error,
    /// Cut short by a sigkill.
    Stopped,
}

impl BlockStatus {
    /// The single-character glyph `rebuild_completion_from_blocks` uses
    /// when concatenating block titles into the transcript body.
    pub fn glyph(&self) -> &'static str {
        match self {
            BlockStatus::InProgress => "…",
            BlockStatus::Completed => "✓",
            BlockStatus::Error => "✗",
            BlockStatus::Stopped => "■",
        }
    }
}

/// One render-ready transcript unit, projected from either a
/// [`SourceType::Decision`] or a [`SourceType::Tool`] record.
///
/// `block_index` is `seq * 10` by convention (leaves gaps for future
/// interpolation); uniqueness and ordering are what callers may rely
/// on, not the specific multiplier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionBlock {
    /// Unique block id.
    pub id: String,
    /// The assistant message this block renders into.
    pub completion_id: String,
    /// The run that owns this block.
    pub agent_execution_id: String,
    /// What this block was projected from.
    pub source_type: SourceType,
    /// The plan decision this block renders, if `source_type = decision`,
    /// or the plan decision a `source_type = tool` block is attached to.
    pub plan_decision_id: Option<String>,
    /// The tool execution this block renders, if `source_type = tool`.
    pub tool_execution_id: Option<String>,
    /// Sort key: `seq * 10`.
    pub block_index: i64,
    /// The iteration of the agent loop this block belongs to.
    pub loop_index: u32,
    /// Human-readable heading, e.g. `"Planning (research)"` or
    /// `"Planning (action) → create_widget"`.
    pub title: String,
    /// Render status.
    pub status: BlockStatus,
    /// Icon identifier shown alongside the title.
    pub icon: String,
    /// Rendered body, if any.
    pub content: Option<String>,
    /// Rendered reasoning trace, if any.
    pub reasoning: Option<String>,
    /// When the underlying record started, in epoch milliseconds.
    pub started_at: i64,
    /// When the underlying record completed, in epoch milliseconds.
    pub completed_at: Option<i64>,
}

impl CompletionBlock {
    /// Whether this block is a decision block belonging to the given
    /// `(agent_execution_id, loop_index)` pair.
    pub fn is_decision_for(&self, agent_execution_id: &str, loop_index: u32) -> bool {
        self.source_type == SourceType::Decision
            && self.agent_execution_id == agent_execution_id
            && self.loop_index == loop_index
    }
}
