//! Persisted entity shapes (§3, §6): `agent_execution`, `plan_decision`,
//! `tool_execution`, `context_snapshot`. `completion_block` lives in
//! `compass-blocks` and is re-exported from there.

use serde::{Deserialize, Serialize};

pub use compass_blocks::{BlockStatus, CompletionBlock, SourceType};

/// Lifecycle status of an [`AgentExecution`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// The loop is still running.
    InProgress,
    /// The loop finished normally.
    Success,
    /// The loop finalized with an unrecoverable error.
    Error,
    /// The loop was cut short by a sigkill signal.
    Sigkill,
}

impl ExecutionStatus {
    /// Whether new `PlanDecision`/`ToolExecution` rows may still be
    /// appended — false once the status has left `in_progress`
    /// (§3 invariant 5: terminal status is write-once).
    pub fn accepts_new_rows(&self) -> bool {
        matches!(self, ExecutionStatus::InProgress)
    }
}

/// One user turn's orchestration lifecycle. Owns every downstream
/// `PlanDecision`, `ToolExecution`, `CompletionBlock`, and
/// `ContextSnapshot` row by `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentExecution {
    /// Unique id.
    pub id: String,
    /// The assistant message this execution is producing.
    pub completion_id: String,
    /// The report this turn belongs to.
    pub report_id: String,
    /// Organization the turn executes under.
    pub organization_id: String,
    /// The user who triggered the turn.
    pub user_id: String,
    /// Lifecycle status.
    pub status: ExecutionStatus,
    /// When the loop started, epoch milliseconds.
    pub started_at: i64,
    /// When the loop ended, epoch milliseconds.
    pub completed_at: Option<i64>,
    /// The highest `seq` allocated so far for this execution.
    pub latest_seq: i64,
    /// Opaque per-run configuration (model overrides, step limits...).
    pub config: serde_json::Value,
    /// Total wall-clock duration once finalized, in milliseconds.
    pub total_duration_ms: Option<i64>,
}

impl AgentExecution {
    /// Start a new, empty execution with `status = in_progress` and
    /// `latest_seq = 0`.
    pub fn start(
        id: impl Into<String>,
        completion_id: impl Into<String>,
        report_id: impl Into<String>,
        organization_id: impl Into<String>,
        user_id: impl Into<String>,
        started_at: i64,
        config: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            completion_id: completion_id.into(),
            report_id: report_id.into(),
            organization_id: organization_id.into(),
            user_id: user_id.into(),
            status: ExecutionStatus::InProgress,
            started_at,
            completed_at: None,
            latest_seq: 0,
            config,
            total_duration_ms: None,
        }
    }
}

/// `research` (read-only) or `action` (state-changing) plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanType {
    /// Read-only investigation.
    Research,
    /// State-changing action.
    Action,
}

impl From<compass_tool::PlanType> for PlanType {
    fn from(value: compass_tool::PlanType) -> Self {
        match value {
            compass_tool::PlanType::Research => PlanType::Research,
            compass_tool::PlanType::Action => PlanType::Action,
        }
    }
}

impl std::fmt::Display for PlanType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlanType::Research => write!(f, "research"),
            PlanType::Action => write!(f, "action"),
        }
    }
}

/// One finalized planner output within a loop iteration.
/// `(agent_execution_id, seq)` is unique; partial streaming updates
/// reuse the same row since `seq` is pinned at decision start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanDecision {
    /// Unique id.
    pub id: String,
    /// The execution this decision belongs to.
    pub agent_execution_id: String,
    /// Per-run sequence number, pinned when the decision was created.
    pub seq: i64,
    /// Which loop iteration produced this decision.
    pub loop_index: u32,
    /// `research` or `action`.
    pub plan_type: PlanType,
    /// Whether the planner considers the task resolved.
    pub analysis_complete: bool,
    /// Streamed reasoning trace.
    pub reasoning: Option<String>,
    /// Streamed assistant-facing text.
    pub assistant: Option<String>,
    /// The planner's final answer, once `analysis_complete`.
    pub final_answer: Option<String>,
    /// The selected tool's name, for `plan_type = action`.
    pub action_name: Option<String>,
    /// The selected tool's arguments.
    pub action_args: Option<serde_json::Value>,
    /// Planner-reported metrics.
    pub metrics: Option<serde_json::Value>,
}

/// Execution status of a [`ToolExecution`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolExecutionStatus {
    /// Still running.
    InProgress,
    /// Finished successfully.
    Success,
    /// Finished with an error.
    Error,
}

/// One invocation of a registered tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolExecution {
    /// Unique id.
    pub id: String,
    /// The execution this invocation belongs to.
    pub agent_execution_id: String,
    /// The decision that selected this tool, if any.
    pub plan_decision_id: Option<String>,
    /// The tool's name.
    pub tool_name: String,
    /// The tool's action sub-type, if it disambiguates by one.
    pub tool_action: Option<String>,
    /// The arguments the tool was invoked with.
    pub arguments: serde_json::Value,
    /// Execution status.
    pub status: ToolExecutionStatus,
    /// Whether the attempt succeeded.
    pub success: bool,
    /// When the attempt started, epoch milliseconds.
    pub started_at: i64,
    /// When the attempt finished, epoch milliseconds.
    pub completed_at: Option<i64>,
    /// Wall-clock duration of the attempt, once finished.
    pub duration_ms: Option<i64>,
    /// The observation's summary, duplicated here for quick listing.
    pub result_summary: Option<String>,
    /// The tool's raw result payload.
    pub result_json: Option<serde_json::Value>,
    /// Populated when `status = error`.
    pub error_message: Option<String>,
    /// Widget created by this tool invocation, if any.
    pub created_widget_id: Option<String>,
    /// Step created by this tool invocation, if any.
    pub created_step_id: Option<String>,
    /// Visualizations created by this tool invocation, if any.
    pub created_visualization_ids: Option<Vec<String>>,
    /// 1-based attempt number within the tool's retry policy.
    pub attempt_number: u32,
    /// The tool's configured retry budget.
    pub max_retries: u32,
}

impl ToolExecution {
    /// Begin a new in-progress attempt.
    #[allow(clippy::too_many_arguments)]
    pub fn start(
        id: impl Into<String>,
        agent_execution_id: impl Into<String>,
        plan_decision_id: Option<String>,
        tool_name: impl Into<String>,
        tool_action: Option<String>,
        arguments: serde_json::Value,
        started_at: i64,
        attempt_number: u32,
        max_retries: u32,
    ) -> Self {
        Self {
            id: id.into(),
            agent_execution_id: agent_execution_id.into(),
            plan_decision_id,
            tool_name: tool_name.into(),
            tool_action,
            arguments,
            status: ToolExecutionStatus::InProgress,
            success: false,
            started_at,
            completed_at: None,
            duration_ms: None,
            result_summary: None,
            result_json: None,
            error_message: None,
            created_widget_id: None,
            created_step_id: None,
            created_visualization_ids: None,
            attempt_number,
            max_retries,
        }
    }
}

/// Which moment in the loop a [`ContextSnapshot`] was taken at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotKind {
    /// Before the first loop iteration.
    Initial,
    /// Immediately before a tool runs.
    PreTool,
    /// Immediately after a tool finishes.
    PostTool,
    /// After the loop has terminated.
    Final,
}

/// A frozen context view used by the planner, kept for audit/replay.
/// Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSnapshot {
    /// Unique id.
    pub id: String,
    /// The execution this snapshot belongs to.
    pub agent_execution_id: String,
    /// Which moment this snapshot captures.
    pub kind: SnapshotKind,
    /// The serialized context view.
    pub context_view: serde_json::Value,
    /// The fully rendered prompt text, if captured.
    pub prompt_text: Option<String>,
    /// Estimated prompt token count, if captured.
    pub prompt_tokens: Option<u64>,
    /// When the snapshot was taken, epoch milliseconds.
    pub taken_at: i64,
}
