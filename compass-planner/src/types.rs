//! Planner input/output wire types.
//!
//! [`PlannerInput`] is the validated bundle handed to a [`crate::Planner`]
//! implementation; [`PlannerDecision`] is its decoded output, streamed as
//! partials and a final value.

use compass_tool::{PlanType, ToolDescriptor};
use compass_turn::ProviderMessage;
use serde::{Deserialize, Serialize};

/// Everything the planner needs to produce a decision for one loop
/// iteration. Assembled by the context hub; the schema/instruction/
/// resource/file/mention/entity/observation sections are left as JSON
/// since their shapes are owned by `compass-context`, not duplicated
/// here.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerInput {
    /// Organization identity the request executes under.
    pub organization_id: String,
    /// The user's message for this turn.
    pub user_message: String,
    /// Rendered instruction sections (`load_mode=always` and
    /// `load_mode=intelligent` matches), as produced by the context hub.
    pub instructions: serde_json::Value,
    /// Per-data-source Top-K schema renderings plus the combined view.
    pub schemas: serde_json::Value,
    /// Recent conversation messages.
    pub messages: Vec<ProviderMessage>,
    /// Metadata resource excerpts (per-repo Top-K + index).
    pub resources: serde_json::Value,
    /// Uploaded file schemas available this turn.
    pub files: serde_json::Value,
    /// Current-turn @-mentions.
    pub mentions: serde_json::Value,
    /// Current-turn extracted entities.
    pub entities: serde_json::Value,
    /// A rendered summary of conversation history beyond what fits in
    /// `messages` verbatim.
    pub history_summary: Option<String>,
    /// The most recent tool observation, if any.
    pub last_observation: Option<serde_json::Value>,
    /// The windowed observation history (see `compass-observations`).
    pub past_observations: serde_json::Value,
    /// The tool catalog filtered for the plan type under consideration.
    pub tool_catalog: Vec<ToolDescriptor>,
    /// External platform the request originated from (e.g. `slack`,
    /// `web`, `api`).
    pub external_platform: String,
    /// Operating mode string, passed through to the prompt template.
    pub mode: String,
}

impl PlannerInput {
    /// Build a `PlannerInput` with its five mandatory fields and every
    /// optional/contextual field left empty. Callers outside this
    /// crate cannot use struct-literal syntax (`#[non_exhaustive]`), so
    /// this constructor plus the `with_*` setters below are the only
    /// way to assemble one.
    pub fn new(
        organization_id: impl Into<String>,
        user_message: impl Into<String>,
        tool_catalog: Vec<ToolDescriptor>,
        external_platform: impl Into<String>,
        mode: impl Into<String>,
    ) -> Self {
        Self {
            organization_id: organization_id.into(),
            user_message: user_message.into(),
            instructions: serde_json::Value::Null,
            schemas: serde_json::Value::Null,
            messages: Vec::new(),
            resources: serde_json::Value::Null,
            files: serde_json::Value::Null,
            mentions: serde_json::Value::Null,
            entities: serde_json::Value::Null,
            history_summary: None,
            last_observation: None,
            past_observations: serde_json::Value::Null,
            tool_catalog,
            external_platform: external_platform.into(),
            mode: mode.into(),
        }
    }

    /// Builder-style override for `instructions`.
    pub fn with_instructions(mut self, v: serde_json::Value) -> Self {
        self.instructions = v;
        self
    }

    /// Builder-style override for `schemas`.
    pub fn with_schemas(mut self, v: serde_json::Value) -> Self {
        self.schemas = v;
        self
    }

    /// Builder-style override for `messages`.
    pub fn with_messages(mut self, messages: Vec<ProviderMessage>) -> Self {
        self.messages = messages;
        self
    }

    /// Builder-style override for `resources`.
    pub fn with_resources(mut self, v: serde_json::Value) -> Self {
        self.resources = v;
        self
    }

    /// Builder-style override for `files`.
    pub fn with_files(mut self, v: serde_json::Value) -> Self {
        self.files = v;
        self
    }

    /// Builder-style override for `mentions`.
    pub fn with_mentions(mut self, v: serde_json::Value) -> Self {
        self.mentions = v;
        self
    }

    /// Builder-style override for `entities`.
    pub fn with_entities(mut self, v: serde_json::Value) -> Self {
        self.entities = v;
        self
    }

    /// Builder-style override for `history_summary`.
    pub fn with_history_summary(mut self, summary: impl Into<String>) -> Self {
        self.history_summary = Some(summary.into());
        self
    }

    /// Builder-style override for `last_observation`.
    pub fn with_last_observation(mut self, v: serde_json::Value) -> Self {
        self.last_observation = Some(v);
        self
    }

    /// Builder-style override for `past_observations`.
    pub fn with_past_observations(mut self, v: serde_json::Value) -> Self {
        self.past_observations = v;
        self
    }
}

/// A tool selection carried by a finalized [`PlannerDecision`] whose
/// `plan_type` is `action`.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannerAction {
    /// The tool name to invoke.
    pub name: String,
    /// The action sub-type within the tool, if the tool disambiguates
    /// by one (mirrors `ToolExecution.tool_action`).
    #[serde(rename = "type", default)]
    pub action_type: Option<String>,
    /// Arguments to pass to the tool.
    pub arguments: serde_json::Value,
}

impl PlannerAction {
    /// Build a bare tool selection with no action sub-type. Callers
    /// outside this crate cannot use struct-literal syntax
    /// (`#[non_exhaustive]`); use this plus direct field assignment for
    /// `action_type` when one applies.
    pub fn new(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            action_type: None,
            arguments,
        }
    }
}

/// The error embedded in a [`PlannerDecision`] when decoding failed.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannerError {
    /// Machine-readable error code.
    pub code: String,
    /// Human-readable detail.
    pub message: String,
}

impl PlannerError {
    /// Build a `PlannerError` from its two fields. Callers outside
    /// this crate cannot use struct-literal syntax (`#[non_exhaustive]`).
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// The planner's decoded output for one loop iteration. Streamed as a
/// sequence of partials with monotonically populated fields, followed
/// by exactly one final value.
#[non_exhaustive]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlannerDecision {
    /// Whether this iteration is still researching or is taking action.
    /// `None` on very early partials before the model has committed to
    /// one.
    pub plan_type: Option<PlanType>,
    /// Streamed reasoning trace.
    pub reasoning_message: Option<String>,
    /// Streamed assistant-facing text.
    pub assistant_message: Option<String>,
    /// Whether the planner considers the task resolved.
    pub analysis_complete: bool,
    /// The planner's final answer, populated once `analysis_complete`.
    pub final_answer: Option<String>,
    /// The selected tool action, for `plan_type = action`.
    pub action: Option<PlannerAction>,
    /// Arbitrary planner-reported metrics (token estimates, confidence).
    pub metrics: Option<serde_json::Value>,
    /// Populated instead of a normal decision when decoding failed.
    pub error: Option<PlannerError>,
}

impl PlannerDecision {
    /// Whether this decision carries validation-failure `error`, in
    /// which case the orchestrator treats it as retryable rather than
    /// a normal final decision.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Per the spec's standardized behavior: emit `decision.partial`
    /// only when this partial carries non-empty reasoning or assistant
    /// text.
    pub fn has_renderable_partial_text(&self) -> bool {
        self.reasoning_message.as_deref().is_some_and(|s| !s.is_empty())
            || self.assistant_message.as_deref().is_some_and(|s| !s.is_empty())
    }
}
