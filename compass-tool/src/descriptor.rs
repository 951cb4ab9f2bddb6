//! Tool metadata: catalog membership, retry/timeout defaults, and the
//! policy that governs whether an observation is recorded.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Whether a tool reads state (`research`) or changes it (`action`).
/// A plan's `action` field may only name a tool whose category permits
/// the plan's own `plan_type`.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanType {
    /// Read-only investigation: the planner is still gathering context.
    Research,
    /// State-changing: the planner is taking an action.
    Action,
}

impl fmt::Display for PlanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanType::Research => write!(f, "research"),
            PlanType::Action => write!(f, "action"),
        }
    }
}

/// Which plan types a tool's catalog entry is visible under.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    /// Visible only when `plan_type = research`.
    Research,
    /// Visible only when `plan_type = action`.
    Action,
    /// Visible under both plan types.
    Both,
}

impl ToolCategory {
    /// Whether this category permits use under the given plan type.
    pub fn permits(&self, plan_type: PlanType) -> bool {
        match self {
            ToolCategory::Both => true,
            ToolCategory::Research => plan_type == PlanType::Research,
            ToolCategory::Action => plan_type == PlanType::Action,
        }
    }
}

/// When a tool's outcome is appended to the observation history.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationPolicy {
    /// Only record an observation when the tool explicitly requests it
    /// (via a trigger embedded in its output).
    OnTrigger,
    /// Only record an observation when the tool execution succeeded.
    OnSuccess,
    /// Never record an observation for this tool, success or failure.
    Never,
}

/// Everything the planner's catalog and the runtime's policies need to
/// know about a registered tool, independent of its implementation.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Unique tool name, stable across versions.
    pub name: String,
    /// Human-readable description shown to the planner.
    pub description: String,
    /// Semver-ish version string for the tool's contract.
    pub version: String,
    /// JSON Schema for the tool's input.
    pub input_schema: serde_json::Value,
    /// JSON Schema for the tool's output, if structured.
    pub output_schema: Option<serde_json::Value>,
    /// Catalog visibility.
    pub category: ToolCategory,
    /// Maximum retry attempts the runtime will allow (may be overridden
    /// by a narrower [`crate::RetryPolicy`] at call time).
    pub max_retries: u32,
    /// Timeout, in seconds, applied as the tool's hard wall-clock bound.
    pub timeout_seconds: u64,
    /// Whether repeated invocation with the same input is safe, i.e.
    /// whether a failed attempt may be retried even when the error
    /// wasn't independently classified as retryable.
    pub idempotent: bool,
    /// Permission strings the caller must hold to invoke this tool.
    pub required_permissions: Vec<String>,
    /// Free-form tags for catalog search/filtering.
    pub tags: Vec<String>,
    /// External platform modes this tool is available under (empty means
    /// all modes).
    pub allowed_modes: Vec<String>,
    /// Observation recording policy.
    pub observation_policy: ObservationPolicy,
}

impl ToolDescriptor {
    /// Build a descriptor with the common defaults: no output schema, 2
    /// retries, a 30s timeout, not idempotent, no permission/tag/mode
    /// restrictions, and `observation_policy = on_success`.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        category: ToolCategory,
        input_schema: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            version: "1".to_string(),
            input_schema,
            output_schema: None,
            category,
            max_retries: 2,
            timeout_seconds: 30,
            idempotent: false,
            required_permissions: Vec::new(),
            tags: Vec::new(),
            allowed_modes: Vec::new(),
            observation_policy: ObservationPolicy::OnSuccess,
        }
    }

    /// Builder-style override for `max_retries`.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Builder-style override for `timeout_seconds`.
    pub fn with_timeout_seconds(mut self, timeout_seconds: u64) -> Self {
        self.timeout_seconds = timeout_seconds;
        self
    }

    /// Builder-style override for `idempotent`.
    pub fn idempotent(mut self, idempotent: bool) -> Self {
        self.idempotent = idempotent;
        self
    }

    /// Builder-style override for `observation_policy`.
    pub fn with_observation_policy(mut self, policy: ObservationPolicy) -> Self {
        self.observation_policy = policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn both_category_permits_either_plan_type() {
        assert!(ToolCategory::Both.permits(PlanType::Research));
        assert!(ToolCategory::Both.permits(PlanType::Action));
    }

    #[test]
    fn narrow_category_rejects_other_plan_type() {
        assert!(ToolCategory::Research.permits(PlanType::Research));
        assert!(!ToolCategory::Research.permits(PlanType::Action));
        assert!(ToolCategory::Action.permits(PlanType::Action));
        assert!(!ToolCategory::Action.permits(PlanType::Research));
    }

    #[test]
    fn descriptor_defaults() {
        let d = ToolDescriptor::new("answer_question", "answer directly", ToolCategory::Action, json!({}));
        assert_eq!(d.max_retries, 2);
        assert_eq!(d.timeout_seconds, 30);
        assert!(!d.idempotent);
        assert_eq!(d.observation_policy, ObservationPolicy::OnSuccess);
    }
}
