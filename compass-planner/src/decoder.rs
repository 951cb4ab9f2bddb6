//! Stateful incremental decoder for planner output.
//!
//! Mirrors the shape of an SSE delta parser (accumulate per-field
//! buffers across chunks, emit a typed snapshot after each chunk)
//! generalized away from any one wire format: a planner implementation
//! feeds it named field deltas as its underlying provider streams
//! them, and reads back a strongly-typed [`PlannerDecision`] partial
//! after each one — never raw JSON.

use compass_tool::PlanType;
use serde_json::Value;

use crate::types::{PlannerAction, PlannerDecision, PlannerError};
use crate::validation::InputValidationError;

/// Decoding error for a finalized planner payload.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    /// The payload was not a JSON object.
    #[error("planner output was not a JSON object")]
    NotAnObject,
    /// A required field was missing or had the wrong type.
    #[error("invalid field `{0}`")]
    InvalidField(&'static str),
}

/// Accumulates field deltas across a single decision's stream and
/// produces monotonically-populated [`PlannerDecision`] snapshots.
#[derive(Debug, Default)]
pub struct IncrementalDecisionDecoder {
    plan_type: Option<PlanType>,
    reasoning_buf: String,
    assistant_buf: String,
}

impl IncrementalDecisionDecoder {
    /// Start a fresh decoder with empty buffers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the plan type once the model has committed to one.
    /// Idempotent: the field only ever moves from unset to set.
    pub fn set_plan_type(&mut self, plan_type: PlanType) {
        self.plan_type.get_or_insert(plan_type);
    }

    /// Append to the reasoning buffer and return the current partial
    /// snapshot.
    pub fn push_reasoning_delta(&mut self, delta: &str) -> PlannerDecision {
        self.reasoning_buf.push_str(delta);
        self.snapshot()
    }

    /// Append to the assistant-text buffer and return the current
    /// partial snapshot.
    pub fn push_assistant_delta(&mut self, delta: &str) -> PlannerDecision {
        self.assistant_buf.push_str(delta);
        self.snapshot()
    }

    /// The current partial snapshot without mutating any buffer.
    pub fn snapshot(&self) -> PlannerDecision {
        PlannerDecision {
            plan_type: self.plan_type,
            reasoning_message: none_if_empty(&self.reasoning_buf),
            assistant_message: none_if_empty(&self.assistant_buf),
            analysis_complete: false,
            final_answer: None,
            action: None,
            metrics: None,
            error: None,
        }
    }

    /// Consume the decoder and produce the final decision, filling in
    /// the fields only known once streaming has finished.
    pub fn finalize(
        self,
        analysis_complete: bool,
        final_answer: Option<String>,
        action: Option<PlannerAction>,
        metrics: Option<Value>,
    ) -> PlannerDecision {
        PlannerDecision {
            plan_type: self.plan_type,
            reasoning_message: none_if_empty(&self.reasoning_buf),
            assistant_message: none_if_empty(&self.assistant_buf),
            analysis_complete,
            final_answer,
            action,
            metrics,
            error: None,
        }
    }
}

fn none_if_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

/// Decode a complete JSON payload (e.g. a provider's tool-call
/// arguments object) into a [`PlannerDecision`], or a validation-error
/// decision if it's malformed. Never returns `Err` for malformed model
/// output — per §4.6, that's surfaced as `PlannerDecision.error` so the
/// orchestrator treats it as retryable, not fatal.
pub fn decode_final_payload(raw: &Value) -> PlannerDecision {
    match try_decode(raw) {
        Ok(decision) => decision,
        Err(e) => PlannerDecision {
            error: Some(PlannerError {
                code: "validation_error".to_string(),
                message: e.to_string(),
            }),
            ..Default::default()
        },
    }
}

fn try_decode(raw: &Value) -> Result<PlannerDecision, DecodeError> {
    let obj = raw.as_object().ok_or(DecodeError::NotAnObject)?;

    let plan_type = obj
        .get("plan_type")
        .and_then(|v| v.as_str())
        .map(|s| match s {
            "research" => Ok(PlanType::Research),
            "action" => Ok(PlanType::Action),
            _ => Err(DecodeError::InvalidField("plan_type")),
        })
        .transpose()?;

    let analysis_complete = obj
        .get("analysis_complete")
        .and_then(|v| v.as_bool())
        .ok_or(DecodeError::InvalidField("analysis_complete"))?;

    let action = match obj.get("action") {
        None | Some(Value::Null) => None,
        Some(v) => Some(serde_json::from_value::<PlannerAction>(v.clone())
            .map_err(|_| DecodeError::InvalidField("action"))?),
    };

    Ok(PlannerDecision {
        plan_type,
        reasoning_message: obj.get("reasoning_message").and_then(|v| v.as_str()).map(str::to_string),
        assistant_message: obj.get("assistant_message").and_then(|v| v.as_str()).map(str::to_string),
        analysis_complete,
        final_answer: obj.get("final_answer").and_then(|v| v.as_str()).map(str::to_string),
        action,
        metrics: obj.get("metrics").cloned(),
        error: None,
    })
}

impl From<InputValidationError> for PlannerError {
    fn from(e: InputValidationError) -> Self {
        PlannerError {
            code: "input_validation_error".to_string(),
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn partials_populate_monotonically() {
        let mut decoder = IncrementalDecisionDecoder::new();
        decoder.set_plan_type(PlanType::Research);
        let p1 = decoder.push_reasoning_delta("Looking at ");
        assert_eq!(p1.reasoning_message.as_deref(), Some("Looking at "));
        assert!(p1.assistant_message.is_none());

        let p2 = decoder.push_reasoning_delta("the schema.");
        assert_eq!(p2.reasoning_message.as_deref(), Some("Looking at the schema."));

        let p3 = decoder.push_assistant_delta("Here's what I found.");
        assert_eq!(p3.reasoning_message, p2.reasoning_message);
        assert_eq!(p3.assistant_message.as_deref(), Some("Here's what I found."));
    }

    #[test]
    fn finalize_carries_accumulated_buffers() {
        let mut decoder = IncrementalDecisionDecoder::new();
        decoder.set_plan_type(PlanType::Action);
        decoder.push_reasoning_delta("reasoning");
        let decision = decoder.finalize(true, Some("done".to_string()), None, None);
        assert_eq!(decision.plan_type, Some(PlanType::Action));
        assert_eq!(decision.reasoning_message.as_deref(), Some("reasoning"));
        assert!(decision.analysis_complete);
        assert_eq!(decision.final_answer.as_deref(), Some("done"));
    }

    #[test]
    fn decode_final_payload_parses_well_formed_action_decision() {
        let raw = json!({
            "plan_type": "action",
            "analysis_complete": false,
            "reasoning_message": "need to create a widget",
            "action": {"name": "create_widget", "arguments": {"data_model": "revenue_by_month"}},
        });
        let decision = decode_final_payload(&raw);
        assert!(!decision.is_error());
        assert_eq!(decision.plan_type, Some(PlanType::Action));
        assert_eq!(decision.action.unwrap().name, "create_widget");
    }

    #[test]
    fn decode_final_payload_surfaces_malformed_output_as_error() {
        let raw = json!({"plan_type": "not_a_real_type", "analysis_complete": true});
        let decision = decode_final_payload(&raw);
        assert!(decision.is_error());
        assert_eq!(decision.error.unwrap().code, "validation_error");
    }

    #[test]
    fn decode_final_payload_requires_analysis_complete() {
        let raw = json!({"plan_type": "research"});
        let decision = decode_final_payload(&raw);
        assert!(decision.is_error());
    }
}
