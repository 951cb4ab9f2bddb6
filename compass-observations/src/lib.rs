#![deny(missing_docs)]
//! Accumulates tool [`Observation`]s across an agent execution's loop
//! iterations and renders them for inclusion in the next planner call.
//!
//! An observation is appended unless the owning tool's
//! [`compass_tool::ObservationPolicy`] is `Never`. `execution_number` is
//! assigned monotonically starting at 1, independent of loop index or
//! `seq` — it numbers observations, not decisions.

use compass_tool::{Observation, ObservationPolicy};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// One accumulated observation: the tool call that produced it plus
/// its normalized outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservationEntry {
    /// Monotonically increasing position in this accumulator, 1-based.
    pub execution_number: u64,
    /// Name of the tool that produced this observation.
    pub tool_name: String,
    /// The input the tool was invoked with.
    pub tool_input: serde_json::Value,
    /// When the observation was recorded, in epoch milliseconds.
    pub timestamp: i64,
    /// The normalized observation.
    pub observation: Observation,
}

/// Append-only history of tool observations for one agent execution.
#[derive(Debug, Default)]
pub struct ObservationAccumulator {
    entries: Vec<ObservationEntry>,
    next_execution_number: u64,
}

impl ObservationAccumulator {
    /// Create an empty accumulator.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_execution_number: 1,
        }
    }

    /// Record a tool's outcome, unless `policy` says never to.
    /// `policy` should come from the invoking tool's descriptor. Returns
    /// the assigned `execution_number`, or `None` if suppressed.
    ///
    /// `on_trigger` is honored by checking `observation.analysis_complete`
    /// or the presence of an error as the trigger condition — a tool
    /// marked `on_trigger` without either is treated as not having
    /// triggered and is not recorded.
    pub fn add_tool_observation(
        &mut self,
        tool_name: impl Into<String>,
        tool_input: serde_json::Value,
        observation: Observation,
        policy: ObservationPolicy,
        timestamp: i64,
    ) -> Option<u64> {
        let should_record = match policy {
            ObservationPolicy::Never => false,
            ObservationPolicy::OnSuccess => !observation.is_error(),
            ObservationPolicy::OnTrigger => {
                observation.is_error() || observation.analysis_complete.unwrap_or(false)
            }
        };
        if !should_record {
            return None;
        }

        let execution_number = self.next_execution_number;
        self.next_execution_number += 1;
        self.entries.push(ObservationEntry {
            execution_number,
            tool_name: tool_name.into(),
            tool_input,
            timestamp,
            observation,
        });
        Some(execution_number)
    }

    /// The most recently recorded observation, if any.
    pub fn latest(&self) -> Option<&ObservationEntry> {
        self.entries.last()
    }

    /// The full recorded history, oldest first.
    pub fn history(&self) -> &[ObservationEntry] {
        &self.entries
    }

    /// Serialize the full history for inclusion in the planner's
    /// `past_observations` field.
    pub fn to_dict(&self) -> serde_json::Value {
        json!(self.entries)
    }

    /// Render a prompt-ready view of the history: the last `max`
    /// observations, each reduced to `{execution_number, tool_name,
    /// summary}` when `format_for_prompt` is true, or the full entry
    /// otherwise.
    pub fn build_context(&self, format_for_prompt: bool, max: usize) -> serde_json::Value {
        let start = self.entries.len().saturating_sub(max);
        let window = &self.entries[start..];

        if format_for_prompt {
            json!(window
                .iter()
                .map(|e| json!({
                    "execution_number": e.execution_number,
                    "tool_name": e.tool_name,
                    "summary": e.observation.summary,
                }))
                .collect::<Vec<_>>())
        } else {
            json!(window)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn on_success_suppresses_failed_observations() {
        let mut acc = ObservationAccumulator::new();
        let result = acc.add_tool_observation(
            "list_tables",
            json!({}),
            Observation::failed("failed", "execution_failure", "boom"),
            ObservationPolicy::OnSuccess,
            1000,
        );
        assert!(result.is_none());
        assert!(acc.history().is_empty());
    }

    #[test]
    fn never_policy_never_records() {
        let mut acc = ObservationAccumulator::new();
        let result = acc.add_tool_observation(
            "silent_tool",
            json!({}),
            Observation::new("ok"),
            ObservationPolicy::Never,
            1000,
        );
        assert!(result.is_none());
    }

    #[test]
    fn execution_number_is_monotonic() {
        let mut acc = ObservationAccumulator::new();
        let n1 = acc
            .add_tool_observation(
                "a",
                json!({}),
                Observation::new("first"),
                ObservationPolicy::OnSuccess,
                1000,
            )
            .unwrap();
        let n2 = acc
            .add_tool_observation(
                "b",
                json!({}),
                Observation::new("second"),
                ObservationPolicy::OnSuccess,
                2000,
            )
            .unwrap();
        assert_eq!(n1, 1);
        assert_eq!(n2, 2);
    }

    #[test]
    fn build_context_windows_to_max_and_formats_for_prompt() {
        let mut acc = ObservationAccumulator::new();
        for i in 0..10 {
            acc.add_tool_observation(
                format!("tool_{i}"),
                json!({}),
                Observation::new(format!("summary {i}")),
                ObservationPolicy::OnSuccess,
                1000 + i,
            );
        }
        let ctx = acc.build_context(true, 5);
        let arr = ctx.as_array().unwrap();
        assert_eq!(arr.len(), 5);
        assert_eq!(arr[0]["tool_name"], "tool_5");
        assert_eq!(arr[4]["summary"], "summary 9");
        assert!(arr[0].get("tool_input").is_none());
    }

    #[test]
    fn on_trigger_records_only_when_error_or_analysis_complete() {
        let mut acc = ObservationAccumulator::new();
        assert!(acc
            .add_tool_observation(
                "clarify",
                json!({}),
                Observation::new("no-op"),
                ObservationPolicy::OnTrigger,
                1000,
            )
            .is_none());

        let mut triggering = Observation::new("resolved");
        triggering.analysis_complete = Some(true);
        assert!(acc
            .add_tool_observation("clarify", json!({}), triggering, ObservationPolicy::OnTrigger, 2000)
            .is_some());
    }
}
