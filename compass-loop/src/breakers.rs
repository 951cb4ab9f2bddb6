//! The two tool-level circuit breakers (§4.9): one against a tool that
//! keeps failing, one against a planner stuck repeating the same
//! successful no-op action.

use std::collections::HashMap;

use crate::config::LoopConfig;

/// Tracks per-run failure counts and recent successful-action
/// repetition, independent of the invalid-decision retry count (which
/// lives alongside it in [`crate::engine::AgentLoop`] since it isn't
/// keyed by tool name).
#[derive(Debug, Clone)]
pub struct CircuitBreakers {
    failed_tool_count: HashMap<String, u32>,
    last_successful_action: Option<String>,
    repeated_success_streak: u32,
    max_tool_failures: u32,
    max_repeated_successes: u32,
}

/// Which breaker tripped, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakerTrip {
    /// `tool_name` has now failed `count` times this run.
    ToolFailures {
        /// The tool whose failures tripped the breaker.
        tool_name: String,
        /// How many times it has failed.
        count: u32,
    },
    /// The same action has now succeeded `count` times in a row.
    RepeatedSuccess {
        /// The repeating action's signature (`tool_name:arguments`).
        action: String,
        /// How many consecutive times it has succeeded.
        count: u32,
    },
}

impl CircuitBreakers {
    /// Build breakers from a loop's configured caps.
    pub fn new(config: &LoopConfig) -> Self {
        Self {
            failed_tool_count: HashMap::new(),
            last_successful_action: None,
            repeated_success_streak: 0,
            max_tool_failures: config.max_tool_failures,
            max_repeated_successes: config.max_repeated_successes,
        }
    }

    /// Record a tool failure. Returns `Some` once that tool's failure
    /// count has reached the configured cap.
    pub fn record_tool_failure(&mut self, tool_name: &str) -> Option<BreakerTrip> {
        let count = self.failed_tool_count.entry(tool_name.to_string()).or_insert(0);
        *count += 1;
        if *count >= self.max_tool_failures {
            Some(BreakerTrip::ToolFailures {
                tool_name: tool_name.to_string(),
                count: *count,
            })
        } else {
            None
        }
    }

    /// Record a tool success, keyed on a signature identifying the
    /// action (tool name plus its arguments). Resets the failure count
    /// for that tool. Returns `Some` once the same action has
    /// succeeded consecutively at the configured cap.
    pub fn record_tool_success(&mut self, tool_name: &str, action: String) -> Option<BreakerTrip> {
        self.failed_tool_count.remove(tool_name);

        if self.last_successful_action.as_deref() == Some(action.as_str()) {
            self.repeated_success_streak += 1;
        } else {
            self.last_successful_action = Some(action.clone());
            self.repeated_success_streak = 1;
        }

        if self.repeated_success_streak >= self.max_repeated_successes {
            Some(BreakerTrip::RepeatedSuccess {
                action,
                count: self.repeated_success_streak,
            })
        } else {
            None
        }
    }
}
