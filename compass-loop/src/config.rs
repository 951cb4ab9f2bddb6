//! Static configuration for an [`crate::AgentLoop`] instance.

/// Tunables for the plan-act-observe loop, shared across every run an
/// [`crate::AgentLoop`] executes. Per-run overrides (a caller-supplied
/// step limit, say) are applied on top of these via
/// [`crate::RunRequest`], mirroring how `layer0::OperatorConfig`
/// overrides an operator's own defaults.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Maximum loop iterations before the run is cut off with
    /// `ExitReason::MaxTurns`.
    pub step_limit: u32,
    /// How many consecutive invalid-planner-output or missing-action
    /// retries are tolerated before the run fails.
    pub max_invalid_retries: u32,
    /// How many failures of the *same* tool name are tolerated before
    /// the circuit breaker trips the run.
    pub max_tool_failures: u32,
    /// How many consecutive successful invocations of the *same* tool
    /// action are tolerated before the circuit breaker trips the run
    /// (catches a planner stuck repeating a no-op action).
    pub max_repeated_successes: u32,
    /// How many entries of observation history are rendered into the
    /// planner's `past_observations` field each iteration.
    pub observation_window: usize,
    /// External platform string passed through to the planner when the
    /// run request doesn't override it.
    pub default_external_platform: String,
    /// Operating mode string passed through to the planner when the run
    /// request doesn't override it.
    pub default_mode: String,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            step_limit: 10,
            max_invalid_retries: 2,
            max_tool_failures: 3,
            max_repeated_successes: 2,
            observation_window: 20,
            default_external_platform: "api".to_string(),
            default_mode: "analytics".to_string(),
        }
    }
}
