//! The [`Planner`] trait: validate, stream, decode.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc::Sender;

use crate::types::{PlannerDecision, PlannerInput};
use crate::validation::InputValidationError;

/// Errors from a planner invocation that aren't carried as a decision
/// payload (i.e. the provider call itself failed, as opposed to the
/// provider returning malformed JSON, which is `PlannerDecision.error`).
#[derive(Debug, Error)]
pub enum PlannerInvocationError {
    /// `PlannerInput` failed validation before the call was made.
    #[error(transparent)]
    InvalidInput(#[from] InputValidationError),
    /// The underlying provider call failed (network, auth, rate limit).
    #[error("provider call failed: {0}")]
    ProviderFailed(String),
}

/// A single frame in a planner's output stream.
#[derive(Debug, Clone)]
pub enum PlannerStreamEvent {
    /// Raw provider tokens, ignored by the orchestrator but useful for
    /// a planner implementation's own logging/telemetry.
    Tokens {
        /// The raw text chunk.
        text: String,
    },
    /// A validated partial decision.
    DecisionPartial(PlannerDecision),
    /// The validated final decision for this iteration.
    DecisionFinal(PlannerDecision),
}

/// Streams a decoded [`PlannerDecision`] from an LLM given a validated
/// [`PlannerInput`].
///
/// Implementations own their own incremental decoding (see
/// [`crate::decoder::IncrementalDecisionDecoder`]) so callers never see
/// raw provider JSON — only typed partials and a single final value.
#[async_trait]
pub trait Planner: Send + Sync {
    /// Validate `input`, then stream decision events to `events` until
    /// exactly one `DecisionFinal` has been sent.
    async fn stream(
        &self,
        input: PlannerInput,
        events: Sender<PlannerStreamEvent>,
    ) -> Result<(), PlannerInvocationError>;
}

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// A deterministic [`Planner`] test double that replays a fixed
    /// script of final decisions, one per call, looping on the last
    /// entry once exhausted. Used to drive the agent loop in tests
    /// without a real LLM.
    pub struct ScriptedPlanner {
        script: Vec<PlannerDecision>,
        call_count: AtomicUsize,
    }

    impl ScriptedPlanner {
        /// Build a planner that replays `script` in order.
        pub fn new(script: Vec<PlannerDecision>) -> Self {
            Self {
                script,
                call_count: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Planner for ScriptedPlanner {
        async fn stream(
            &self,
            input: PlannerInput,
            events: Sender<PlannerStreamEvent>,
        ) -> Result<(), PlannerInvocationError> {
            crate::validate_planner_input(&input)?;
            let idx = self.call_count.fetch_add(1, Ordering::SeqCst);
            let decision = self
                .script
                .get(idx)
                .or_else(|| self.script.last())
                .cloned()
                .unwrap_or_default();
            let _ = events
                .send(PlannerStreamEvent::DecisionFinal(decision))
                .await;
            Ok(())
        }
    }
}
