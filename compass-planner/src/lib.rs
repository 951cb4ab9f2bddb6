#![deny(missing_docs)]
//! Planner input validation, the streaming [`Planner`] trait, and an
//! incremental decision decoder.
//!
//! A planner implementation validates a [`PlannerInput`], streams
//! provider tokens through its own incremental decoder, and emits
//! [`PlannerStreamEvent::DecisionPartial`] values as fields populate,
//! finishing with exactly one [`PlannerStreamEvent::DecisionFinal`].

mod decoder;
mod planner;
mod types;
mod validation;

pub use decoder::{decode_final_payload, DecodeError, IncrementalDecisionDecoder};
pub use planner::{Planner, PlannerInvocationError, PlannerStreamEvent};
pub use types::{PlannerAction, PlannerDecision, PlannerError, PlannerInput};
pub use validation::{validate_planner_input, InputValidationError};

#[cfg(any(test, feature = "test-utils"))]
pub use planner::test_utils;
