#![deny(missing_docs)]
//! The agent loop (§4.9): plan → act → observe, wired from the tool
//! registry, planner adapter, event bus, and persistence gateway.
//!
//! [`AgentLoop`] is the orchestration core's heart — it drives a
//! [`RunRequest`] through bounded loop iterations, dispatching hooks at
//! the same points `compass_op_single_shot` and the teacher's own ReAct
//! operator do, applying the circuit breakers and retry caps in
//! [`breakers`] and [`config`], and folding every recoverable failure
//! into a terminal [`compass_persistence::ExecutionStatus`] rather than
//! propagating it.

pub mod breakers;
pub mod config;
pub mod engine;
pub mod error;

pub use config::LoopConfig;
pub use engine::{
    AgentLoop, DraftInstructionSink, InstructionSuggester, LoopOutcome, NoopDraftInstructionSink,
    NoopInstructionSuggester, RunRequest, SuggestionTrigger,
};
pub use error::LoopError;
