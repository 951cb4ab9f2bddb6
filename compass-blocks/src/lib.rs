#![deny(missing_docs)]
//! Projects plan decisions and tool executions into render-ready
//! [`CompletionBlock`] rows and rebuilds the user-visible transcript
//! from them.
//!
//! Deliberately decoupled from `compass-tool` and `compass-persistence`:
//! every function here takes plain parameters rather than those crates'
//! row types, so the projection stays a pure, dependency-free function
//! of its inputs (callers adapt their own entities at the call site).

mod block;
mod projector;

pub use block::{BlockStatus, CompletionBlock, SourceType};
pub use projector::{
    mark_error_on_latest_block, mark_in_progress_blocks_stopped, rebuild_completion_from_blocks,
    upsert_block_for_decision, upsert_block_for_tool, DecisionBlockInput, ProjectorError,
    RebuiltCompletion, ToolBlockInput, ToolOutcome,
};
