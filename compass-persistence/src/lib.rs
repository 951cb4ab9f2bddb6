#![deny(missing_docs)]
//! Persistence entities and the append-only [`PersistenceGateway`] the
//! agent loop writes through.
//!
//! Builds on `compass-blocks`' pure projector functions: this crate
//! owns the row-shaped entities (`AgentExecution`, `PlanDecision`,
//! `ToolExecution`, `ContextSnapshot`) and adapts them into the
//! projector's plain parameter structs at each write, keeping the
//! projection logic itself free of any row-type dependency.

mod error;
mod gateway;
mod model;

pub use error::PersistenceError;
pub use gateway::{InMemoryPersistence, PersistenceGateway};
pub use model::{
    AgentExecution, BlockStatus, CompletionBlock, ContextSnapshot, ExecutionStatus, PlanDecision,
    PlanType, SnapshotKind, SourceType, ToolExecution, ToolExecutionStatus,
};
