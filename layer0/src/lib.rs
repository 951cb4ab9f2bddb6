//! # layer0 — Protocol traits for composable agentic AI systems
//!
//! This crate defines the protocol boundaries and cross-cutting
//! interfaces that compose to form an agentic AI orchestration core.
//!
//! ## The Protocols
//!
//! | Protocol | Trait | What it does |
//! |----------|-------|-------------|
//! | ① Operator | [`Operator`] | What one agent does per cycle |
//! | ② State | [`StateStore`] | How data persists across turns |
//!
//! ## The Interfaces
//!
//! | Interface | Types | What it does |
//! |-----------|-------|-------------|
//! | ③ Hooks | [`Hook`], [`HookPoint`], [`HookAction`] | Observation + intervention |
//! | ④ Lifecycle | [`BudgetEvent`], [`CompactionEvent`] | Cross-layer coordination |
//! | ⑤ Effects | [`Effect`], [`Scope`] | Side-effects declared, not executed, by an operator |
//!
//! ## Design Principle
//!
//! Every protocol trait is operation-defined, not mechanism-defined.
//! [`Turn::execute`] means "cause this agent to process one cycle" —
//! not "make an API call" or "run a subprocess." This is what makes
//! implementations swappable: a Temporal workflow, a function call,
//! and a future system that doesn't exist yet all implement the same trait.
//!
//! ## Companion Documents
//!
//! - Agentic Decision Map: enumerates all 23 architectural decisions
//! - Composable Agentic Architecture: the 4+2 protocol boundary design
//!
//! ## Dependency Notes
//!
//! This crate depends on `serde_json::Value` for extension data fields
//! (metadata, tool inputs, custom payloads). This is an intentional choice:
//! JSON is the universal interchange format for agentic systems, and
//! `serde_json::Value` is the de facto standard in the Rust ecosystem.
//! The alternative (generic `T: Serialize`) would complicate trait object
//! safety without practical benefit.
//!
//! ## Future: Native Async Traits
//!
//! Protocol traits currently use `async-trait` (heap-allocated futures).
//! When Rust stabilizes `async fn in dyn Trait` with `Send` bounds,
//! these traits will migrate to native async. This will be a breaking
//! change in a minor version bump before v1.0.

#![deny(missing_docs)]

pub mod content;
pub mod duration;
pub mod effect;
pub mod error;
pub mod hook;
pub mod id;
pub mod lifecycle;
pub mod operator;
pub mod state;

#[cfg(feature = "test-utils")]
pub mod test_utils;

// Re-exports for convenience
pub use content::{Content, ContentBlock};
pub use duration::DurationMs;
pub use effect::{Effect, LogLevel, Scope, SignalPayload};
pub use error::{HookError, OperatorError, StateError};
pub use hook::{Hook, HookAction, HookContext, HookPoint};
pub use id::{AgentId, ScopeId, SessionId, WorkflowId};
pub use lifecycle::{BudgetEvent, CompactionEvent, ObservableEvent};
pub use operator::{
    ExitReason, Operator, OperatorConfig, OperatorInput, OperatorMetadata, OperatorOutput,
    ToolCallRecord, TriggerType,
};
pub use state::{SearchResult, StateReader, StateStore};
