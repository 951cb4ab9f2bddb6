#![deny(missing_docs)]
//! # compass — umbrella crate
//!
//! Single import surface for the agent orchestration core: the
//! plan→act→observe loop, the context hub, the tool runtime, and the
//! event/block projection layer described in `SPEC_FULL.md`. Re-exports
//! each collaborator crate behind a feature flag, plus a `prelude` for
//! the happy path of wiring up an [`compass_loop::AgentLoop`].

#[cfg(feature = "core")]
pub use layer0;
#[cfg(feature = "core")]
pub use compass_blocks;
#[cfg(feature = "core")]
pub use compass_context;
#[cfg(feature = "core")]
pub use compass_events;
#[cfg(feature = "hooks")]
pub use compass_hooks;
#[cfg(feature = "agent-loop")]
pub use compass_loop;
#[cfg(feature = "core")]
pub use compass_observations;
#[cfg(feature = "op-single-shot")]
pub use compass_op_single_shot;
#[cfg(feature = "core")]
pub use compass_persistence;
#[cfg(feature = "core")]
pub use compass_planner;
#[cfg(feature = "state-memory")]
pub use compass_state_memory;
#[cfg(feature = "core")]
pub use compass_streamer;
#[cfg(feature = "core")]
pub use compass_tool;
#[cfg(feature = "core")]
pub use compass_turn;

/// Happy-path imports for wiring up an orchestration run.
pub mod prelude {
    #[cfg(feature = "core")]
    pub use layer0::{
        AgentId, Content, ContentBlock, Effect, Environment, Hook, HookAction, HookContext,
        HookPoint, Scope, SessionId, StateReader, StateStore, WorkflowId,
    };

    #[cfg(feature = "hooks")]
    pub use compass_hooks::HookRegistry;

    #[cfg(feature = "core")]
    pub use compass_tool::{PlanType, Tool, ToolDyn, ToolError, ToolRegistry};

    #[cfg(feature = "core")]
    pub use compass_turn::provider::{Provider, ProviderError};

    #[cfg(feature = "core")]
    pub use compass_context::{ContextHub, ContextView, StaticSources};

    #[cfg(feature = "core")]
    pub use compass_planner::{Planner, PlannerDecision, PlannerInput};

    #[cfg(feature = "core")]
    pub use compass_events::EventBus;

    #[cfg(feature = "core")]
    pub use compass_persistence::{InMemoryPersistence, PersistenceGateway};

    #[cfg(feature = "agent-loop")]
    pub use compass_loop::{AgentLoop, LoopConfig, LoopOutcome, RunRequest};

    #[cfg(feature = "op-single-shot")]
    pub use compass_op_single_shot::SingleShotOperator;

    #[cfg(feature = "state-memory")]
    pub use compass_state_memory::MemoryStore;
}
