#![deny(missing_docs)]
//! Two-tier context hub: a static section primed once per run
//! (schemas, instructions, resources, uploaded files, code corpora)
//! and a warm section rebuilt every loop iteration (messages,
//! observation history, widgets, mentions/entities, queries).
//!
//! [`hub::ContextHub`] owns the cache and budget; [`ranking`] holds
//! the pure scoring functions it calls; [`compaction::SlidingWindow`]
//! is the same message-dropping strategy `compass_turn` uses for
//! full-conversation compaction, instantiated here for the warm
//! section's own budget.

mod compaction;
mod hub;
mod ranking;
mod types;

pub use compaction::SlidingWindow;
pub use hub::{ContextError, ContextHub, ContextView};
pub use ranking::{
    load_instructions, rank_failure_snippets, rank_resources, rank_schema_tables,
    rank_success_snippets, score_instruction, tokenize, INTELLIGENT_LOAD_THRESHOLD,
};
pub use types::{
    ContextSnapshot, DataSourceSchema, Entity, HistoricalStep, Instruction, LoadMode, LoadReason,
    LoadedInstruction, Mention, MetadataResource, RankedSnippet, RecentQuery, ResearchContext,
    SchemaTable, StaticSources, TokenBudget, UploadedFileSchema, WidgetSummary, DEFAULT_TOP_K,
};
