#![deny(missing_docs)]
//! Provider and context-window primitives shared by the operator
//! implementations in this workspace.
//!
//! This crate owns the non-object-safe [`Provider`] trait (model calls
//! via RPITIT), the wire types exchanged with a provider, and the
//! [`ContextStrategy`] abstraction for context-window management. The
//! object-safe `layer0::Operator` boundary sits above it; operators
//! generic over `P: Provider` adapt to `Operator` via `#[async_trait]`.
//!
//! Key traits defined here:
//! - [`Provider`] — LLM provider interface (not object-safe, uses RPITIT)
//! - [`ContextStrategy`] — context window management

pub mod config;
pub mod context;
pub mod convert;
pub mod provider;
pub mod types;

// Re-exports
pub use config::NeuronTurnConfig;
pub use context::{ContextStrategy, NoCompaction};
pub use convert::{
    content_block_to_part, content_part_to_block, content_to_parts, content_to_user_message,
    parts_to_content,
};
pub use provider::{Provider, ProviderError};
pub use types::*;
