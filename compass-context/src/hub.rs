//! The [`ContextHub`]: primes a static cache once per run, rebuilds a
//! warm section each loop iteration, and renders both into a
//! [`ContextSnapshot`] under a token budget.

use serde_json::json;

use crate::compaction::SlidingWindow;
use crate::ranking::{
    load_instructions, rank_failure_snippets, rank_resources, rank_schema_tables,
    rank_success_snippets, DEFAULT_TOP_K,
};
use crate::types::{
    ContextSnapshot, LoadedInstruction, ResearchContext, StaticSources, TokenBudget,
    UploadedFileSchema,
};
use compass_turn::context::ContextStrategy;

/// Errors raised by the context hub.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ContextError {
    /// `build_context`/`get_view` called before `prime`.
    #[error("context hub has not been primed for this run")]
    NotPrimed,
}

/// The static section, rendered once and cached.
#[derive(Debug, Clone, Default)]
struct StaticCache {
    schemas: serde_json::Value,
    instructions: Vec<LoadedInstruction>,
    resources: serde_json::Value,
    files: Vec<UploadedFileSchema>,
}

/// A read-only view over the hub's last-built sections, with render
/// helpers for assembling a prompt.
#[derive(Debug, Clone, Default)]
pub struct ContextView {
    /// The last-built snapshot.
    pub snapshot: ContextSnapshot,
}

impl ContextView {
    /// Render the static section (schemas, instructions, resources,
    /// files) as a single prompt-ready string.
    pub fn render_static(&self) -> String {
        let mut out = String::new();
        if !self.snapshot.instructions.is_empty() {
            out.push_str("# Instructions\n");
            for inst in &self.snapshot.instructions {
                out.push_str(&format!("- ({}) {}\n", inst.reason, inst.text));
            }
        }
        if self.snapshot.schemas != serde_json::Value::Null {
            out.push_str("\n# Schemas\n");
            out.push_str(&self.snapshot.schemas.to_string());
            out.push('\n');
        }
        if self.snapshot.resources != serde_json::Value::Null {
            out.push_str("\n# Resources\n");
            out.push_str(&self.snapshot.resources.to_string());
            out.push('\n');
        }
        out
    }

    /// Render the warm section (messages summary, widgets, mentions,
    /// entities, queries) as a prompt-ready string.
    pub fn render_warm(&self) -> String {
        format!(
            "# Conversation\n{} messages\n\n# Widgets\n{}\n\n# Mentions\n{}\n\n# Entities\n{}\n\n# Recent queries\n{}\n",
            self.snapshot.messages.len(),
            self.snapshot
                .widgets
                .iter()
                .map(|w| w.title.as_str())
                .collect::<Vec<_>>()
                .join(", "),
            self.snapshot
                .mentions
                .iter()
                .map(|m| m.raw_text.as_str())
                .collect::<Vec<_>>()
                .join(", "),
            self.snapshot
                .entities
                .iter()
                .map(|e| format!("{}={}", e.label, e.value))
                .collect::<Vec<_>>()
                .join(", "),
            self.snapshot
                .queries
                .iter()
                .map(|q| q.text.as_str())
                .collect::<Vec<_>>()
                .join(", "),
        )
    }
}

/// Two-tier context builder: a static section primed once per run from
/// schemas/instructions/resources/files/code corpora, and a warm
/// section rebuilt from a fresh [`ResearchContext`] on every
/// iteration.
pub struct ContextHub {
    budget: TokenBudget,
    top_k: usize,
    message_compactor: SlidingWindow,
    static_sources: Option<StaticSources>,
    static_cache: Option<StaticCache>,
    last_view: Option<ContextView>,
}

impl ContextHub {
    /// Create an unprimed hub with the default budget and Top-K.
    pub fn new() -> Self {
        Self {
            budget: TokenBudget::default(),
            top_k: DEFAULT_TOP_K,
            message_compactor: SlidingWindow::new(),
            static_sources: None,
            static_cache: None,
            last_view: None,
        }
    }

    /// Override the default token budget.
    pub fn with_budget(mut self, budget: TokenBudget) -> Self {
        self.budget = budget;
        self
    }

    /// Override the default Top-K cut for ranked sections.
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    /// Prime the static section for a run: rank schemas and resources,
    /// load instructions against the initial user query, and cache the
    /// rendered result. Idempotent — call again (e.g. after a
    /// mid-run correction) to re-prime.
    pub fn prime(&mut self, sources: StaticSources, user_query: &str) {
        let schemas_value: serde_json::Value = sources
            .schemas
            .iter()
            .map(|source| {
                let ranked = rank_schema_tables(source, self.top_k);
                json!({
                    "source_id": source.source_id,
                    "name": source.name,
                    "ranked": source.has_stats,
                    "tables": ranked.iter().map(|t| json!({
                        "name": t.name,
                        "columns": t.columns,
                    })).collect::<Vec<_>>(),
                    "index": source.tables.iter().map(|t| t.name.clone()).collect::<Vec<_>>(),
                })
            })
            .collect();

        let instructions = load_instructions(&sources.instructions, user_query, self.top_k);

        let ranked_resources = rank_resources(&sources.resources, self.top_k);
        let resources_value = json!({
            "top": ranked_resources.iter().map(|r| json!({
                "id": r.id,
                "name": r.name,
                "body": r.body,
            })).collect::<Vec<_>>(),
            "index": sources.resources.iter().map(|r| json!({
                "id": r.id,
                "name": r.name,
                "summary": r.index_summary,
            })).collect::<Vec<_>>(),
        });

        let files = sources.files.clone();

        self.static_cache = Some(StaticCache {
            schemas: schemas_value,
            instructions,
            resources: resources_value,
            files,
        });
        self.static_sources = Some(sources);
    }

    /// Build a fully rendered [`ContextSnapshot`] for this loop
    /// iteration, combining the cached static section with a freshly
    /// computed warm section, truncated under the configured budget.
    pub fn build_context(
        &mut self,
        user_query: &str,
        research: ResearchContext,
        loop_index: u32,
    ) -> Result<ContextSnapshot, ContextError> {
        let static_cache = self.static_cache.clone().ok_or(ContextError::NotPrimed)?;
        let corpus = self
            .static_sources
            .as_ref()
            .map(|s| s.code_corpus.clone())
            .unwrap_or_default();

        let messages = if self
            .message_compactor
            .should_compact(&research.messages, self.budget.warm_tokens)
        {
            self.message_compactor.compact(research.messages)
        } else {
            research.messages
        };

        let (success_snippets, failure_snippets) = match &research.candidate_data_model_columns {
            Some(columns) => (
                rank_success_snippets(&corpus, columns, self.top_k),
                rank_failure_snippets(&corpus, columns, self.top_k),
            ),
            None => (Vec::new(), Vec::new()),
        };

        let estimated_tokens = self.message_compactor.token_estimate(&messages)
            + static_cache.schemas.to_string().len() / 4
            + static_cache.resources.to_string().len() / 4;

        let snapshot = ContextSnapshot {
            user_query: user_query.to_string(),
            loop_index,
            schemas: static_cache.schemas,
            instructions: static_cache.instructions,
            resources: static_cache.resources,
            files: static_cache.files,
            success_snippets,
            failure_snippets,
            messages,
            observation_history: research.observation_history,
            widgets: research.widgets,
            mentions: research.mentions,
            entities: research.entities,
            queries: research.queries,
            estimated_tokens,
        };

        self.last_view = Some(ContextView {
            snapshot: snapshot.clone(),
        });
        Ok(snapshot)
    }

    /// The view built by the most recent [`ContextHub::build_context`]
    /// call.
    pub fn get_view(&self) -> Result<ContextView, ContextError> {
        self.last_view.clone().ok_or(ContextError::NotPrimed)
    }
}

impl Default for ContextHub {
    fn default() -> Self {
        Self::new()
    }
}
