//! Plain data shapes for the context hub's static and warm sections.

use compass_turn::types::ProviderMessage;
use serde::{Deserialize, Serialize};

/// A single table within a data source's schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaTable {
    /// Table name.
    pub name: String,
    /// Column definitions, rendered verbatim when a table is selected.
    pub columns: Vec<String>,
    /// Days since this table was last referenced by a successful query.
    pub age_days: f64,
    /// How many times a query against this table succeeded.
    pub success_count: u64,
    /// How many times a query against this table failed.
    pub failure_count: u64,
    /// Weighted feedback signal in `[-1, 1]`, thumbs-up/down aggregated.
    pub feedback_signal: f64,
    /// Foreign-key fan-in/out, normalized to `[0, 1]`.
    pub centrality: f64,
    /// Column-count richness, normalized to `[0, 1]`.
    pub richness: f64,
    /// Whether the table looks like an entity table (has a singular
    /// name and a primary key column), vs. a join/fact table.
    pub entity_like: bool,
}

impl SchemaTable {
    fn weighted_usage(&self) -> f64 {
        self.success_count as f64 + 0.5 * self.failure_count as f64
    }

    fn success_rate(&self) -> f64 {
        let total = self.success_count + self.failure_count;
        if total == 0 {
            0.5
        } else {
            self.success_count as f64 / total as f64
        }
    }

    /// Recency decay, `exp(-age_days/14)`.
    pub fn recency(&self) -> f64 {
        (-self.age_days / 14.0).exp()
    }

    fn structural(&self) -> f64 {
        self.centrality + self.richness + if self.entity_like { 0.5 } else { 0.0 }
    }

    /// The schema-ranking score (§4.4): `0.35·(√weighted_usage ·
    /// recency) + 0.25·success_rate + 0.2·feedback_signal +
    /// 0.2·structural − 0.2·√failures`.
    pub fn rank_score(&self) -> f64 {
        0.35 * (self.weighted_usage().sqrt() * self.recency())
            + 0.25 * self.success_rate()
            + 0.2 * self.feedback_signal
            + 0.2 * self.structural()
            - 0.2 * (self.failure_count as f64).sqrt()
    }
}

/// One data source's schema, as seen by the context hub.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSourceSchema {
    /// Data source id.
    pub source_id: String,
    /// Human-readable name.
    pub name: String,
    /// Tables belonging to this source.
    pub tables: Vec<SchemaTable>,
    /// Whether usage statistics exist for this source's tables. When
    /// false, the schema renders flat (every table, no ranking) rather
    /// than a Top-K cut — there's nothing to rank on yet.
    pub has_stats: bool,
}

/// When an instruction is injected into the static section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadMode {
    /// Always included, regardless of the query.
    Always,
    /// Included only if it scores above the intelligent-loading
    /// threshold against the user query.
    Intelligent,
}

/// A standing instruction available to be loaded into the static
/// section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instruction {
    /// Instruction id.
    pub id: String,
    /// The instruction body.
    pub text: String,
    /// How this instruction is selected for loading.
    pub load_mode: LoadMode,
}

/// Why an instruction was loaded, and by what margin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LoadReason {
    /// `load_mode = always`.
    Always,
    /// `load_mode = intelligent`, matched the query with this score.
    SearchMatch(f64),
}

impl std::fmt::Display for LoadReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadReason::Always => write!(f, "always"),
            LoadReason::SearchMatch(score) => write!(f, "search_match:{score:.3}"),
        }
    }
}

/// An instruction selected for loading, with its reason.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadedInstruction {
    /// The instruction that was loaded.
    pub instruction_id: String,
    /// Its text.
    pub text: String,
    /// Why it was loaded.
    pub reason: LoadReason,
}

/// A repository or document resource, ranked like schema tables but
/// scored purely on recency + usage (no structural signal — resources
/// have no foreign keys).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataResource {
    /// Resource id.
    pub id: String,
    /// Human-readable name, e.g. a repo path.
    pub name: String,
    /// Short indexed summary, always shown even when the full body
    /// isn't selected into the Top-K.
    pub index_summary: String,
    /// Full body, only rendered for Top-K members.
    pub body: String,
    /// Times referenced.
    pub usage_count: u64,
    /// Days since last referenced.
    pub age_days: f64,
}

impl MetadataResource {
    /// Recency-weighted usage score used to rank resources for Top-K
    /// selection.
    pub fn rank_score(&self) -> f64 {
        (self.usage_count as f64 + 1.0).ln() * (-self.age_days / 14.0).exp()
    }
}

/// The inferred schema of a user-uploaded file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadedFileSchema {
    /// File id.
    pub file_id: String,
    /// Original filename.
    pub filename: String,
    /// Column/field names detected in the file.
    pub columns: Vec<String>,
}

/// A historical step that produced a reusable code snippet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoricalStep {
    /// Step id.
    pub step_id: String,
    /// The target data model this snippet was generated against.
    pub data_model: String,
    /// Column names the generated code referenced.
    pub columns: Vec<String>,
    /// The code body.
    pub code: String,
    /// Error message, if this step failed (only meaningful for the
    /// failed-snippet ranker).
    pub error: Option<String>,
    /// Historical success rate of this snippet's lineage.
    pub success_rate: f64,
    /// Weighted feedback signal in `[-1, 1]`.
    pub feedback_signal: f64,
    /// Days since this step ran.
    pub age_days: f64,
    /// Net positive-minus-negative feedback balance, used only by the
    /// failure ranker to de-weight snippets with historically positive
    /// standing despite this particular failure.
    pub positive_balance: f64,
}

impl HistoricalStep {
    fn recency(&self) -> f64 {
        (-self.age_days / 14.0).exp()
    }

    fn column_jaccard(&self, candidate_columns: &[String]) -> f64 {
        jaccard(&self.columns, candidate_columns)
    }

    /// Success-snippet recall score: `0.55·sim + 0.20·rate +
    /// 0.20·feedback + 0.05·recency`.
    pub fn success_score(&self, candidate_columns: &[String]) -> f64 {
        0.55 * self.column_jaccard(candidate_columns)
            + 0.20 * self.success_rate
            + 0.20 * self.feedback_signal
            + 0.05 * self.recency()
    }

    /// Failure-snippet recall score: `0.60·sim + 0.20·recency +
    /// 0.20·failure_evidence − 0.05·positive_balance`.
    pub fn failure_score(&self, candidate_columns: &[String]) -> f64 {
        let failure_evidence = if self.error.is_some() { 1.0 } else { 0.0 };
        0.60 * self.column_jaccard(candidate_columns)
            + 0.20 * self.recency()
            + 0.20 * failure_evidence
            - 0.05 * self.positive_balance
    }

    /// Error excerpt trimmed to one line, at most 180 characters.
    pub fn error_excerpt(&self) -> Option<String> {
        let err = self.error.as_ref()?;
        let first_line = err.lines().next().unwrap_or("");
        Some(if first_line.len() > 180 {
            format!("{}…", &first_line[..180])
        } else {
            first_line.to_string()
        })
    }
}

fn jaccard(a: &[String], b: &[String]) -> f64 {
    use std::collections::HashSet;
    let set_a: HashSet<&str> = a.iter().map(String::as_str).collect();
    let set_b: HashSet<&str> = b.iter().map(String::as_str).collect();
    if set_a.is_empty() && set_b.is_empty() {
        return 0.0;
    }
    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    intersection as f64 / union.max(1) as f64
}

/// A ranked snippet in the rendered context, carrying its score
/// alongside the underlying step for traceability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedSnippet {
    /// The step this snippet came from.
    pub step_id: String,
    /// The code body.
    pub code: String,
    /// The recall score it was selected with.
    pub score: f64,
    /// Error excerpt, present only for failure snippets.
    pub error_excerpt: Option<String>,
}

/// A widget already present on the current report, surfaced to the
/// planner so it can reference or update it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WidgetSummary {
    /// Widget id.
    pub id: String,
    /// Widget title.
    pub title: String,
    /// Widget kind, e.g. `"chart"`, `"table"`.
    pub kind: String,
}

/// An `@`-mention resolved within the current turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mention {
    /// What kind of thing was mentioned (`"widget"`, `"data_source"`...).
    pub kind: String,
    /// The mentioned entity's id.
    pub target_id: String,
    /// The raw mention text as typed by the user.
    pub raw_text: String,
}

/// A named entity extracted from the current turn (e.g. by an upstream
/// NER pass — opaque to this crate beyond its label and value).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    /// Entity type label.
    pub label: String,
    /// Extracted value.
    pub value: String,
}

/// A previously executed query available for warm-section recall.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecentQuery {
    /// Query id.
    pub id: String,
    /// The query text or generated code.
    pub text: String,
    /// Whether it executed successfully.
    pub succeeded: bool,
}

/// Everything the static section is primed from, supplied once per run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticSources {
    /// Per-data-source schemas.
    pub schemas: Vec<DataSourceSchema>,
    /// Candidate instructions.
    pub instructions: Vec<Instruction>,
    /// Candidate metadata resources.
    pub resources: Vec<MetadataResource>,
    /// Uploaded file schemas.
    pub files: Vec<UploadedFileSchema>,
    /// The full code-snippet corpus (both successful and failed
    /// steps); ranking happens per-request against a candidate data
    /// model, not once at priming time.
    pub code_corpus: Vec<HistoricalStep>,
}

/// Everything the warm section is rebuilt from, each loop iteration.
#[derive(Debug, Clone, Default)]
pub struct ResearchContext {
    /// Recent conversation messages.
    pub messages: Vec<ProviderMessage>,
    /// Observation history rendered for the prompt (opaque JSON — the
    /// hub doesn't interpret it, only budgets and embeds it).
    pub observation_history: serde_json::Value,
    /// Widgets already on the report.
    pub widgets: Vec<WidgetSummary>,
    /// This turn's mentions.
    pub mentions: Vec<Mention>,
    /// This turn's extracted entities.
    pub entities: Vec<Entity>,
    /// Recently executed queries.
    pub queries: Vec<RecentQuery>,
    /// The candidate data model, used to rank code snippets against,
    /// if one has been chosen for this iteration.
    pub candidate_data_model_columns: Option<Vec<String>>,
}

/// Section-by-section token budget, split across the static and warm
/// halves of the context.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TokenBudget {
    /// Total tokens available for the static section.
    pub static_tokens: usize,
    /// Total tokens available for the warm section.
    pub warm_tokens: usize,
}

impl Default for TokenBudget {
    fn default() -> Self {
        Self {
            static_tokens: 6000,
            warm_tokens: 4000,
        }
    }
}

/// How many of a ranked list to keep by default when the caller
/// doesn't override it.
pub const DEFAULT_TOP_K: usize = 8;

/// Fully rendered, serialized context for one loop iteration — what
/// gets handed to the planner and persisted as a
/// `compass_persistence::ContextSnapshot`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextSnapshot {
    /// The user query this snapshot was built for.
    pub user_query: String,
    /// Which loop iteration this snapshot belongs to.
    pub loop_index: u32,
    /// Rendered schemas (Top-K or flat per source).
    pub schemas: serde_json::Value,
    /// Loaded instructions with their load reasons.
    pub instructions: Vec<LoadedInstruction>,
    /// Ranked metadata resources (Top-K bodies + full index).
    pub resources: serde_json::Value,
    /// Uploaded file schemas, verbatim.
    pub files: Vec<UploadedFileSchema>,
    /// Success-snippet recall, ranked.
    pub success_snippets: Vec<RankedSnippet>,
    /// Failure-snippet recall, ranked.
    pub failure_snippets: Vec<RankedSnippet>,
    /// Warm-section messages, after compaction.
    pub messages: Vec<ProviderMessage>,
    /// Warm-section observation history, passed through.
    pub observation_history: serde_json::Value,
    /// Widgets on the report.
    pub widgets: Vec<WidgetSummary>,
    /// This turn's mentions.
    pub mentions: Vec<Mention>,
    /// This turn's entities.
    pub entities: Vec<Entity>,
    /// Recent queries.
    pub queries: Vec<RecentQuery>,
    /// Estimated total token count of this snapshot.
    pub estimated_tokens: usize,
}
