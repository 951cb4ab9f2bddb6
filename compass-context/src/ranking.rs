//! Free-function ranking helpers: instruction loading, schema
//! selection, and code-snippet recall. Each takes plain structs and
//! returns plain values, so these are unit-testable without a hub,
//! a planner, or a store.

use std::collections::HashSet;

use crate::types::{
    DataSourceSchema, HistoricalStep, Instruction, LoadMode, LoadReason, LoadedInstruction,
    MetadataResource, RankedSnippet, SchemaTable,
};

const STOPWORDS: &[&str] = &[
    "a", "an", "the", "of", "in", "on", "to", "for", "and", "or", "is", "are", "was", "were",
    "be", "been", "with", "at", "by", "from", "this", "that", "it", "as", "we", "you", "i",
];

/// Lowercase, strip punctuation, drop stopwords and tokens shorter
/// than 2 characters.
pub fn tokenize(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .map(|w| w.to_lowercase())
        .filter(|w| w.len() >= 2 && !STOPWORDS.contains(&w.as_str()))
        .collect()
}

fn jaccard_set(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    intersection as f64 / union.max(1) as f64
}

/// Fraction of the query's tokens that appear in `instruction_tokens`.
fn substring_coverage(query_tokens: &HashSet<String>, instruction_tokens: &HashSet<String>) -> f64 {
    if query_tokens.is_empty() {
        return 0.0;
    }
    let covered = query_tokens.intersection(instruction_tokens).count();
    covered as f64 / query_tokens.len() as f64
}

/// Score a candidate instruction against a tokenized query:
/// `max(Jaccard(tokens, inst_tokens), 0.8 · substring_coverage)`.
pub fn score_instruction(query_tokens: &HashSet<String>, instruction_text: &str) -> f64 {
    let inst_tokens = tokenize(instruction_text);
    let jaccard = jaccard_set(query_tokens, &inst_tokens);
    let coverage = 0.8 * substring_coverage(query_tokens, &inst_tokens);
    jaccard.max(coverage)
}

/// Default intelligent-loading score threshold.
pub const INTELLIGENT_LOAD_THRESHOLD: f64 = 0.15;

/// Select instructions for the static section: every `always`
/// instruction, plus the top `limit` `intelligent` instructions whose
/// score clears [`INTELLIGENT_LOAD_THRESHOLD`], sorted by descending
/// score.
pub fn load_instructions(
    instructions: &[Instruction],
    user_query: &str,
    limit: usize,
) -> Vec<LoadedInstruction> {
    let query_tokens = tokenize(user_query);
    let mut always = Vec::new();
    let mut scored: Vec<(f64, &Instruction)> = Vec::new();

    for inst in instructions {
        match inst.load_mode {
            LoadMode::Always => always.push(LoadedInstruction {
                instruction_id: inst.id.clone(),
                text: inst.text.clone(),
                reason: LoadReason::Always,
            }),
            LoadMode::Intelligent => {
                let score = score_instruction(&query_tokens, &inst.text);
                if score >= INTELLIGENT_LOAD_THRESHOLD {
                    scored.push((score, inst));
                }
            }
        }
    }

    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    always.extend(scored.into_iter().take(limit).map(|(score, inst)| LoadedInstruction {
        instruction_id: inst.id.clone(),
        text: inst.text.clone(),
        reason: LoadReason::SearchMatch(score),
    }));
    always
}

/// Rank a data source's tables and keep the top `k`; if the source has
/// no usage stats, return every table unranked (flat rendering).
pub fn rank_schema_tables<'a>(source: &'a DataSourceSchema, k: usize) -> Vec<&'a SchemaTable> {
    if !source.has_stats {
        return source.tables.iter().collect();
    }
    let mut ranked: Vec<&SchemaTable> = source.tables.iter().collect();
    ranked.sort_by(|a, b| {
        b.rank_score()
            .partial_cmp(&a.rank_score())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    ranked.truncate(k);
    ranked
}

/// Rank metadata resources by [`MetadataResource::rank_score`] and
/// keep the top `k`.
pub fn rank_resources<'a>(resources: &'a [MetadataResource], k: usize) -> Vec<&'a MetadataResource> {
    let mut ranked: Vec<&MetadataResource> = resources.iter().collect();
    ranked.sort_by(|a, b| {
        b.rank_score()
            .partial_cmp(&a.rank_score())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    ranked.truncate(k);
    ranked
}

/// Rank the code corpus's successful steps against `candidate_columns`
/// and keep the top `k`.
pub fn rank_success_snippets(
    corpus: &[HistoricalStep],
    candidate_columns: &[String],
    k: usize,
) -> Vec<RankedSnippet> {
    let mut scored: Vec<(f64, &HistoricalStep)> = corpus
        .iter()
        .filter(|s| s.error.is_none())
        .map(|s| (s.success_score(candidate_columns), s))
        .collect();
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored
        .into_iter()
        .take(k)
        .map(|(score, step)| RankedSnippet {
            step_id: step.step_id.clone(),
            code: step.code.clone(),
            score,
            error_excerpt: None,
        })
        .collect()
}

/// Rank the code corpus's failed steps against `candidate_columns` and
/// keep the top `k`, attaching a trimmed error excerpt to each.
pub fn rank_failure_snippets(
    corpus: &[HistoricalStep],
    candidate_columns: &[String],
    k: usize,
) -> Vec<RankedSnippet> {
    let mut scored: Vec<(f64, &HistoricalStep)> = corpus
        .iter()
        .filter(|s| s.error.is_some())
        .map(|s| (s.failure_score(candidate_columns), s))
        .collect();
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored
        .into_iter()
        .take(k)
        .map(|(score, step)| RankedSnippet {
            step_id: step.step_id.clone(),
            code: step.code.clone(),
            score,
            error_excerpt: step.error_excerpt(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Instruction;

    #[test]
    fn tokenize_drops_stopwords_and_short_tokens() {
        let tokens = tokenize("What is the total revenue of the a store?");
        assert!(!tokens.contains("is"));
        assert!(!tokens.contains("a"));
        assert!(tokens.contains("total"));
        assert!(tokens.contains("revenue"));
        assert!(tokens.contains("store"));
    }

    #[test]
    fn always_instructions_always_load() {
        let instructions = vec![Instruction {
            id: "i1".into(),
            text: "Prefer metric units.".into(),
            load_mode: LoadMode::Always,
        }];
        let loaded = load_instructions(&instructions, "anything at all", 5);
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].reason, LoadReason::Always);
    }

    #[test]
    fn intelligent_instruction_loads_on_match() {
        let instructions = vec![Instruction {
            id: "i1".into(),
            text: "When asked about revenue, join the orders and payments tables.".into(),
            load_mode: LoadMode::Intelligent,
        }];
        let loaded = load_instructions(&instructions, "what is our total revenue this quarter", 5);
        assert_eq!(loaded.len(), 1);
        assert!(matches!(loaded[0].reason, LoadReason::SearchMatch(_)));
    }

    #[test]
    fn intelligent_instruction_skipped_below_threshold() {
        let instructions = vec![Instruction {
            id: "i1".into(),
            text: "Formatting preferences for chart colors.".into(),
            load_mode: LoadMode::Intelligent,
        }];
        let loaded = load_instructions(&instructions, "how many users signed up yesterday", 5);
        assert!(loaded.is_empty());
    }

    fn table(name: &str, success: u64, failure: u64, age_days: f64) -> SchemaTable {
        SchemaTable {
            name: name.into(),
            columns: vec!["id".into()],
            age_days,
            success_count: success,
            failure_count: failure,
            feedback_signal: 0.0,
            centrality: 0.2,
            richness: 0.2,
            entity_like: true,
        }
    }

    #[test]
    fn schema_ranking_prefers_recent_successful_tables() {
        let source = DataSourceSchema {
            source_id: "s1".into(),
            name: "warehouse".into(),
            tables: vec![table("orders", 50, 1, 1.0), table("stale_logs", 1, 20, 300.0)],
            has_stats: true,
        };
        let ranked = rank_schema_tables(&source, 1);
        assert_eq!(ranked[0].name, "orders");
    }

    #[test]
    fn schema_without_stats_returns_every_table_unranked() {
        let source = DataSourceSchema {
            source_id: "s1".into(),
            name: "warehouse".into(),
            tables: vec![table("a", 0, 0, 0.0), table("b", 0, 0, 0.0)],
            has_stats: false,
        };
        assert_eq!(rank_schema_tables(&source, 1).len(), 2);
    }

    fn step(id: &str, columns: &[&str], error: Option<&str>) -> HistoricalStep {
        HistoricalStep {
            step_id: id.into(),
            data_model: "orders".into(),
            columns: columns.iter().map(|s| s.to_string()).collect(),
            code: format!("-- {id}"),
            error: error.map(|e| e.to_string()),
            success_rate: 0.8,
            feedback_signal: 0.3,
            age_days: 2.0,
            positive_balance: 0.1,
        }
    }

    #[test]
    fn success_snippets_exclude_failed_steps() {
        let corpus = vec![
            step("s1", &["order_id", "total"], None),
            step("s2", &["order_id", "total"], Some("boom")),
        ];
        let ranked = rank_success_snippets(&corpus, &["order_id".into(), "total".into()], 5);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].step_id, "s1");
    }

    #[test]
    fn failure_snippets_carry_trimmed_error_excerpt() {
        let corpus = vec![step(
            "s2",
            &["order_id"],
            Some("column \"totale\" does not exist\nHINT: did you mean total?"),
        )];
        let ranked = rank_failure_snippets(&corpus, &["order_id".into()], 5);
        assert_eq!(ranked.len(), 1);
        assert_eq!(
            ranked[0].error_excerpt.as_deref(),
            Some("column \"totale\" does not exist")
        );
    }
}
