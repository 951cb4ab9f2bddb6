//! Pure projection functions: decisions and tool executions in, an
//! updated block set out. No I/O, no clock reads — callers pass `now`
//! explicitly so the projection stays a deterministic function of its
//! inputs (see §8 testable property 7: a pure function of the current
//! block set).

use thiserror::Error;

use crate::block::{BlockStatus, CompletionBlock, SourceType};

/// Errors a projector function can report. These never indicate a bug
/// in the caller's own decision/tool bookkeeping so much as a broken
/// invariant (decision-first ordering) that the loop should treat as
/// fatal for the run.
#[derive(Debug, Error)]
pub enum ProjectorError {
    /// A tool block was projected before its owning decision block
    /// exists, violating the decision-first invariant.
    #[error("no decision block for agent_execution {agent_execution_id} loop {loop_index}")]
    MissingDecisionBlock {
        /// The run the tool execution belongs to.
        agent_execution_id: String,
        /// The loop iteration the tool execution belongs to.
        loop_index: u32,
    },
}

/// Input to [`upsert_block_for_decision`].
#[derive(Debug, Clone)]
pub struct DecisionBlockInput {
    /// Stable id to assign if this block doesn't exist yet.
    pub id: String,
    /// The assistant message this block renders into.
    pub completion_id: String,
    /// The run this decision belongs to.
    pub agent_execution_id: String,
    /// The decision row id.
    pub plan_decision_id: String,
    /// `seq * 10`.
    pub block_index: i64,
    /// The loop iteration.
    pub loop_index: u32,
    /// `research` or `action`, interpolated into the title.
    pub plan_type: String,
    /// Whether the planner marked its analysis complete.
    pub analysis_complete: bool,
    /// Streamed reasoning text, if any.
    pub reasoning: Option<String>,
    /// Streamed assistant text, if any.
    pub assistant: Option<String>,
    /// The planner's final answer, if any — preferred over `assistant`
    /// as the rendered content when present.
    pub final_answer: Option<String>,
}

/// Upsert the decision block keyed on `(agent_execution_id, loop_index,
/// source_type = decision)`. Returns the block's index within `blocks`.
///
/// `content = final_answer ?? assistant`; if `analysis_complete` and
/// `completed_at` is unset, it is set to `now`.
pub fn upsert_block_for_decision(
    blocks: &mut Vec<CompletionBlock>,
    input: DecisionBlockInput,
    now: i64,
) -> usize {
    let content = input.final_answer.or(input.assistant);
    let status = if input.analysis_complete {
        BlockStatus::Completed
    } else {
        BlockStatus::InProgress
    };
    let title = format!("Planning ({})", input.plan_type);

    let existing = blocks
        .iter()
        .position(|b| b.is_decision_for(&input.agent_execution_id, input.loop_index));

    match existing {
        Some(idx) => {
            let block = &mut blocks[idx];
            block.title = title;
            block.status = status;
            block.content = content;
            block.reasoning = input.reasoning;
            if input.analysis_complete && block.completed_at.is_none() {
                block.completed_at = Some(now);
            }
            idx
        }
        None => {
            blocks.push(CompletionBlock {
                id: input.id,
                completion_id: input.completion_id,
                agent_execution_id: input.agent_execution_id,
                source_type: SourceType::Decision,
                plan_decision_id: Some(input.plan_decision_id),
                tool_execution_id: None,
                block_index: input.block_index,
                loop_index: input.loop_index,
                title,
                status,
                icon: "brain".to_string(),
                content,
                reasoning: input.reasoning,
                started_at: now,
                completed_at: if input.analysis_complete { Some(now) } else { None },
            });
            blocks.len() - 1
        }
    }
}

/// Tool execution status as seen by the projector; intentionally
/// narrower than `compass_tool`'s runtime types so this crate has no
/// dependency on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolOutcome {
    /// Still running.
    InProgress,
    /// Finished successfully.
    Success,
    /// Finished with an error.
    Error,
}

/// Input to [`upsert_block_for_tool`].
#[derive(Debug, Clone)]
pub struct ToolBlockInput {
    /// The run the tool execution belongs to.
    pub agent_execution_id: String,
    /// The loop iteration the tool execution belongs to.
    pub loop_index: u32,
    /// The decision this tool execution was selected by.
    pub plan_decision_id: String,
    /// The tool execution row id.
    pub tool_execution_id: String,
    /// The tool's name, appended to the decision block's title.
    pub tool_name: String,
    /// The tool's current outcome.
    pub outcome: ToolOutcome,
}

/// Find the decision block matching `plan_decision_id` and annotate its
/// title with `→ <tool_name>`, map `outcome` onto [`BlockStatus`], and
/// attach `tool_execution_id` so the block can be found again on the
/// next update. Never creates a new block — a tool block update can
/// only ever mutate the decision block of its owning decision.
pub fn upsert_block_for_tool(
    blocks: &mut [CompletionBlock],
    input: ToolBlockInput,
    now: i64,
) -> Result<(), ProjectorError> {
    let block = blocks
        .iter_mut()
        .find(|b| b.plan_decision_id.as_deref() == Some(input.plan_decision_id.as_str()))
        .ok_or_else(|| ProjectorError::MissingDecisionBlock {
            agent_execution_id: input.agent_execution_id.clone(),
            loop_index: input.loop_index,
        })?;

    let suffix = format!(" → {}", input.tool_name);
    if !block.title.ends_with(&suffix) {
        block.title.push_str(&suffix);
    }
    block.tool_execution_id = Some(input.tool_execution_id);
    block.status = match input.outcome {
        ToolOutcome::Success => BlockStatus::Completed,
        ToolOutcome::Error => BlockStatus::Error,
        ToolOutcome::InProgress => BlockStatus::InProgress,
    };
    if input.outcome != ToolOutcome::InProgress {
        block.completed_at = Some(now);
    }
    Ok(())
}

/// The projected body of the assistant message, rebuilt from the
/// current block set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebuiltCompletion {
    /// Concatenation of every non-empty block content, each prefixed
    /// with `**{icon} {title} {status_glyph}**`.
    pub content: String,
    /// The last up-to-3 non-empty reasonings, joined by `" | "`.
    pub reasoning: Option<String>,
}

/// Sort `blocks` by `block_index` and rebuild the completion body. A
/// pure function of the current block set: calling it twice on the
/// same blocks yields the same result.
pub fn rebuild_completion_from_blocks(blocks: &[CompletionBlock]) -> RebuiltCompletion {
    let mut ordered: Vec<&CompletionBlock> = blocks.iter().collect();
    ordered.sort_by_key(|b| b.block_index);

    let mut content = String::new();
    for block in &ordered {
        let Some(body) = block.content.as_deref().filter(|s| !s.is_empty()) else {
            continue;
        };
        if !content.is_empty() {
            content.push_str("\n\n");
        }
        content.push_str(&format!(
            "**{} {} {}**\n{}",
            block.icon,
            block.title,
            block.status.glyph(),
            body
        ));
    }

    let reasonings: Vec<&str> = ordered
        .iter()
        .filter_map(|b| b.reasoning.as_deref())
        .filter(|r| !r.is_empty())
        .collect();
    let reasoning = if reasonings.is_empty() {
        None
    } else {
        let last_three = &reasonings[reasonings.len().saturating_sub(3)..];
        Some(last_three.join(" | "))
    };

    RebuiltCompletion { content, reasoning }
}

/// Flip the highest-indexed block to `error` and append `"\n\nError:
/// {msg}"` to its content, unless that exact message is already
/// present (idempotent under repeated calls with the same message).
pub fn mark_error_on_latest_block(blocks: &mut [CompletionBlock], msg: &str, now: i64) {
    let Some(block) = blocks.iter_mut().max_by_key(|b| b.block_index) else {
        return;
    };
    block.status = BlockStatus::Error;
    block.completed_at.get_or_insert(now);
    let suffix = format!("\n\nError: {msg}");
    let already_present = block.content.as_deref().is_some_and(|c| c.contains(&suffix));
    if !already_present {
        block.content.get_or_insert_with(String::new).push_str(&suffix);
    }
}

/// Flip every block still `in_progress` to `stopped` (the sigkill path).
pub fn mark_in_progress_blocks_stopped(blocks: &mut [CompletionBlock]) {
    for block in blocks.iter_mut() {
        if block.status == BlockStatus::InProgress {
            block.status = BlockStatus::Stopped;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decision_input(loop_index: u32, seq: i64) -> DecisionBlockInput {
        DecisionBlockInput {
            id: format!("block-{seq}"),
            completion_id: "completion-1".into(),
            agent_execution_id: "exec-1".into(),
            plan_decision_id: format!("decision-{seq}"),
            block_index: seq * 10,
            loop_index,
            plan_type: "research".into(),
            analysis_complete: false,
            reasoning: Some("thinking".into()),
            assistant: Some("partial answer".into()),
            final_answer: None,
        }
    }

    #[test]
    fn decision_upsert_is_idempotent_per_loop_index() {
        let mut blocks = Vec::new();
        upsert_block_for_decision(&mut blocks, decision_input(0, 1), 1000);
        upsert_block_for_decision(&mut blocks, decision_input(0, 1), 1001);
        assert_eq!(blocks.len(), 1);
    }

    #[test]
    fn analysis_complete_sets_completed_at_once() {
        let mut blocks = Vec::new();
        let mut input = decision_input(0, 1);
        input.analysis_complete = true;
        upsert_block_for_decision(&mut blocks, input.clone(), 1000);
        upsert_block_for_decision(&mut blocks, input, 2000);
        assert_eq!(blocks[0].completed_at, Some(1000));
    }

    #[test]
    fn tool_upsert_requires_existing_decision_block() {
        let mut blocks: Vec<CompletionBlock> = Vec::new();
        let err = upsert_block_for_tool(
            &mut blocks,
            ToolBlockInput {
                agent_execution_id: "exec-1".into(),
                loop_index: 0,
                plan_decision_id: "decision-1".into(),
                tool_execution_id: "tool-1".into(),
                tool_name: "list_tables".into(),
                outcome: ToolOutcome::Success,
            },
            1000,
        )
        .unwrap_err();
        assert!(matches!(err, ProjectorError::MissingDecisionBlock { .. }));
    }

    #[test]
    fn tool_upsert_annotates_decision_block_title() {
        let mut blocks = Vec::new();
        upsert_block_for_decision(&mut blocks, decision_input(0, 1), 1000);
        upsert_block_for_tool(
            &mut blocks,
            ToolBlockInput {
                agent_execution_id: "exec-1".into(),
                loop_index: 0,
                plan_decision_id: "decision-1".into(),
                tool_execution_id: "tool-1".into(),
                tool_name: "list_tables".into(),
                outcome: ToolOutcome::Success,
            },
            2000,
        )
        .unwrap();
        assert_eq!(blocks.len(), 1);
        assert!(blocks[0].title.ends_with("→ list_tables"));
        assert_eq!(blocks[0].status, BlockStatus::Completed);
        assert_eq!(blocks[0].completed_at, Some(2000));
    }

    #[test]
    fn rebuild_is_pure_and_stable_across_invocations() {
        let mut blocks = Vec::new();
        upsert_block_for_decision(&mut blocks, decision_input(0, 1), 1000);
        let mut input2 = decision_input(1, 2);
        input2.reasoning = Some("more thinking".into());
        upsert_block_for_decision(&mut blocks, input2, 1500);

        let first = rebuild_completion_from_blocks(&blocks);
        let second = rebuild_completion_from_blocks(&blocks);
        assert_eq!(first, second);
        assert!(first.content.contains("partial answer"));
        assert_eq!(
            first.reasoning.as_deref(),
            Some("thinking | more thinking")
        );
    }

    #[test]
    fn mark_error_is_idempotent_for_identical_message() {
        let mut blocks = Vec::new();
        upsert_block_for_decision(&mut blocks, decision_input(0, 1), 1000);
        mark_error_on_latest_block(&mut blocks, "boom", 2000);
        mark_error_on_latest_block(&mut blocks, "boom", 3000);
        let occurrences = blocks[0].content.as_deref().unwrap().matches("Error: boom").count();
        assert_eq!(occurrences, 1);
    }

    #[test]
    fn mark_in_progress_stopped_leaves_terminal_blocks_alone() {
        let mut blocks = Vec::new();
        upsert_block_for_decision(&mut blocks, decision_input(0, 1), 1000);
        let mut done = decision_input(1, 2);
        done.analysis_complete = true;
        upsert_block_for_decision(&mut blocks, done, 1500);

        mark_in_progress_blocks_stopped(&mut blocks);
        assert_eq!(blocks[0].status, BlockStatus::Stopped);
        assert_eq!(blocks[1].status, BlockStatus::Completed);
    }
}
