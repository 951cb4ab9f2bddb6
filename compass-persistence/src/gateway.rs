//! The [`PersistenceGateway`] trait and its in-memory implementation.

use async_trait::async_trait;
use tokio::sync::RwLock;

use std::collections::HashMap;

use compass_blocks::{
    mark_error_on_latest_block, mark_in_progress_blocks_stopped, rebuild_completion_from_blocks,
    upsert_block_for_decision, upsert_block_for_tool, CompletionBlock, DecisionBlockInput,
    RebuiltCompletion, ToolBlockInput, ToolOutcome,
};

use crate::error::PersistenceError;
use crate::model::{
    AgentExecution, ContextSnapshot, ExecutionStatus, PlanDecision, SnapshotKind, ToolExecution,
    ToolExecutionStatus,
};

/// The append-only write surface the agent loop needs: allocate `seq`
/// values, record decisions and tool attempts, keep the render-ready
/// block set current, and snapshot context for audit/replay.
///
/// Per §4.10, snapshot and block writes are best-effort from the
/// loop's perspective (a failure there should not abort the run) while
/// decision and tool-execution row writes are fatal. This trait simply
/// reports every failure via `Result`; which ones are tolerated is the
/// caller's policy, not the gateway's.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Create a new `in_progress` execution row.
    async fn start_execution(&self, execution: AgentExecution) -> Result<(), PersistenceError>;

    /// Allocate and return the next `seq` for `agent_execution_id`,
    /// bumping `latest_seq`. Fails if the execution is unknown or has
    /// already left `in_progress`.
    async fn next_seq(&self, agent_execution_id: &str) -> Result<i64, PersistenceError>;

    /// Insert or update a plan decision, then project it into the
    /// block set via [`upsert_block_for_decision`]. `now` is used only
    /// to stamp the block's `completed_at` when `analysis_complete`.
    async fn save_plan_decision(
        &self,
        decision: PlanDecision,
        now: i64,
    ) -> Result<(), PersistenceError>;

    /// Record a new in-progress tool attempt.
    async fn start_tool_execution(&self, execution: ToolExecution) -> Result<(), PersistenceError>;

    /// Close out a tool attempt and project the outcome into the block
    /// set via [`upsert_block_for_tool`].
    #[allow(clippy::too_many_arguments)]
    async fn finish_tool_execution(
        &self,
        tool_execution_id: &str,
        success: bool,
        completed_at: i64,
        result_summary: Option<String>,
        result_json: Option<serde_json::Value>,
        error_message: Option<String>,
    ) -> Result<(), PersistenceError>;

    /// Append a context snapshot.
    async fn save_context_snapshot(&self, snapshot: ContextSnapshot) -> Result<(), PersistenceError>;

    /// The current block set for an execution, ordered by `block_index`.
    async fn blocks_for(&self, agent_execution_id: &str) -> Result<Vec<CompletionBlock>, PersistenceError>;

    /// Rebuild the assistant-facing transcript from the current block
    /// set (delegates to [`rebuild_completion_from_blocks`]).
    async fn rebuild_completion(
        &self,
        agent_execution_id: &str,
    ) -> Result<RebuiltCompletion, PersistenceError>;

    /// Mark the highest-indexed block as errored (delegates to
    /// [`mark_error_on_latest_block`]) and finalize the execution row
    /// as `error`.
    async fn fail_execution(
        &self,
        agent_execution_id: &str,
        message: &str,
        now: i64,
    ) -> Result<(), PersistenceError>;

    /// Stop every in-progress block (delegates to
    /// [`mark_in_progress_blocks_stopped`]) and finalize the execution
    /// row as `sigkill`.
    async fn sigkill_execution(
        &self,
        agent_execution_id: &str,
        now: i64,
    ) -> Result<(), PersistenceError>;

    /// Finalize the execution row as `success`.
    async fn complete_execution(
        &self,
        agent_execution_id: &str,
        now: i64,
    ) -> Result<(), PersistenceError>;
}

struct ExecutionRecord {
    execution: AgentExecution,
    decisions: Vec<PlanDecision>,
    tools: Vec<ToolExecution>,
    blocks: Vec<CompletionBlock>,
    snapshots: Vec<ContextSnapshot>,
}

/// In-memory [`PersistenceGateway`], backed by a `HashMap` behind a
/// `RwLock`, one entry per execution. Mirrors the locking discipline of
/// the in-memory state store: a single lock acquisition per operation,
/// no lock held across an `.await`.
pub struct InMemoryPersistence {
    executions: RwLock<HashMap<String, ExecutionRecord>>,
}

impl InMemoryPersistence {
    /// Create an empty gateway.
    pub fn new() -> Self {
        Self {
            executions: RwLock::new(HashMap::new()),
        }
    }

    fn finalize(
        record: &mut ExecutionRecord,
        status: ExecutionStatus,
        now: i64,
    ) {
        record.execution.status = status;
        record.execution.completed_at = Some(now);
        record.execution.total_duration_ms = Some(now - record.execution.started_at);
    }
}

impl Default for InMemoryPersistence {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PersistenceGateway for InMemoryPersistence {
    async fn start_execution(&self, execution: AgentExecution) -> Result<(), PersistenceError> {
        let mut executions = self.executions.write().await;
        executions.insert(
            execution.id.clone(),
            ExecutionRecord {
                execution,
                decisions: Vec::new(),
                tools: Vec::new(),
                blocks: Vec::new(),
                snapshots: Vec::new(),
            },
        );
        Ok(())
    }

    async fn next_seq(&self, agent_execution_id: &str) -> Result<i64, PersistenceError> {
        let mut executions = self.executions.write().await;
        let record = executions
            .get_mut(agent_execution_id)
            .ok_or_else(|| PersistenceError::UnknownExecution(agent_execution_id.to_string()))?;
        if !record.execution.status.accepts_new_rows() {
            return Err(PersistenceError::ExecutionClosed(agent_execution_id.to_string()));
        }
        record.execution.latest_seq += 1;
        Ok(record.execution.latest_seq)
    }

    async fn save_plan_decision(
        &self,
        decision: PlanDecision,
        now: i64,
    ) -> Result<(), PersistenceError> {
        let mut executions = self.executions.write().await;
        let record = executions
            .get_mut(&decision.agent_execution_id)
            .ok_or_else(|| PersistenceError::UnknownExecution(decision.agent_execution_id.clone()))?;

        let input = DecisionBlockInput {
            id: format!("block-{}", decision.id),
            completion_id: record.execution.completion_id.clone(),
            agent_execution_id: decision.agent_execution_id.clone(),
            plan_decision_id: decision.id.clone(),
            block_index: decision.seq * 10,
            loop_index: decision.loop_index,
            plan_type: decision.plan_type.to_string(),
            analysis_complete: decision.analysis_complete,
            reasoning: decision.reasoning.clone(),
            assistant: decision.assistant.clone(),
            final_answer: decision.final_answer.clone(),
        };
        upsert_block_for_decision(&mut record.blocks, input, now);

        match record.decisions.iter_mut().find(|d| d.id == decision.id) {
            Some(existing) => *existing = decision,
            None => record.decisions.push(decision),
        }
        Ok(())
    }

    async fn start_tool_execution(&self, execution: ToolExecution) -> Result<(), PersistenceError> {
        let mut executions = self.executions.write().await;
        let record = executions
            .get_mut(&execution.agent_execution_id)
            .ok_or_else(|| PersistenceError::UnknownExecution(execution.agent_execution_id.clone()))?;

        if let Some(plan_decision_id) = execution.plan_decision_id.clone() {
            let input = ToolBlockInput {
                agent_execution_id: execution.agent_execution_id.clone(),
                loop_index: record
                    .decisions
                    .iter()
                    .find(|d| d.id == plan_decision_id)
                    .map(|d| d.loop_index)
                    .unwrap_or_default(),
                plan_decision_id,
                tool_execution_id: execution.id.clone(),
                tool_name: execution.tool_name.clone(),
                outcome: ToolOutcome::InProgress,
            };
            upsert_block_for_tool(&mut record.blocks, input, execution.started_at)?;
        }

        record.tools.push(execution);
        Ok(())
    }

    async fn finish_tool_execution(
        &self,
        tool_execution_id: &str,
        success: bool,
        completed_at: i64,
        result_summary: Option<String>,
        result_json: Option<serde_json::Value>,
        error_message: Option<String>,
    ) -> Result<(), PersistenceError> {
        let mut executions = self.executions.write().await;
        let record = executions
            .values_mut()
            .find(|r| r.tools.iter().any(|t| t.id == tool_execution_id))
            .ok_or_else(|| PersistenceError::UnknownToolExecution(tool_execution_id.to_string()))?;

        let plan_decision_id = {
            let tool = record
                .tools
                .iter_mut()
                .find(|t| t.id == tool_execution_id)
                .expect("looked up by the same predicate above");
            tool.status = if success {
                ToolExecutionStatus::Success
            } else {
                ToolExecutionStatus::Error
            };
            tool.success = success;
            tool.completed_at = Some(completed_at);
            tool.duration_ms = Some(completed_at - tool.started_at);
            tool.result_summary = result_summary;
            tool.result_json = result_json;
            tool.error_message = error_message;
            tool.plan_decision_id.clone()
        };

        if let Some(plan_decision_id) = plan_decision_id {
            let loop_index = record
                .decisions
                .iter()
                .find(|d| d.id == plan_decision_id)
                .map(|d| d.loop_index)
                .unwrap_or_default();
            let input = ToolBlockInput {
                agent_execution_id: record.execution.id.clone(),
                loop_index,
                plan_decision_id,
                tool_execution_id: tool_execution_id.to_string(),
                tool_name: record
                    .tools
                    .iter()
                    .find(|t| t.id == tool_execution_id)
                    .map(|t| t.tool_name.clone())
                    .unwrap_or_default(),
                outcome: if success {
                    ToolOutcome::Success
                } else {
                    ToolOutcome::Error
                },
            };
            upsert_block_for_tool(&mut record.blocks, input, completed_at)?;
        }
        Ok(())
    }

    async fn save_context_snapshot(&self, snapshot: ContextSnapshot) -> Result<(), PersistenceError> {
        let mut executions = self.executions.write().await;
        let record = executions
            .get_mut(&snapshot.agent_execution_id)
            .ok_or_else(|| PersistenceError::UnknownExecution(snapshot.agent_execution_id.clone()))?;
        record.snapshots.push(snapshot);
        Ok(())
    }

    async fn blocks_for(&self, agent_execution_id: &str) -> Result<Vec<CompletionBlock>, PersistenceError> {
        let executions = self.executions.read().await;
        let record = executions
            .get(agent_execution_id)
            .ok_or_else(|| PersistenceError::UnknownExecution(agent_execution_id.to_string()))?;
        let mut blocks = record.blocks.clone();
        blocks.sort_by_key(|b| b.block_index);
        Ok(blocks)
    }

    async fn rebuild_completion(
        &self,
        agent_execution_id: &str,
    ) -> Result<RebuiltCompletion, PersistenceError> {
        let executions = self.executions.read().await;
        let record = executions
            .get(agent_execution_id)
            .ok_or_else(|| PersistenceError::UnknownExecution(agent_execution_id.to_string()))?;
        Ok(rebuild_completion_from_blocks(&record.blocks))
    }

    async fn fail_execution(
        &self,
        agent_execution_id: &str,
        message: &str,
        now: i64,
    ) -> Result<(), PersistenceError> {
        let mut executions = self.executions.write().await;
        let record = executions
            .get_mut(agent_execution_id)
            .ok_or_else(|| PersistenceError::UnknownExecution(agent_execution_id.to_string()))?;
        mark_error_on_latest_block(&mut record.blocks, message, now);
        Self::finalize(record, ExecutionStatus::Error, now);
        Ok(())
    }

    async fn sigkill_execution(
        &self,
        agent_execution_id: &str,
        now: i64,
    ) -> Result<(), PersistenceError> {
        let mut executions = self.executions.write().await;
        let record = executions
            .get_mut(agent_execution_id)
            .ok_or_else(|| PersistenceError::UnknownExecution(agent_execution_id.to_string()))?;
        mark_in_progress_blocks_stopped(&mut record.blocks);
        Self::finalize(record, ExecutionStatus::Sigkill, now);
        Ok(())
    }

    async fn complete_execution(
        &self,
        agent_execution_id: &str,
        now: i64,
    ) -> Result<(), PersistenceError> {
        let mut executions = self.executions.write().await;
        let record = executions
            .get_mut(agent_execution_id)
            .ok_or_else(|| PersistenceError::UnknownExecution(agent_execution_id.to_string()))?;
        Self::finalize(record, ExecutionStatus::Success, now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn execution(id: &str) -> AgentExecution {
        AgentExecution::start(id, "completion-1", "report-1", "org-1", "user-1", 1000, serde_json::json!({}))
    }

    #[tokio::test]
    async fn seq_allocation_is_monotonic_and_gated_by_status() {
        let gateway = InMemoryPersistence::new();
        gateway.start_execution(execution("exec-1")).await.unwrap();
        assert_eq!(gateway.next_seq("exec-1").await.unwrap(), 1);
        assert_eq!(gateway.next_seq("exec-1").await.unwrap(), 2);

        gateway.complete_execution("exec-1", 2000).await.unwrap();
        assert!(matches!(
            gateway.next_seq("exec-1").await.unwrap_err(),
            PersistenceError::ExecutionClosed(_)
        ));
    }

    #[tokio::test]
    async fn decision_then_tool_projects_into_blocks() {
        let gateway = InMemoryPersistence::new();
        gateway.start_execution(execution("exec-1")).await.unwrap();

        gateway
            .save_plan_decision(PlanDecision {
                id: "decision-1".into(),
                agent_execution_id: "exec-1".into(),
                seq: 1,
                loop_index: 0,
                plan_type: crate::model::PlanType::Action,
                analysis_complete: false,
                reasoning: Some("thinking".into()),
                assistant: Some("working on it".into()),
                final_answer: None,
                action_name: Some("list_tables".into()),
                action_args: None,
                metrics: None,
            }, 1200)
            .await
            .unwrap();

        gateway
            .start_tool_execution(ToolExecution::start(
                "tool-1",
                "exec-1",
                Some("decision-1".into()),
                "list_tables",
                None,
                serde_json::json!({}),
                1500,
                1,
                2,
            ))
            .await
            .unwrap();

        gateway
            .finish_tool_execution(
                "tool-1",
                true,
                1600,
                Some("3 tables".into()),
                Some(serde_json::json!(["a", "b", "c"])),
                None,
            )
            .await
            .unwrap();

        let blocks = gateway.blocks_for("exec-1").await.unwrap();
        assert_eq!(blocks.len(), 1);
        assert!(blocks[0].title.ends_with("→ list_tables"));

        let rebuilt = gateway.rebuild_completion("exec-1").await.unwrap();
        assert!(rebuilt.content.contains("working on it"));
    }

    #[tokio::test]
    async fn sigkill_stops_in_progress_blocks_and_finalizes() {
        let gateway = InMemoryPersistence::new();
        gateway.start_execution(execution("exec-1")).await.unwrap();
        gateway
            .save_plan_decision(PlanDecision {
                id: "decision-1".into(),
                agent_execution_id: "exec-1".into(),
                seq: 1,
                loop_index: 0,
                plan_type: crate::model::PlanType::Research,
                analysis_complete: false,
                reasoning: None,
                assistant: Some("partial".into()),
                final_answer: None,
                action_name: None,
                action_args: None,
                metrics: None,
            }, 1200)
            .await
            .unwrap();

        gateway.sigkill_execution("exec-1", 5000).await.unwrap();
        let blocks = gateway.blocks_for("exec-1").await.unwrap();
        assert_eq!(blocks[0].status, compass_blocks::BlockStatus::Stopped);
    }

    #[tokio::test]
    async fn unknown_execution_is_reported() {
        let gateway = InMemoryPersistence::new();
        assert!(matches!(
            gateway.next_seq("missing").await.unwrap_err(),
            PersistenceError::UnknownExecution(_)
        ));
    }
}
