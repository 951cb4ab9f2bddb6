//! The agent loop (§4.9): plan, act, observe, repeat.
//!
//! [`AgentLoop`] drives one [`RunRequest`] from `AgentExecution::start`
//! to a terminal [`ExecutionStatus`], streaming every intermediate event
//! through the event bus and persisting every decision, tool attempt,
//! and context snapshot through a [`PersistenceGateway`] along the way.
//! It owns no state of its own across runs — everything it needs is
//! either supplied at construction (registry, planner, event bus,
//! persistence, config) or scoped to the single call to [`AgentLoop::run`].

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use compass_context::{ContextHub, ContextSnapshot as HubSnapshot, ResearchContext, StaticSources};
use compass_events::{vocabulary, EventBus, EventFrame};
use compass_observations::ObservationAccumulator;
use compass_persistence::model::{
    AgentExecution, ContextSnapshot as PersistedSnapshot, ExecutionStatus, PlanDecision, PlanType,
    SnapshotKind, ToolExecution,
};
use compass_persistence::PersistenceGateway;
use compass_planner::{Planner, PlannerAction, PlannerDecision, PlannerInput, PlannerStreamEvent};
use compass_streamer::ThrottledStreamer;
use compass_tool::{
    run_with_policies, Observation, ObservationPolicy, RetryPolicy, RuntimeContext, ToolError,
    ToolEvent, ToolRegistry, TimeoutPolicy,
};

use layer0::hook::{HookAction, HookContext, HookPoint};

use crate::breakers::{BreakerTrip, CircuitBreakers};
use crate::config::LoopConfig;
use crate::error::LoopError;

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Everything one invocation of the loop needs that isn't already baked
/// into the [`AgentLoop`]'s own collaborators. `#[non_exhaustive]` so a
/// caller outside this crate builds one through [`RunRequest::new`] plus
/// the `with_*` setters, keeping future additions non-breaking.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// The execution row's id. Caller-supplied so it can be correlated
    /// with whatever created the completion shell ahead of the loop.
    pub agent_execution_id: String,
    /// The assistant message this run produces.
    pub completion_id: String,
    /// The report this turn belongs to.
    pub report_id: String,
    /// Organization the turn executes under.
    pub organization_id: String,
    /// The user who triggered the turn.
    pub user_id: String,
    /// The user's message for this turn.
    pub user_message: String,
    /// External platform the request originated from.
    pub external_platform: Option<String>,
    /// Operating mode, passed through to the planner.
    pub mode: Option<String>,
    /// Current-turn `@`-mentions.
    pub mentions: Vec<compass_context::Mention>,
    /// Current-turn extracted entities.
    pub entities: Vec<compass_context::Entity>,
    /// Whether this is the first completion in its report (gates the
    /// report-title-synthesis side effect, which lives outside this
    /// crate — the loop only reports the flag back in [`LoopOutcome`]).
    pub is_first_completion_in_report: bool,
    /// The name of the last tool run elsewhere in this report, if any
    /// (feeds the instruction-suggestion trigger in §4.9.1).
    pub previous_tool_in_report: Option<String>,
    /// Opaque per-run configuration, stored verbatim on the execution
    /// row and otherwise uninterpreted by the loop.
    pub config: serde_json::Value,
    /// Static context sources this run primes its context hub from.
    pub static_sources: StaticSources,
    /// Sigkill handle. Cancelling it cuts the run short at the next
    /// checkpoint (between loop iterations, or mid-tool-attempt).
    pub sigkill: CancellationToken,
}

impl RunRequest {
    /// Build a request with its mandatory fields and every optional
    /// field left at its default.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        agent_execution_id: impl Into<String>,
        completion_id: impl Into<String>,
        report_id: impl Into<String>,
        organization_id: impl Into<String>,
        user_id: impl Into<String>,
        user_message: impl Into<String>,
        static_sources: StaticSources,
    ) -> Self {
        Self {
            agent_execution_id: agent_execution_id.into(),
            completion_id: completion_id.into(),
            report_id: report_id.into(),
            organization_id: organization_id.into(),
            user_id: user_id.into(),
            user_message: user_message.into(),
            external_platform: None,
            mode: None,
            mentions: Vec::new(),
            entities: Vec::new(),
            is_first_completion_in_report: false,
            previous_tool_in_report: None,
            config: serde_json::Value::Null,
            static_sources,
            sigkill: CancellationToken::new(),
        }
    }

    /// Builder-style override for `external_platform`.
    pub fn with_external_platform(mut self, platform: impl Into<String>) -> Self {
        self.external_platform = Some(platform.into());
        self
    }

    /// Builder-style override for `mode`.
    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = Some(mode.into());
        self
    }

    /// Builder-style override for `mentions`.
    pub fn with_mentions(mut self, mentions: Vec<compass_context::Mention>) -> Self {
        self.mentions = mentions;
        self
    }

    /// Builder-style override for `entities`.
    pub fn with_entities(mut self, entities: Vec<compass_context::Entity>) -> Self {
        self.entities = entities;
        self
    }

    /// Builder-style override for `is_first_completion_in_report`.
    pub fn with_is_first_completion_in_report(mut self, value: bool) -> Self {
        self.is_first_completion_in_report = value;
        self
    }

    /// Builder-style override for `previous_tool_in_report`.
    pub fn with_previous_tool_in_report(mut self, tool_name: impl Into<String>) -> Self {
        self.previous_tool_in_report = Some(tool_name.into());
        self
    }

    /// Builder-style override for `config`.
    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }

    /// Builder-style override for `sigkill`.
    pub fn with_sigkill(mut self, sigkill: CancellationToken) -> Self {
        self.sigkill = sigkill;
        self
    }
}

/// What the loop produced once it returned.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct LoopOutcome {
    /// The execution's terminal status.
    pub status: ExecutionStatus,
    /// How many loop iterations ran.
    pub loop_iterations: u32,
    /// The final answer, if the run reached `analysis_complete`.
    pub final_answer: Option<String>,
}

/// A candidate moment to offer the user a new standing instruction,
/// per §4.9.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuggestionTrigger {
    /// A `create_widget` action immediately followed a `clarify` action
    /// earlier in the same report — the clarification likely deserves
    /// to become a standing instruction.
    FollowsClarify,
    /// A `create_widget` action succeeded but reported validation
    /// errors in its own output.
    WidgetCreatedWithErrors,
}

/// Proposes a draft instruction in response to a [`SuggestionTrigger`].
/// Kept behind a trait so the loop doesn't depend on whatever model
/// call or templating backs the suggestion — tests wire in a stub,
/// production wires in a real one.
#[async_trait]
pub trait InstructionSuggester: Send + Sync {
    /// Produce a draft instruction's text, or `None` to decline.
    async fn suggest(
        &self,
        trigger: SuggestionTrigger,
        snapshot: &HubSnapshot,
    ) -> Option<String>;
}

/// Persists a suggested draft instruction for later user review. A
/// separate seam from [`InstructionSuggester`] because the two steps
/// (compose text, store it) have independent failure/observability
/// stories in the full system (§4.9.1).
#[async_trait]
pub trait DraftInstructionSink: Send + Sync {
    /// Store the drafted instruction text for `organization_id`.
    async fn save_draft(&self, organization_id: &str, text: String);
}

/// Declines every suggestion. The default when a caller doesn't wire
/// in a real suggester.
pub struct NoopInstructionSuggester;

#[async_trait]
impl InstructionSuggester for NoopInstructionSuggester {
    async fn suggest(&self, _trigger: SuggestionTrigger, _snapshot: &HubSnapshot) -> Option<String> {
        None
    }
}

/// Discards every draft. The default when a caller doesn't wire in a
/// real sink.
pub struct NoopDraftInstructionSink;

#[async_trait]
impl DraftInstructionSink for NoopDraftInstructionSink {
    async fn save_draft(&self, _organization_id: &str, _text: String) {}
}

/// The plan-act-observe loop (§4.9): the orchestration core's heart.
///
/// Wires together a tool registry, a planner, an event bus, and a
/// persistence gateway, then drives [`RunRequest`]s through them one
/// loop iteration at a time. Hooks and instruction suggestion are
/// optional collaborators with no-op defaults, matching how
/// `layer0::Hook` is meant to be composed in — the loop doesn't know
/// or care who's watching.
pub struct AgentLoop {
    tools: Arc<ToolRegistry>,
    planner: Arc<dyn Planner>,
    events: Arc<EventBus>,
    persistence: Arc<dyn PersistenceGateway>,
    hooks: Arc<compass_hooks::HookRegistry>,
    suggester: Arc<dyn InstructionSuggester>,
    drafts: Arc<dyn DraftInstructionSink>,
    config: LoopConfig,
}

impl AgentLoop {
    /// Build a loop from its mandatory collaborators, with no-op hooks
    /// and instruction suggestion and a default [`LoopConfig`].
    pub fn new(
        tools: Arc<ToolRegistry>,
        planner: Arc<dyn Planner>,
        events: Arc<EventBus>,
        persistence: Arc<dyn PersistenceGateway>,
    ) -> Self {
        Self {
            tools,
            planner,
            events,
            persistence,
            hooks: Arc::new(compass_hooks::HookRegistry::new()),
            suggester: Arc::new(NoopInstructionSuggester),
            drafts: Arc::new(NoopDraftInstructionSink),
            config: LoopConfig::default(),
        }
    }

    /// Builder-style override for `config`.
    pub fn with_config(mut self, config: LoopConfig) -> Self {
        self.config = config;
        self
    }

    /// Builder-style override for `hooks`.
    pub fn with_hooks(mut self, hooks: Arc<compass_hooks::HookRegistry>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Builder-style override for the instruction suggester.
    pub fn with_suggester(mut self, suggester: Arc<dyn InstructionSuggester>) -> Self {
        self.suggester = suggester;
        self
    }

    /// Builder-style override for the draft instruction sink.
    pub fn with_draft_sink(mut self, drafts: Arc<dyn DraftInstructionSink>) -> Self {
        self.drafts = drafts;
        self
    }

    /// Allocate the next `seq` and emit a frame under it.
    async fn emit(
        &self,
        request: &RunRequest,
        event: &str,
        data: serde_json::Value,
    ) -> Result<(), LoopError> {
        let seq = self.persistence.next_seq(&request.agent_execution_id).await?;
        self.events.emit(EventFrame::new(
            event,
            request.completion_id.clone(),
            request.agent_execution_id.clone(),
            seq,
            data,
        ));
        Ok(())
    }

    /// Run one [`RunRequest`] through the loop to a terminal status.
    ///
    /// Never returns `Err`: every failure this loop can recover from is
    /// folded into a terminal `ExecutionStatus::Error` and persisted as
    /// such (§4.10's split between fatal decision/tool rows and
    /// best-effort snapshot/block writes means a decision- or
    /// tool-execution write failure is the only thing that can still
    /// surface as `Err`, since there is then no reliable way left to
    /// record the failure itself).
    pub async fn run(&self, request: RunRequest) -> Result<LoopOutcome, LoopError> {
        let started_at = now_ms();
        self.persistence
            .start_execution(AgentExecution::start(
                request.agent_execution_id.clone(),
                request.completion_id.clone(),
                request.report_id.clone(),
                request.organization_id.clone(),
                request.user_id.clone(),
                started_at,
                request.config.clone(),
            ))
            .await?;
        self.emit(&request, vocabulary::COMPLETION_STARTED, serde_json::json!({}))
            .await?;

        let mut hub = ContextHub::new();
        hub.prime(request.static_sources.clone(), &request.user_message);

        let mut observations = ObservationAccumulator::new();
        let mut breakers = CircuitBreakers::new(&self.config);
        let mut invalid_retries: u32 = 0;
        let mut loop_index: u32 = 0;
        let mut final_answer: Option<String> = None;
        let mut cancelled = false;
        let mut failure: Option<String> = None;

        'outer: while loop_index < self.config.step_limit {
            tracing::info!(
                agent_execution_id = %request.agent_execution_id,
                loop_index,
                "loop iteration boundary"
            );
            if request.sigkill.is_cancelled() {
                cancelled = true;
                break 'outer;
            }

            let exit_ctx = {
                let mut ctx = HookContext::new(HookPoint::ExitCheck);
                ctx.turns_completed = loop_index;
                ctx.elapsed = layer0::DurationMs::from_millis((now_ms() - started_at).max(0) as u64);
                ctx
            };
            if let HookAction::Halt { reason } = self.hooks.dispatch(&exit_ctx).await {
                failure = Some(reason);
                break 'outer;
            }

            let research = ResearchContext {
                messages: Vec::new(),
                observation_history: observations.build_context(true, self.config.observation_window),
                widgets: Vec::new(),
                mentions: request.mentions.clone(),
                entities: request.entities.clone(),
                queries: Vec::new(),
                candidate_data_model_columns: None,
            };
            let snapshot = hub.build_context(&request.user_message, research, loop_index)?;

            let snapshot_kind = if loop_index == 0 {
                SnapshotKind::Initial
            } else {
                SnapshotKind::PreTool
            };
            let _ = self
                .persistence
                .save_context_snapshot(PersistedSnapshot {
                    id: format!("snapshot-{}-{}", request.agent_execution_id, loop_index),
                    agent_execution_id: request.agent_execution_id.clone(),
                    kind: snapshot_kind,
                    context_view: serde_json::to_value(&snapshot).unwrap_or(serde_json::Value::Null),
                    prompt_text: None,
                    prompt_tokens: Some(snapshot.estimated_tokens as u64),
                    taken_at: now_ms(),
                })
                .await;

            // Assemble and validate the planner input, retrying in place
            // (without advancing `loop_index`) on a validation failure up
            // to `max_invalid_retries`.
            let planner_input = loop {
                let mut seen = std::collections::HashSet::new();
                let mut catalog: Vec<compass_tool::ToolDescriptor> = Vec::new();
                for plan_type in [compass_tool::PlanType::Research, compass_tool::PlanType::Action] {
                    for descriptor in self.tools.get_catalog_for_plan_type(plan_type) {
                        if seen.insert(descriptor.name.clone()) {
                            catalog.push(descriptor.clone());
                        }
                    }
                }
                let mut input = PlannerInput::new(
                    request.organization_id.clone(),
                    request.user_message.clone(),
                    catalog,
                    request
                        .external_platform
                        .clone()
                        .unwrap_or_else(|| self.config.default_external_platform.clone()),
                    request.mode.clone().unwrap_or_else(|| self.config.default_mode.clone()),
                )
                .with_instructions(serde_json::to_value(&snapshot.instructions).unwrap_or_default())
                .with_schemas(snapshot.schemas.clone())
                .with_messages(snapshot.messages.clone())
                .with_resources(snapshot.resources.clone())
                .with_files(serde_json::to_value(&snapshot.files).unwrap_or_default())
                .with_mentions(serde_json::to_value(&snapshot.mentions).unwrap_or_default())
                .with_entities(serde_json::to_value(&snapshot.entities).unwrap_or_default())
                .with_past_observations(snapshot.observation_history.clone());

                if let Some(latest) = observations.latest() {
                    input = input.with_last_observation(serde_json::to_value(latest).unwrap_or_default());
                }

                match compass_planner::validate_planner_input(&input) {
                    Ok(()) => break input,
                    Err(e) => {
                        invalid_retries += 1;
                        let obs = Observation::failed(
                            format!("planner input invalid: {e}"),
                            "invalid_input",
                            e.to_string(),
                        );
                        observations.add_tool_observation(
                            "__planner_input__",
                            serde_json::Value::Null,
                            obs,
                            ObservationPolicy::OnTrigger,
                            now_ms(),
                        );
                        self.emit(
                            &request,
                            vocabulary::PLANNER_RETRY,
                            serde_json::json!({"reason": e.to_string()}),
                        )
                        .await?;
                        if invalid_retries > self.config.max_invalid_retries {
                            failure = Some(format!("planner input invalid after retries: {e}"));
                            break 'outer;
                        }
                        continue;
                    }
                }
            };

            let pre_inference = HookContext::new(HookPoint::PreInference);
            if let HookAction::Halt { reason } = self.hooks.dispatch(&pre_inference).await {
                failure = Some(reason);
                break 'outer;
            }

            let decision_id = format!("decision-{}-{}", request.agent_execution_id, loop_index);
            let decision_seq = self.persistence.next_seq(&request.agent_execution_id).await?;
            let mut streamer = ThrottledStreamer::new();
            streamer.set_block(format!("block-{decision_id}"));

            let (tx, mut rx) = mpsc::channel::<PlannerStreamEvent>(64);
            let stream_fut = self.planner.stream(planner_input, tx);
            tokio::pin!(stream_fut);

            // `stream_fut` must keep being polled (it's the actual call
            // doing the work) independent of draining `rx`, which is why
            // its completion is only recorded rather than treated as the
            // loop's exit condition: a `DecisionFinal` sitting in the
            // channel buffer when the future happens to resolve on the
            // same poll must still be drained, not dropped.
            let mut final_decision: Option<PlannerDecision> = None;
            let mut stream_result: Option<Result<(), compass_planner::PlannerInvocationError>> = None;
            'stream: loop {
                tokio::select! {
                    biased;
                    _ = request.sigkill.cancelled() => {
                        cancelled = true;
                        break 'stream;
                    }
                    res = &mut stream_fut, if stream_result.is_none() => {
                        stream_result = Some(res);
                    }
                    maybe_event = rx.recv() => {
                        match maybe_event {
                            Some(PlannerStreamEvent::Tokens { .. }) => {}
                            Some(PlannerStreamEvent::DecisionPartial(partial)) => {
                                let row = build_plan_decision(&decision_id, &request.agent_execution_id, decision_seq, loop_index, &partial);
                                let _ = self.persistence.save_plan_decision(row, now_ms()).await;
                                let deltas = streamer.update(
                                    partial.reasoning_message.as_deref().unwrap_or(""),
                                    partial.assistant_message.as_deref().unwrap_or(""),
                                    now_ms(),
                                );
                                for delta in deltas {
                                    self.emit(
                                        &request,
                                        vocabulary::BLOCK_DELTA_ARTIFACT,
                                        serde_json::to_value(&delta).unwrap_or_default(),
                                    )
                                    .await?;
                                }
                                if partial.has_renderable_partial_text() {
                                    self.emit(
                                        &request,
                                        vocabulary::DECISION_PARTIAL,
                                        serde_json::to_value(&partial).unwrap_or_default(),
                                    )
                                    .await?;
                                }
                            }
                            Some(PlannerStreamEvent::DecisionFinal(decision)) => {
                                final_decision = Some(decision);
                                break 'stream;
                            }
                            None => break 'stream,
                        }
                    }
                }
            }

            if cancelled {
                break 'outer;
            }

            let Some(decision) = final_decision else {
                failure = match stream_result {
                    Some(Err(e)) => Some(e.to_string()),
                    _ => Some("planner stream ended with no final decision".to_string()),
                };
                break 'outer;
            };

            if decision.is_error() {
                invalid_retries += 1;
                let err = decision.error.clone().expect("is_error checked above");
                let obs = Observation::failed(
                    format!("planner decoding failed: {}", err.message),
                    err.code.clone(),
                    err.message.clone(),
                );
                observations.add_tool_observation(
                    "__planner_decode__",
                    serde_json::Value::Null,
                    obs,
                    ObservationPolicy::OnTrigger,
                    now_ms(),
                );
                self.emit(
                    &request,
                    vocabulary::PLANNER_RETRY,
                    serde_json::json!({"reason": err.message}),
                )
                .await?;
                if invalid_retries > self.config.max_invalid_retries {
                    failure = Some(format!("planner decoding failed after retries: {}", err.message));
                    break 'outer;
                }
                continue 'outer;
            }

            let decision_row = build_plan_decision(&decision_id, &request.agent_execution_id, decision_seq, loop_index, &decision);
            self.persistence.save_plan_decision(decision_row, now_ms()).await?;
            let final_deltas = streamer.complete(
                decision.reasoning_message.as_deref().unwrap_or(""),
                decision.assistant_message.as_deref().unwrap_or(""),
                now_ms(),
            );
            for delta in final_deltas {
                self.emit(
                    &request,
                    vocabulary::BLOCK_DELTA_ARTIFACT,
                    serde_json::to_value(&delta).unwrap_or_default(),
                )
                .await?;
            }
            self.emit(
                &request,
                vocabulary::DECISION_FINAL,
                serde_json::to_value(&decision).unwrap_or_default(),
            )
            .await?;

            let post_inference = HookContext::new(HookPoint::PostInference);
            if let HookAction::Halt { reason } = self.hooks.dispatch(&post_inference).await {
                failure = Some(reason);
                break 'outer;
            }

            if decision.analysis_complete {
                final_answer = decision.final_answer.clone();
                self.maybe_suggest_instruction(&request, &decision, &snapshot, &mut observations)
                    .await;
                break 'outer;
            }

            let Some(action) = decision.action.clone() else {
                // A research-type decision with no action simply
                // advances the loop (another round of investigation).
                loop_index += 1;
                continue 'outer;
            };

            if let Err(missing_action_retry) = self.validate_action(&action, &decision, &mut invalid_retries) {
                if missing_action_retry {
                    continue 'outer;
                }
                failure = Some(format!(
                    "action '{}' could not be resolved after retries",
                    action.name
                ));
                break 'outer;
            }

            let plan_type = decision.plan_type.unwrap_or(compass_tool::PlanType::Research);
            if !self.tools.validate_tool_for_plan_type(&action.name, plan_type) {
                let obs = Observation::failed(
                    format!("tool '{}' not permitted for plan type {plan_type}", action.name),
                    "not_permitted",
                    format!("tool '{}' not permitted for plan type {plan_type}", action.name),
                );
                observations.add_tool_observation(
                    action.name.clone(),
                    action.arguments.clone(),
                    obs,
                    ObservationPolicy::OnTrigger,
                    now_ms(),
                );
                loop_index += 1;
                continue 'outer;
            }

            let mut arguments = action.arguments.clone();
            let pre_tool = {
                let mut ctx = HookContext::new(HookPoint::PreToolUse);
                ctx.tool_name = Some(action.name.clone());
                ctx.tool_input = Some(arguments.clone());
                ctx
            };
            match self.hooks.dispatch(&pre_tool).await {
                HookAction::Halt { reason } => {
                    failure = Some(reason);
                    break 'outer;
                }
                HookAction::SkipTool { reason } => {
                    let obs = Observation::failed(format!("skipped by policy: {reason}"), "skipped", reason);
                    observations.add_tool_observation(
                        action.name.clone(),
                        arguments,
                        obs,
                        ObservationPolicy::OnTrigger,
                        now_ms(),
                    );
                    loop_index += 1;
                    continue 'outer;
                }
                HookAction::ModifyToolInput { new_input } => arguments = new_input,
                _ => {}
            }

            let Some(tool) = self.tools.get(&action.name) else {
                failure = Some(format!("tool '{}' vanished from the registry mid-run", action.name));
                break 'outer;
            };
            let descriptor = tool.descriptor().clone();
            let tool_execution_id = format!("tool-{}-{}", request.agent_execution_id, loop_index);
            let attempt_started = now_ms();
            self.persistence
                .start_tool_execution(ToolExecution::start(
                    tool_execution_id.clone(),
                    request.agent_execution_id.clone(),
                    Some(decision_id.clone()),
                    action.name.clone(),
                    action.action_type.clone(),
                    arguments.clone(),
                    attempt_started,
                    1,
                    descriptor.max_retries,
                ))
                .await?;
            self.emit(
                &request,
                vocabulary::TOOL_STARTED,
                serde_json::json!({"tool_name": action.name, "arguments": arguments}),
            )
            .await?;

            let runtime_ctx = RuntimeContext::new(request.agent_execution_id.clone(), plan_type, request.sigkill.clone());
            let timeout_policy = TimeoutPolicy::from_descriptor(&descriptor);
            let retry_policy = RetryPolicy::from_descriptor(&descriptor);
            let (tool_tx, mut tool_rx) = mpsc::channel::<ToolEvent>(64);
            let run_fut = run_with_policies(
                tool.as_ref(),
                arguments.clone(),
                runtime_ctx,
                timeout_policy,
                retry_policy,
                tool_tx,
            );
            tokio::pin!(run_fut);

            let mut tool_result: Option<Result<Observation, ToolError>> = None;
            while tool_result.is_none() {
                tokio::select! {
                    biased;
                    res = &mut run_fut => tool_result = Some(res),
                    maybe_event = tool_rx.recv() => {
                        if let Some(event) = maybe_event {
                            self.forward_tool_event(&request, &event).await?;
                        }
                    }
                }
            }
            let tool_result = tool_result.expect("loop only exits once set");

            let completed_at = now_ms();
            match tool_result {
                Ok(observation) => {
                    let post_tool = {
                        let mut ctx = HookContext::new(HookPoint::PostToolUse);
                        ctx.tool_name = Some(action.name.clone());
                        ctx.tool_result = Some(observation.summary.clone());
                        ctx
                    };
                    let _ = self.hooks.dispatch(&post_tool).await;

                    self.persistence
                        .finish_tool_execution(
                            &tool_execution_id,
                            true,
                            completed_at,
                            Some(observation.summary.clone()),
                            observation.artifacts.clone(),
                            None,
                        )
                        .await?;
                    self.emit(
                        &request,
                        vocabulary::TOOL_FINISHED,
                        serde_json::json!({"tool_name": action.name, "success": true, "observation": &observation}),
                    )
                    .await?;
                    if observation.widget_id.is_some() {
                        self.emit(
                            &request,
                            vocabulary::VISUALIZATION_UPDATED,
                            serde_json::json!({"widget_id": observation.widget_id}),
                        )
                        .await?;
                    }

                    let signature = format!("{}:{}", action.name, arguments);
                    if let Some(BreakerTrip::RepeatedSuccess { action: sig, count }) =
                        breakers.record_tool_success(&action.name, signature)
                    {
                        tracing::warn!(
                            agent_execution_id = %request.agent_execution_id,
                            loop_index,
                            action = %sig,
                            count,
                            "repeated-success circuit breaker tripped"
                        );
                        final_answer = Some(format!(
                            "Stopping: the same action ({sig}) has now succeeded {count} times in a row without new progress."
                        ));
                        observations.add_tool_observation(
                            action.name.clone(),
                            arguments.clone(),
                            observation,
                            descriptor.observation_policy,
                            completed_at,
                        );
                        break 'outer;
                    }
                    observations.add_tool_observation(
                        action.name.clone(),
                        arguments.clone(),
                        observation,
                        descriptor.observation_policy,
                        completed_at,
                    );
                }
                Err(ToolError::Cancelled) => {
                    let _ = self
                        .persistence
                        .finish_tool_execution(
                            &tool_execution_id,
                            false,
                            completed_at,
                            Some("cancelled".to_string()),
                            None,
                            Some("execution was cancelled".to_string()),
                        )
                        .await;
                    cancelled = true;
                    break 'outer;
                }
                Err(err) => {
                    self.persistence
                        .finish_tool_execution(
                            &tool_execution_id,
                            false,
                            completed_at,
                            Some(err.to_string()),
                            None,
                            Some(err.to_string()),
                        )
                        .await?;
                    self.emit(
                        &request,
                        vocabulary::TOOL_FINISHED,
                        serde_json::json!({"tool_name": action.name, "success": false, "error": err.to_string()}),
                    )
                    .await?;

                    let obs = Observation::failed(err.to_string(), "tool_error", err.to_string());
                    if let Some(BreakerTrip::ToolFailures { tool_name, count }) =
                        breakers.record_tool_failure(&action.name)
                    {
                        tracing::warn!(
                            agent_execution_id = %request.agent_execution_id,
                            loop_index,
                            tool = %tool_name,
                            count,
                            "tool-failure circuit breaker tripped"
                        );
                        final_answer = Some(format!(
                            "Stopping: '{tool_name}' has now failed {count} times in a row."
                        ));
                        observations.add_tool_observation(
                            action.name.clone(),
                            arguments.clone(),
                            obs,
                            descriptor.observation_policy,
                            completed_at,
                        );
                        break 'outer;
                    }
                    observations.add_tool_observation(
                        action.name.clone(),
                        arguments.clone(),
                        obs,
                        descriptor.observation_policy,
                        completed_at,
                    );
                }
            }

            let post_tool_research = ResearchContext {
                messages: Vec::new(),
                observation_history: observations.build_context(true, self.config.observation_window),
                widgets: Vec::new(),
                mentions: request.mentions.clone(),
                entities: request.entities.clone(),
                queries: Vec::new(),
                candidate_data_model_columns: None,
            };
            if let Ok(post_snapshot) = hub.build_context(&request.user_message, post_tool_research, loop_index) {
                let _ = self
                    .persistence
                    .save_context_snapshot(PersistedSnapshot {
                        id: format!("snapshot-{}-{}-post", request.agent_execution_id, loop_index),
                        agent_execution_id: request.agent_execution_id.clone(),
                        kind: SnapshotKind::PostTool,
                        context_view: serde_json::to_value(&post_snapshot).unwrap_or(serde_json::Value::Null),
                        prompt_text: None,
                        prompt_tokens: Some(post_snapshot.estimated_tokens as u64),
                        taken_at: now_ms(),
                    })
                    .await;
            }

            loop_index += 1;
        }

        let finished_at = now_ms();
        let status = if cancelled {
            ExecutionStatus::Sigkill
        } else if failure.is_some() {
            ExecutionStatus::Error
        } else {
            ExecutionStatus::Success
        };

        // Allocate every terminal event's seq before finalizing — once
        // the execution leaves `in_progress`, `next_seq` stops working.
        // The error path emits two frames (`completion.error` then
        // `completion.finished`), so each needs its own seq or the two
        // would violate the strictly-increasing invariant.
        let error_seq = if status == ExecutionStatus::Error {
            self.persistence.next_seq(&request.agent_execution_id).await.ok()
        } else {
            None
        };
        let terminal_seq = self.persistence.next_seq(&request.agent_execution_id).await.ok();

        match status {
            ExecutionStatus::Error => {
                let message = failure.clone().unwrap_or_else(|| "unknown error".to_string());
                self.persistence
                    .fail_execution(&request.agent_execution_id, &message, finished_at)
                    .await?;
                if let Some(seq) = error_seq {
                    self.events.emit(EventFrame::new(
                        vocabulary::COMPLETION_ERROR,
                        request.completion_id.clone(),
                        request.agent_execution_id.clone(),
                        seq,
                        serde_json::json!({"message": message}),
                    ));
                }
            }
            ExecutionStatus::Sigkill => {
                self.persistence
                    .sigkill_execution(&request.agent_execution_id, finished_at)
                    .await?;
            }
            ExecutionStatus::Success => {
                self.persistence
                    .complete_execution(&request.agent_execution_id, finished_at)
                    .await?;
            }
            ExecutionStatus::InProgress => unreachable!("loop only finalizes into a terminal status"),
        }

        if let Some(seq) = terminal_seq {
            self.events.emit(EventFrame::new(
                vocabulary::COMPLETION_FINISHED,
                request.completion_id.clone(),
                request.agent_execution_id.clone(),
                seq,
                serde_json::json!({"status": format!("{status:?}"), "loop_iterations": loop_index}),
            ));
        }
        self.events.finish(&request.agent_execution_id);

        Ok(LoopOutcome {
            status,
            loop_iterations: loop_index,
            final_answer,
        })
    }

    /// Checks an action against the decision it came from. Returns
    /// `Err(true)` when the caller should retry in place (bumping the
    /// invalid-retry count), `Err(false)` when retries are exhausted.
    fn validate_action(
        &self,
        action: &PlannerAction,
        decision: &PlannerDecision,
        invalid_retries: &mut u32,
    ) -> Result<(), bool> {
        if decision.plan_type == Some(compass_tool::PlanType::Action) && action.name.is_empty() {
            *invalid_retries += 1;
            return Err(*invalid_retries <= self.config.max_invalid_retries);
        }
        Ok(())
    }

    async fn forward_tool_event(&self, request: &RunRequest, event: &ToolEvent) -> Result<(), LoopError> {
        match event {
            ToolEvent::Progress { stage, data } => {
                if stage == "data_model_type_determined" {
                    self.emit(request, vocabulary::QUERY_CREATED, data.clone()).await?;
                }
                self.emit(
                    request,
                    vocabulary::TOOL_PROGRESS,
                    serde_json::json!({"stage": stage, "data": data}),
                )
                .await?;
            }
            ToolEvent::Partial { data } => {
                self.emit(request, vocabulary::TOOL_PARTIAL, data.clone()).await?;
            }
            ToolEvent::Stdout { chunk } => {
                self.emit(request, vocabulary::TOOL_STDOUT, serde_json::json!({"chunk": chunk}))
                    .await?;
            }
            _ => {}
        }
        Ok(())
    }

    /// §4.9.1: after a tool attempt, offer the user a standing
    /// instruction when a trigger condition fires. Never fatal —
    /// failures here are swallowed since a declined or failed
    /// suggestion shouldn't affect the run's outcome.
    async fn maybe_suggest_instruction(
        &self,
        request: &RunRequest,
        _decision: &PlannerDecision,
        snapshot: &HubSnapshot,
        observations: &mut ObservationAccumulator,
    ) {
        let ran_create_widget = observations
            .history()
            .iter()
            .any(|entry| entry.tool_name == "create_widget");
        if !ran_create_widget {
            return;
        }

        let widget_has_errors = observations.history().iter().any(|entry| {
            entry.tool_name == "create_widget"
                && entry
                    .observation
                    .artifacts
                    .as_ref()
                    .and_then(|v| v.get("errors"))
                    .and_then(|e| e.as_array())
                    .is_some_and(|arr| !arr.is_empty())
        });

        let trigger = if request.previous_tool_in_report.as_deref() == Some("clarify") {
            Some(SuggestionTrigger::FollowsClarify)
        } else if widget_has_errors {
            Some(SuggestionTrigger::WidgetCreatedWithErrors)
        } else {
            None
        };

        let Some(trigger) = trigger else {
            return;
        };

        let _ = self
            .emit(request, vocabulary::INSTRUCTIONS_SUGGEST_STARTED, serde_json::json!({}))
            .await;
        if let Some(draft) = self.suggester.suggest(trigger, snapshot).await {
            self.drafts.save_draft(&request.organization_id, draft.clone()).await;
            let _ = self
                .emit(
                    request,
                    vocabulary::INSTRUCTIONS_SUGGEST_PARTIAL,
                    serde_json::json!({"draft": draft}),
                )
                .await;
        }
        let _ = self
            .emit(request, vocabulary::INSTRUCTIONS_SUGGEST_FINISHED, serde_json::json!({}))
            .await;
    }
}

/// Convert a streamed/finalized [`PlannerDecision`] into the persisted
/// row shape, defaulting an unset `plan_type` to `research` (the
/// planner hasn't committed to a direction on the earliest partials).
fn build_plan_decision(
    id: &str,
    agent_execution_id: &str,
    seq: i64,
    loop_index: u32,
    decision: &PlannerDecision,
) -> PlanDecision {
    PlanDecision {
        id: id.to_string(),
        agent_execution_id: agent_execution_id.to_string(),
        seq,
        loop_index,
        plan_type: decision
            .plan_type
            .map(PlanType::from)
            .unwrap_or(PlanType::Research),
        analysis_complete: decision.analysis_complete,
        reasoning: decision.reasoning_message.clone(),
        assistant: decision.assistant_message.clone(),
        final_answer: decision.final_answer.clone(),
        action_name: decision.action.as_ref().map(|a| a.name.clone()),
        action_args: decision.action.as_ref().map(|a| a.arguments.clone()),
        metrics: decision.metrics.clone(),
    }
}
