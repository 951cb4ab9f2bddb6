//! End-to-end exercises of the agent loop against in-memory
//! collaborators: no real planner, no real tools, no real database —
//! just the wiring the orchestration core itself owns.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc::Sender;
use tokio_util::sync::CancellationToken;

use compass_context::StaticSources;
use compass_events::{EventBus, StreamItem};
use compass_persistence::{ExecutionStatus, InMemoryPersistence};
use compass_planner::test_utils::ScriptedPlanner;
use compass_planner::{PlannerAction, PlannerDecision};
use compass_tool::{
    Observation, ObservationPolicy, RuntimeContext, Tool, ToolCategory, ToolDescriptor, ToolError,
    ToolEvent, ToolRegistry,
};
use compass_loop::{AgentLoop, InstructionSuggester, DraftInstructionSink, SuggestionTrigger, RunRequest};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Test tools
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Always succeeds immediately with a fixed summary.
struct AnswerQuestionTool(ToolDescriptor);

impl AnswerQuestionTool {
    fn new() -> Self {
        Self(
            ToolDescriptor::new(
                "answer_question",
                "answer the user directly",
                ToolCategory::Action,
                json!({"type": "object"}),
            )
            .with_observation_policy(ObservationPolicy::OnSuccess),
        )
    }
}

#[async_trait]
impl Tool for AnswerQuestionTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.0
    }

    async fn run_stream(
        &self,
        _input: serde_json::Value,
        _ctx: RuntimeContext,
        events: Sender<ToolEvent>,
    ) -> Result<(), ToolError> {
        let _ = events
            .send(ToolEvent::End {
                output: json!({"columns": ["id", "name"]}),
                observation: Observation::new("table X has columns id, name"),
            })
            .await;
        Ok(())
    }
}

/// Always fails immediately with an execution error.
struct AlwaysFailsTool(ToolDescriptor);

impl AlwaysFailsTool {
    fn new() -> Self {
        Self(ToolDescriptor::new(
            "broken_tool",
            "always fails",
            ToolCategory::Action,
            json!({"type": "object"}),
        ))
    }
}

#[async_trait]
impl Tool for AlwaysFailsTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.0
    }

    async fn run_stream(
        &self,
        _input: serde_json::Value,
        _ctx: RuntimeContext,
        events: Sender<ToolEvent>,
    ) -> Result<(), ToolError> {
        let _ = events
            .send(ToolEvent::Error {
                message: "upstream service unavailable".to_string(),
                retryable: false,
            })
            .await;
        Ok(())
    }
}

/// Never finishes until its sigkill token fires, then drops its
/// sender without an `End`/`Error` frame — the runtime's own
/// cancellation path (not this tool) is what produces the outcome.
struct HangsUntilCancelledTool(ToolDescriptor);

impl HangsUntilCancelledTool {
    fn new() -> Self {
        Self(ToolDescriptor::new(
            "slow_tool",
            "hangs until cancelled",
            ToolCategory::Action,
            json!({"type": "object"}),
        ))
    }
}

#[async_trait]
impl Tool for HangsUntilCancelledTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.0
    }

    async fn run_stream(
        &self,
        _input: serde_json::Value,
        ctx: RuntimeContext,
        events: Sender<ToolEvent>,
    ) -> Result<(), ToolError> {
        let _ = events.send(ToolEvent::Start).await;
        ctx.sigkill.cancelled().await;
        Ok(())
    }
}

/// Succeeds with a widget/step id and no errors, never sets
/// `analysis_complete` itself — the next planner call does that.
struct CreateWidgetTool(ToolDescriptor);

impl CreateWidgetTool {
    fn new() -> Self {
        Self(ToolDescriptor::new(
            "create_widget",
            "build a chart widget",
            ToolCategory::Action,
            json!({"type": "object"}),
        ))
    }
}

#[async_trait]
impl Tool for CreateWidgetTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.0
    }

    async fn run_stream(
        &self,
        _input: serde_json::Value,
        _ctx: RuntimeContext,
        events: Sender<ToolEvent>,
    ) -> Result<(), ToolError> {
        let mut observation = Observation::new("created revenue-by-month widget");
        observation.step_id = Some("step-1".to_string());
        observation.widget_id = Some("widget-1".to_string());
        observation.artifacts = Some(json!({"data_model": {"columns": ["month", "revenue"]}}));
        let _ = events
            .send(ToolEvent::End {
                output: json!({"widget_id": "widget-1"}),
                observation,
            })
            .await;
        Ok(())
    }
}

/// Succeeds, but its own result carries a non-empty `errors` list —
/// the trigger for the instruction-suggestion post-step's condition B.
struct CreateWidgetWithErrorsTool(ToolDescriptor);

impl CreateWidgetWithErrorsTool {
    fn new() -> Self {
        Self(ToolDescriptor::new(
            "create_widget",
            "build a chart widget",
            ToolCategory::Action,
            json!({"type": "object"}),
        ))
    }
}

#[async_trait]
impl Tool for CreateWidgetWithErrorsTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.0
    }

    async fn run_stream(
        &self,
        _input: serde_json::Value,
        _ctx: RuntimeContext,
        events: Sender<ToolEvent>,
    ) -> Result<(), ToolError> {
        let mut observation = Observation::new("created widget after internal retries");
        observation.widget_id = Some("widget-2".to_string());
        observation.artifacts = Some(json!({"errors": ["retried column inference once"]}));
        let _ = events
            .send(ToolEvent::End {
                output: json!({"widget_id": "widget-2"}),
                observation,
            })
            .await;
        Ok(())
    }
}

/// An [`InstructionSuggester`] that always drafts a fixed suggestion,
/// recording which trigger it was invoked with.
struct AlwaysSuggests {
    last_trigger: std::sync::Mutex<Option<SuggestionTrigger>>,
}

impl AlwaysSuggests {
    fn new() -> Self {
        Self {
            last_trigger: std::sync::Mutex::new(None),
        }
    }
}

#[async_trait]
impl InstructionSuggester for AlwaysSuggests {
    async fn suggest(
        &self,
        trigger: SuggestionTrigger,
        _snapshot: &compass_context::ContextSnapshot,
    ) -> Option<String> {
        *self.last_trigger.lock().unwrap() = Some(trigger);
        Some("when asked about revenue, default to monthly granularity".to_string())
    }
}

/// Records every draft it's handed.
struct RecordingDraftSink {
    drafts: std::sync::Mutex<Vec<(String, String)>>,
}

impl RecordingDraftSink {
    fn new() -> Self {
        Self {
            drafts: std::sync::Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl DraftInstructionSink for RecordingDraftSink {
    async fn save_draft(&self, organization_id: &str, text: String) {
        self.drafts
            .lock()
            .unwrap()
            .push((organization_id.to_string(), text));
    }
}

fn decision(
    plan_type: compass_tool::PlanType,
    analysis_complete: bool,
    action: Option<PlannerAction>,
    final_answer: Option<&str>,
) -> PlannerDecision {
    // PlannerDecision is #[non_exhaustive]; build from its Default and
    // assign fields rather than using struct-literal syntax.
    PlannerDecision {
        plan_type: Some(plan_type),
        reasoning_message: Some("thinking".to_string()),
        assistant_message: Some("working on it".to_string()),
        analysis_complete,
        final_answer: final_answer.map(|s| s.to_string()),
        action,
        ..Default::default()
    }
}

fn action(name: &str) -> PlannerAction {
    PlannerAction::new(name, json!({}))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// S1 — direct answer, one iteration, clean success
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn direct_answer_completes_in_one_iteration() {
    let mut tools = ToolRegistry::new();
    tools.register(Arc::new(AnswerQuestionTool::new()));

    // First call selects the tool; once its observation comes back,
    // the scripted planner's second call finalizes with
    // analysis_complete.
    let planner = Arc::new(ScriptedPlanner::new(vec![
        decision(
            compass_tool::PlanType::Action,
            false,
            Some(action("answer_question")),
            None,
        ),
        decision(compass_tool::PlanType::Action, true, None, Some("table X has columns id, name")),
    ]));

    let events = Arc::new(EventBus::new());
    let persistence = Arc::new(InMemoryPersistence::new());
    let agent_loop = AgentLoop::new(Arc::new(tools), planner, events.clone(), persistence.clone());

    let mut subscriber = events.subscribe("exec-s1");
    let request = RunRequest::new(
        "exec-s1",
        "completion-s1",
        "report-s1",
        "org-1",
        "user-1",
        "What columns does table X have?",
        StaticSources::default(),
    );

    let outcome = agent_loop.run(request).await.expect("loop never returns Err for recoverable failures");

    assert_eq!(outcome.status, ExecutionStatus::Success);
    assert_eq!(outcome.loop_iterations, 1);
    assert_eq!(outcome.final_answer.as_deref(), Some("table X has columns id, name"));

    let blocks = persistence.blocks_for("exec-s1").await.unwrap();
    // Two decision blocks, one per planner call: step 6 breaks on
    // `analysis_complete` before step 7 extracts and runs an action, so
    // the tool-running decision and the finalizing decision can never
    // be the same iteration. See the S1 note in DESIGN.md.
    assert_eq!(blocks.len(), 2, "one decision block per iteration");
    assert!(blocks[0].title.contains("answer_question"));

    // Drain a few frames to confirm ordering: decision.final always
    // precedes tool.started, which precedes tool.finished.
    let mut seen = Vec::new();
    while let Some(StreamItem::Frame(frame)) = subscriber.recv().await {
        seen.push(frame.event.clone());
        if frame.event == "completion.finished" {
            break;
        }
    }
    let first_decision_final = seen.iter().position(|e| e == "decision.final").unwrap();
    let first_tool_started = seen.iter().position(|e| e == "tool.started").unwrap();
    assert!(first_decision_final < first_tool_started);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// S4 — repeated tool failure trips the circuit breaker
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn repeated_tool_failure_trips_breaker_and_still_succeeds() {
    let mut tools = ToolRegistry::new();
    tools.register(Arc::new(AlwaysFailsTool::new()));

    // The planner keeps retrying the same broken action every
    // iteration; it never reaches analysis_complete on its own — the
    // breaker has to terminate the run.
    let planner = Arc::new(ScriptedPlanner::new(vec![decision(
        compass_tool::PlanType::Action,
        false,
        Some(action("broken_tool")),
        None,
    )]));

    let events = Arc::new(EventBus::new());
    let persistence = Arc::new(InMemoryPersistence::new());
    let agent_loop = AgentLoop::new(Arc::new(tools), planner, events.clone(), persistence.clone());

    let request = RunRequest::new(
        "exec-s4",
        "completion-s4",
        "report-s4",
        "org-1",
        "user-1",
        "Build me a chart",
        StaticSources::default(),
    );

    let outcome = agent_loop.run(request).await.unwrap();

    assert_eq!(outcome.status, ExecutionStatus::Success);
    assert!(outcome
        .final_answer
        .as_deref()
        .unwrap_or("")
        .contains("3 times"));
    // loop_index advances only on a non-terminal iteration, so the
    // trip on the third failure leaves it at 2 (iterations 0, 1, 2 ran).
    assert_eq!(outcome.loop_iterations, 2, "breaker trips on the third consecutive failure");

    let blocks = persistence.blocks_for("exec-s4").await.unwrap();
    assert_eq!(blocks.len(), 3, "one decision block per failed iteration");
    assert!(blocks
        .iter()
        .all(|b| b.status == compass_blocks::BlockStatus::Error));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// S5 — sigkill mid-tool terminates the run within one await
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn sigkill_mid_tool_stops_the_run() {
    let mut tools = ToolRegistry::new();
    tools.register(Arc::new(HangsUntilCancelledTool::new()));

    let planner = Arc::new(ScriptedPlanner::new(vec![decision(
        compass_tool::PlanType::Action,
        false,
        Some(action("slow_tool")),
        None,
    )]));

    let events = Arc::new(EventBus::new());
    let persistence = Arc::new(InMemoryPersistence::new());
    let agent_loop = AgentLoop::new(Arc::new(tools), planner, events.clone(), persistence.clone());

    let sigkill = CancellationToken::new();
    let request = RunRequest::new(
        "exec-s5",
        "completion-s5",
        "report-s5",
        "org-1",
        "user-1",
        "Show me revenue by month",
        StaticSources::default(),
    )
    .with_sigkill(sigkill.clone());

    let mut subscriber = events.subscribe("exec-s5");

    let sigkill_for_task = sigkill.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        sigkill_for_task.cancel();
    });

    let outcome = agent_loop.run(request).await.unwrap();
    assert_eq!(outcome.status, ExecutionStatus::Sigkill);

    let mut last_event = None;
    while let Some(StreamItem::Frame(frame)) = subscriber.recv().await {
        last_event = Some(frame);
    }
    let last_event = last_event.expect("at least completion.finished was emitted");
    assert_eq!(last_event.event, "completion.finished");
    assert_eq!(last_event.data["status"], json!("Sigkill"));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Step-limit boundary: no analysis_complete ever, run still succeeds
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn step_limit_terminates_with_success_when_never_complete() {
    // A research-only decision with no action just advances the loop
    // each time, so the step limit (10) is what ends the run.
    let tools = ToolRegistry::new();
    let planner = Arc::new(ScriptedPlanner::new(vec![decision(
        compass_tool::PlanType::Research,
        false,
        None,
        None,
    )]));

    let events = Arc::new(EventBus::new());
    let persistence = Arc::new(InMemoryPersistence::new());
    let agent_loop = AgentLoop::new(Arc::new(tools), planner, events, persistence);

    let request = RunRequest::new(
        "exec-limit",
        "completion-limit",
        "report-limit",
        "org-1",
        "user-1",
        "keep investigating forever",
        StaticSources::default(),
    );

    let outcome = agent_loop.run(request).await.unwrap();
    assert_eq!(outcome.status, ExecutionStatus::Success);
    assert_eq!(outcome.loop_iterations, 10);
    assert!(outcome.final_answer.is_none());
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// S2 — widget then observe: two decisions, one tool, two blocks
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn widget_then_observe_reaches_analysis_complete_on_second_iteration() {
    let mut tools = ToolRegistry::new();
    tools.register(Arc::new(CreateWidgetTool::new()));

    let planner = Arc::new(ScriptedPlanner::new(vec![
        decision(
            compass_tool::PlanType::Action,
            false,
            Some(action("create_widget")),
            None,
        ),
        decision(
            compass_tool::PlanType::Action,
            true,
            None,
            Some("I've built the revenue-by-month widget for you."),
        ),
    ]));

    let events = Arc::new(EventBus::new());
    let persistence = Arc::new(InMemoryPersistence::new());
    let agent_loop = AgentLoop::new(Arc::new(tools), planner, events.clone(), persistence.clone());

    let mut subscriber = events.subscribe("exec-s2");
    let request = RunRequest::new(
        "exec-s2",
        "completion-s2",
        "report-s2",
        "org-1",
        "user-1",
        "Show me revenue by month",
        StaticSources::default(),
    );

    let outcome = agent_loop.run(request).await.unwrap();

    assert_eq!(outcome.status, ExecutionStatus::Success);
    assert_eq!(outcome.loop_iterations, 1, "second iteration terminates on analysis_complete, never bumping the index again");
    assert_eq!(
        outcome.final_answer.as_deref(),
        Some("I've built the revenue-by-month widget for you.")
    );

    let blocks = persistence.blocks_for("exec-s2").await.unwrap();
    assert_eq!(blocks.len(), 2, "one decision block per iteration");
    assert!(blocks[0].title.contains("create_widget"));

    let mut events_seen = Vec::new();
    while let Some(StreamItem::Frame(frame)) = subscriber.recv().await {
        events_seen.push(frame.event.clone());
        if frame.event == "completion.finished" {
            break;
        }
    }
    assert_eq!(events_seen.iter().filter(|e| *e == "tool.started").count(), 1);
    assert_eq!(events_seen.iter().filter(|e| *e == "decision.final").count(), 2);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// S3 — invalid planner output is retried in place, then recovers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn invalid_planner_output_retries_then_recovers() {
    let mut tools = ToolRegistry::new();
    tools.register(Arc::new(AnswerQuestionTool::new()));

    let mut invalid = PlannerDecision::default();
    invalid.error = Some(compass_planner::PlannerError::new(
        "validation_error",
        "model emitted an unterminated action block",
    ));

    let planner = Arc::new(ScriptedPlanner::new(vec![
        invalid,
        decision(
            compass_tool::PlanType::Action,
            false,
            Some(action("answer_question")),
            None,
        ),
        decision(compass_tool::PlanType::Action, true, None, Some("table X has columns id, name")),
    ]));

    let events = Arc::new(EventBus::new());
    let persistence = Arc::new(InMemoryPersistence::new());
    let agent_loop = AgentLoop::new(Arc::new(tools), planner, events.clone(), persistence.clone());

    let mut subscriber = events.subscribe("exec-s3");
    let request = RunRequest::new(
        "exec-s3",
        "completion-s3",
        "report-s3",
        "org-1",
        "user-1",
        "What columns does table X have?",
        StaticSources::default(),
    );

    let outcome = agent_loop.run(request).await.unwrap();

    assert_eq!(outcome.status, ExecutionStatus::Success);
    assert_eq!(outcome.final_answer.as_deref(), Some("table X has columns id, name"));

    let mut saw_retry = false;
    while let Some(StreamItem::Frame(frame)) = subscriber.recv().await {
        if frame.event == "planner.retry" {
            saw_retry = true;
        }
        if frame.event == "completion.finished" {
            break;
        }
    }
    assert!(saw_retry, "a planner.retry event fires for the invalid-output attempt");
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// S6 — instruction-suggestion trigger (condition B: widget created
// with internal retries) fires the suggestion post-step
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn widget_created_with_errors_triggers_instruction_suggestion() {
    let mut tools = ToolRegistry::new();
    tools.register(Arc::new(CreateWidgetWithErrorsTool::new()));

    let planner = Arc::new(ScriptedPlanner::new(vec![
        decision(
            compass_tool::PlanType::Action,
            false,
            Some(action("create_widget")),
            None,
        ),
        decision(
            compass_tool::PlanType::Action,
            true,
            None,
            Some("Widget created, though it took a couple of tries."),
        ),
    ]));

    let events = Arc::new(EventBus::new());
    let persistence = Arc::new(InMemoryPersistence::new());
    let suggester = Arc::new(AlwaysSuggests::new());
    let drafts = Arc::new(RecordingDraftSink::new());
    let agent_loop = AgentLoop::new(Arc::new(tools), planner, events.clone(), persistence)
        .with_suggester(suggester.clone())
        .with_draft_sink(drafts.clone());

    let mut subscriber = events.subscribe("exec-s6");
    let request = RunRequest::new(
        "exec-s6",
        "completion-s6",
        "report-s6",
        "org-1",
        "user-1",
        "Show me revenue by month",
        StaticSources::default(),
    );

    let outcome = agent_loop.run(request).await.unwrap();
    assert_eq!(outcome.status, ExecutionStatus::Success);

    assert_eq!(
        *suggester.last_trigger.lock().unwrap(),
        Some(SuggestionTrigger::WidgetCreatedWithErrors)
    );
    assert_eq!(drafts.drafts.lock().unwrap().len(), 1);

    let mut saw_started = false;
    let mut saw_finished = false;
    while let Some(StreamItem::Frame(frame)) = subscriber.recv().await {
        match frame.event.as_str() {
            "instructions.suggest.started" => saw_started = true,
            "instructions.suggest.finished" => saw_finished = true,
            "completion.finished" => break,
            _ => {}
        }
    }
    assert!(saw_started && saw_finished);
}
