//! The streaming tool contract plus the retry/timeout policies the
//! runtime applies uniformly over any [`Tool`] implementation.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::Sender;
use tokio_util::sync::CancellationToken;

use crate::descriptor::ToolDescriptor;
use crate::ToolError;

/// A normalized record of a tool's outcome, fed back into the next
/// planner call as an observation. `summary` is mandatory; everything
/// else is populated only when the tool produced it.
#[non_exhaustive]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Observation {
    /// One-line (or short) human-readable summary of what happened.
    pub summary: String,
    /// Populated when the tool failed.
    pub error: Option<ObservationError>,
    /// Set by a tool that believes the plan is now resolved.
    pub analysis_complete: Option<bool>,
    /// A final answer suggested by the tool itself (rare; mostly set
    /// by `answer_question`-style tools).
    pub final_answer: Option<String>,
    /// Arbitrary structured artifacts the tool wants surfaced.
    pub artifacts: Option<serde_json::Value>,
    /// Step created by this tool, if any.
    pub step_id: Option<String>,
    /// Widget created by this tool, if any.
    pub widget_id: Option<String>,
    /// Visualizations created by this tool, if any.
    pub created_visualization_ids: Option<Vec<String>>,
}

impl Observation {
    /// Construct a bare successful observation with only a summary.
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            ..Default::default()
        }
    }

    /// Construct a failed observation.
    pub fn failed(summary: impl Into<String>, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            error: Some(ObservationError {
                code: code.into(),
                message: message.into(),
            }),
            ..Default::default()
        }
    }

    /// Whether this observation represents a tool failure.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// The error embedded in a failed [`Observation`].
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservationError {
    /// Machine-readable error kind, matching the error taxonomy
    /// (`timeout`, `execution_failure`, ...).
    pub code: String,
    /// Human-readable detail.
    pub message: String,
}

/// A single frame in a tool's event stream.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ToolEvent {
    /// The tool has begun executing.
    Start,
    /// An intermediate progress marker, tagged with a stage name the
    /// caller may attach side-effect hooks to (e.g.
    /// `data_model_type_determined`, `column_added`).
    Progress {
        /// Stage identifier.
        stage: String,
        /// Stage-specific payload.
        data: serde_json::Value,
    },
    /// A partial (not-yet-final) structured result.
    Partial {
        /// Partial payload.
        data: serde_json::Value,
    },
    /// Raw incremental text output (e.g. from a code interpreter).
    Stdout {
        /// The text chunk.
        chunk: String,
    },
    /// Terminal success frame. Every successful run emits exactly one.
    End {
        /// The tool's raw output payload.
        output: serde_json::Value,
        /// The normalized observation derived from `output`.
        observation: Observation,
    },
    /// Terminal failure frame.
    Error {
        /// Human-readable failure message.
        message: String,
        /// Whether the runtime should consider this retryable,
        /// independent of the tool's own `idempotent` flag.
        retryable: bool,
    },
}

/// Fields a tool may read while executing. Deliberately narrow:
/// database handles, report/data-source clients, and uploaded-file
/// access are external collaborators and are passed through `extra`
/// as an opaque JSON value rather than typed here, since this crate
/// does not define their shapes.
#[derive(Debug, Clone)]
pub struct RuntimeContext {
    /// The agent execution this invocation belongs to.
    pub agent_execution_id: String,
    /// The plan type the invoking decision carried.
    pub plan_type: crate::descriptor::PlanType,
    /// Cancellation handle. Tools should check this between event
    /// emissions and abort promptly once it is cancelled.
    pub sigkill: CancellationToken,
    /// The current rendered context view, if the caller has one handy.
    pub context_view: Option<serde_json::Value>,
    /// Opaque passthrough for external collaborators (DB handle, report
    /// id, current artifact ids, data-source clients, uploaded files).
    pub extra: serde_json::Value,
}

impl RuntimeContext {
    /// Construct a runtime context with no extra payload.
    pub fn new(
        agent_execution_id: impl Into<String>,
        plan_type: crate::descriptor::PlanType,
        sigkill: CancellationToken,
    ) -> Self {
        Self {
            agent_execution_id: agent_execution_id.into(),
            plan_type,
            sigkill,
            context_view: None,
            extra: serde_json::Value::Null,
        }
    }
}

/// A streaming tool implementation.
///
/// `run_stream` pushes [`ToolEvent`]s onto `events` as they occur and
/// resolves once the tool has finished. A `tool.end`/`tool.error` event
/// missing from the stream is itself an error — [`run_with_policies`]
/// enforces this.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Static metadata: name, category, retry/timeout defaults.
    fn descriptor(&self) -> &ToolDescriptor;

    /// Execute the tool, streaming events to `events` as they occur.
    async fn run_stream(
        &self,
        input: serde_json::Value,
        ctx: RuntimeContext,
        events: Sender<ToolEvent>,
    ) -> Result<(), ToolError>;
}

/// Timeout bounds enforced around a single tool attempt.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutPolicy {
    /// Maximum time to wait for the first event.
    pub start_timeout: Duration,
    /// Maximum silence between successive events.
    pub idle_timeout: Duration,
    /// Maximum wall-clock time for the whole attempt.
    pub hard_timeout: Duration,
}

impl TimeoutPolicy {
    /// Build a policy from a descriptor's `timeout_seconds`, using it as
    /// the hard bound and a third of it (floored at 1s) for start/idle.
    pub fn from_descriptor(descriptor: &ToolDescriptor) -> Self {
        let hard = Duration::from_secs(descriptor.timeout_seconds.max(1));
        let partial = Duration::from_secs((descriptor.timeout_seconds / 3).max(1));
        Self {
            start_timeout: partial,
            idle_timeout: partial,
            hard_timeout: hard,
        }
    }
}

/// Exponential backoff with jitter, applied between retry attempts.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// Base backoff in milliseconds.
    pub backoff_ms: u64,
    /// Multiplier applied per additional attempt.
    pub backoff_multiplier: f64,
    /// Maximum uniform jitter added on top of the backoff, in
    /// milliseconds.
    pub jitter_ms: u64,
}

impl RetryPolicy {
    /// Build a policy from a descriptor's `max_retries`, with
    /// reasonable default backoff parameters.
    pub fn from_descriptor(descriptor: &ToolDescriptor) -> Self {
        Self {
            max_attempts: descriptor.max_retries + 1,
            backoff_ms: 200,
            backoff_multiplier: 2.0,
            jitter_ms: 100,
        }
    }

    fn backoff_for(&self, attempt: u32) -> Duration {
        let exp = self.backoff_multiplier.powi((attempt.saturating_sub(1)) as i32);
        let base_ms = (self.backoff_ms as f64 * exp) as u64;
        let jitter = if self.jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=self.jitter_ms)
        };
        Duration::from_millis(base_ms + jitter)
    }
}

/// Run `tool` under the given timeout and retry policies, forwarding
/// every event it emits to `events_out` and returning the final
/// [`Observation`] (or error) once a terminal event arrives or all
/// retries are exhausted.
///
/// Retries are attempted only when the tool is `idempotent` or the
/// failure was classified retryable ([`ToolError::is_retryable`] or an
/// explicit `retryable: true` on a `ToolEvent::Error`). Cancellation via
/// `ctx.sigkill` aborts immediately without further retries and without
/// emitting a terminal event of its own — the caller persists the
/// attempt as failed.
pub async fn run_with_policies(
    tool: &dyn Tool,
    input: serde_json::Value,
    ctx: RuntimeContext,
    timeout_policy: TimeoutPolicy,
    retry_policy: RetryPolicy,
    events_out: Sender<ToolEvent>,
) -> Result<Observation, ToolError> {
    let name = tool.descriptor().name.clone();
    let idempotent = tool.descriptor().idempotent;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let started = std::time::Instant::now();
        tracing::info!(tool = %name, attempt, plan_type = %ctx.plan_type, "tool invocation");
        let sigkill = ctx.sigkill.clone();
        let attempt_ctx = ctx.clone();

        let outcome = tokio::select! {
            biased;
            _ = sigkill.cancelled() => Err(ToolError::Cancelled),
            result = run_single_attempt(tool, input.clone(), attempt_ctx, timeout_policy, events_out.clone()) => result,
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(observation) => {
                tracing::info!(tool = %name, outcome = "success", duration_ms, "tool finished");
                return Ok(observation);
            }
            Err(ToolError::Cancelled) => {
                tracing::info!(tool = %name, outcome = "cancelled", duration_ms, "tool finished");
                return Err(ToolError::Cancelled);
            }
            Err(err) => {
                let retryable = idempotent || err.is_retryable();
                if !retryable || attempt >= retry_policy.max_attempts {
                    tracing::info!(tool = %name, outcome = "error", duration_ms, "tool finished");
                    return Err(err);
                }
                tracing::warn!(tool = %name, attempt, error = %err, "tool attempt failed, retrying");
                tokio::time::sleep(retry_policy.backoff_for(attempt)).await;
            }
        }
    }
}

async fn run_single_attempt(
    tool: &dyn Tool,
    input: serde_json::Value,
    ctx: RuntimeContext,
    timeout_policy: TimeoutPolicy,
    events_out: Sender<ToolEvent>,
) -> Result<Observation, ToolError> {
    let (inner_tx, mut inner_rx) = tokio::sync::mpsc::channel::<ToolEvent>(32);

    let run_fut = tool.run_stream(input, ctx, inner_tx);
    tokio::pin!(run_fut);

    let mut first_event_seen = false;
    let mut result: Option<Result<Observation, ToolError>> = None;

    let overall = tokio::time::timeout(timeout_policy.hard_timeout, async {
        loop {
            let per_event_timeout = if first_event_seen {
                timeout_policy.idle_timeout
            } else {
                timeout_policy.start_timeout
            };

            tokio::select! {
                biased;
                run_result = &mut run_fut, if result.is_none() => {
                    if let Err(e) = run_result {
                        result = Some(Err(e));
                    }
                }
                recv = tokio::time::timeout(per_event_timeout, inner_rx.recv()) => {
                    match recv {
                        Ok(Some(event)) => {
                            first_event_seen = true;
                            match &event {
                                ToolEvent::End { observation, .. } => {
                                    let obs = observation.clone();
                                    let _ = events_out.send(event).await;
                                    return Ok(obs);
                                }
                                ToolEvent::Error { message, retryable } => {
                                    let message = message.clone();
                                    let retryable = *retryable;
                                    let _ = events_out.send(event).await;
                                    return if retryable {
                                        Err(ToolError::ExecutionFailed(message))
                                    } else {
                                        Err(ToolError::InvalidInput(message))
                                    };
                                }
                                _ => {
                                    let _ = events_out.send(event).await;
                                }
                            }
                        }
                        Ok(None) => {
                            if let Some(r) = result.take() {
                                return r.map(|_| unreachable!());
                            }
                            return Err(ToolError::MissingEnd);
                        }
                        Err(_elapsed) => {
                            let kind = if first_event_seen { "idle" } else { "start" };
                            return Err(ToolError::Timeout(kind.to_string()));
                        }
                    }
                }
            }
        }
    })
    .await;

    match overall {
        Ok(inner) => inner,
        Err(_elapsed) => Err(ToolError::Timeout("hard".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{PlanType, ToolCategory};
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyThenSucceeds {
        descriptor: ToolDescriptor,
        calls: AtomicU32,
        fail_times: u32,
    }

    #[async_trait]
    impl Tool for FlakyThenSucceeds {
        fn descriptor(&self) -> &ToolDescriptor {
            &self.descriptor
        }

        async fn run_stream(
            &self,
            _input: serde_json::Value,
            _ctx: RuntimeContext,
            events: Sender<ToolEvent>,
        ) -> Result<(), ToolError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_times {
                events
                    .send(ToolEvent::Error {
                        message: "transient".into(),
                        retryable: true,
                    })
                    .await
                    .ok();
                return Ok(());
            }
            events
                .send(ToolEvent::End {
                    output: json!({}),
                    observation: Observation::new("recovered"),
                })
                .await
                .ok();
            Ok(())
        }
    }

    fn ctx() -> RuntimeContext {
        RuntimeContext::new("exec-1", PlanType::Action, CancellationToken::new())
    }

    fn drain() -> Sender<ToolEvent> {
        let (tx, mut rx) = tokio::sync::mpsc::channel(32);
        tokio::spawn(async move { while rx.recv().await.is_some() {} });
        tx
    }

    #[tokio::test]
    async fn flaky_tool_retries_and_succeeds() {
        let descriptor = ToolDescriptor::new("flaky", "flaky", ToolCategory::Both, json!({}))
            .with_max_retries(3);
        let tool = FlakyThenSucceeds {
            descriptor,
            calls: AtomicU32::new(0),
            fail_times: 2,
        };
        let timeout_policy = TimeoutPolicy {
            start_timeout: Duration::from_millis(500),
            idle_timeout: Duration::from_millis(500),
            hard_timeout: Duration::from_secs(5),
        };
        let retry_policy = RetryPolicy {
            max_attempts: 4,
            backoff_ms: 1,
            backoff_multiplier: 1.0,
            jitter_ms: 0,
        };
        let observation =
            run_with_policies(&tool, json!({}), ctx(), timeout_policy, retry_policy, drain())
                .await
                .unwrap();
        assert_eq!(observation.summary, "recovered");
        assert_eq!(tool.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_idempotent_failure_is_not_retried_past_classification() {
        let descriptor = ToolDescriptor::new("strict", "strict", ToolCategory::Both, json!({}))
            .with_max_retries(3);
        struct AlwaysInvalid(ToolDescriptor);
        #[async_trait]
        impl Tool for AlwaysInvalid {
            fn descriptor(&self) -> &ToolDescriptor {
                &self.0
            }
            async fn run_stream(
                &self,
                _input: serde_json::Value,
                _ctx: RuntimeContext,
                events: Sender<ToolEvent>,
            ) -> Result<(), ToolError> {
                events
                    .send(ToolEvent::Error {
                        message: "bad input".into(),
                        retryable: false,
                    })
                    .await
                    .ok();
                Ok(())
            }
        }
        let tool = AlwaysInvalid(descriptor);
        let timeout_policy = TimeoutPolicy {
            start_timeout: Duration::from_millis(200),
            idle_timeout: Duration::from_millis(200),
            hard_timeout: Duration::from_secs(2),
        };
        let retry_policy = RetryPolicy {
            max_attempts: 4,
            backoff_ms: 1,
            backoff_multiplier: 1.0,
            jitter_ms: 0,
        };
        let err = run_with_policies(&tool, json!({}), ctx(), timeout_policy, retry_policy, drain())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn start_timeout_produces_timeout_error() {
        struct Silent(ToolDescriptor);
        #[async_trait]
        impl Tool for Silent {
            fn descriptor(&self) -> &ToolDescriptor {
                &self.0
            }
            async fn run_stream(
                &self,
                _input: serde_json::Value,
                _ctx: RuntimeContext,
                _events: Sender<ToolEvent>,
            ) -> Result<(), ToolError> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            }
        }
        let descriptor = ToolDescriptor::new("silent", "silent", ToolCategory::Both, json!({}));
        let tool = Silent(descriptor);
        let timeout_policy = TimeoutPolicy {
            start_timeout: Duration::from_millis(20),
            idle_timeout: Duration::from_millis(20),
            hard_timeout: Duration::from_secs(5),
        };
        let retry_policy = RetryPolicy {
            max_attempts: 1,
            backoff_ms: 1,
            backoff_multiplier: 1.0,
            jitter_ms: 0,
        };
        let err = run_with_policies(&tool, json!({}), ctx(), timeout_policy, retry_policy, drain())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Timeout(_)));
    }

    #[tokio::test]
    async fn sigkill_aborts_without_retry() {
        let descriptor = ToolDescriptor::new("slow", "slow", ToolCategory::Both, json!({}));
        let tool = NeverEndsWithDescriptor(descriptor);
        let token = CancellationToken::new();
        let mut ctx = ctx();
        ctx.sigkill = token.clone();
        token.cancel();
        let timeout_policy = TimeoutPolicy {
            start_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(5),
            hard_timeout: Duration::from_secs(5),
        };
        let retry_policy = RetryPolicy {
            max_attempts: 3,
            backoff_ms: 1,
            backoff_multiplier: 1.0,
            jitter_ms: 0,
        };
        let err = run_with_policies(&tool, json!({}), ctx, timeout_policy, retry_policy, drain())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Cancelled));
    }

    struct NeverEndsWithDescriptor(ToolDescriptor);

    #[async_trait]
    impl Tool for NeverEndsWithDescriptor {
        fn descriptor(&self) -> &ToolDescriptor {
            &self.0
        }
        async fn run_stream(
            &self,
            _input: serde_json::Value,
            _ctx: RuntimeContext,
            _events: Sender<ToolEvent>,
        ) -> Result<(), ToolError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
    }
}
