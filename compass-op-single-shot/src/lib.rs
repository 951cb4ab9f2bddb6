#![deny(missing_docs)]
//! Single-shot operator — one model call, no tools, return immediately.
//!
//! Implements `layer0::Operator` for the simplest case: send a single
//! prompt to a model and return the result. No tool use, no ReAct loop,
//! no hooks, no state reader. Used for classification, summarization,
//! extraction, and other single-inference tasks.

use async_trait::async_trait;
use layer0::content::Content;
use layer0::duration::DurationMs;
use layer0::error::OperatorError;
use layer0::operator::{ExitReason, Operator, OperatorInput, OperatorMetadata, OperatorOutput};
use compass_turn::convert::{content_to_user_message, parts_to_content};
use compass_turn::provider::Provider;
use compass_turn::types::*;
use rust_decimal::Decimal;
use std::time::Instant;

/// Static configuration for a SingleShotOperator instance.
pub struct SingleShotConfig {
    /// Base system prompt.
    pub system_prompt: String,
    /// Default model identifier.
    pub default_model: String,
    /// Default max tokens per response.
    pub default_max_tokens: u32,
}

impl Default for SingleShotConfig {
    fn default() -> Self {
        Self {
            system_prompt: String::new(),
            default_model: String::new(),
            default_max_tokens: 4096,
        }
    }
}

/// A single-shot Operator: one model call, no tools, return immediately.
///
/// Generic over `P: Provider` (not object-safe). The object-safe boundary
/// is `layer0::Operator`, which `SingleShotOperator<P>` implements via
/// `#[async_trait]`.
pub struct SingleShotOperator<P: Provider> {
    provider: P,
    config: SingleShotConfig,
}

impl<P: Provider> SingleShotOperator<P> {
    /// Create a new SingleShotOperator with a provider and configuration.
    pub fn new(provider: P, config: SingleShotConfig) -> Self {
        Self { provider, config }
    }

    /// Resolve model and max_tokens from per-request overrides or defaults.
    fn resolve_model(&self, input: &OperatorInput) -> Option<String> {
        input
            .config
            .as_ref()
            .and_then(|c| c.model.clone())
            .or_else(|| {
                if self.config.default_model.is_empty() {
                    None
                } else {
                    Some(self.config.default_model.clone())
                }
            })
    }

    /// Resolve the system prompt, appending any per-request addendum.
    fn resolve_system(&self, input: &OperatorInput) -> String {
        match input
            .config
            .as_ref()
            .and_then(|c| c.system_addendum.as_ref())
        {
            Some(addendum) => format!("{}\n{}", self.config.system_prompt, addendum),
            None => self.config.system_prompt.clone(),
        }
    }
}

#[async_trait]
impl<P: Provider + 'static> Operator for SingleShotOperator<P> {
    async fn execute(&self, input: OperatorInput) -> Result<OperatorOutput, OperatorError> {
        let start = Instant::now();

        let model = self.resolve_model(&input);
        let system = self.resolve_system(&input);
        let max_tokens = self.config.default_max_tokens;

        // Build single user message
        let messages = vec![content_to_user_message(&input.message)];

        // Build request with no tools
        let request = ProviderRequest {
            model,
            messages,
            tools: vec![],
            max_tokens: Some(max_tokens),
            temperature: None,
            system: if system.is_empty() {
                None
            } else {
                Some(system)
            },
            extra: input.metadata.clone(),
        };

        // Single model call
        let response = self.provider.complete(request).await.map_err(|e| {
            if e.is_retryable() {
                OperatorError::Retryable(e.to_string())
            } else {
                OperatorError::Model(e.to_string())
            }
        })?;

        let duration = DurationMs::from(start.elapsed());

        // Build metadata
        let mut metadata = OperatorMetadata::default();
        metadata.tokens_in = response.usage.input_tokens;
        metadata.tokens_out = response.usage.output_tokens;
        metadata.cost = response.cost.unwrap_or(Decimal::ZERO);
        metadata.turns_used = 1;
        metadata.tools_called = vec![];
        metadata.duration = duration;

        // Convert response content to layer0 Content
        let message: Content = parts_to_content(&response.content);

        // Always ExitReason::Complete for single-shot
        let mut output = OperatorOutput::new(message, ExitReason::Complete);
        output.metadata = metadata;
        output.effects = vec![];

        Ok(output)
    }
}
