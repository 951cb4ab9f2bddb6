//! Validation of [`PlannerInput`] before it is handed to a planner.

use thiserror::Error;

use crate::types::PlannerInput;

/// Why a [`PlannerInput`] could not be assembled or accepted.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum InputValidationError {
    /// A required identity field was empty.
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    /// The tool catalog was empty, leaving the planner with nothing to
    /// select under `plan_type = action`.
    #[error("tool catalog is empty")]
    EmptyToolCatalog,
}

/// Validate a [`PlannerInput`] before it is sent to the planner. This
/// is the `input_validation_error` path in the error taxonomy (§7):
/// callers record an observation and retry up to the configured cap
/// rather than treating this as fatal.
pub fn validate_planner_input(input: &PlannerInput) -> Result<(), InputValidationError> {
    if input.organization_id.trim().is_empty() {
        return Err(InputValidationError::MissingField("organization_id"));
    }
    if input.user_message.trim().is_empty() {
        return Err(InputValidationError::MissingField("user_message"));
    }
    if input.mode.trim().is_empty() {
        return Err(InputValidationError::MissingField("mode"));
    }
    if input.tool_catalog.is_empty() {
        return Err(InputValidationError::EmptyToolCatalog);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use compass_tool::{ToolCategory, ToolDescriptor};
    use serde_json::json;

    fn base_input() -> PlannerInput {
        PlannerInput {
            organization_id: "org-1".into(),
            user_message: "what's revenue by month?".into(),
            instructions: json!([]),
            schemas: json!({}),
            messages: vec![],
            resources: json!([]),
            files: json!([]),
            mentions: json!([]),
            entities: json!([]),
            history_summary: None,
            last_observation: None,
            past_observations: json!([]),
            tool_catalog: vec![ToolDescriptor::new(
                "list_tables",
                "list tables",
                ToolCategory::Research,
                json!({}),
            )],
            external_platform: "web".into(),
            mode: "analytics".into(),
        }
    }

    #[test]
    fn valid_input_passes() {
        assert!(validate_planner_input(&base_input()).is_ok());
    }

    #[test]
    fn empty_organization_id_rejected() {
        let mut input = base_input();
        input.organization_id = "".into();
        assert_eq!(
            validate_planner_input(&input),
            Err(InputValidationError::MissingField("organization_id"))
        );
    }

    #[test]
    fn empty_tool_catalog_rejected() {
        let mut input = base_input();
        input.tool_catalog.clear();
        assert_eq!(
            validate_planner_input(&input),
            Err(InputValidationError::EmptyToolCatalog)
        );
    }
}
