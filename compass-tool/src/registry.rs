//! The tool registry: source of truth for which tools exist and which
//! plan type may select them.

use std::collections::HashMap;
use std::sync::Arc;

use crate::descriptor::{PlanType, ToolDescriptor};
use crate::runtime::Tool;

struct Entry {
    descriptor: ToolDescriptor,
    tool: Arc<dyn Tool>,
}

/// Registry of streaming tools available to the agent loop.
///
/// Holds each tool's [`ToolDescriptor`] alongside its implementation,
/// keyed by name. The registry is the single source of truth for
/// catalog filtering and plan-type validation — nothing downstream
/// re-derives that policy.
pub struct ToolRegistry {
    entries: HashMap<String, Entry>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Register a tool. Overwrites any existing tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let descriptor = tool.descriptor().clone();
        self.entries.insert(
            descriptor.name.clone(),
            Entry { descriptor, tool },
        );
    }

    /// Look up a tool implementation by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.entries.get(name).map(|e| e.tool.clone())
    }

    /// Look up a tool's descriptor by name.
    pub fn descriptor(&self, name: &str) -> Option<&ToolDescriptor> {
        self.entries.get(name).map(|e| &e.descriptor)
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The filtered descriptor list the planner sees for a given plan
    /// type. A tool whose category is `both` appears regardless of
    /// `plan_type`; deduplication is implicit since entries are keyed
    /// by name.
    pub fn get_catalog_for_plan_type(&self, plan_type: PlanType) -> Vec<&ToolDescriptor> {
        self.entries
            .values()
            .map(|e| &e.descriptor)
            .filter(|d| d.category.permits(plan_type))
            .collect()
    }

    /// True iff `name` is registered and its category permits `plan_type`.
    pub fn validate_tool_for_plan_type(&self, name: &str, plan_type: PlanType) -> bool {
        self.entries
            .get(name)
            .is_some_and(|e| e.descriptor.category.permits(plan_type))
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{ObservationPolicy, ToolCategory};
    use crate::runtime::{Observation, RuntimeContext, ToolEvent};
    use crate::ToolError;
    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::mpsc::Sender;

    struct StubTool(ToolDescriptor);

    #[async_trait]
    impl Tool for StubTool {
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
                    output: json!({}),
                    observation: Observation::new("ok"),
                })
                .await;
            Ok(())
        }
    }

    fn make_registry() -> ToolRegistry {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(StubTool(
            ToolDescriptor::new("answer_question", "answer", ToolCategory::Action, json!({}))
                .with_observation_policy(ObservationPolicy::OnSuccess),
        )));
        reg.register(Arc::new(StubTool(ToolDescriptor::new(
            "list_tables",
            "list tables",
            ToolCategory::Research,
            json!({}),
        ))));
        reg.register(Arc::new(StubTool(ToolDescriptor::new(
            "create_widget",
            "create a widget",
            ToolCategory::Both,
            json!({}),
        ))));
        reg
    }

    #[test]
    fn catalog_filters_by_plan_type() {
        let reg = make_registry();
        let research = reg.get_catalog_for_plan_type(PlanType::Research);
        let names: Vec<&str> = research.iter().map(|d| d.name.as_str()).collect();
        assert!(names.contains(&"list_tables"));
        assert!(names.contains(&"create_widget"));
        assert!(!names.contains(&"answer_question"));

        let action = reg.get_catalog_for_plan_type(PlanType::Action);
        let names: Vec<&str> = action.iter().map(|d| d.name.as_str()).collect();
        assert!(names.contains(&"answer_question"));
        assert!(names.contains(&"create_widget"));
        assert!(!names.contains(&"list_tables"));
    }

    #[test]
    fn validate_tool_for_plan_type_rejects_wrong_category() {
        let reg = make_registry();
        assert!(reg.validate_tool_for_plan_type("list_tables", PlanType::Research));
        assert!(!reg.validate_tool_for_plan_type("list_tables", PlanType::Action));
        assert!(!reg.validate_tool_for_plan_type("nonexistent", PlanType::Action));
    }
}
