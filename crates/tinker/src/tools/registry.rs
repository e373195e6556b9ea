use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::models::tool::ToolSpec;

use super::Tool;

/// A name-keyed, concurrency-safe tool map.
///
/// Registration is expected at startup, but nothing forbids later
/// additions — dynamically bridged tools register through the same path.
/// Owned and dependency-injected, never process-global, so session
/// lifetimes stay test-isolated.
#[derive(Default)]
pub struct Registry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, tool: Arc<dyn Tool>) {
        self.tools
            .write()
            .unwrap()
            .insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.read().unwrap().get(name).cloned()
    }

    pub fn list_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.read().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    /// Definitions for every registered tool, in name order
    pub fn specs(&self) -> Vec<ToolSpec> {
        let tools = self.tools.read().unwrap();
        let mut specs: Vec<ToolSpec> = tools.values().map(|t| t.spec()).collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    /// Definitions restricted to the given names
    pub fn filtered_specs(&self, names: &[String]) -> Vec<ToolSpec> {
        let allowed: std::collections::HashSet<&str> =
            names.iter().map(String::as_str).collect();
        self.specs()
            .into_iter()
            .filter(|spec| allowed.contains(spec.name.as_str()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AgentResult;
    use crate::tools::{ExecContext, ToolCategory, ToolOutput};
    use async_trait::async_trait;
    use serde_json::{json, Value};

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "Echo"
        }

        fn description(&self) -> &str {
            "Echoes back the input"
        }

        fn input_schema(&self) -> Value {
            json!({"type": "object"})
        }

        fn requires_permission(&self) -> bool {
            false
        }

        fn category(&self) -> ToolCategory {
            ToolCategory::Other
        }

        async fn execute(&self, _ctx: &ExecContext, input: Value) -> AgentResult<ToolOutput> {
            Ok(ToolOutput::ok(input.to_string()))
        }
    }

    #[test]
    fn test_register_and_get() {
        let registry = Registry::new();
        registry.register(std::sync::Arc::new(EchoTool));

        assert!(registry.get("Echo").is_some());
        assert!(registry.get("Missing").is_none());
        assert_eq!(registry.list_names(), vec!["Echo"]);
    }

    #[test]
    fn test_filtered_specs() {
        let registry = Registry::new();
        registry.register(std::sync::Arc::new(EchoTool));

        let specs = registry.filtered_specs(&["Echo".to_string(), "Other".to_string()]);
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].name, "Echo");

        assert!(registry.filtered_specs(&[]).is_empty());
    }
}
