//! Tool trait and registry (§4.4.3 "tool by name in world's tool registry").
//!
//! Deliberately thin: this crate only fixes the seam between the
//! orchestrator and whatever a tool actually does. `shell_cmd`, the one
//! concrete tool in scope, lives in `agentworld-exec` since it needs
//! `agentworld-config`'s working-directory contract; the JSON
//! tool-argument sanitizer lives in `agentworld-agent` since it operates on
//! the model's raw output, not on a tool's own arguments.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Static metadata advertised for a tool. `parameters` is a JSON Schema
/// object, the shape every OpenAI-compatible tool-calling API expects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// The result of running a tool. `success = false` is a normal outcome (a
/// scope violation, a missing file, a non-zero exit code) that still
/// becomes a `tool` memory record and feeds the next LLM turn — it is not
/// a Rust-level error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    pub success: bool,
    pub content: String,
}

impl ToolOutput {
    pub fn ok(content: impl Into<String>) -> Self {
        Self { success: true, content: content.into() }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self { success: false, content: content.into() }
    }
}

/// Implemented by every tool in a world's registry.
#[async_trait]
pub trait Tool: Send + Sync {
    fn spec(&self) -> ToolSpec;
    async fn run(&self, args: Value) -> ToolOutput;
}

/// A world's tool registry. Lookup is by name; spec.md §4.4.3 step 5
/// requires a clean "Tool not found" path on miss rather than a panic.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn list_specs(&self) -> Vec<ToolSpec> {
        self.tools.iter().map(|t| t.spec()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.spec().name == name)
            .map(|t| t.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct DummyTool {
        name: String,
    }

    #[async_trait]
    impl Tool for DummyTool {
        fn spec(&self) -> ToolSpec {
            ToolSpec {
                name: self.name.clone(),
                description: format!("dummy tool: {}", self.name),
                parameters: json!({"type": "object", "properties": {}}),
            }
        }

        async fn run(&self, _args: Value) -> ToolOutput {
            ToolOutput::ok(format!("ran {}", self.name))
        }
    }

    #[test]
    fn empty_registry() {
        let reg = ToolRegistry::default();
        assert!(reg.list_specs().is_empty());
        assert!(reg.get("anything").is_none());
    }

    #[test]
    fn register_and_get() {
        let mut reg = ToolRegistry::default();
        reg.register(Box::new(DummyTool { name: "alpha".into() }));
        reg.register(Box::new(DummyTool { name: "beta".into() }));

        assert!(reg.get("alpha").is_some());
        assert!(reg.get("beta").is_some());
        assert!(reg.get("gamma").is_none());
    }

    #[test]
    fn list_specs_returns_all() {
        let mut reg = ToolRegistry::default();
        reg.register(Box::new(DummyTool { name: "one".into() }));
        reg.register(Box::new(DummyTool { name: "two".into() }));

        let specs = reg.list_specs();
        assert_eq!(specs.len(), 2);
    }

    #[tokio::test]
    async fn run_registered_tool() {
        let mut reg = ToolRegistry::default();
        reg.register(Box::new(DummyTool { name: "runner".into() }));

        let tool = reg.get("runner").unwrap();
        let result = tool.run(json!({})).await;
        assert!(result.success);
        assert_eq!(result.content, "ran runner");
    }

    #[test]
    fn missing_tool_lookup_returns_none_not_panic() {
        let reg = ToolRegistry::default();
        assert!(reg.get("shell_cmd").is_none());
    }
}
