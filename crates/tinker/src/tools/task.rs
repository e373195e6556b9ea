use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::errors::AgentResult;

use super::{
    bool_prop, object_schema, parse_input, string_prop, ExecContext, Tool, ToolCategory,
    ToolOutput,
};

/// A sub-agent task as requested through the Task tool
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskRequest {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub subagent_type: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub run_in_background: bool,
    /// Agent ID to resume instead of spawning
    #[serde(default)]
    pub resume: Option<String>,
}

/// What a sub-agent run produced (or is producing, for background runs)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub agent_id: String,
    pub result: String,
    pub status: String,
}

/// Executes sub-agent tasks on behalf of the Task tool. Implemented by
/// the agent executor; injected here to keep the tool layer free of
/// agent lifecycle concerns.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run(&self, ctx: &ExecContext, request: TaskRequest) -> AgentResult<TaskOutcome>;
}

/// Launches sub-agents for delegated multi-step work
pub struct TaskTool {
    runner: Arc<dyn TaskRunner>,
}

impl TaskTool {
    pub fn new(runner: Arc<dyn TaskRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl Tool for TaskTool {
    fn name(&self) -> &str {
        "Task"
    }

    fn description(&self) -> &str {
        "Launch a new agent to handle complex, multi-step tasks autonomously. Use for research, exploration, and specialized tasks."
    }

    fn input_schema(&self) -> Value {
        object_schema(
            json!({
                "description": string_prop("Short (3-5 word) description of the task"),
                "prompt": string_prop("Detailed task description with all necessary context"),
                "subagent_type": {
                    "type": "string",
                    "description": "Type of agent to use: 'general-purpose', 'Explore', 'Plan'",
                    "enum": ["general-purpose", "Explore", "Plan"],
                },
                "model": string_prop("Optional model override"),
                "run_in_background": bool_prop("Run agent in background"),
                "resume": string_prop("Agent ID to resume instead of spawning a new one"),
            }),
            &["description", "prompt", "subagent_type"],
        )
    }

    fn requires_permission(&self) -> bool {
        // the sub-agent's own tool calls are still individually gated
        false
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Agent
    }

    async fn execute(&self, ctx: &ExecContext, input: Value) -> AgentResult<ToolOutput> {
        let params: TaskRequest = parse_input(input)?;

        if params.prompt.is_empty() && params.resume.is_none() {
            return Ok(ToolOutput::error("prompt is required"));
        }

        let outcome = self.runner.run(ctx, params).await?;

        let is_error = outcome.status == "error";
        let mut output = ToolOutput::ok(outcome.result)
            .with_metadata("agent_id", outcome.agent_id)
            .with_metadata("status", outcome.status);
        output.is_error = is_error;
        Ok(output)
    }
}

/// A single item on the structured task list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TodoItem {
    pub content: String,
    /// pending, in_progress or completed
    pub status: String,
    #[serde(default, rename = "activeForm")]
    pub active_form: String,
}

#[derive(Debug, Deserialize)]
struct TodoInput {
    todos: Vec<TodoItem>,
}

type TodoCallback = dyn Fn(&[TodoItem]) + Send + Sync;

/// Maintains the structured task list the model uses to track progress.
/// This is the one mutating surface available to plan agents.
pub struct TodoWriteTool {
    todos: Mutex<Vec<TodoItem>>,
    callback: Option<Arc<TodoCallback>>,
}

impl TodoWriteTool {
    pub fn new(callback: Option<Arc<TodoCallback>>) -> Self {
        Self {
            todos: Mutex::new(Vec::new()),
            callback,
        }
    }

    pub fn todos(&self) -> Vec<TodoItem> {
        self.todos.lock().unwrap().clone()
    }
}

#[async_trait]
impl Tool for TodoWriteTool {
    fn name(&self) -> &str {
        "TodoWrite"
    }

    fn description(&self) -> &str {
        "Create and manage a structured task list for tracking progress on complex tasks."
    }

    fn input_schema(&self) -> Value {
        object_schema(
            json!({
                "todos": {
                    "type": "array",
                    "description": "The updated todo list",
                    "items": {
                        "type": "object",
                        "properties": {
                            "content": { "type": "string" },
                            "status": { "type": "string", "enum": ["pending", "in_progress", "completed"] },
                            "activeForm": { "type": "string" },
                        },
                        "required": ["content", "status"],
                    },
                },
            }),
            &["todos"],
        )
    }

    fn requires_permission(&self) -> bool {
        false
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Other
    }

    async fn execute(&self, _ctx: &ExecContext, input: Value) -> AgentResult<ToolOutput> {
        let params: TodoInput = parse_input(input)?;

        let count = params.todos.len();
        *self.todos.lock().unwrap() = params.todos.clone();
        if let Some(callback) = &self.callback {
            callback(&params.todos);
        }

        Ok(ToolOutput::ok(format!("Updated todo list ({count} items)")).with_metadata("count", count))
    }
}
