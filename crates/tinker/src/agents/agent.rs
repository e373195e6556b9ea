use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::message::Conversation;
use crate::models::tool::ToolSpec;
use crate::orchestrator::ToolGate;
use crate::tools::Registry;

/// Tools a read-only agent may never call, whatever its allow-list says
const MUTATING_TOOLS: [&str; 5] = ["Write", "Edit", "Bash", "NotebookEdit", "KillShell"];

/// The type of agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentKind {
    /// All tools, full model
    General,
    /// Fast model for codebase exploration; read-only
    Explore,
    /// Designs implementation plans before edits happen; read-only
    Plan,
}

impl AgentKind {
    pub fn parse(s: &str) -> Self {
        match s {
            "Explore" | "explore" => AgentKind::Explore,
            "Plan" | "plan" => AgentKind::Plan,
            _ => AgentKind::General,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::General => "general-purpose",
            AgentKind::Explore => "Explore",
            AgentKind::Plan => "Plan",
        }
    }

    /// The default configuration for this agent type
    pub fn default_config(&self) -> AgentConfig {
        match self {
            AgentKind::Explore => AgentConfig {
                model: Some("claude-3-5-haiku-latest".to_string()),
                max_tokens: 4096,
                allowed_tools: Some(
                    ["Read", "Glob", "Grep"].iter().map(|s| s.to_string()).collect(),
                ),
                read_only: true,
                system_prompt: Some(
                    "You are a fast exploration agent. Your job is to quickly find and \
                     analyze code.\n\n\
                     Use the tools efficiently: Glob to find files by pattern, Grep to \
                     search file contents, Read to read them.\n\n\
                     Be thorough but concise. Return specific file paths and relevant \
                     code snippets. Focus on answering the question directly."
                        .to_string(),
                ),
            },
            AgentKind::Plan => AgentConfig {
                model: Some("claude-sonnet-4-20250514".to_string()),
                max_tokens: 8192,
                allowed_tools: Some(
                    ["Read", "Glob", "Grep", "TodoWrite"]
                        .iter()
                        .map(|s| s.to_string())
                        .collect(),
                ),
                read_only: true,
                system_prompt: Some(
                    "You are a software architect agent. Your job is to design \
                     implementation plans.\n\n\
                     Analyze the codebase and produce a detailed plan: the step-by-step \
                     approach, files to modify or create, key decisions, and risks or \
                     trade-offs.\n\n\
                     Use the available tools to explore the codebase before planning. \
                     Be specific about file paths and code locations."
                        .to_string(),
                ),
            },
            AgentKind::General => AgentConfig {
                model: None,
                max_tokens: 16384,
                allowed_tools: None,
                read_only: false,
                system_prompt: None,
            },
        }
    }
}

/// Configuration for an agent instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Model to use; `None` inherits the session default
    pub model: Option<String>,
    pub max_tokens: u32,
    /// Tool names to expose; `None` means all
    pub allowed_tools: Option<Vec<String>>,
    pub read_only: bool,
    /// Custom system prompt; `None` inherits the session prompt
    pub system_prompt: Option<String>,
}

/// A running agent instance
pub struct Agent {
    pub id: String,
    pub kind: AgentKind,
    pub config: AgentConfig,
    pub conversation: Conversation,
    pub work_dir: PathBuf,
    /// Context passed down from the spawning agent
    pub parent_context: Option<String>,
    /// Used for oldest-first eviction
    pub created_at: DateTime<Utc>,
}

impl Agent {
    pub fn new(id: impl Into<String>, kind: AgentKind, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            kind,
            config: kind.default_config(),
            conversation: Conversation::new(),
            work_dir: work_dir.into(),
            parent_context: None,
            created_at: Utc::now(),
        }
    }

    /// Whether this agent may invoke the given tool. Read-only agents are
    /// statically denied every mutating tool regardless of the
    /// allow-list; otherwise the allow-list decides, with `None` meaning
    /// everything.
    pub fn can_execute_tool(&self, tool: &str) -> bool {
        if self.config.read_only && MUTATING_TOOLS.contains(&tool) {
            return false;
        }

        match &self.config.allowed_tools {
            None => true,
            Some(allowed) => allowed.iter().any(|t| t == tool),
        }
    }

    /// Tool definitions filtered to this agent's allow-list
    pub fn filtered_specs(&self, registry: &Registry) -> Vec<ToolSpec> {
        match &self.config.allowed_tools {
            None => registry.specs(),
            Some(allowed) => registry.filtered_specs(allowed),
        }
    }

    /// The model this agent runs on
    pub fn model(&self, default_model: &str) -> String {
        self.config
            .model
            .clone()
            .unwrap_or_else(|| default_model.to_string())
    }

    /// The system prompt, with parent context and working directory folded
    /// in when this agent type carries its own prompt
    pub fn system_prompt(&self, default_prompt: &str) -> String {
        match &self.config.system_prompt {
            Some(prompt) => {
                let mut prompt = prompt.clone();
                if let Some(context) = &self.parent_context {
                    prompt.push_str("\n\n## Context from parent:\n");
                    prompt.push_str(context);
                }
                prompt.push_str("\n\nWorking directory: ");
                prompt.push_str(&self.work_dir.to_string_lossy());
                prompt
            }
            None => default_prompt.to_string(),
        }
    }

    /// A snapshot gate usable while the agent itself is mutably borrowed
    /// by the turn loop
    pub fn gate(&self) -> AgentGate {
        AgentGate {
            read_only: self.config.read_only,
            allowed_tools: self.config.allowed_tools.clone(),
        }
    }
}

/// A detached copy of an agent's tool-access rules
#[derive(Debug, Clone)]
pub struct AgentGate {
    read_only: bool,
    allowed_tools: Option<Vec<String>>,
}

impl ToolGate for AgentGate {
    fn can_execute(&self, tool: &str) -> bool {
        if self.read_only && MUTATING_TOOLS.contains(&tool) {
            return false;
        }
        match &self.allowed_tools {
            None => true,
            Some(allowed) => allowed.iter().any(|t| t == tool),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_only_agent_denies_write_even_if_allow_listed() {
        let mut agent = Agent::new("a1", AgentKind::Explore, "/tmp");
        agent.config.allowed_tools = Some(vec!["Read".to_string(), "Write".to_string()]);

        assert!(!agent.can_execute_tool("Write"));
        assert!(!agent.can_execute_tool("Bash"));
        assert!(agent.can_execute_tool("Read"));
    }

    #[test]
    fn test_general_agent_allows_everything() {
        let agent = Agent::new("a1", AgentKind::General, "/tmp");
        assert!(agent.can_execute_tool("Write"));
        assert!(agent.can_execute_tool("Bash"));
        assert!(agent.can_execute_tool("Anything"));
    }

    #[test]
    fn test_plan_agent_includes_todo_write() {
        let agent = Agent::new("a1", AgentKind::Plan, "/tmp");
        assert!(agent.can_execute_tool("TodoWrite"));
        assert!(!agent.can_execute_tool("Edit"));
        assert!(agent.can_execute_tool("Glob"));
    }

    #[test]
    fn test_allow_list_restricts_non_mutating_tools_too() {
        let agent = Agent::new("a1", AgentKind::Explore, "/tmp");
        // Task is not on the explore allow-list
        assert!(!agent.can_execute_tool("Task"));
    }

    #[test]
    fn test_gate_matches_agent_rules() {
        let agent = Agent::new("a1", AgentKind::Plan, "/tmp");
        let gate = agent.gate();
        assert_eq!(gate.can_execute("Write"), agent.can_execute_tool("Write"));
        assert_eq!(
            gate.can_execute("TodoWrite"),
            agent.can_execute_tool("TodoWrite")
        );
    }

    #[test]
    fn test_kind_parse_defaults_to_general() {
        assert_eq!(AgentKind::parse("Explore"), AgentKind::Explore);
        assert_eq!(AgentKind::parse("Plan"), AgentKind::Plan);
        assert_eq!(AgentKind::parse("general-purpose"), AgentKind::General);
        assert_eq!(AgentKind::parse(""), AgentKind::General);
    }

    #[test]
    fn test_system_prompt_folds_in_parent_context() {
        let mut agent = Agent::new("a1", AgentKind::Explore, "/repo");
        agent.parent_context = Some("find the config loader".to_string());

        let prompt = agent.system_prompt("fallback");
        assert!(prompt.contains("find the config loader"));
        assert!(prompt.contains("Working directory: /repo"));

        let general = Agent::new("a2", AgentKind::General, "/repo");
        assert_eq!(general.system_prompt("fallback"), "fallback");
    }
}
