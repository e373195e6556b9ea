use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};

use super::rules::{Action, RuleSet};

/// The overall permission posture of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionMode {
    /// Auto-accept rule-allowed tools
    Auto,
    /// Ask for anything that isn't explicitly allowed
    Ask,
    /// Read-only: mutating tools are refused outright
    Plan,
}

/// Supplied by the hosting application to collect consent. The engine
/// never assumes how the question is presented; a failed handler counts
/// as a denial.
#[async_trait]
pub trait PermissionHandler: Send + Sync {
    async fn confirm(
        &self,
        tool: &str,
        input: &Map<String, Value>,
        description: &str,
    ) -> Result<bool>;
}

/// Session-scoped "always allow this tool" memory.
///
/// This is deliberately coarse: approving one Bash invocation with "don't
/// ask again" approves every later Bash invocation for the session,
/// bypassing rule granularity. It lives behind its own type so a host can
/// swap in something scoped to the matched pattern instead.
#[derive(Debug, Default)]
pub struct SessionApprovals {
    allowed: RwLock<HashSet<String>>,
}

impl SessionApprovals {
    pub fn allow(&self, tool: &str) {
        self.allowed.write().unwrap().insert(tool.to_string());
    }

    pub fn is_allowed(&self, tool: &str) -> bool {
        self.allowed.read().unwrap().contains(tool)
    }
}

/// What the policy decided about an invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Denied(String),
    NeedsApproval,
}

/// Tools that mutate state; refused wholesale in plan mode.
const WRITE_TOOLS: [&str; 4] = ["Write", "Edit", "Bash", "NotebookEdit"];

pub fn is_write_tool(tool: &str) -> bool {
    WRITE_TOOLS.contains(&tool)
}

/// Evaluates rules, session approvals and the permission mode for a tool
/// invocation. UI-independent: the only outward dependency is the
/// [`PermissionHandler`] the executor consults on `NeedsApproval`.
pub struct PermissionPolicy {
    mode: RwLock<PermissionMode>,
    rules: RuleSet,
    approvals: SessionApprovals,
    skip_permissions: AtomicBool,
}

impl PermissionPolicy {
    pub fn new(rules: RuleSet) -> Self {
        Self {
            mode: RwLock::new(PermissionMode::Ask),
            rules,
            approvals: SessionApprovals::default(),
            skip_permissions: AtomicBool::new(false),
        }
    }

    pub fn set_mode(&self, mode: PermissionMode) {
        *self.mode.write().unwrap() = mode;
    }

    pub fn mode(&self) -> PermissionMode {
        *self.mode.read().unwrap()
    }

    /// Bypass every check. Only for explicitly dangerous host flags.
    pub fn set_skip_permissions(&self, skip: bool) {
        self.skip_permissions.store(skip, Ordering::Relaxed);
    }

    pub fn approvals(&self) -> &SessionApprovals {
        &self.approvals
    }

    /// Resolve an invocation against mode, session approvals and rules.
    pub fn evaluate(&self, tool: &str, input: &Map<String, Value>) -> Decision {
        if self.skip_permissions.load(Ordering::Relaxed) {
            return Decision::Allowed;
        }

        if self.mode() == PermissionMode::Plan {
            if is_write_tool(tool) {
                return Decision::Denied(
                    "write operations are not allowed in plan mode".to_string(),
                );
            }
            return Decision::Allowed;
        }

        // the session-level shortcut skips rule evaluation entirely
        if self.approvals.is_allowed(tool) {
            return Decision::Allowed;
        }

        match self.rules.check(tool, input) {
            Action::Allow => Decision::Allowed,
            Action::Deny => Decision::Denied("operation denied by permission rules".to_string()),
            Action::Ask => Decision::NeedsApproval,
        }
    }
}

/// A human-readable description of an invocation, for consent prompts and
/// observation hooks.
pub fn describe_invocation(tool: &str, input: &Map<String, Value>) -> String {
    let str_field = |key: &str| input.get(key).and_then(Value::as_str);

    match tool {
        "Bash" => match str_field("command") {
            Some(cmd) => format!("Execute command: {cmd}"),
            None => str_field("description")
                .map(str::to_string)
                .unwrap_or_else(|| "Execute shell command".to_string()),
        },
        "Read" => match str_field("file_path") {
            Some(path) => format!("Read file: {path}"),
            None => "Read file".to_string(),
        },
        "Write" => match str_field("file_path") {
            Some(path) => format!("Write file: {path}"),
            None => "Write file".to_string(),
        },
        "Edit" => match str_field("file_path") {
            Some(path) => format!("Edit file: {path}"),
            None => "Edit file".to_string(),
        },
        "WebFetch" => match str_field("url") {
            Some(url) => format!("Fetch URL: {url}"),
            None => "Fetch web content".to_string(),
        },
        "WebSearch" => match str_field("query") {
            Some(query) => format!("Web search: {query}"),
            None => "Perform web search".to_string(),
        },
        _ => format!("Execute {tool}"),
    }
}
