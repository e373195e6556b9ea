use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};

use tinker::permissions::{PermissionHandler, PermissionPolicy};

/// Collects consent on the terminal. "Always allow" feeds the session
/// approval memory so the same tool stops prompting.
pub struct TerminalPermissionHandler {
    policy: Arc<PermissionPolicy>,
}

impl TerminalPermissionHandler {
    pub fn new(policy: Arc<PermissionPolicy>) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl PermissionHandler for TerminalPermissionHandler {
    async fn confirm(
        &self,
        tool: &str,
        _input: &Map<String, Value>,
        description: &str,
    ) -> Result<bool> {
        let tool = tool.to_string();
        let prompt = description.to_string();

        // cliclack is blocking; keep it off the async runtime threads
        let choice = tokio::task::spawn_blocking(move || {
            cliclack::select(prompt)
                .item("allow", "Allow", "")
                .item("always", "Allow and don't ask again", "")
                .item("deny", "Deny", "")
                .interact()
        })
        .await??;

        match choice {
            "always" => {
                self.policy.approvals().allow(&tool);
                Ok(true)
            }
            "allow" => Ok(true),
            _ => Ok(false),
        }
    }
}
