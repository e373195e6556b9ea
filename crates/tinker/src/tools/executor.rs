use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use crate::permissions::{describe_invocation, Decision, PermissionHandler, PermissionPolicy};

use super::{ExecContext, Registry, ToolOutput};

/// Start/end notifications for a host UI. Fire-and-forget: the absence of
/// an observer never changes execution behavior.
pub trait ToolObserver: Send + Sync {
    fn on_tool_start(&self, _name: &str, _description: &str) {}
    fn on_tool_end(&self, _name: &str, _result: &str, _is_error: bool) {}
}

/// Wraps a [`Registry`] with permission gating and observation hooks.
///
/// `execute` never raises outside the result channel: unknown tools,
/// malformed input, rule denials, handler refusals and tool errors all
/// come back as error-flagged outputs so the turn loop can keep going.
pub struct ToolExecutor {
    registry: Arc<Registry>,
    policy: Arc<PermissionPolicy>,
    handler: Option<Arc<dyn PermissionHandler>>,
    observer: Option<Arc<dyn ToolObserver>>,
}

impl ToolExecutor {
    pub fn new(registry: Arc<Registry>, policy: Arc<PermissionPolicy>) -> Self {
        Self {
            registry,
            policy,
            handler: None,
            observer: None,
        }
    }

    pub fn with_handler(mut self, handler: Arc<dyn PermissionHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn ToolObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn policy(&self) -> &Arc<PermissionPolicy> {
        &self.policy
    }

    pub async fn execute(&self, ctx: &ExecContext, name: &str, input: Value) -> ToolOutput {
        let Some(tool) = self.registry.get(name) else {
            return ToolOutput::error(format!("Unknown tool: {name}"));
        };

        // loose parse for permission inspection; failure degrades to an
        // empty map rather than aborting
        let input_map: Map<String, Value> = input.as_object().cloned().unwrap_or_default();

        if tool.requires_permission() {
            match self.policy.evaluate(name, &input_map) {
                Decision::Allowed => {}
                Decision::Denied(reason) => {
                    debug!(tool = name, %reason, "invocation denied");
                    return ToolOutput::error(reason);
                }
                Decision::NeedsApproval => {
                    let description = describe_invocation(name, &input_map);
                    let granted = match &self.handler {
                        // handler failure counts as denial
                        Some(handler) => handler
                            .confirm(name, &input_map, &description)
                            .await
                            .unwrap_or(false),
                        None => false,
                    };
                    if !granted {
                        return ToolOutput::error("Permission denied by user");
                    }
                }
            }
        }

        if let Some(observer) = &self.observer {
            observer.on_tool_start(name, tool.description());
        }

        debug!(tool = name, "executing");
        let output = match tool.execute(ctx, input).await {
            Ok(output) => output,
            Err(e) => ToolOutput::error(e.to_string()),
        };

        if let Some(observer) = &self.observer {
            observer.on_tool_end(name, &output.content, output.is_error);
        }

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{AgentError, AgentResult};
    use crate::permissions::{Action, Rule, RuleSet};
    use crate::tools::{ExecContext, Tool, ToolCategory};
    use anyhow::Result;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct StubTool {
        name: &'static str,
        gated: bool,
        fail: bool,
    }

    #[async_trait]
    impl Tool for StubTool {
        fn name(&self) -> &str {
            self.name
        }

        fn description(&self) -> &str {
            "a stub"
        }

        fn input_schema(&self) -> Value {
            json!({"type": "object"})
        }

        fn requires_permission(&self) -> bool {
            self.gated
        }

        fn category(&self) -> ToolCategory {
            ToolCategory::Other
        }

        async fn execute(&self, _ctx: &ExecContext, _input: Value) -> AgentResult<ToolOutput> {
            if self.fail {
                Err(AgentError::ExecutionError("stub failure".to_string()))
            } else {
                Ok(ToolOutput::ok("stub ran"))
            }
        }
    }

    struct RecordingHandler {
        answer: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PermissionHandler for RecordingHandler {
        async fn confirm(
            &self,
            _tool: &str,
            _input: &Map<String, Value>,
            _description: &str,
        ) -> Result<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.answer)
        }
    }

    #[derive(Default)]
    struct RecordingObserver {
        started: AtomicBool,
        ended: Mutex<Option<(String, bool)>>,
    }

    impl ToolObserver for RecordingObserver {
        fn on_tool_start(&self, _name: &str, _description: &str) {
            self.started.store(true, Ordering::SeqCst);
        }

        fn on_tool_end(&self, name: &str, _result: &str, is_error: bool) {
            *self.ended.lock().unwrap() = Some((name.to_string(), is_error));
        }
    }

    fn executor_with(rules: Vec<Rule>, tools: Vec<StubTool>) -> ToolExecutor {
        let registry = Arc::new(Registry::new());
        for tool in tools {
            registry.register(Arc::new(tool));
        }
        let mut rule_set = RuleSet::new();
        for rule in rules {
            rule_set.add(rule);
        }
        ToolExecutor::new(registry, Arc::new(PermissionPolicy::new(rule_set)))
    }

    #[tokio::test]
    async fn test_unknown_tool_is_an_error_result() {
        let executor = executor_with(vec![], vec![]);
        let output = executor
            .execute(&ExecContext::default(), "Nope", json!({}))
            .await;
        assert!(output.is_error);
        assert!(output.content.contains("Unknown tool"));
    }

    #[tokio::test]
    async fn test_denied_tool_short_circuits() {
        let executor = executor_with(
            vec![Rule::parse("Gated", Action::Deny)],
            vec![StubTool {
                name: "Gated",
                gated: true,
                fail: false,
            }],
        );
        let output = executor
            .execute(&ExecContext::default(), "Gated", json!({}))
            .await;
        assert!(output.is_error);
        assert!(output.content.contains("denied"));
    }

    #[tokio::test]
    async fn test_ask_consults_handler_and_respects_refusal() {
        let handler = Arc::new(RecordingHandler {
            answer: false,
            calls: AtomicUsize::new(0),
        });
        let executor = executor_with(
            vec![],
            vec![StubTool {
                name: "Gated",
                gated: true,
                fail: false,
            }],
        )
        .with_handler(handler.clone());

        let output = executor
            .execute(&ExecContext::default(), "Gated", json!({}))
            .await;
        assert!(output.is_error);
        assert_eq!(output.content, "Permission denied by user");
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_ask_with_no_handler_denies() {
        let executor = executor_with(
            vec![],
            vec![StubTool {
                name: "Gated",
                gated: true,
                fail: false,
            }],
        );
        let output = executor
            .execute(&ExecContext::default(), "Gated", json!({}))
            .await;
        assert!(output.is_error);
    }

    #[tokio::test]
    async fn test_granted_tool_runs_and_observer_fires() {
        let handler = Arc::new(RecordingHandler {
            answer: true,
            calls: AtomicUsize::new(0),
        });
        let observer = Arc::new(RecordingObserver::default());
        let executor = executor_with(
            vec![],
            vec![StubTool {
                name: "Gated",
                gated: true,
                fail: false,
            }],
        )
        .with_handler(handler)
        .with_observer(observer.clone());

        let output = executor
            .execute(&ExecContext::default(), "Gated", json!({}))
            .await;
        assert!(!output.is_error);
        assert_eq!(output.content, "stub ran");
        assert!(observer.started.load(Ordering::SeqCst));
        assert_eq!(
            observer.ended.lock().unwrap().clone(),
            Some(("Gated".to_string(), false))
        );
    }

    #[tokio::test]
    async fn test_tool_error_becomes_error_output() {
        let executor = executor_with(
            vec![],
            vec![StubTool {
                name: "Free",
                gated: false,
                fail: true,
            }],
        );
        let output = executor
            .execute(&ExecContext::default(), "Free", json!({}))
            .await;
        assert!(output.is_error);
        assert!(output.content.contains("stub failure"));
    }

    #[tokio::test]
    async fn test_ungated_tool_skips_policy() {
        // a deny rule for the tool exists, but the tool doesn't require
        // permission so the policy is never consulted
        let executor = executor_with(
            vec![Rule::parse("Free", Action::Deny)],
            vec![StubTool {
                name: "Free",
                gated: false,
                fail: false,
            }],
        );
        let output = executor
            .execute(&ExecContext::default(), "Free", json!({}))
            .await;
        assert!(!output.is_error);
    }
}
