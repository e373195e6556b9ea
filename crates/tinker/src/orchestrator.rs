//! The top-level turn driver.
//!
//! Feeds the conversation to a backend, forwards text deltas as they
//! stream, buffers tool-use requests, and alternates model turns with
//! tool-execution turns until the model stops asking for tools or a bound
//! is hit. The loop is explicitly iterative with a bounded counter — the
//! cap and the wall-clock timeout are enforced in one place and the call
//! stack never grows with the number of turns.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::models::content::ToolRequest;
use crate::models::message::{Conversation, Message};
use crate::models::tool::ToolSpec;
use crate::providers::{CompletionRequest, Provider, StreamEvent};
use crate::tools::{ExecContext, ToolExecutor};

pub const DEFAULT_MAX_ITERATIONS: u32 = 50;
pub const DEFAULT_TURN_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_MAX_TOKENS: u32 = 8192;

/// Bounds for one user-visible turn
#[derive(Debug, Clone)]
pub struct TurnOptions {
    pub max_iterations: u32,
    pub timeout: Duration,
    pub max_tokens: u32,
}

impl Default for TurnOptions {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            timeout: DEFAULT_TURN_TIMEOUT,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnStatus {
    Completed,
    /// Iteration cap or wall-clock timeout; the partial text is annotated,
    /// not silently truncated
    LimitReached,
    Cancelled,
    Error,
}

/// What a turn produced
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub text: String,
    pub status: TurnStatus,
    pub iterations: u32,
    pub error: Option<String>,
}

impl TurnOutcome {
    fn completed(text: String, iterations: u32) -> Self {
        Self {
            text,
            status: TurnStatus::Completed,
            iterations,
            error: None,
        }
    }
}

/// Per-agent veto consulted before the executor ever sees a call. A
/// denial synthesizes an error result; it does not abort the batch.
pub trait ToolGate: Send + Sync {
    fn can_execute(&self, tool: &str) -> bool;
}

/// Everything a single run needs besides the conversation itself
pub struct TurnRequest<'a> {
    pub model: &'a str,
    pub system_prompt: &'a str,
    pub tools: Vec<ToolSpec>,
    pub gate: Option<&'a dyn ToolGate>,
    pub text_sink: Option<&'a (dyn Fn(&str) + Send + Sync)>,
}

/// Drives the streaming conversation loop against one provider
pub struct TurnLoop {
    provider: Arc<dyn Provider>,
    executor: Arc<ToolExecutor>,
    options: TurnOptions,
}

impl TurnLoop {
    pub fn new(provider: Arc<dyn Provider>, executor: Arc<ToolExecutor>) -> Self {
        Self {
            provider,
            executor,
            options: TurnOptions::default(),
        }
    }

    pub fn with_options(mut self, options: TurnOptions) -> Self {
        self.options = options;
        self
    }

    /// Run model turns until the model stops requesting tools, appending
    /// assistant and tool-result messages to the conversation as it goes.
    pub async fn run(
        &self,
        conversation: &mut Conversation,
        request: TurnRequest<'_>,
        cancel: CancellationToken,
    ) -> TurnOutcome {
        let started = Instant::now();
        let mut full_text = String::new();

        for iteration in 0..self.options.max_iterations {
            if started.elapsed() > self.options.timeout {
                warn!(iteration, "turn wall-clock timeout");
                full_text.push_str("\n\n(reached time limit)");
                return TurnOutcome {
                    text: full_text,
                    status: TurnStatus::LimitReached,
                    iterations: iteration,
                    error: None,
                };
            }

            let completion = CompletionRequest {
                model: request.model.to_string(),
                system: request.system_prompt.to_string(),
                messages: conversation.messages().to_vec(),
                tools: request.tools.clone(),
                max_tokens: self.options.max_tokens,
            };

            let mut stream = match self.provider.stream(completion).await {
                Ok(stream) => stream,
                Err(e) => {
                    return TurnOutcome {
                        text: full_text,
                        status: TurnStatus::Error,
                        iterations: iteration,
                        error: Some(e.to_string()),
                    };
                }
            };

            let mut turn_text = String::new();
            let mut pending: Vec<ToolRequest> = Vec::new();
            let mut stream_error: Option<String> = None;

            loop {
                let event = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        debug!(iteration, "turn cancelled mid-stream");
                        full_text.push_str(&turn_text);
                        return TurnOutcome {
                            text: full_text,
                            status: TurnStatus::Cancelled,
                            iterations: iteration,
                            error: None,
                        };
                    }
                    event = stream.next() => event,
                };

                match event {
                    Some(StreamEvent::TextDelta(delta)) => {
                        if let Some(sink) = request.text_sink {
                            sink(&delta);
                        }
                        turn_text.push_str(&delta);
                    }
                    Some(StreamEvent::ToolUse { id, call }) => {
                        pending.push(ToolRequest { id, call });
                    }
                    Some(StreamEvent::Error(e)) => {
                        stream_error = Some(e);
                        break;
                    }
                    Some(StreamEvent::Done) | None => break,
                }
            }

            if let Some(e) = stream_error {
                return TurnOutcome {
                    text: full_text,
                    status: TurnStatus::Error,
                    iterations: iteration + 1,
                    error: Some(e),
                };
            }

            full_text.push_str(&turn_text);

            if pending.is_empty() {
                // final turn: just the assistant text
                if !turn_text.is_empty() {
                    conversation.push(Message::assistant().with_text(&turn_text));
                }
                return TurnOutcome::completed(full_text, iteration + 1);
            }

            // one assistant message carrying the turn text and every
            // buffered tool use
            let mut assistant = Message::assistant();
            if !turn_text.is_empty() {
                assistant = assistant.with_text(&turn_text);
            }
            for tool_use in &pending {
                assistant = assistant.with_tool_use(tool_use.id.clone(), tool_use.call.clone());
            }
            conversation.push(assistant);

            // one user message with the results, in request order so the
            // identifiers pair up
            let mut results = Message::user();
            for tool_use in &pending {
                let (content, is_error) = self.dispatch(&request, tool_use, &cancel).await;
                results = results.with_tool_result(tool_use.id.clone(), content, is_error);
            }
            conversation.push(results);
            // loop again with no new user input
        }

        warn!(max = self.options.max_iterations, "turn iteration cap");
        full_text.push_str("\n\n(reached maximum iterations)");
        TurnOutcome {
            text: full_text,
            status: TurnStatus::LimitReached,
            iterations: self.options.max_iterations,
            error: None,
        }
    }

    async fn dispatch(
        &self,
        request: &TurnRequest<'_>,
        tool_use: &ToolRequest,
        cancel: &CancellationToken,
    ) -> (String, bool) {
        let name = &tool_use.call.name;

        if let Some(gate) = request.gate {
            if !gate.can_execute(name) {
                return (
                    format!("Tool '{name}' is not available for this agent type"),
                    true,
                );
            }
        }

        let ctx = ExecContext::new(cancel.clone());
        let output = self
            .executor
            .execute(&ctx, name, tool_use.call.arguments.clone())
            .await;
        (output.content, output.is_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::role::Role;
    use crate::permissions::{PermissionPolicy, RuleSet};
    use crate::providers::mock::{text_turn, tool_turn, MockProvider};
    use crate::tools::registry::Registry;
    use crate::tools::{ToolCategory, ToolOutput};
    use crate::errors::AgentResult;
    use async_trait::async_trait;
    use serde_json::{json, Value};

    struct EchoTool;

    #[async_trait]
    impl crate::tools::Tool for EchoTool {
        fn name(&self) -> &str {
            "Echo"
        }
        fn description(&self) -> &str {
            "echoes"
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
        async fn execute(
            &self,
            _ctx: &crate::tools::ExecContext,
            input: Value,
        ) -> AgentResult<ToolOutput> {
            Ok(ToolOutput::ok(
                input["message"].as_str().unwrap_or("").to_string(),
            ))
        }
    }

    fn executor() -> Arc<ToolExecutor> {
        let registry = Arc::new(Registry::new());
        registry.register(Arc::new(EchoTool));
        Arc::new(ToolExecutor::new(
            registry,
            Arc::new(PermissionPolicy::new(RuleSet::new())),
        ))
    }

    fn turn_request(tools: Vec<ToolSpec>) -> TurnRequest<'static> {
        TurnRequest {
            model: "mock-model",
            system_prompt: "",
            tools,
            gate: None,
            text_sink: None,
        }
    }

    #[tokio::test]
    async fn test_plain_text_turn_completes() {
        let provider = Arc::new(MockProvider::new(vec![text_turn("hello!")]));
        let turn_loop = TurnLoop::new(provider.clone(), executor());

        let mut conversation = Conversation::new();
        conversation.push_user_text("hi");

        let outcome = turn_loop
            .run(
                &mut conversation,
                turn_request(vec![]),
                CancellationToken::new(),
            )
            .await;

        assert_eq!(outcome.status, TurnStatus::Completed);
        assert_eq!(outcome.text, "hello!");
        assert_eq!(outcome.iterations, 1);
        assert_eq!(conversation.len(), 2);
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_tool_use_grows_conversation_by_exactly_two_then_final() {
        let provider = Arc::new(MockProvider::new(vec![
            tool_turn("tu_1", "Echo", json!({"message": "edited"})),
            text_turn("done"),
        ]));
        let turn_loop = TurnLoop::new(provider.clone(), executor());

        let mut conversation = Conversation::new();
        conversation.push_user_text("add a comment to line 1 of foo.txt");
        let before = conversation.len();

        let outcome = turn_loop
            .run(
                &mut conversation,
                turn_request(vec![]),
                CancellationToken::new(),
            )
            .await;

        assert_eq!(outcome.status, TurnStatus::Completed);
        // user → [assistant tool_use, user tool_result] → assistant text
        assert_eq!(conversation.len(), before + 3);

        let messages = conversation.messages();
        let assistant = &messages[before];
        assert_eq!(assistant.role, Role::Assistant);
        let uses = assistant.tool_uses();
        assert_eq!(uses.len(), 1);

        let results = &messages[before + 1];
        assert_eq!(results.role, Role::User);
        let result = results.content[0].as_tool_result().unwrap();
        assert_eq!(result.request_id, uses[0].id);
        assert!(!result.is_error);
        assert_eq!(result.content, "edited");

        let final_message = &messages[before + 2];
        assert_eq!(final_message.text(), "done");
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn test_batch_results_preserve_request_order() {
        let provider = Arc::new(MockProvider::new(vec![
            vec![
                StreamEvent::ToolUse {
                    id: "a".to_string(),
                    call: crate::models::tool::ToolCall::new("Echo", json!({"message": "first"})),
                },
                StreamEvent::ToolUse {
                    id: "b".to_string(),
                    call: crate::models::tool::ToolCall::new("Echo", json!({"message": "second"})),
                },
                StreamEvent::Done,
            ],
            text_turn("ok"),
        ]));
        let turn_loop = TurnLoop::new(provider, executor());

        let mut conversation = Conversation::new();
        conversation.push_user_text("two calls");
        turn_loop
            .run(
                &mut conversation,
                turn_request(vec![]),
                CancellationToken::new(),
            )
            .await;

        let results = &conversation.messages()[2];
        let ids: Vec<&str> = results
            .content
            .iter()
            .filter_map(|c| c.as_tool_result())
            .map(|r| r.request_id.as_str())
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
        let contents: Vec<&str> = results
            .content
            .iter()
            .filter_map(|c| c.as_tool_result())
            .map(|r| r.content.as_str())
            .collect();
        assert_eq!(contents, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_iteration_cap_stops_at_fifty_calls() {
        // a backend that requests a tool on every single turn
        let provider = Arc::new(MockProvider::repeating(tool_turn(
            "loop",
            "Echo",
            json!({"message": "again"}),
        )));
        let turn_loop = TurnLoop::new(provider.clone(), executor());

        let mut conversation = Conversation::new();
        conversation.push_user_text("never stop");

        let outcome = turn_loop
            .run(
                &mut conversation,
                turn_request(vec![]),
                CancellationToken::new(),
            )
            .await;

        assert_eq!(outcome.status, TurnStatus::LimitReached);
        assert_eq!(provider.call_count(), 50);
        assert!(outcome.text.contains("(reached maximum iterations)"));
    }

    #[tokio::test]
    async fn test_gate_denial_synthesizes_error_result() {
        struct DenyAll;
        impl ToolGate for DenyAll {
            fn can_execute(&self, _tool: &str) -> bool {
                false
            }
        }

        let provider = Arc::new(MockProvider::new(vec![
            tool_turn("tu_1", "Echo", json!({"message": "nope"})),
            text_turn("understood"),
        ]));
        let turn_loop = TurnLoop::new(provider, executor());

        let mut conversation = Conversation::new();
        conversation.push_user_text("try");

        let gate = DenyAll;
        let request = TurnRequest {
            model: "mock-model",
            system_prompt: "",
            tools: vec![],
            gate: Some(&gate),
            text_sink: None,
        };
        let outcome = turn_loop
            .run(&mut conversation, request, CancellationToken::new())
            .await;

        assert_eq!(outcome.status, TurnStatus::Completed);
        let result = conversation.messages()[2].content[0].as_tool_result().unwrap();
        assert!(result.is_error);
        assert!(result.content.contains("not available for this agent type"));
    }

    #[tokio::test]
    async fn test_stream_error_surfaces_as_error_outcome() {
        let provider = Arc::new(MockProvider::new(vec![vec![
            StreamEvent::TextDelta("partial".to_string()),
            StreamEvent::Error("backend unavailable".to_string()),
        ]]));
        let turn_loop = TurnLoop::new(provider, executor());

        let mut conversation = Conversation::new();
        conversation.push_user_text("hi");

        let outcome = turn_loop
            .run(
                &mut conversation,
                turn_request(vec![]),
                CancellationToken::new(),
            )
            .await;

        assert_eq!(outcome.status, TurnStatus::Error);
        assert_eq!(outcome.error.as_deref(), Some("backend unavailable"));
    }

    #[tokio::test]
    async fn test_cancellation_stops_forwarding() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let provider = Arc::new(MockProvider::new(vec![text_turn("never seen")]));
        let turn_loop = TurnLoop::new(provider, executor());

        let mut conversation = Conversation::new();
        conversation.push_user_text("hi");

        let outcome = turn_loop
            .run(&mut conversation, turn_request(vec![]), cancel)
            .await;
        assert_eq!(outcome.status, TurnStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_text_deltas_forwarded_in_order() {
        let provider = Arc::new(MockProvider::new(vec![vec![
            StreamEvent::TextDelta("a".to_string()),
            StreamEvent::TextDelta("b".to_string()),
            StreamEvent::TextDelta("c".to_string()),
            StreamEvent::Done,
        ]]));
        let turn_loop = TurnLoop::new(provider, executor());

        let seen = std::sync::Mutex::new(String::new());
        let sink = |delta: &str| {
            seen.lock().unwrap().push_str(delta);
        };

        let mut conversation = Conversation::new();
        conversation.push_user_text("hi");
        let request = TurnRequest {
            model: "mock-model",
            system_prompt: "",
            tools: vec![],
            gate: None,
            text_sink: Some(&sink),
        };
        let outcome = turn_loop
            .run(&mut conversation, request, CancellationToken::new())
            .await;

        assert_eq!(outcome.text, "abc");
        assert_eq!(*seen.lock().unwrap(), "abc");
    }
}
