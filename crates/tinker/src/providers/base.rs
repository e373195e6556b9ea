use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::models::message::Message;
use crate::models::tool::{ToolCall, ToolSpec};

/// A chat completion request: everything a backend needs for one turn.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub system: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSpec>,
    pub max_tokens: u32,
}

/// Events a backend emits while answering a request.
///
/// Text deltas arrive in emission order; tool-use requests may arrive at
/// any point before `Done`. A stream error is an event, not a panic, so
/// the turn loop can surface it as an outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    TextDelta(String),
    ToolUse { id: String, call: ToolCall },
    Done,
    Error(String),
}

pub type EventStream = BoxStream<'static, StreamEvent>;

/// Base trait for model backends (Anthropic-compatible APIs, local
/// runtimes, test stubs). The engine is agnostic to what sits behind it.
#[async_trait]
pub trait Provider: Send + Sync {
    /// The provider name, used for model-prefix routing
    fn name(&self) -> &str;

    /// Stream the response to a completion request
    async fn stream(&self, request: CompletionRequest) -> Result<EventStream>;
}
