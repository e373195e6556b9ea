use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use futures::stream;
use futures::StreamExt;
use serde_json::Value;

use super::base::{CompletionRequest, EventStream, Provider, StreamEvent};
use crate::models::tool::ToolCall;

/// A mock provider that replays pre-configured event turns for testing.
///
/// Each call to `stream` consumes one scripted turn; when the script runs
/// out the provider answers with an empty completed turn (or repeats the
/// last turn forever if built with [`MockProvider::repeating`]).
pub struct MockProvider {
    turns: Mutex<VecDeque<Vec<StreamEvent>>>,
    repeat: Option<Vec<StreamEvent>>,
    calls: AtomicUsize,
}

impl MockProvider {
    pub fn new(turns: Vec<Vec<StreamEvent>>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
            repeat: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// A provider that answers every request with the same turn. Useful
    /// for exercising the iteration cap.
    pub fn repeating(turn: Vec<StreamEvent>) -> Self {
        Self {
            turns: Mutex::new(VecDeque::new()),
            repeat: Some(turn),
            calls: AtomicUsize::new(0),
        }
    }

    /// How many times `stream` has been called
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn stream(&self, _request: CompletionRequest) -> Result<EventStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let events = match self.turns.lock().unwrap().pop_front() {
            Some(turn) => turn,
            None => match &self.repeat {
                Some(turn) => turn.clone(),
                None => vec![StreamEvent::Done],
            },
        };
        Ok(stream::iter(events).boxed())
    }
}

/// A scripted turn that streams `text` and completes.
pub fn text_turn(text: &str) -> Vec<StreamEvent> {
    vec![
        StreamEvent::TextDelta(text.to_string()),
        StreamEvent::Done,
    ]
}

/// A scripted turn that requests a single tool invocation.
pub fn tool_turn(id: &str, tool: &str, arguments: Value) -> Vec<StreamEvent> {
    vec![
        StreamEvent::ToolUse {
            id: id.to_string(),
            call: ToolCall::new(tool, arguments),
        },
        StreamEvent::Done,
    ]
}
