use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::content::{MessageContent, ToolRequest};
use super::role::Role;
use super::tool::ToolCall;

/// A message to or from a model backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub created: i64,
    pub content: Vec<MessageContent>,
}

impl Message {
    fn new(role: Role) -> Self {
        Message {
            role,
            created: Utc::now().timestamp(),
            content: Vec::new(),
        }
    }

    /// Create a new user message with the current timestamp
    pub fn user() -> Self {
        Message::new(Role::User)
    }

    /// Create a new assistant message with the current timestamp
    pub fn assistant() -> Self {
        Message::new(Role::Assistant)
    }

    /// Create a new system message with the current timestamp
    pub fn system() -> Self {
        Message::new(Role::System)
    }

    /// Add any MessageContent to the message
    pub fn with_content(mut self, content: MessageContent) -> Self {
        self.content.push(content);
        self
    }

    /// Add text content to the message
    pub fn with_text<S: Into<String>>(self, text: S) -> Self {
        self.with_content(MessageContent::text(text))
    }

    /// Add a tool use to the message
    pub fn with_tool_use<S: Into<String>>(self, id: S, call: ToolCall) -> Self {
        self.with_content(MessageContent::tool_use(id, call))
    }

    /// Add a tool result to the message
    pub fn with_tool_result<S: Into<String>, T: Into<String>>(
        self,
        request_id: S,
        content: T,
        is_error: bool,
    ) -> Self {
        self.with_content(MessageContent::tool_result(request_id, content, is_error))
    }

    /// All text content in the message, joined with newlines
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| c.as_text())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// All tool uses carried by the message, in emission order
    pub fn tool_uses(&self) -> Vec<&ToolRequest> {
        self.content.iter().filter_map(|c| c.as_tool_use()).collect()
    }

    pub fn has_tool_use(&self) -> bool {
        self.content
            .iter()
            .any(|c| matches!(c, MessageContent::ToolUse(_)))
    }
}

/// An ordered, append-only message log. Owned by exactly one agent or
/// top-level session; the only mutation is appending.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn push_user_text<S: Into<String>>(&mut self, text: S) {
        self.push(Message::user().with_text(text));
    }

    pub fn push_assistant_text<S: Into<String>>(&mut self, text: S) {
        self.push(Message::assistant().with_text(text));
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
