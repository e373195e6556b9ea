use serde::{Deserialize, Serialize};

use super::tool::ToolCall;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextContent {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageContent {
    pub data: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThinkingContent {
    pub thinking: String,
}

/// A tool invocation the assistant asked for, tagged with the identifier
/// the backend will use to pair the eventual result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRequest {
    pub id: String,
    pub call: ToolCall,
}

/// The answer to a [`ToolRequest`], carrying the same identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    pub request_id: String,
    pub content: String,
    pub is_error: bool,
}

/// Content passed inside a message, which can be both simple content and
/// tool content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageContent {
    Text(TextContent),
    Image(ImageContent),
    ToolUse(ToolRequest),
    ToolResult(ToolResponse),
    Thinking(ThinkingContent),
}

impl MessageContent {
    pub fn text<S: Into<String>>(text: S) -> Self {
        MessageContent::Text(TextContent { text: text.into() })
    }

    pub fn image<S: Into<String>, T: Into<String>>(data: S, mime_type: T) -> Self {
        MessageContent::Image(ImageContent {
            data: data.into(),
            mime_type: mime_type.into(),
        })
    }

    pub fn thinking<S: Into<String>>(thinking: S) -> Self {
        MessageContent::Thinking(ThinkingContent {
            thinking: thinking.into(),
        })
    }

    pub fn tool_use<S: Into<String>>(id: S, call: ToolCall) -> Self {
        MessageContent::ToolUse(ToolRequest {
            id: id.into(),
            call,
        })
    }

    pub fn tool_result<S: Into<String>, T: Into<String>>(
        request_id: S,
        content: T,
        is_error: bool,
    ) -> Self {
        MessageContent::ToolResult(ToolResponse {
            request_id: request_id.into(),
            content: content.into(),
            is_error,
        })
    }

    /// Get the text content if this is a Text variant
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MessageContent::Text(text) => Some(&text.text),
            _ => None,
        }
    }

    pub fn as_tool_use(&self) -> Option<&ToolRequest> {
        if let MessageContent::ToolUse(ref request) = self {
            Some(request)
        } else {
            None
        }
    }

    pub fn as_tool_result(&self) -> Option<&ToolResponse> {
        if let MessageContent::ToolResult(ref response) = self {
            Some(response)
        } else {
            None
        }
    }
}
