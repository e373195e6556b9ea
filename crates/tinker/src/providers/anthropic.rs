use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};

use super::base::{CompletionRequest, EventStream, Provider, StreamEvent};
use crate::models::content::MessageContent;
use crate::models::message::Message;
use crate::models::role::Role;
use crate::models::tool::ToolCall;

/// An adapter for Anthropic-style messages APIs.
///
/// Kept deliberately thin: it assembles the wire request, triages status
/// codes, and replays the parsed response as the event sequence the turn
/// loop consumes. Wire plumbing is a collaborator of the engine, not part
/// of it.
pub struct AnthropicProvider {
    client: Client,
    host: String,
    api_key: String,
}

impl AnthropicProvider {
    pub fn new(host: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600))
            .build()?;

        Ok(Self {
            client,
            host: host.into(),
            api_key: api_key.into(),
        })
    }

    /// Build from `ANTHROPIC_API_KEY` (and optional `ANTHROPIC_HOST`).
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| anyhow!("ANTHROPIC_API_KEY is not set"))?;
        let host = std::env::var("ANTHROPIC_HOST")
            .unwrap_or_else(|_| "https://api.anthropic.com".to_string());
        Self::new(host, api_key)
    }

    fn message_to_wire(message: &Message) -> Value {
        let role = match message.role {
            Role::Assistant => "assistant",
            _ => "user",
        };

        let content: Vec<Value> = message
            .content
            .iter()
            .filter_map(|block| match block {
                MessageContent::Text(text) => Some(json!({
                    "type": "text",
                    "text": text.text,
                })),
                MessageContent::Image(image) => Some(json!({
                    "type": "image",
                    "source": {
                        "type": "base64",
                        "media_type": image.mime_type,
                        "data": image.data,
                    },
                })),
                MessageContent::ToolUse(request) => Some(json!({
                    "type": "tool_use",
                    "id": request.id,
                    "name": request.call.name,
                    "input": request.call.arguments,
                })),
                MessageContent::ToolResult(response) => Some(json!({
                    "type": "tool_result",
                    "tool_use_id": response.request_id,
                    "content": response.content,
                    "is_error": response.is_error,
                })),
                MessageContent::Thinking(_) => None,
            })
            .collect();

        json!({ "role": role, "content": content })
    }

    fn build_payload(request: &CompletionRequest) -> Value {
        let messages: Vec<Value> = request.messages.iter().map(Self::message_to_wire).collect();

        let mut payload = json!({
            "model": request.model,
            "messages": messages,
            "max_tokens": request.max_tokens,
        });

        if !request.system.is_empty() {
            payload["system"] = json!(request.system);
        }
        if !request.tools.is_empty() {
            let tools: Vec<Value> = request
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "input_schema": t.input_schema,
                    })
                })
                .collect();
            payload["tools"] = json!(tools);
        }

        payload
    }

    fn response_events(response: &Value) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if let Some(blocks) = response.get("content").and_then(Value::as_array) {
            for block in blocks {
                match block.get("type").and_then(Value::as_str) {
                    Some("text") => {
                        if let Some(text) = block.get("text").and_then(Value::as_str) {
                            events.push(StreamEvent::TextDelta(text.to_string()));
                        }
                    }
                    Some("tool_use") => {
                        let id = block
                            .get("id")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string();
                        let name = block
                            .get("name")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string();
                        let input = block.get("input").cloned().unwrap_or(json!({}));
                        events.push(StreamEvent::ToolUse {
                            id,
                            call: ToolCall::new(name, input),
                        });
                    }
                    _ => {}
                }
            }
        }
        events.push(StreamEvent::Done);
        events
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn stream(&self, request: CompletionRequest) -> Result<EventStream> {
        let payload = Self::build_payload(&request);
        let client = self.client.clone();
        let url = format!("{}/v1/messages", self.host.trim_end_matches('/'));
        let api_key = self.api_key.clone();

        // no work happens until the loop polls the stream; a request
        // failure becomes an Error event rather than a panic
        Ok(Box::pin(async_stream::stream! {
            let result = async {
                let response = client
                    .post(&url)
                    .header("x-api-key", &api_key)
                    .header("anthropic-version", "2023-06-01")
                    .json(&payload)
                    .send()
                    .await?;

                match response.status() {
                    StatusCode::OK => Ok(response.json::<Value>().await?),
                    status if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() >= 500 => {
                        Err(anyhow!("Server error: {}", status))
                    }
                    status => {
                        let error_text = response.text().await.unwrap_or_default();
                        Err(anyhow!("Request failed: {} - {}", status, error_text))
                    }
                }
            }
            .await;

            match result {
                Ok(response) => {
                    for event in Self::response_events(&response) {
                        yield event;
                    }
                }
                Err(e) => yield StreamEvent::Error(e.to_string()),
            }
        }))
    }
}
