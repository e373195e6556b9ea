//! The capability surface the model can invoke.
//!
//! Every tool — local file I/O, shell execution, or a bridged remote
//! capability — satisfies the same [`Tool`] contract, so the executor and
//! the permission layer never special-case origin.
pub mod bash;
pub mod edit;
pub mod executor;
pub mod files;
pub mod registry;
pub mod search;
pub mod task;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::errors::AgentResult;
use crate::models::tool::ToolSpec;

pub use executor::{ToolExecutor, ToolObserver};
pub use registry::Registry;

/// Tool category, used for grouping and for category-specific permission
/// pattern matching
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCategory {
    File,
    Execution,
    Search,
    Web,
    Agent,
    Other,
}

/// The result of one tool execution. Produced once; never mutated after.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub content: String,
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

impl ToolOutput {
    pub fn ok<S: Into<String>>(content: S) -> Self {
        ToolOutput {
            content: content.into(),
            is_error: false,
            metadata: HashMap::new(),
        }
    }

    pub fn error<S: Into<String>>(content: S) -> Self {
        ToolOutput {
            content: content.into(),
            is_error: true,
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata<K: Into<String>, V: Into<Value>>(mut self, key: K, value: V) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// The cancellable operation context a tool executes under. Cancellation
/// stops further work but never undoes a side effect already committed.
#[derive(Clone, Default)]
pub struct ExecContext {
    pub cancel: CancellationToken,
}

impl ExecContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Core trait every capability implements
#[async_trait]
pub trait Tool: Send + Sync {
    /// The tool's name, unique within a registry
    fn name(&self) -> &str;

    /// What the tool does, as shown to the model
    fn description(&self) -> &str;

    /// JSON schema for the tool's input
    fn input_schema(&self) -> Value;

    /// Whether executions must pass the permission boundary
    fn requires_permission(&self) -> bool;

    fn category(&self) -> ToolCategory;

    /// Run the tool. Input errors should come back as
    /// `AgentError::InvalidParameters`; the executor converts any error
    /// into an error-flagged output.
    async fn execute(&self, ctx: &ExecContext, input: Value) -> AgentResult<ToolOutput>;

    /// The wire-level definition presented to a backend
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(self.name(), self.description(), self.input_schema())
    }
}

// Schema builders for common patterns

pub fn object_schema(properties: Value, required: &[&str]) -> Value {
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

pub fn string_prop(description: &str) -> Value {
    json!({ "type": "string", "description": description })
}

pub fn int_prop(description: &str) -> Value {
    json!({ "type": "integer", "description": description })
}

pub fn bool_prop(description: &str) -> Value {
    json!({ "type": "boolean", "description": description })
}

/// Decode a tool's raw input into its typed parameter struct.
pub fn parse_input<T: serde::de::DeserializeOwned>(input: Value) -> AgentResult<T> {
    serde_json::from_value(input)
        .map_err(|e| crate::errors::AgentError::InvalidParameters(e.to_string()))
}
