use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::errors::{AgentError, AgentResult};
use crate::matcher::{self, MatchError};

use super::files::{resolve_path, ReadTracker};
use super::{
    bool_prop, object_schema, parse_input, string_prop, ExecContext, Tool, ToolCategory,
    ToolOutput,
};

#[derive(Debug, Deserialize)]
struct EditInput {
    file_path: String,
    old_string: String,
    new_string: String,
    #[serde(default)]
    replace_all: bool,
}

/// Performs targeted string replacements in files, backed by the
/// fallback-strategy matcher so whitespace and indentation drift don't
/// force byte-exact snippets.
pub struct EditTool {
    work_dir: PathBuf,
    tracker: Arc<ReadTracker>,
}

impl EditTool {
    pub fn new(work_dir: impl Into<PathBuf>, tracker: Arc<ReadTracker>) -> Self {
        Self {
            work_dir: work_dir.into(),
            tracker,
        }
    }
}

#[async_trait]
impl Tool for EditTool {
    fn name(&self) -> &str {
        "Edit"
    }

    fn description(&self) -> &str {
        "Performs string replacements in files. Uses intelligent matching that handles whitespace and indentation variations. The old_string should match the content you want to replace. Use replace_all to replace all occurrences."
    }

    fn input_schema(&self) -> Value {
        object_schema(
            json!({
                "file_path": string_prop("The absolute path to the file to edit"),
                "old_string": string_prop("The text to replace (handles minor whitespace variations)"),
                "new_string": string_prop("The text to replace it with"),
                "replace_all": bool_prop("Replace all occurrences (default: false)"),
            }),
            &["file_path", "old_string", "new_string"],
        )
    }

    fn requires_permission(&self) -> bool {
        true
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::File
    }

    async fn execute(&self, _ctx: &ExecContext, input: Value) -> AgentResult<ToolOutput> {
        let params: EditInput = parse_input(input)?;

        if params.file_path.is_empty() {
            return Ok(ToolOutput::error("file_path is required"));
        }
        if params.old_string.is_empty() {
            return Ok(ToolOutput::error("old_string is required"));
        }
        if params.old_string == params.new_string {
            return Ok(ToolOutput::error(
                "old_string and new_string must be different",
            ));
        }

        let path = resolve_path(&self.work_dir, &params.file_path);
        if !path.exists() {
            return Ok(ToolOutput::error(format!(
                "File not found: {}",
                params.file_path
            )));
        }

        // an edit implies the content is about to be inspected
        self.tracker.mark(&path);

        let content = std::fs::read_to_string(&path)
            .map_err(|e| AgentError::ExecutionError(format!("Failed to read file: {e}")))?;

        let found = match matcher::find_matches(&content, &params.old_string, params.replace_all) {
            Ok(found) => found,
            Err(MatchError::NoMatch) => {
                return Ok(ToolOutput::error(format!(
                    "Could not find a match for the text in {}. Tried {} matching strategies.\n\
                     Tips:\n\
                     - Make sure the text exists in the file\n\
                     - Check for invisible characters or encoding issues\n\
                     - Include more surrounding context\n\
                     - Use the Read tool to verify the exact content",
                    params.file_path,
                    matcher::STRATEGY_COUNT
                )));
            }
            Err(MatchError::Ambiguous(count)) => {
                return Ok(ToolOutput::error(format!(
                    "Found {count} occurrences in {}. Either provide more context to make it unique, or set replace_all to true.",
                    params.file_path
                )));
            }
        };

        let new_content =
            matcher::apply_replacement(&content, &found.matches, &params.new_string);
        std::fs::write(&path, &new_content)
            .map_err(|e| AgentError::ExecutionError(format!("Failed to write file: {e}")))?;

        let old_lines = params.old_string.chars().filter(|c| *c == '\n').count() + 1;
        let new_lines = params.new_string.chars().filter(|c| *c == '\n').count() + 1;

        let mut message = if params.replace_all {
            format!(
                "Replaced {} occurrence(s) in {}",
                found.matches.len(),
                params.file_path
            )
        } else {
            format!("Replaced 1 occurrence in {}", params.file_path)
        };
        if found.strategy != "exact" {
            message.push_str(&format!(" (matched via {})", found.strategy));
        }
        if new_lines > old_lines {
            message.push_str(&format!(" [+{} lines]", new_lines - old_lines));
        } else if old_lines > new_lines {
            message.push_str(&format!(" [-{} lines]", old_lines - new_lines));
        }

        let replacements = found.matches.len();
        Ok(ToolOutput::ok(message)
            .with_metadata("replacements", replacements)
            .with_metadata("file", params.file_path)
            .with_metadata("strategy", found.strategy))
    }
}
