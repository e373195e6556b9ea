use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::errors::{AgentError, AgentResult};

use super::{
    int_prop, object_schema, parse_input, string_prop, ExecContext, Tool, ToolCategory, ToolOutput,
};

const DEFAULT_READ_LIMIT: usize = 2000;
const MAX_LINE_LENGTH: usize = 2000;

/// Resolve a possibly-relative path against the working directory and
/// normalize away `.` and `..` components.
pub(crate) fn resolve_path(work_dir: &Path, path: &str) -> PathBuf {
    let joined = if Path::new(path).is_absolute() {
        PathBuf::from(path)
    } else {
        work_dir.join(path)
    };

    let mut normalized = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }
    normalized
}

/// Which files the model has read this session. Shared between the read,
/// write and edit tools so overwrites of unseen files can be refused.
#[derive(Default)]
pub struct ReadTracker {
    read: Mutex<HashSet<PathBuf>>,
}

impl ReadTracker {
    pub fn mark(&self, path: &Path) {
        self.read.lock().unwrap().insert(path.to_path_buf());
    }

    pub fn has(&self, path: &Path) -> bool {
        self.read.lock().unwrap().contains(path)
    }
}

#[derive(Debug, Deserialize)]
struct ReadInput {
    file_path: String,
    #[serde(default)]
    offset: usize,
    #[serde(default)]
    limit: usize,
}

/// Reads files from the filesystem
pub struct ReadTool {
    work_dir: PathBuf,
    tracker: Arc<ReadTracker>,
}

impl ReadTool {
    pub fn new(work_dir: impl Into<PathBuf>, tracker: Arc<ReadTracker>) -> Self {
        Self {
            work_dir: work_dir.into(),
            tracker,
        }
    }

    fn read_text(&self, path: &Path, offset: usize, limit: usize) -> AgentResult<ToolOutput> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AgentError::ExecutionError(format!("Failed to read file: {e}")))?;

        let offset = if offset == 0 { 1 } else { offset };
        let limit = if limit == 0 { DEFAULT_READ_LIMIT } else { limit };

        let mut lines = Vec::new();
        for (index, line) in content.lines().enumerate() {
            let line_number = index + 1;
            if line_number < offset {
                continue;
            }
            if line_number >= offset + limit {
                break;
            }

            let rendered = if line.chars().count() > MAX_LINE_LENGTH {
                let truncated: String = line.chars().take(MAX_LINE_LENGTH).collect();
                format!("{truncated}... (truncated)")
            } else {
                line.to_string()
            };
            lines.push(format!("{line_number:>6}\t{rendered}"));
        }

        if lines.is_empty() {
            return Ok(ToolOutput::ok("(empty file)"));
        }

        let count = lines.len();
        Ok(ToolOutput::ok(lines.join("\n"))
            .with_metadata("lines_read", count)
            .with_metadata("start_line", offset))
    }

    fn read_image(&self, path: &Path, media_type: &str) -> AgentResult<ToolOutput> {
        let data = std::fs::read(path)
            .map_err(|e| AgentError::ExecutionError(format!("Failed to read file: {e}")))?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(&data);
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        Ok(
            ToolOutput::ok(format!("[Image: {name}, {} bytes, {media_type}]", data.len()))
                .with_metadata("type", "image")
                .with_metadata("media_type", media_type)
                .with_metadata("base64", encoded)
                .with_metadata("size", data.len()),
        )
    }
}

fn image_media_type(path: &Path) -> Option<&'static str> {
    match path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .as_deref()
    {
        Some("png") => Some("image/png"),
        Some("jpg") | Some("jpeg") => Some("image/jpeg"),
        Some("gif") => Some("image/gif"),
        Some("webp") => Some("image/webp"),
        _ => None,
    }
}

#[async_trait]
impl Tool for ReadTool {
    fn name(&self) -> &str {
        "Read"
    }

    fn description(&self) -> &str {
        "Reads a file from the filesystem. Supports text files and images (PNG, JPG, GIF, WebP). Returns file content with line numbers for text files."
    }

    fn input_schema(&self) -> Value {
        object_schema(
            json!({
                "file_path": string_prop("The absolute path to the file to read"),
                "offset": int_prop("Line number to start reading from (1-based). Optional."),
                "limit": int_prop("Number of lines to read. Optional, defaults to 2000."),
            }),
            &["file_path"],
        )
    }

    fn requires_permission(&self) -> bool {
        false
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::File
    }

    async fn execute(&self, _ctx: &ExecContext, input: Value) -> AgentResult<ToolOutput> {
        let params: ReadInput = parse_input(input)?;
        let path = resolve_path(&self.work_dir, &params.file_path);

        let metadata = match std::fs::metadata(&path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ToolOutput::error(format!(
                    "File not found: {}",
                    params.file_path
                )));
            }
            Err(e) => return Err(AgentError::ExecutionError(e.to_string())),
        };

        if metadata.is_dir() {
            return Ok(ToolOutput::error(format!(
                "{} is a directory, not a file. Use ls via the Bash tool to list directory contents.",
                params.file_path
            )));
        }

        self.tracker.mark(&path);

        if let Some(media_type) = image_media_type(&path) {
            return self.read_image(&path, media_type);
        }

        self.read_text(&path, params.offset, params.limit)
    }
}

#[derive(Debug, Deserialize)]
struct WriteInput {
    file_path: String,
    content: String,
}

/// Writes files to the filesystem. Overwriting requires the file to have
/// been read first.
pub struct WriteTool {
    work_dir: PathBuf,
    tracker: Arc<ReadTracker>,
}

impl WriteTool {
    pub fn new(work_dir: impl Into<PathBuf>, tracker: Arc<ReadTracker>) -> Self {
        Self {
            work_dir: work_dir.into(),
            tracker,
        }
    }
}

#[async_trait]
impl Tool for WriteTool {
    fn name(&self) -> &str {
        "Write"
    }

    fn description(&self) -> &str {
        "Writes content to a file. Creates the file if it doesn't exist, or overwrites if it does. You must read a file before overwriting it."
    }

    fn input_schema(&self) -> Value {
        object_schema(
            json!({
                "file_path": string_prop("The absolute path to the file to write"),
                "content": string_prop("The content to write to the file"),
            }),
            &["file_path", "content"],
        )
    }

    fn requires_permission(&self) -> bool {
        true
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::File
    }

    async fn execute(&self, _ctx: &ExecContext, input: Value) -> AgentResult<ToolOutput> {
        let params: WriteInput = parse_input(input)?;
        if params.file_path.is_empty() {
            return Ok(ToolOutput::error("file_path is required"));
        }

        let path = resolve_path(&self.work_dir, &params.file_path);

        if path.exists() && !self.tracker.has(&path) {
            return Ok(ToolOutput::error(format!(
                "Cannot overwrite '{}' without reading it first. Use the Read tool before writing.",
                params.file_path
            )));
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                AgentError::ExecutionError(format!("Failed to create directory: {e}"))
            })?;
        }

        std::fs::write(&path, &params.content)
            .map_err(|e| AgentError::ExecutionError(format!("Failed to write file: {e}")))?;

        self.tracker.mark(&path);

        let lines = params.content.chars().filter(|c| *c == '\n').count() + 1;
        Ok(ToolOutput::ok(format!(
            "Successfully wrote {} bytes ({} lines) to {}",
            params.content.len(),
            lines,
            params.file_path
        ))
        .with_metadata("bytes_written", params.content.len())
        .with_metadata("lines", lines))
    }
}
