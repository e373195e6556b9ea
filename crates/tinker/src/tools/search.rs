use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::errors::{AgentError, AgentResult};

use super::files::resolve_path;
use super::{
    bool_prop, int_prop, object_schema, parse_input, string_prop, ExecContext, Tool, ToolCategory,
    ToolOutput,
};

#[derive(Debug, Deserialize)]
struct GlobInput {
    pattern: String,
    #[serde(default)]
    path: Option<String>,
}

/// Fast file pattern matching with `**` support, newest files first
pub struct GlobTool {
    work_dir: PathBuf,
}

impl GlobTool {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
        }
    }
}

#[async_trait]
impl Tool for GlobTool {
    fn name(&self) -> &str {
        "Glob"
    }

    fn description(&self) -> &str {
        "Fast file pattern matching tool. Supports glob patterns like '**/*.rs' or 'src/**/*.ts'. Returns matching file paths sorted by modification time."
    }

    fn input_schema(&self) -> Value {
        object_schema(
            json!({
                "pattern": string_prop("The glob pattern to match files against (e.g., '**/*.rs', 'src/**/*.ts')"),
                "path": string_prop("Directory to search in (defaults to current working directory)"),
            }),
            &["pattern"],
        )
    }

    fn requires_permission(&self) -> bool {
        false
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Search
    }

    async fn execute(&self, _ctx: &ExecContext, input: Value) -> AgentResult<ToolOutput> {
        let params: GlobInput = parse_input(input)?;
        if params.pattern.is_empty() {
            return Ok(ToolOutput::error("pattern is required"));
        }

        let search_path = match &params.path {
            Some(path) => resolve_path(&self.work_dir, path),
            None => self.work_dir.clone(),
        };
        if !search_path.exists() {
            return Ok(ToolOutput::error(format!(
                "Path does not exist: {}",
                search_path.display()
            )));
        }

        let full_pattern = search_path.join(&params.pattern);
        let paths = glob::glob(&full_pattern.to_string_lossy())
            .map_err(|e| AgentError::InvalidParameters(format!("glob error: {e}")))?;

        let mut files: Vec<(PathBuf, SystemTime)> = Vec::new();
        for entry in paths.flatten() {
            let Ok(metadata) = std::fs::metadata(&entry) else {
                continue;
            };
            if metadata.is_dir() {
                continue;
            }
            let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            files.push((entry, modified));
        }

        if files.is_empty() {
            return Ok(ToolOutput::ok("No files matched the pattern"));
        }

        // most recently modified first
        files.sort_by(|a, b| b.1.cmp(&a.1));

        let count = files.len();
        let listing = files
            .into_iter()
            .map(|(path, _)| {
                path.strip_prefix(&self.work_dir)
                    .map(|p| p.to_path_buf())
                    .unwrap_or(path)
                    .to_string_lossy()
                    .to_string()
            })
            .collect::<Vec<_>>()
            .join("\n");

        Ok(ToolOutput::ok(listing).with_metadata("count", count))
    }
}

#[derive(Debug, Deserialize)]
struct GrepInput {
    pattern: String,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    glob: Option<String>,
    #[serde(default)]
    output_mode: Option<String>,
    #[serde(default, rename = "i")]
    ignore_case: bool,
    #[serde(default, rename = "n")]
    show_lines: Option<bool>,
    #[serde(default)]
    head_limit: usize,
    #[serde(default)]
    offset: usize,
}

/// Regex content search over a gitignore-aware file walk
pub struct GrepTool {
    work_dir: PathBuf,
}

impl GrepTool {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
        }
    }

    fn collect_files(&self, search_path: &Path, file_glob: Option<&str>) -> Vec<PathBuf> {
        let glob_pattern = file_glob.and_then(|g| glob::Pattern::new(g).ok());

        let mut files = Vec::new();
        for entry in ignore::WalkBuilder::new(search_path).build().flatten() {
            let path = entry.path();
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            if let Some(pattern) = &glob_pattern {
                let base_name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                let relative = path
                    .strip_prefix(search_path)
                    .unwrap_or(path)
                    .to_string_lossy()
                    .to_string();
                if !pattern.matches(&base_name) && !pattern.matches(&relative) {
                    continue;
                }
            }
            files.push(path.to_path_buf());
        }
        files.sort();
        files
    }
}

#[async_trait]
impl Tool for GrepTool {
    fn name(&self) -> &str {
        "Grep"
    }

    fn description(&self) -> &str {
        "A powerful search tool for finding patterns in file contents. Supports regex, file filtering by glob, and various output modes."
    }

    fn input_schema(&self) -> Value {
        object_schema(
            json!({
                "pattern": string_prop("Regular expression pattern to search for"),
                "path": string_prop("File or directory to search in (defaults to current directory)"),
                "glob": string_prop("Glob pattern to filter files (e.g., '*.rs', '**/*.toml')"),
                "output_mode": {
                    "type": "string",
                    "description": "Output mode: 'content' (matching lines), 'files_with_matches' (file paths only), 'count'",
                    "enum": ["content", "files_with_matches", "count"],
                },
                "n": bool_prop("Show line numbers (default: true)"),
                "i": bool_prop("Case insensitive search"),
                "head_limit": int_prop("Limit output to first N entries"),
                "offset": int_prop("Skip first N entries"),
            }),
            &["pattern"],
        )
    }

    fn requires_permission(&self) -> bool {
        false
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Search
    }

    async fn execute(&self, _ctx: &ExecContext, input: Value) -> AgentResult<ToolOutput> {
        let params: GrepInput = parse_input(input)?;
        if params.pattern.is_empty() {
            return Ok(ToolOutput::error("pattern is required"));
        }

        let regex = regex::RegexBuilder::new(&params.pattern)
            .case_insensitive(params.ignore_case)
            .build()
            .map_err(|e| AgentError::InvalidParameters(format!("invalid pattern: {e}")))?;

        let search_path = match &params.path {
            Some(path) => resolve_path(&self.work_dir, path),
            None => self.work_dir.clone(),
        };

        let files = if search_path.is_file() {
            vec![search_path.clone()]
        } else {
            self.collect_files(&search_path, params.glob.as_deref())
        };

        let output_mode = params.output_mode.as_deref().unwrap_or("files_with_matches");
        let show_lines = params.show_lines.unwrap_or(true);

        let mut lines_out: Vec<String> = Vec::new();
        for file in files {
            let Ok(content) = std::fs::read_to_string(&file) else {
                continue; // binary or unreadable
            };
            let display = file
                .strip_prefix(&self.work_dir)
                .unwrap_or(&file)
                .to_string_lossy()
                .to_string();

            match output_mode {
                "content" => {
                    for (index, line) in content.lines().enumerate() {
                        if regex.is_match(line) {
                            if show_lines {
                                lines_out.push(format!("{display}:{}:{line}", index + 1));
                            } else {
                                lines_out.push(format!("{display}:{line}"));
                            }
                        }
                    }
                }
                "count" => {
                    let count = content.lines().filter(|l| regex.is_match(l)).count();
                    if count > 0 {
                        lines_out.push(format!("{display}:{count}"));
                    }
                }
                _ => {
                    if content.lines().any(|l| regex.is_match(l)) {
                        lines_out.push(display);
                    }
                }
            }
        }

        if lines_out.is_empty() {
            return Ok(ToolOutput::ok("No matches found"));
        }

        let start = params.offset.min(lines_out.len());
        let end = if params.head_limit > 0 {
            (start + params.head_limit).min(lines_out.len())
        } else {
            lines_out.len()
        };

        let total = lines_out.len();
        Ok(ToolOutput::ok(lines_out[start..end].join("\n")).with_metadata("matches", total))
    }
}
