use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::errors::{AgentError, AgentResult};

use super::files::resolve_path;
use super::{
    bool_prop, int_prop, object_schema, parse_input, string_prop, ExecContext, Tool, ToolCategory,
    ToolOutput,
};

const DEFAULT_TIMEOUT_MS: u64 = 120_000;
const MAX_TIMEOUT_MS: u64 = 600_000;
const MAX_OUTPUT_CHARS: usize = 30_000;

/// A detached long-running shell invocation. Mutated only by its own
/// execution task; read by polling or blocking wait; killed only through
/// an explicit kill request.
pub struct BackgroundTask {
    pub id: String,
    pub command: String,
    pub started: DateTime<Utc>,
    output: Mutex<String>,
    state: Mutex<TaskState>,
    kill: CancellationToken,
}

#[derive(Default)]
struct TaskState {
    done: bool,
    exit_code: Option<i32>,
    error: Option<String>,
}

impl BackgroundTask {
    fn new(id: String, command: String) -> Self {
        Self {
            id,
            command,
            started: Utc::now(),
            output: Mutex::new(String::new()),
            state: Mutex::new(TaskState::default()),
            kill: CancellationToken::new(),
        }
    }

    fn append_output(&self, chunk: &str) {
        self.output.lock().unwrap().push_str(chunk);
    }

    fn finish(&self, exit_code: Option<i32>, error: Option<String>) {
        let mut state = self.state.lock().unwrap();
        state.done = true;
        state.exit_code = exit_code;
        state.error = error;
    }

    pub fn is_done(&self) -> bool {
        self.state.lock().unwrap().done
    }

    pub fn output(&self) -> String {
        self.output.lock().unwrap().clone()
    }

    pub fn kill(&self) {
        self.kill.cancel();
    }
}

/// The shared background-task table, readable by the output and kill
/// tools.
#[derive(Default)]
pub struct TaskTable {
    tasks: RwLock<HashMap<String, Arc<BackgroundTask>>>,
}

impl TaskTable {
    pub fn get(&self, id: &str) -> Option<Arc<BackgroundTask>> {
        self.tasks.read().unwrap().get(id).cloned()
    }

    pub fn insert(&self, task: Arc<BackgroundTask>) {
        self.tasks
            .write()
            .unwrap()
            .insert(task.id.clone(), task);
    }

    pub fn list(&self) -> Vec<Arc<BackgroundTask>> {
        self.tasks.read().unwrap().values().cloned().collect()
    }
}

#[derive(Debug, Deserialize)]
struct BashInput {
    command: String,
    #[serde(default)]
    #[allow(dead_code)]
    description: Option<String>,
    #[serde(default)]
    timeout: Option<u64>,
    #[serde(default)]
    run_in_background: bool,
}

/// Executes shell commands in a persistent session: `cd` carries over to
/// later invocations, and long-running commands can be detached as
/// background tasks.
pub struct BashTool {
    current_dir: Mutex<PathBuf>,
    tasks: Arc<TaskTable>,
}

impl BashTool {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            current_dir: Mutex::new(work_dir.into()),
            tasks: Arc::new(TaskTable::default()),
        }
    }

    /// The shared task table, for wiring up the output and kill tools
    pub fn tasks(&self) -> Arc<TaskTable> {
        self.tasks.clone()
    }

    pub fn current_dir(&self) -> PathBuf {
        self.current_dir.lock().unwrap().clone()
    }

    async fn run_foreground(
        &self,
        ctx: &ExecContext,
        command: &str,
        timeout_ms: u64,
    ) -> AgentResult<ToolOutput> {
        let cwd = self.current_dir();

        let output_fut = Command::new("bash")
            .arg("-c")
            .arg(command)
            .current_dir(&cwd)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(AgentError::Cancelled),
            result = tokio::time::timeout(Duration::from_millis(timeout_ms), output_fut) => {
                match result {
                    Err(_) => return Ok(ToolOutput::error("Command timed out")),
                    Ok(Err(e)) => return Err(AgentError::ExecutionError(e.to_string())),
                    Ok(Ok(output)) => output,
                }
            }
        };

        let mut combined = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.is_empty() {
            if !combined.is_empty() {
                combined.push('\n');
            }
            combined.push_str(&stderr);
        }
        if combined.chars().count() > MAX_OUTPUT_CHARS {
            combined = combined.chars().take(MAX_OUTPUT_CHARS).collect();
            combined.push_str("\n... (output truncated)");
        }

        self.track_cd(command);

        let exit_code = output.status.code().unwrap_or(-1);
        let mut result = ToolOutput::ok(combined).with_metadata("exit_code", exit_code);
        if !output.status.success() {
            result.is_error = true;
        }
        Ok(result)
    }

    fn run_background(&self, command: &str) -> AgentResult<ToolOutput> {
        let id = format!("task_{}", &uuid::Uuid::new_v4().simple().to_string()[..8]);
        let task = Arc::new(BackgroundTask::new(id.clone(), command.to_string()));
        let cwd = self.current_dir();

        let mut child = Command::new("bash")
            .arg("-c")
            .arg(command)
            .current_dir(&cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AgentError::ExecutionError(e.to_string()))?;

        self.tasks.insert(task.clone());

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let runner = task.clone();
        tokio::spawn(async move {
            let pump_out = tokio::spawn(pump(stdout, runner.clone()));
            let pump_err = tokio::spawn(pump(stderr, runner.clone()));

            let status = loop {
                if runner.kill.is_cancelled() {
                    let _ = child.start_kill();
                }
                match child.try_wait() {
                    Ok(Some(status)) => break Ok(status),
                    Ok(None) => tokio::time::sleep(Duration::from_millis(50)).await,
                    Err(e) => break Err(e),
                }
            };

            // drain whatever output the process produced before exiting
            let _ = pump_out.await;
            let _ = pump_err.await;

            match status {
                Ok(_) if runner.kill.is_cancelled() => {
                    runner.finish(None, Some("killed".to_string()))
                }
                Ok(status) => runner.finish(status.code(), None),
                Err(e) => runner.finish(None, Some(e.to_string())),
            }
            debug!(task = %runner.id, "background task finished");
        });

        Ok(
            ToolOutput::ok(format!("Background task started with ID: {id}"))
                .with_metadata("task_id", id),
        )
    }

    /// Track `cd` so later commands run where the model left off.
    fn track_cd(&self, command: &str) {
        let command = command.trim();

        let target = if let Some(rest) = command.strip_prefix("cd ") {
            let dir = rest.trim().trim_matches(|c| c == '"' || c == '\'');
            if dir.is_empty() {
                return;
            }
            Some(dir.to_string())
        } else if command == "cd" || command == "cd ~" {
            dirs::home_dir().map(|h| h.to_string_lossy().to_string())
        } else {
            None
        };

        let Some(mut target) = target else { return };

        if let Some(rest) = target.strip_prefix('~') {
            if let Some(home) = dirs::home_dir() {
                target = format!("{}{rest}", home.to_string_lossy());
            }
        }

        let cwd = self.current_dir();
        let resolved = resolve_path(&cwd, &target);
        if resolved.is_dir() {
            *self.current_dir.lock().unwrap() = resolved;
        }
    }
}

async fn pump<R: tokio::io::AsyncRead + Unpin>(reader: Option<R>, task: Arc<BackgroundTask>) {
    let Some(mut reader) = reader else { return };
    let mut buf = [0u8; 4096];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => task.append_output(&String::from_utf8_lossy(&buf[..n])),
        }
    }
}

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "Bash"
    }

    fn description(&self) -> &str {
        "Executes a shell command in a persistent shell session. Use for running builds, tests, git commands, and other terminal operations."
    }

    fn input_schema(&self) -> Value {
        object_schema(
            json!({
                "command": string_prop("The shell command to execute"),
                "description": string_prop("Brief description of what the command does (5-10 words)"),
                "timeout": int_prop("Timeout in milliseconds (default: 120000, max: 600000)"),
                "run_in_background": bool_prop("Run in background and return task ID"),
            }),
            &["command"],
        )
    }

    fn requires_permission(&self) -> bool {
        true
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Execution
    }

    async fn execute(&self, ctx: &ExecContext, input: Value) -> AgentResult<ToolOutput> {
        let params: BashInput = parse_input(input)?;
        if params.command.is_empty() {
            return Ok(ToolOutput::error("command is required"));
        }

        if params.run_in_background {
            return self.run_background(&params.command);
        }

        let timeout_ms = params
            .timeout
            .filter(|t| *t > 0)
            .unwrap_or(DEFAULT_TIMEOUT_MS)
            .min(MAX_TIMEOUT_MS);

        self.run_foreground(ctx, &params.command, timeout_ms).await
    }
}

#[derive(Debug, Deserialize)]
struct BashOutputInput {
    task_id: String,
    #[serde(default)]
    wait: Option<bool>,
}

/// Retrieves output from a background shell task
pub struct BashOutputTool {
    tasks: Arc<TaskTable>,
}

impl BashOutputTool {
    pub fn new(tasks: Arc<TaskTable>) -> Self {
        Self { tasks }
    }
}

#[async_trait]
impl Tool for BashOutputTool {
    fn name(&self) -> &str {
        "BashOutput"
    }

    fn description(&self) -> &str {
        "Retrieves output from a background shell task"
    }

    fn input_schema(&self) -> Value {
        object_schema(
            json!({
                "task_id": string_prop("The ID of the background task"),
                "wait": bool_prop("Wait for task to complete (default: true)"),
            }),
            &["task_id"],
        )
    }

    fn requires_permission(&self) -> bool {
        false
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Execution
    }

    async fn execute(&self, ctx: &ExecContext, input: Value) -> AgentResult<ToolOutput> {
        let params: BashOutputInput = parse_input(input)?;
        let Some(task) = self.tasks.get(&params.task_id) else {
            return Ok(ToolOutput::error(format!(
                "Task not found: {}",
                params.task_id
            )));
        };

        if params.wait.unwrap_or(true) {
            while !task.is_done() {
                if ctx.is_cancelled() {
                    return Err(AgentError::Cancelled);
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }

        let mut result = ToolOutput::ok(task.output());
        let state = task.state.lock().unwrap();
        if state.done {
            result = result.with_metadata("status", "completed");
            if let Some(code) = state.exit_code {
                result = result.with_metadata("exit_code", code);
            } else if state.error.is_some() {
                result.is_error = true;
            }
        } else {
            result = result.with_metadata("status", "running");
        }
        Ok(result)
    }
}

#[derive(Debug, Deserialize)]
struct KillShellInput {
    task_id: String,
}

/// Kills a background shell task. Idempotent once the task has finished.
pub struct KillShellTool {
    tasks: Arc<TaskTable>,
}

impl KillShellTool {
    pub fn new(tasks: Arc<TaskTable>) -> Self {
        Self { tasks }
    }
}

#[async_trait]
impl Tool for KillShellTool {
    fn name(&self) -> &str {
        "KillShell"
    }

    fn description(&self) -> &str {
        "Kills a running background shell task by its ID"
    }

    fn input_schema(&self) -> Value {
        object_schema(
            json!({
                "task_id": string_prop("The ID of the background task to kill"),
            }),
            &["task_id"],
        )
    }

    fn requires_permission(&self) -> bool {
        false
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Execution
    }

    async fn execute(&self, _ctx: &ExecContext, input: Value) -> AgentResult<ToolOutput> {
        let params: KillShellInput = parse_input(input)?;
        let Some(task) = self.tasks.get(&params.task_id) else {
            return Ok(ToolOutput::error(format!(
                "Task not found: {}",
                params.task_id
            )));
        };

        if task.is_done() {
            return Ok(ToolOutput::ok(format!(
                "Task {} already completed",
                params.task_id
            )));
        }

        task.kill();
        Ok(ToolOutput::ok(format!("Killed task {}", params.task_id)))
    }
}
