use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use console::style;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tokio_util::sync::CancellationToken;

use tinker::models::message::Conversation;
use tinker::orchestrator::{TurnLoop, TurnRequest, TurnStatus};
use tinker::providers::Provider;
use tinker::tools::ToolExecutor;

/// An interactive conversation with the engine
pub struct Session {
    turn_loop: TurnLoop,
    executor: Arc<ToolExecutor>,
    conversation: Conversation,
    model: String,
    system_prompt: String,
}

impl Session {
    pub fn new(
        provider: Arc<dyn Provider>,
        executor: Arc<ToolExecutor>,
        model: String,
        work_dir: PathBuf,
    ) -> Self {
        let system_prompt = format!(
            "You are a coding assistant operating on the user's machine. \
             Use the available tools to read, search, edit and run code. \
             Prefer small targeted edits over whole-file rewrites.\n\n\
             Working directory: {}",
            work_dir.display()
        );

        Self {
            turn_loop: TurnLoop::new(provider, executor.clone()),
            executor,
            conversation: Conversation::new(),
            model,
            system_prompt,
        }
    }

    /// Run one prompt to completion (print mode); the text streams to
    /// stdout as it arrives
    pub async fn run_once(&mut self, prompt: &str) -> Result<()> {
        self.turn(prompt).await?;
        Ok(())
    }

    /// The interactive loop
    pub async fn start(&mut self) -> Result<()> {
        let mut editor = DefaultEditor::new()?;

        loop {
            match editor.readline("> ") {
                Ok(line) => {
                    let input = line.trim();
                    if input.is_empty() {
                        continue;
                    }
                    if input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit") {
                        break;
                    }
                    editor.add_history_entry(input)?;

                    if let Err(e) = self.turn(input).await {
                        eprintln!("{}", style(format!("error: {e}")).red());
                    }
                    println!();
                }
                Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    async fn turn(&mut self, prompt: &str) -> Result<String> {
        self.conversation.push_user_text(prompt);

        let tools = self.executor.registry().specs();
        let sink = |delta: &str| {
            print!("{delta}");
            let _ = std::io::stdout().flush();
        };
        let request = TurnRequest {
            model: &self.model,
            system_prompt: &self.system_prompt,
            tools,
            gate: None,
            text_sink: Some(&sink),
        };

        let outcome = self
            .turn_loop
            .run(&mut self.conversation, request, CancellationToken::new())
            .await;
        println!();

        match outcome.status {
            TurnStatus::Error => Err(anyhow::anyhow!(
                outcome.error.unwrap_or_else(|| "backend error".to_string())
            )),
            _ => Ok(outcome.text),
        }
    }
}
