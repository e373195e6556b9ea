use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use console::style;

use tinker::agents::AgentExecutor;
use tinker::permissions::{PermissionMode, PermissionPolicy, RuleSet};
use tinker::providers::anthropic::AnthropicProvider;
use tinker::providers::Provider;
use tinker::tools::bash::{BashOutputTool, BashTool, KillShellTool};
use tinker::tools::edit::EditTool;
use tinker::tools::files::{ReadTool, ReadTracker, WriteTool};
use tinker::tools::search::{GlobTool, GrepTool};
use tinker::tools::task::{TaskTool, TodoWriteTool};
use tinker::tools::{Registry, ToolExecutor};

mod permission;
mod session;

use permission::TerminalPermissionHandler;
use session::Session;

#[derive(Parser)]
#[command(author, version, about = "An autonomous coding assistant", long_about = None)]
struct Cli {
    /// Run a single prompt non-interactively and print the result
    prompt: Option<String>,

    /// Model to use
    #[arg(short, long, default_value = "claude-sonnet-4-20250514")]
    model: String,

    /// Working directory (defaults to the current directory)
    #[arg(short, long)]
    workdir: Option<PathBuf>,

    /// Start in plan mode (read-only)
    #[arg(long)]
    plan: bool,

    /// Skip all permission prompts (dangerous)
    #[arg(long)]
    skip_permissions: bool,

    /// Permission rules to allow, e.g. "Bash(git *)"
    #[arg(long = "allow")]
    allow_rules: Vec<String>,

    /// Permission rules to deny, e.g. "Read(.env*)"
    #[arg(long = "deny")]
    deny_rules: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let work_dir = match &cli.workdir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().context("cannot determine working directory")?,
    };

    let mut rules = RuleSet::new();
    rules.parse_rules(&cli.allow_rules, &[], &cli.deny_rules);

    let policy = Arc::new(PermissionPolicy::new(rules));
    if cli.plan {
        policy.set_mode(PermissionMode::Plan);
    }
    if cli.skip_permissions {
        policy.set_skip_permissions(true);
    }

    let registry = Arc::new(Registry::new());
    register_tools(&registry, &work_dir);

    let handler = Arc::new(TerminalPermissionHandler::new(policy.clone()));
    let executor = Arc::new(
        ToolExecutor::new(registry, policy).with_handler(handler),
    );

    let provider: Arc<dyn Provider> =
        Arc::new(AnthropicProvider::from_env().context("failed to configure backend")?);
    let mut providers: HashMap<String, Arc<dyn Provider>> = HashMap::new();
    providers.insert(provider.name().to_string(), provider.clone());

    let agent_executor = Arc::new(AgentExecutor::new(
        providers,
        executor.clone(),
        &work_dir,
        &cli.model,
    ));
    executor
        .registry()
        .register(Arc::new(TaskTool::new(agent_executor)));

    tracing::debug!(model = %cli.model, "engine ready");
    let mut session = Session::new(provider, executor, cli.model.clone(), work_dir);

    match cli.prompt {
        Some(prompt) => session.run_once(&prompt).await,
        None => {
            println!(
                "tinker {}",
                style("- type \"exit\" to end the session").dim()
            );
            session.start().await
        }
    }
}

fn register_tools(registry: &Arc<Registry>, work_dir: &PathBuf) {
    let tracker = Arc::new(ReadTracker::default());
    registry.register(Arc::new(ReadTool::new(work_dir, tracker.clone())));
    registry.register(Arc::new(WriteTool::new(work_dir, tracker.clone())));
    registry.register(Arc::new(EditTool::new(work_dir, tracker)));

    let bash = BashTool::new(work_dir);
    let tasks = bash.tasks();
    registry.register(Arc::new(bash));
    registry.register(Arc::new(BashOutputTool::new(tasks.clone())));
    registry.register(Arc::new(KillShellTool::new(tasks)));

    registry.register(Arc::new(GlobTool::new(work_dir)));
    registry.register(Arc::new(GrepTool::new(work_dir)));
    registry.register(Arc::new(TodoWriteTool::new(None)));
}
