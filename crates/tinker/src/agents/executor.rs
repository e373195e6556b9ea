use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::errors::{AgentError, AgentResult};
use crate::orchestrator::{TurnLoop, TurnOptions, TurnRequest, TurnStatus};
use crate::providers::Provider;
use crate::tools::task::{TaskOutcome, TaskRequest, TaskRunner};
use crate::tools::{ExecContext, ToolExecutor};

use super::agent::{Agent, AgentKind};

/// Soft cap on live agents; crossing it evicts the oldest half.
const MAX_AGENTS: usize = 100;

struct AgentEntry {
    agent: Arc<Mutex<Agent>>,
    created_at: DateTime<Utc>,
}

/// Manages the set of live agents: spawns foreground or background runs
/// and resumes previously spawned agents by identifier.
pub struct AgentExecutor {
    providers: HashMap<String, Arc<dyn Provider>>,
    tool_executor: Arc<ToolExecutor>,
    work_dir: PathBuf,
    default_model: String,
    options: TurnOptions,
    active: Arc<RwLock<HashMap<String, AgentEntry>>>,
}

impl AgentExecutor {
    pub fn new(
        providers: HashMap<String, Arc<dyn Provider>>,
        tool_executor: Arc<ToolExecutor>,
        work_dir: impl Into<PathBuf>,
        default_model: impl Into<String>,
    ) -> Self {
        Self {
            providers,
            tool_executor,
            work_dir: work_dir.into(),
            default_model: default_model.into(),
            options: TurnOptions::default(),
            active: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn with_options(mut self, options: TurnOptions) -> Self {
        self.options = options;
        self
    }

    /// Run an agent task: spawn a new agent, or resume one by id.
    pub async fn execute(
        &self,
        ctx: &ExecContext,
        request: TaskRequest,
    ) -> AgentResult<TaskOutcome> {
        if let Some(resume_id) = &request.resume {
            return Ok(self.resume(resume_id, &request.prompt, ctx).await);
        }

        let kind = AgentKind::parse(&request.subagent_type);
        let agent_id = short_id();

        let Some(provider) = self.resolve_provider(kind, request.model.as_deref()) else {
            return Err(AgentError::Internal(
                "no provider available for agent".to_string(),
            ));
        };

        let mut agent = Agent::new(&agent_id, kind, &self.work_dir);
        agent.parent_context = Some(request.prompt.clone());
        if let Some(model) = &request.model {
            agent.config.model = Some(model.clone());
        }

        let handle = Arc::new(Mutex::new(agent));
        self.store(&agent_id, handle.clone());
        info!(agent = %agent_id, kind = kind.as_str(), background = request.run_in_background, "agent spawned");

        if request.run_in_background {
            // detached: not joined by the caller's cancellation context
            let provider = provider.clone();
            let tool_executor = self.tool_executor.clone();
            let options = self.options.clone();
            let default_model = self.default_model.clone();
            let prompt = request.prompt.clone();
            let background_id = agent_id.clone();
            tokio::spawn(async move {
                let outcome = run_agent(
                    provider,
                    tool_executor,
                    options,
                    handle,
                    &prompt,
                    &default_model,
                    CancellationToken::new(),
                )
                .await;
                debug!(agent = %background_id, status = %outcome.status, "background agent finished");
            });

            return Ok(TaskOutcome {
                agent_id: agent_id.clone(),
                status: "running".to_string(),
                result: format!("Agent {agent_id} started in background"),
            });
        }

        Ok(run_agent(
            provider,
            self.tool_executor.clone(),
            self.options.clone(),
            handle,
            &request.prompt,
            &self.default_model,
            ctx.cancel.clone(),
        )
        .await)
    }

    /// Look up a stored agent and re-enter its turn loop. An unknown
    /// identifier is an error outcome, not a failure.
    async fn resume(&self, agent_id: &str, prompt: &str, ctx: &ExecContext) -> TaskOutcome {
        let handle = {
            let active = self.active.read().unwrap();
            active.get(agent_id).map(|entry| entry.agent.clone())
        };

        let Some(handle) = handle else {
            return TaskOutcome {
                agent_id: agent_id.to_string(),
                status: "error".to_string(),
                result: format!("Agent {agent_id} not found"),
            };
        };

        let provider = {
            let kind = handle.lock().await.kind;
            let model = handle.lock().await.config.model.clone();
            self.resolve_provider(kind, model.as_deref())
        };
        let Some(provider) = provider else {
            return TaskOutcome {
                agent_id: agent_id.to_string(),
                status: "error".to_string(),
                result: "no provider available for agent".to_string(),
            };
        };

        run_agent(
            provider,
            self.tool_executor.clone(),
            self.options.clone(),
            handle,
            prompt,
            &self.default_model,
            ctx.cancel.clone(),
        )
        .await
    }

    /// A stored agent handle, if it is still live
    pub fn get(&self, agent_id: &str) -> Option<Arc<Mutex<Agent>>> {
        self.active
            .read()
            .unwrap()
            .get(agent_id)
            .map(|entry| entry.agent.clone())
    }

    pub fn live_count(&self) -> usize {
        self.active.read().unwrap().len()
    }

    fn store(&self, agent_id: &str, agent: Arc<Mutex<Agent>>) {
        let mut active = self.active.write().unwrap();
        active.insert(
            agent_id.to_string(),
            AgentEntry {
                agent,
                created_at: Utc::now(),
            },
        );
        if active.len() > MAX_AGENTS {
            evict_oldest(&mut active);
        }
    }

    /// Route by model-name prefix, falling back to any registered
    /// provider.
    fn resolve_provider(
        &self,
        kind: AgentKind,
        requested_model: Option<&str>,
    ) -> Option<Arc<dyn Provider>> {
        let model = requested_model
            .map(str::to_string)
            .or_else(|| kind.default_config().model)
            .unwrap_or_else(|| self.default_model.clone());

        if model.starts_with("claude") {
            if let Some(provider) = self.providers.get("anthropic") {
                return Some(provider.clone());
            }
        }
        if model.starts_with("gpt") || model.starts_with("o1") {
            if let Some(provider) = self.providers.get("openai") {
                return Some(provider.clone());
            }
        }

        self.providers.values().next().cloned()
    }
}

/// Drop the oldest half of the live agents, by creation time.
fn evict_oldest(active: &mut HashMap<String, AgentEntry>) {
    let mut by_age: Vec<(String, DateTime<Utc>)> = active
        .iter()
        .map(|(id, entry)| (id.clone(), entry.created_at))
        .collect();
    by_age.sort_by_key(|(_, created_at)| *created_at);

    let evict_count = active.len() / 2;
    for (id, _) in by_age.into_iter().take(evict_count) {
        active.remove(&id);
    }
    debug!(evicted = evict_count, remaining = active.len(), "agent eviction");
}

fn short_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

async fn run_agent(
    provider: Arc<dyn Provider>,
    tool_executor: Arc<ToolExecutor>,
    options: TurnOptions,
    handle: Arc<Mutex<Agent>>,
    prompt: &str,
    default_model: &str,
    cancel: CancellationToken,
) -> TaskOutcome {
    let mut agent = handle.lock().await;

    if !prompt.is_empty() {
        agent.conversation.push_user_text(prompt);
    }

    let model = agent.model(default_model);
    let system_prompt = agent.system_prompt("");
    let tools = agent.filtered_specs(tool_executor.registry());
    let gate = agent.gate();
    let agent_id = agent.id.clone();

    let turn_loop = TurnLoop::new(provider, tool_executor).with_options(options);
    let request = TurnRequest {
        model: &model,
        system_prompt: &system_prompt,
        tools,
        gate: Some(&gate),
        text_sink: None,
    };

    let outcome = turn_loop
        .run(&mut agent.conversation, request, cancel)
        .await;

    match outcome.status {
        TurnStatus::Completed | TurnStatus::LimitReached => TaskOutcome {
            agent_id,
            status: "completed".to_string(),
            result: outcome.text,
        },
        TurnStatus::Cancelled => TaskOutcome {
            agent_id,
            status: "cancelled".to_string(),
            result: outcome.text,
        },
        TurnStatus::Error => TaskOutcome {
            agent_id,
            status: "error".to_string(),
            result: outcome
                .error
                .unwrap_or_else(|| "backend error".to_string()),
        },
    }
}

#[async_trait]
impl TaskRunner for AgentExecutor {
    async fn run(&self, ctx: &ExecContext, request: TaskRequest) -> AgentResult<TaskOutcome> {
        self.execute(ctx, request).await
    }
}
