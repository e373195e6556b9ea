use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use tinker::agents::AgentExecutor;
use tinker::models::message::Conversation;
use tinker::orchestrator::{TurnLoop, TurnRequest, TurnStatus};
use tinker::permissions::{Action, PermissionPolicy, Rule, RuleSet};
use tinker::providers::mock::{text_turn, tool_turn, MockProvider};
use tinker::providers::Provider;
use tinker::tools::bash::BashTool;
use tinker::tools::edit::EditTool;
use tinker::tools::files::{ReadTool, ReadTracker, WriteTool};
use tinker::tools::task::{TaskRequest, TaskTool};
use tinker::tools::{ExecContext, Registry, ToolExecutor};

/// A fully wired engine rooted in a temp directory, with every file tool
/// allowed by rule so no permission prompt is needed.
fn build_executor(dir: &std::path::Path) -> Arc<ToolExecutor> {
    let registry = Arc::new(Registry::new());
    let tracker = Arc::new(ReadTracker::default());
    registry.register(Arc::new(ReadTool::new(dir, tracker.clone())));
    registry.register(Arc::new(WriteTool::new(dir, tracker.clone())));
    registry.register(Arc::new(EditTool::new(dir, tracker)));
    registry.register(Arc::new(BashTool::new(dir)));

    let mut rules = RuleSet::new();
    rules.add(Rule::parse("Write", Action::Allow));
    rules.add(Rule::parse("Edit", Action::Allow));
    rules.add(Rule::parse("Bash", Action::Allow));

    Arc::new(ToolExecutor::new(
        registry,
        Arc::new(PermissionPolicy::new(rules)),
    ))
}

fn request(tools: Vec<tinker::models::tool::ToolSpec>) -> TurnRequest<'static> {
    TurnRequest {
        model: "mock-model",
        system_prompt: "",
        tools,
        gate: None,
        text_sink: None,
    }
}

#[tokio::test]
async fn edit_turn_pairs_results_and_modifies_the_file() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("foo.txt"), "first line\nsecond line\n").unwrap();

    let executor = build_executor(dir.path());
    let provider = Arc::new(MockProvider::new(vec![
        tool_turn(
            "tu_edit",
            "Edit",
            json!({
                "file_path": "foo.txt",
                "old_string": "first line",
                "new_string": "first line  # annotated",
            }),
        ),
        text_turn("Added the comment."),
    ]));
    let turn_loop = TurnLoop::new(provider.clone(), executor);

    let mut conversation = Conversation::new();
    conversation.push_user_text("add a comment to line 1 of foo.txt");
    let before = conversation.len();

    let outcome = turn_loop
        .run(&mut conversation, request(vec![]), CancellationToken::new())
        .await;

    assert_eq!(outcome.status, TurnStatus::Completed);
    assert_eq!(outcome.text, "Added the comment.");

    // exactly two messages (tool use + paired result) precede the final
    // assistant text
    assert_eq!(conversation.len(), before + 3);
    let messages = conversation.messages();
    let uses = messages[before].tool_uses();
    let result = messages[before + 1].content[0].as_tool_result().unwrap();
    assert_eq!(result.request_id, uses[0].id);
    assert!(!result.is_error, "{}", result.content);

    let edited = std::fs::read_to_string(dir.path().join("foo.txt")).unwrap();
    assert_eq!(edited, "first line  # annotated\nsecond line\n");
}

#[tokio::test]
async fn write_then_read_round_trips_byte_identical() {
    let dir = tempfile::tempdir().unwrap();
    let executor = build_executor(dir.path());

    let content = "alpha\nbeta\n\tgamma";
    let out = executor
        .execute(
            &ExecContext::default(),
            "Write",
            json!({"file_path": "roundtrip.txt", "content": content}),
        )
        .await;
    assert!(!out.is_error, "{}", out.content);

    let stored = std::fs::read(dir.path().join("roundtrip.txt")).unwrap();
    assert_eq!(stored, content.as_bytes());
}

#[tokio::test]
async fn fifty_one_tool_turns_stop_at_the_cap() {
    let dir = tempfile::tempdir().unwrap();
    let executor = build_executor(dir.path());

    let provider = Arc::new(MockProvider::repeating(tool_turn(
        "again",
        "Bash",
        json!({"command": "true"}),
    )));
    let turn_loop = TurnLoop::new(provider.clone(), executor);

    let mut conversation = Conversation::new();
    conversation.push_user_text("loop forever");

    let outcome = turn_loop
        .run(&mut conversation, request(vec![]), CancellationToken::new())
        .await;

    assert_eq!(outcome.status, TurnStatus::LimitReached);
    assert_eq!(provider.call_count(), 50);
    assert!(outcome.text.contains("(reached maximum iterations)"));
}

#[tokio::test]
async fn sub_agent_tool_calls_are_gated_by_its_allow_list() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("keep.txt"), "precious").unwrap();

    // the sub-agent backend tries to Write, then gives up
    let agent_provider: Arc<dyn Provider> = Arc::new(MockProvider::new(vec![
        tool_turn(
            "tu_w",
            "Write",
            json!({"file_path": "keep.txt", "content": "clobbered"}),
        ),
        text_turn("could not write"),
    ]));

    let executor = build_executor(dir.path());
    let mut providers: HashMap<String, Arc<dyn Provider>> = HashMap::new();
    providers.insert("anthropic".to_string(), agent_provider);
    let agent_executor = Arc::new(AgentExecutor::new(
        providers,
        executor.clone(),
        dir.path(),
        "claude-sonnet-4-20250514",
    ));

    // wire the Task tool up after the fact, the same way a host does
    executor
        .registry()
        .register(Arc::new(TaskTool::new(agent_executor.clone())));

    let outcome = agent_executor
        .execute(
            &ExecContext::default(),
            TaskRequest {
                description: "explore".to_string(),
                prompt: "try to write".to_string(),
                subagent_type: "Explore".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(outcome.status, "completed");
    // the read-only agent was denied and the file survived
    assert_eq!(
        std::fs::read_to_string(dir.path().join("keep.txt")).unwrap(),
        "precious"
    );

    let agent = agent_executor.get(&outcome.agent_id).unwrap();
    let agent = agent.lock().await;
    let denial = agent.conversation.messages()[2].content[0]
        .as_tool_result()
        .unwrap();
    assert!(denial.is_error);
    assert!(denial.content.contains("not available for this agent type"));
}

#[tokio::test]
async fn bash_denial_by_rule_reaches_the_model_as_an_error_result() {
    let dir = tempfile::tempdir().unwrap();

    let registry = Arc::new(Registry::new());
    registry.register(Arc::new(BashTool::new(dir.path())));
    let mut rules = RuleSet::new();
    rules.add(Rule::parse("Bash(rm *)", Action::Deny));
    rules.add(Rule::parse("Bash", Action::Allow));
    let executor = Arc::new(ToolExecutor::new(
        registry,
        Arc::new(PermissionPolicy::new(rules)),
    ));

    let provider = Arc::new(MockProvider::new(vec![
        tool_turn("tu_rm", "Bash", json!({"command": "rm -rf everything"})),
        text_turn("that was blocked"),
    ]));
    let turn_loop = TurnLoop::new(provider, executor);

    let mut conversation = Conversation::new();
    conversation.push_user_text("clean up");

    let outcome = turn_loop
        .run(&mut conversation, request(vec![]), CancellationToken::new())
        .await;

    // the loop continues after the denial and the model sees it
    assert_eq!(outcome.status, TurnStatus::Completed);
    let result = conversation.messages()[2].content[0].as_tool_result().unwrap();
    assert!(result.is_error);
    assert!(result.content.contains("denied"));
}
