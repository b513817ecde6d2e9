//! Orchestrator 端到端场景：脚本化 Mock 后端 + 测试内能力实现

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use forage::config::AppConfig;
use forage::core::{
    ActionInvocation, AwaitReason, DiscoveryAgent, Orchestrator, SessionOutcome, SessionStatus,
    SessionSupervisor,
};
use forage::llm::{ChatReply, LlmError, MockLlmClient};
use forage::react::events::{ChannelSink, EventSink, LoopEvent, LoopEventKind, Severity};
use forage::react::prompts::{PAUSE_MESSAGE, PREFLIGHT_ACK};
use forage::tools::{Capability, CapabilityRegistry};

/// 记录调用次数的能力；可选在执行时请求暂停或返回错误
struct Probe {
    id: &'static str,
    schema: Value,
    calls: Arc<AtomicUsize>,
    output: Result<&'static str, &'static str>,
    pause_on_run: Option<SessionSupervisor>,
}

impl Probe {
    fn new(id: &'static str, calls: Arc<AtomicUsize>) -> Self {
        Self {
            id,
            schema: json!({"type": "object", "properties": {}, "required": []}),
            calls,
            output: Ok("Cargo.toml\nsrc/\nREADME.md"),
            pause_on_run: None,
        }
    }
}

#[async_trait]
impl Capability for Probe {
    fn id(&self) -> &str {
        self.id
    }

    fn description(&self) -> &str {
        "test capability"
    }

    fn parameters_schema(&self) -> Value {
        self.schema.clone()
    }

    async fn execute(&self, _args: Value) -> Result<String, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(supervisor) = &self.pause_on_run {
            supervisor.pause();
        }
        self.output.map(str::to_string).map_err(str::to_string)
    }
}

fn edit_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "path": {"type": "string"},
            "operations": {"type": "array"}
        },
        "required": ["path", "operations"]
    })
}

struct Harness {
    orchestrator: Orchestrator,
    backend: Arc<MockLlmClient>,
    list_calls: Arc<AtomicUsize>,
    edit_calls: Arc<AtomicUsize>,
    events: tokio::sync::mpsc::UnboundedReceiver<LoopEvent>,
}

impl Harness {
    fn new(config: AppConfig, replies: Vec<ChatReply>) -> Self {
        Self::with_registry(config, replies, |_| {})
    }

    fn with_registry(
        config: AppConfig,
        replies: Vec<ChatReply>,
        extra: impl FnOnce(&mut CapabilityRegistry),
    ) -> Self {
        let list_calls = Arc::new(AtomicUsize::new(0));
        let edit_calls = Arc::new(AtomicUsize::new(0));
        let mut registry = CapabilityRegistry::new();
        registry.register(Probe::new("list_files", list_calls.clone()));
        let mut edit = Probe::new("edit_file", edit_calls.clone());
        edit.schema = edit_schema();
        edit.output = Ok("Edited a.rs");
        registry.register(edit);
        extra(&mut registry);

        let backend = Arc::new(MockLlmClient::with_replies(replies));
        let (sink, events) = ChannelSink::channel();
        let orchestrator = Orchestrator::new(backend.clone(), registry, config)
            .unwrap()
            .with_sink(Arc::new(sink));
        Self {
            orchestrator,
            backend,
            list_calls,
            edit_calls,
            events,
        }
    }

    fn drain_events(&mut self) -> Vec<LoopEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = self.events.try_recv() {
            out.push(ev);
        }
        out
    }
}

fn invoke(id: &str, capability: &str, args: Value) -> ChatReply {
    ChatReply::invocations(vec![ActionInvocation::new(id, capability, args)])
}

fn last_message(h: &Harness, call: usize) -> String {
    let calls = h.backend.calls();
    calls[call]
        .messages
        .last()
        .map(|m| m.content.clone())
        .unwrap_or_default()
}

#[tokio::test]
async fn scenario_a_first_degenerate_reply_bootstraps_probe() {
    let mut h = Harness::new(AppConfig::default(), vec![ChatReply::empty()]);

    let outcome = h.orchestrator.execute("Explain the project layout").await;

    assert_eq!(outcome.status(), SessionStatus::Done);
    assert_eq!(h.list_calls.load(Ordering::SeqCst), 1);
    let events = h.drain_events();
    assert!(events
        .iter()
        .any(|e| e.kind == LoopEventKind::ActionStart && e.message == "list_files"));
    assert!(!events.iter().any(|e| e.kind == LoopEventKind::Distress));
    assert!(last_message(&h, 1).contains("list_files"));
}

#[tokio::test]
async fn scenario_b_five_degenerate_replies_fail_with_cause() {
    let mut replies = vec![invoke("c1", "list_files", json!({}))];
    replies.extend((0..5).map(|_| ChatReply::empty()));
    let mut h = Harness::new(AppConfig::default(), replies);

    let outcome = h.orchestrator.execute("Fix the build").await;

    match outcome {
        SessionOutcome::Failed { error, turns } => {
            assert!(error.contains("5 consecutive empty responses"), "{error}");
            assert!(error.contains("model-stuck"), "{error}");
            assert_eq!(turns, 6);
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(h.backend.call_count(), 6);
    // 第 4 次退化响应后进入 emergency-mode，要求动作形态的回复
    let calls = h.backend.calls();
    assert_eq!(calls[5].options.response_shape.as_deref(), Some("action_invocation"));
    assert!(calls[5].messages.len() <= 3);

    let events = h.drain_events();
    let warnings = events
        .iter()
        .filter(|e| e.kind == LoopEventKind::Distress && e.severity == Severity::Warning)
        .count();
    assert_eq!(warnings, 4);
    assert!(events
        .iter()
        .any(|e| e.kind == LoopEventKind::Done && e.severity == Severity::Error));
}

#[tokio::test]
async fn scenario_c_completion_marker_is_stripped() {
    let mut h = Harness::new(
        AppConfig::default(),
        vec![ChatReply::text("Nothing needed changing. TASK_COMPLETE")],
    );

    let outcome = h.orchestrator.execute("Check formatting").await;

    assert_eq!(
        outcome,
        SessionOutcome::Done {
            result: "Nothing needed changing.".to_string(),
            turns: 1
        }
    );
    assert_eq!(h.list_calls.load(Ordering::SeqCst), 0);
    assert!(h.orchestrator.pending_session().is_none());
}

#[tokio::test]
async fn scenario_d_clarification_parks_and_resume_continues() {
    let mut h = Harness::new(
        AppConfig::default(),
        vec![
            invoke("c1", "list_files", json!({"path": "."})),
            invoke("c2", "ask_user", json!({"question": "Which framework?"})),
            ChatReply::text("Scaffolded the React app. TASK_COMPLETE"),
        ],
    );

    let outcome = h.orchestrator.execute("Create a frontend").await;
    assert_eq!(
        outcome,
        SessionOutcome::AwaitingInput {
            question: "Which framework?".to_string(),
            reason: AwaitReason::Clarification
        }
    );
    let parked = h.orchestrator.pending_session().unwrap();
    assert_eq!(parked.pending_question.as_deref(), Some("Which framework?"));
    assert_eq!(parked.turns.len(), 2);

    let resumed = h.orchestrator.resume("React").await.unwrap();
    assert_eq!(resumed.status(), SessionStatus::Done);

    let calls = h.backend.calls();
    assert_eq!(calls.len(), 3);
    assert_eq!(last_message(&h, 2), "React");
    let events = h.drain_events();
    assert!(events.iter().any(|e| e.kind == LoopEventKind::AwaitingInput));
    assert!(events.iter().any(|e| e.kind == LoopEventKind::Resume));
}

#[tokio::test]
async fn scenario_e_insert_without_position_is_rejected_before_execution() {
    let mut h = Harness::new(
        AppConfig::default(),
        vec![invoke(
            "e1",
            "edit_file",
            json!({
                "path": "src/main.rs",
                "operations": [{"kind": "insert", "anchor": "fn main", "content": "// hi"}]
            }),
        )],
    );

    let outcome = h.orchestrator.execute("Add a comment").await;

    assert_eq!(outcome.status(), SessionStatus::Done);
    assert_eq!(h.edit_calls.load(Ordering::SeqCst), 0);
    let fed_back = last_message(&h, 1);
    assert!(fed_back.contains("missing required field 'position'"), "{fed_back}");
    assert!(fed_back.contains("(error)"));
}

#[tokio::test]
async fn valid_edit_executes() {
    let mut h = Harness::new(
        AppConfig::default(),
        vec![invoke(
            "e1",
            "edit_file",
            json!({
                "path": "src/main.rs",
                "operations": [{"kind": "insert", "anchor": "fn main", "position": "before", "content": "// hi"}]
            }),
        )],
    );
    h.orchestrator.execute("Add a comment").await;
    assert_eq!(h.edit_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn pause_is_honored_after_the_running_turn() {
    let supervisor = SessionSupervisor::new();
    let build_calls = Arc::new(AtomicUsize::new(0));
    let backend = Arc::new(MockLlmClient::with_replies(vec![
        invoke("p1", "slow_build", json!({})),
        ChatReply::text("Build passes. TASK_COMPLETE"),
    ]));
    // 能力执行中请求暂停：当前轮照常完成，轮次结束后会话停放
    let mut registry = CapabilityRegistry::new();
    let mut slow = Probe::new("slow_build", build_calls.clone());
    slow.pause_on_run = Some(supervisor.clone());
    registry.register(slow);
    let mut orchestrator = Orchestrator::new(backend.clone(), registry, AppConfig::default())
        .unwrap()
        .with_supervisor(supervisor);

    let outcome = orchestrator.execute("Run the build").await;

    assert_eq!(
        outcome,
        SessionOutcome::AwaitingInput {
            question: PAUSE_MESSAGE.to_string(),
            reason: AwaitReason::Paused
        }
    );
    assert_eq!(build_calls.load(Ordering::SeqCst), 1);
    let parked = orchestrator.pending_session().unwrap();
    assert!(parked.paused);
    assert_eq!(parked.turns.len(), 1);
    assert_eq!(parked.turns[0].action_results.len(), 1);

    let resumed = orchestrator.resume("go on").await.unwrap();
    assert_eq!(resumed.status(), SessionStatus::Done);
    assert!(orchestrator.pending_session().is_none());
    assert_eq!(backend.call_count(), 2);
}

#[tokio::test]
async fn pause_during_final_turn_does_not_leak_into_next_session() {
    let supervisor = SessionSupervisor::new();
    let check_calls = Arc::new(AtomicUsize::new(0));
    let backend = Arc::new(MockLlmClient::with_replies(vec![
        ChatReply {
            text: Some("Finishing up. TASK_COMPLETE".to_string()),
            action_invocations: vec![ActionInvocation::new("f1", "final_check", json!({}))],
        },
        ChatReply::text("Second task handled. TASK_COMPLETE"),
    ]));
    let mut registry = CapabilityRegistry::new();
    let mut check = Probe::new("final_check", check_calls.clone());
    check.pause_on_run = Some(supervisor.clone());
    registry.register(check);
    let mut orchestrator = Orchestrator::new(backend.clone(), registry, AppConfig::default())
        .unwrap()
        .with_supervisor(supervisor.clone());

    let first = orchestrator.execute("first task").await;
    assert_eq!(
        first,
        SessionOutcome::Done {
            result: "Finishing up.".to_string(),
            turns: 1
        }
    );
    assert_eq!(check_calls.load(Ordering::SeqCst), 1);
    assert!(!supervisor.is_pause_requested());

    let second = orchestrator.execute("second task").await;
    assert_eq!(
        second,
        SessionOutcome::Done {
            result: "Second task handled.".to_string(),
            turns: 1
        }
    );
    assert_eq!(backend.call_count(), 2);
}

#[tokio::test]
async fn pause_before_first_turn_skips_backend() {
    let mut h = Harness::new(AppConfig::default(), vec![]);
    h.orchestrator.supervisor().pause();

    let outcome = h.orchestrator.execute("Anything").await;

    assert_eq!(outcome.status(), SessionStatus::AwaitingInput);
    assert_eq!(h.backend.call_count(), 0);
}

#[tokio::test]
async fn turn_budget_exhaustion_fails_session() {
    let mut config = AppConfig::default();
    config.engine.max_turns = 2;
    let mut h = Harness::new(
        config,
        vec![
            ChatReply::text("Let me look around."),
            ChatReply::text("Still thinking it through."),
            ChatReply::text("Never reached. TASK_COMPLETE"),
        ],
    );

    let outcome = h.orchestrator.execute("Refactor everything").await;

    match outcome {
        SessionOutcome::Failed { error, turns } => {
            assert!(error.contains("limit of 2 turns"), "{error}");
            assert_eq!(turns, 2);
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(h.backend.call_count(), 2);
}

#[tokio::test]
async fn empty_response_count_resets_and_turns_stay_monotonic() {
    let mut h = Harness::new(
        AppConfig::default(),
        vec![
            invoke("c1", "list_files", json!({})),
            ChatReply::empty(),
            ChatReply::empty(),
            invoke("c2", "ask_user", json!({"question": "Proceed with the refactor?"})),
        ],
    );

    let outcome = h.orchestrator.execute("Refactor the parser").await;
    assert_eq!(outcome.status(), SessionStatus::AwaitingInput);

    let session = h.orchestrator.pending_session().unwrap();
    assert_eq!(session.current_turn, 4);
    // 退化迭代计入轮次但不追加 Turn
    assert_eq!(session.turns.len(), 2);
    assert_eq!(session.empty_response_count, 0);
    assert!(session.recovery.active.is_none());

    let thinking: Vec<String> = h
        .drain_events()
        .into_iter()
        .filter(|e| e.kind == LoopEventKind::Thinking)
        .map(|e| e.message)
        .collect();
    assert_eq!(thinking, vec!["Turn 1", "Turn 2", "Turn 3", "Turn 4"]);
}

#[tokio::test]
async fn unknown_capability_yields_error_result_listing_ids() {
    let h_replies = vec![invoke("u1", "deploy", json!({"env": "prod"}))];
    let mut h = Harness::new(AppConfig::default(), h_replies);

    let outcome = h.orchestrator.execute("Ship it").await;

    assert_eq!(outcome.status(), SessionStatus::Done);
    let fed_back = last_message(&h, 1);
    assert!(fed_back.contains("Unknown capability: deploy"), "{fed_back}");
    assert!(fed_back.contains("list_files"));
    assert!(fed_back.contains("ask_user"));
}

#[tokio::test]
async fn failing_capability_is_reported_to_backend() {
    let mut h = Harness::with_registry(
        AppConfig::default(),
        vec![invoke("r1", "run_tests", json!({}))],
        |registry| {
            let mut failing = Probe::new("run_tests", Arc::new(AtomicUsize::new(0)));
            failing.output = Err("disk full");
            registry.register(failing);
        },
    );

    let outcome = h.orchestrator.execute("Run the tests").await;

    assert_eq!(outcome.status(), SessionStatus::Done);
    let fed_back = last_message(&h, 1);
    assert!(fed_back.contains("Capability execution failed: disk full"), "{fed_back}");
    let events = h.drain_events();
    assert!(events
        .iter()
        .any(|e| e.kind == LoopEventKind::ActionResult && e.severity == Severity::Warning));
}

#[tokio::test]
async fn backend_error_fails_session() {
    let mut h = Harness::new(AppConfig::default(), vec![]);
    h.backend.push_error(LlmError::Request("connection reset".into()));

    let outcome = h.orchestrator.execute("Anything").await;

    match outcome {
        SessionOutcome::Failed { error, .. } => assert!(error.contains("connection reset")),
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn declared_plan_drives_completion() {
    let mut h = Harness::new(
        AppConfig::default(),
        vec![
            invoke(
                "p1",
                "declare_plan",
                json!({"goal": "Fix lint", "steps": ["inspect", "fix"]}),
            ),
            ChatReply {
                text: Some("Inspection step complete.".into()),
                action_invocations: vec![ActionInvocation::new("c1", "list_files", json!({}))],
            },
            ChatReply::text("The fix step is done."),
        ],
    );

    let outcome = h.orchestrator.execute("Fix lint warnings").await;

    assert_eq!(
        outcome,
        SessionOutcome::Done {
            result: "The fix step is done.".to_string(),
            turns: 3
        }
    );
    let calls = h.backend.calls();
    assert!(calls[1].messages[0].content.contains("-> 1. inspect"));
    assert!(calls[2].messages[0].content.contains("-> 2. fix"));
}

struct Layout;

#[async_trait]
impl DiscoveryAgent for Layout {
    fn name(&self) -> &str {
        "layout"
    }

    async fn discover(&self, _query: &str, _dir: &Path) -> Result<String, String> {
        Ok("Single crate, tests under tests/".to_string())
    }
}

#[tokio::test]
async fn preflight_knowledge_seeds_context() {
    let backend = Arc::new(MockLlmClient::with_replies(vec![
        ChatReply::text("Run cargo test before finishing."),
        ChatReply::text("Checked. TASK_COMPLETE"),
    ]));
    let mut orchestrator =
        Orchestrator::new(backend.clone(), CapabilityRegistry::new(), AppConfig::default())
            .unwrap()
            .with_discovery_agent(Arc::new(Layout));

    let outcome = orchestrator.execute("Verify the tests").await;

    assert_eq!(outcome.status(), SessionStatus::Done);
    let calls = backend.calls();
    assert_eq!(calls[0].options.response_shape.as_deref(), Some("knowledge_summary"));
    let turn_messages: Vec<&str> = calls[1].messages.iter().map(|m| m.content.as_str()).collect();
    assert!(turn_messages[2].contains("Run cargo test before finishing."));
    assert_eq!(turn_messages[3], PREFLIGHT_ACK);
}

struct PanickingSink;

impl EventSink for PanickingSink {
    fn emit(&self, _event: &LoopEvent) -> anyhow::Result<()> {
        panic!("observer bug");
    }
}

#[tokio::test]
async fn sink_panics_never_affect_control_flow() {
    let backend = Arc::new(MockLlmClient::with_replies(vec![ChatReply::text(
        "All good. TASK_COMPLETE",
    )]));
    let mut orchestrator =
        Orchestrator::new(backend, CapabilityRegistry::new(), AppConfig::default())
            .unwrap()
            .with_sink(Arc::new(PanickingSink));

    let outcome = orchestrator.execute("Anything").await;

    assert_eq!(outcome.status(), SessionStatus::Done);
}

#[test]
fn tracing_can_only_be_installed_once() {
    let _ = forage::observability::try_init("warn");
    assert!(forage::observability::try_init("warn").is_err());
    forage::observability::init();
}
