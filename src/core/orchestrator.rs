//! 编排器
//!
//! 独占当前会话并驱动回合主循环：execute 总是开启新会话（丢弃已停放的会话），
//! resume 恢复停放在 awaiting_input 的会话。停放的会话保存在单槽 pending 中，只能被 resume 取走或被新会话替换。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;

use crate::config::{load_config, AppConfig};
use crate::core::preflight::{DiscoveryAgent, Preflight};
use crate::core::recovery::RecoveryEngine;
use crate::core::session::Session;
use crate::core::session_supervisor::SessionSupervisor;
use crate::core::state::{SessionOutcome, SessionStatus};
use crate::core::AgentError;
use crate::llm::LlmClient;
use crate::react::events::{send_event, EventSink, LoopEvent, LoopEventKind, NoopSink, Severity};
use crate::react::loop_::TurnLoop;
use crate::tools::{CapabilityExecutor, CapabilityRegistry};

/// 会话编排器
pub struct Orchestrator {
    backend: Arc<dyn LlmClient>,
    executor: CapabilityExecutor,
    sink: Arc<dyn EventSink>,
    config: AppConfig,
    recovery: RecoveryEngine,
    supervisor: SessionSupervisor,
    preflight: Preflight,
    /// 停放在 awaiting_input 的会话
    pending: Option<Session>,
}

impl Orchestrator {
    /// 校验配置后创建
    pub fn new(
        backend: Arc<dyn LlmClient>,
        registry: CapabilityRegistry,
        config: AppConfig,
    ) -> Result<Self, AgentError> {
        config.validate()?;
        let executor = CapabilityExecutor::new(registry, config.engine.capability_timeout_secs);
        let recovery = RecoveryEngine::new(config.recovery.clone());
        let preflight = Preflight::new(config.context.summary_chars);
        Ok(Self {
            backend,
            executor,
            sink: Arc::new(NoopSink),
            config,
            recovery,
            supervisor: SessionSupervisor::new(),
            preflight,
            pending: None,
        })
    }

    /// 加载配置文件（叠加环境变量）后创建
    pub fn from_config_file(
        config_path: Option<PathBuf>,
        backend: Arc<dyn LlmClient>,
        registry: CapabilityRegistry,
    ) -> anyhow::Result<Self> {
        let config = load_config(config_path.clone()).with_context(|| {
            format!(
                "failed to load configuration{}",
                config_path
                    .as_ref()
                    .map(|p| format!(" from {}", p.display()))
                    .unwrap_or_default()
            )
        })?;
        Ok(Self::new(backend, registry, config)?)
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// 使用嵌入方提供的暂停句柄
    pub fn with_supervisor(mut self, supervisor: SessionSupervisor) -> Self {
        self.supervisor = supervisor;
        self
    }

    pub fn with_discovery_agent(mut self, agent: Arc<dyn DiscoveryAgent>) -> Self {
        self.preflight.add_agent(agent);
        self
    }

    /// 暂停句柄（可克隆后交给其它任务）
    pub fn supervisor(&self) -> SessionSupervisor {
        self.supervisor.clone()
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// 停放中的会话（只读）
    pub fn pending_session(&self) -> Option<&Session> {
        self.pending.as_ref()
    }

    /// 开启新会话并运行到终态或停放
    pub async fn execute(&mut self, query: &str) -> SessionOutcome {
        if let Some(discarded) = self.pending.take() {
            tracing::info!(session = %discarded.id, "discarding parked session");
        }

        let working_dir = self
            .config
            .engine
            .working_dir
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));
        let mut session = Session::new(query, working_dir, self.config.engine.max_turns);
        tracing::info!(session = %session.id, max_turns = session.max_turns, "session started");
        self.emit(
            LoopEvent::new(LoopEventKind::Start, "Session started")
                .with_detail(query, self.config.engine.event_detail_chars),
        );

        if !self.preflight.is_empty() {
            session.preflight = self
                .preflight
                .run(
                    self.backend.as_ref(),
                    &session.query,
                    &session.working_dir,
                    self.sink.as_ref(),
                    self.config.engine.event_detail_chars,
                )
                .await;
        }

        self.drive(session).await
    }

    /// 恢复停放的会话；没有停放会话时立即失败
    pub async fn resume(&mut self, input: &str) -> Result<SessionOutcome, AgentError> {
        let mut session = self.pending.take().ok_or(AgentError::NoPendingSession)?;
        session.push_user_message(input);
        session.unpark();
        tracing::info!(session = %session.id, turn = session.current_turn, "session resumed");
        self.emit(
            LoopEvent::new(LoopEventKind::Resume, "Session resumed")
                .with_detail(input, self.config.engine.event_detail_chars),
        );
        Ok(self.drive(session).await)
    }

    async fn drive(&mut self, mut session: Session) -> SessionOutcome {
        let turn_loop = TurnLoop {
            backend: self.backend.as_ref(),
            executor: &self.executor,
            recovery: &self.recovery,
            config: &self.config,
            sink: self.sink.as_ref(),
            supervisor: &self.supervisor,
        };
        if let Err(e) = turn_loop.run(&mut session).await {
            tracing::error!(session = %session.id, error = %e, "session failed");
            session.fail(e.to_string());
        }
        self.finish(session)
    }

    /// 上报结果事件，停放 awaiting_input 的会话，返回投影
    fn finish(&mut self, session: Session) -> SessionOutcome {
        let outcome = SessionOutcome::project(&session);
        let detail_chars = self.config.engine.event_detail_chars;
        match &outcome {
            SessionOutcome::Done { result, turns } => {
                tracing::info!(session = %session.id, turns, "session done");
                self.emit(
                    LoopEvent::new(LoopEventKind::Done, "Task complete")
                        .with_detail(result.clone(), detail_chars),
                );
            }
            SessionOutcome::AwaitingInput { question, reason } => {
                tracing::info!(session = %session.id, ?reason, "awaiting input");
                self.emit(
                    LoopEvent::new(LoopEventKind::AwaitingInput, question.clone())
                        .with_detail(format!("{:?}", reason).to_lowercase(), detail_chars),
                );
            }
            SessionOutcome::Failed { error, .. } => {
                self.emit(
                    LoopEvent::new(LoopEventKind::Distress, "Session failed")
                        .with_detail(error.clone(), detail_chars)
                        .with_severity(Severity::Error),
                );
                self.emit(
                    LoopEvent::new(LoopEventKind::Done, "Task failed")
                        .with_detail(error.clone(), detail_chars)
                        .with_severity(Severity::Error),
                );
            }
        }
        if session.status == SessionStatus::AwaitingInput {
            self.pending = Some(session);
        }
        outcome
    }

    fn emit(&self, event: LoopEvent) {
        send_event(self.sink.as_ref(), event);
    }
}
