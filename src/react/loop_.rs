//! 回合主循环
//!
//! 每次迭代：采样暂停 → 检查轮次预算 → 构建上下文（必要时叠加恢复策略）→ 调用后端 →
//! 解码 → 退化响应交给恢复引擎，否则顺序执行动作调用并追加 Turn → 完成 / 澄清判定 → 采样暂停。
//! 能力错误与参数校验错误转为合成错误结果留在回合内；只有返回的 AgentError 会使会话失败。

use crate::config::AppConfig;
use crate::core::recovery::{RecoveryEngine, RecoveryInput, StrategyName};
use crate::core::session::{ActionInvocation, ActionResult, Plan, Session, Turn};
use crate::core::state::{AwaitReason, SessionStatus};
use crate::core::{AgentError, SessionSupervisor};
use crate::llm::{CapabilitySpec, ChatOptions, LlmClient};
use crate::memory::Message;
use crate::react::codec::{self, DecodeContext};
use crate::react::context::ContextBuilder;
use crate::react::detector::{self, TurnVerdict};
use crate::react::events::{send_event, EventSink, LoopEvent, LoopEventKind, Severity};
use crate::react::prompts::PAUSE_MESSAGE;
use crate::tools::{reserved_specs, ArgumentValidator, CapabilityExecutor, ValidatedArgs};

/// emergency-mode 下要求后端使用的响应形态
pub const EMERGENCY_RESPONSE_SHAPE: &str = "action_invocation";

/// 主循环依赖（均为借用，由 Orchestrator 持有）
pub struct TurnLoop<'a> {
    pub backend: &'a dyn LlmClient,
    pub executor: &'a CapabilityExecutor,
    pub recovery: &'a RecoveryEngine,
    pub config: &'a AppConfig,
    pub sink: &'a dyn EventSink,
    pub supervisor: &'a SessionSupervisor,
}

/// 一轮动作分发的结果
struct Dispatch {
    results: Vec<ActionResult>,
    question: Option<String>,
}

impl<'a> TurnLoop<'a> {
    /// 运行直到会话离开 running（done / awaiting_input），或返回致命错误。
    /// 退出时丢弃未被采纳的暂停请求：暂停只作用于请求时正在运行的会话。
    pub async fn run(&self, session: &mut Session) -> Result<(), AgentError> {
        let result = self.run_turns(session).await;
        if self.supervisor.take_pause() {
            tracing::debug!(
                session = %session.id,
                status = ?session.status,
                "dropping unhonored pause"
            );
        }
        result
    }

    async fn run_turns(&self, session: &mut Session) -> Result<(), AgentError> {
        let specs = self.capability_specs();
        while session.status == SessionStatus::Running {
            if self.supervisor.take_pause() {
                self.pause(session);
                break;
            }
            if session.max_turns > 0 && session.current_turn >= session.max_turns {
                return Err(AgentError::TurnBudgetExhausted {
                    limit: session.max_turns,
                });
            }

            self.run_turn(session, &specs).await?;

            if session.status == SessionStatus::Running && self.supervisor.take_pause() {
                self.pause(session);
            }
        }
        Ok(())
    }

    /// 外部能力声明 + 两个保留能力
    fn capability_specs(&self) -> Vec<CapabilitySpec> {
        let mut specs = self.executor.registry().specs();
        specs.extend(reserved_specs(&self.config.protocol));
        specs
    }

    async fn run_turn(
        &self,
        session: &mut Session,
        specs: &[CapabilitySpec],
    ) -> Result<(), AgentError> {
        session.current_turn += 1;
        let engine = &self.config.engine;

        let built = ContextBuilder::new(self.config, specs).build(session);
        let active = session.recovery.active;
        let input = RecoveryInput {
            query: &session.query,
            completion_marker: &engine.completion_marker,
        };
        let messages = match active {
            Some(strategy) => self.recovery.apply(strategy, &built, &input),
            None => built.clone(),
        };

        let mut options = ChatOptions::with_capabilities(specs.to_vec());
        if active == Some(StrategyName::EmergencyMode) {
            options = options.with_response_shape(EMERGENCY_RESPONSE_SHAPE);
        }

        let mut thinking = LoopEvent::new(
            LoopEventKind::Thinking,
            format!("Turn {}", session.current_turn),
        );
        if let Some(strategy) = active {
            thinking =
                thinking.with_detail(format!("recovery: {}", strategy), engine.event_detail_chars);
        }
        send_event(self.sink, thinking);
        tracing::debug!(
            turn = session.current_turn,
            messages = messages.len(),
            strategy = ?active,
            "calling backend"
        );

        let reply = self.backend.chat(&messages, &options).await?;

        let decoded = codec::decode(
            &reply,
            &DecodeContext {
                protocol: &self.config.protocol,
                completion_marker: &engine.completion_marker,
                first_turn: session.turns.is_empty(),
                after_recovery: active.is_some(),
                bootstrap_available: self
                    .executor
                    .registry()
                    .contains(&self.config.protocol.bootstrap_capability),
            },
        );

        if decoded.degenerate {
            return self.handle_degenerate(session, &built);
        }

        session.empty_response_count = 0;
        session.recovery.reset();

        let dispatch = self.dispatch(session, &decoded.invocations).await;
        session.push_turn(Turn {
            thought: decoded.thought.clone(),
            action_invocations: decoded.invocations,
            action_results: dispatch.results,
            timestamp: chrono::Utc::now(),
            bootstrap: decoded.bootstrap,
        });

        if let Some(question) = dispatch.question {
            session.park(question, AwaitReason::Clarification);
            return Ok(());
        }

        let verdict = detector::evaluate(
            &session.turns,
            session.plan.as_ref(),
            &engine.completion_marker,
        );
        if let Some(plan) = session.plan.as_mut() {
            if detector::advance_plan(plan, &decoded.thought) {
                tracing::info!(
                    step = plan.current_step_index + 1,
                    total = plan.steps.len(),
                    "plan advanced"
                );
            }
        }

        match verdict {
            TurnVerdict::Complete { result } => session.complete(result),
            TurnVerdict::Clarify { question } => {
                session.park(question, AwaitReason::Clarification)
            }
            TurnVerdict::Continue => {}
        }
        Ok(())
    }

    /// 退化响应：计数、诊断，达到上限则放弃，否则选定下一轮使用的恢复策略
    fn handle_degenerate(
        &self,
        session: &mut Session,
        built: &[Message],
    ) -> Result<(), AgentError> {
        session.empty_response_count += 1;
        let count = session.empty_response_count;
        let max = self.config.engine.max_consecutive_empty;
        let diagnosis = self.recovery.diagnose(built, count);

        if count >= max {
            tracing::warn!(count, cause = %diagnosis.cause, "recovery exhausted");
            return Err(AgentError::RecoveryExhausted {
                count,
                cause: diagnosis.cause,
            });
        }

        let input = RecoveryInput {
            query: &session.query,
            completion_marker: &self.config.engine.completion_marker,
        };
        let strategy = self
            .recovery
            .select(&diagnosis, built, &input, &session.recovery);
        *session.recovery.attempts.entry(strategy).or_insert(0) += 1;
        session.recovery.active = Some(strategy);

        tracing::warn!(
            count,
            cause = %diagnosis.cause,
            recommended = %diagnosis.recommended,
            strategy = %strategy,
            estimated_tokens = diagnosis.estimated_tokens,
            messages = diagnosis.message_count,
            "empty response from backend"
        );
        send_event(
            self.sink,
            LoopEvent::new(
                LoopEventKind::Distress,
                format!("Empty response from backend ({}/{}), applying {}", count, max, strategy),
            )
            .with_detail(diagnosis.cause.to_string(), self.config.engine.event_detail_chars)
            .with_severity(Severity::Warning),
        );
        Ok(())
    }

    /// 顺序执行本轮调用；请求澄清之后的调用跳过
    async fn dispatch(&self, session: &mut Session, invocations: &[ActionInvocation]) -> Dispatch {
        let detail_chars = self.config.engine.event_detail_chars;
        let mut results = Vec::with_capacity(invocations.len());
        let mut question: Option<String> = None;

        for inv in invocations {
            if question.is_some() {
                results.push(ActionResult::failed(
                    &inv.id,
                    "Skipped: the session is waiting for the user's answer",
                ));
                continue;
            }

            send_event(
                self.sink,
                LoopEvent::new(LoopEventKind::ActionStart, inv.capability.clone())
                    .with_detail(inv.arguments.to_string(), detail_chars),
            );

            let result = self.invoke(session, inv, &mut question).await;

            let severity = if result.success {
                Severity::Info
            } else {
                Severity::Warning
            };
            send_event(
                self.sink,
                LoopEvent::new(LoopEventKind::ActionResult, inv.capability.clone())
                    .with_detail(result.content.clone(), detail_chars)
                    .with_severity(severity),
            );
            results.push(result);
        }

        Dispatch { results, question }
    }

    /// 单次调用：查找 schema → 校验 → 保留能力特殊处理 / 通用执行
    async fn invoke(
        &self,
        session: &mut Session,
        inv: &ActionInvocation,
        question: &mut Option<String>,
    ) -> ActionResult {
        let protocol = &self.config.protocol;

        let schema = if protocol.is_reserved(&inv.capability) {
            reserved_specs(protocol)
                .into_iter()
                .find(|s| s.id == inv.capability)
                .map(|s| s.parameters)
                .unwrap_or_else(|| serde_json::json!({"type": "object"}))
        } else {
            match self.executor.get(&inv.capability) {
                Some(capability) => capability.parameters_schema(),
                None => {
                    let mut available = self.executor.ids();
                    available.push(protocol.clarification_capability.clone());
                    available.push(protocol.plan_capability.clone());
                    let err = AgentError::UnknownCapability(inv.capability.clone());
                    tracing::warn!(capability = %inv.capability, "unknown capability");
                    return ActionResult::failed(
                        &inv.id,
                        format!("{}. Available capabilities: {}", err, available.join(", ")),
                    );
                }
            }
        };

        let validated = match ArgumentValidator::new(protocol).validate(inv, &schema) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(capability = %inv.capability, error = %e, "invalid arguments");
                return ActionResult::failed(
                    &inv.id,
                    format!("Invalid arguments for {}: {}", inv.capability, e),
                );
            }
        };

        match validated {
            ValidatedArgs::Clarification(args) => {
                *question = Some(args.question);
                ActionResult::ok(&inv.id, "Question sent to the user.")
            }
            ValidatedArgs::Plan(args) => {
                let steps = args.steps.len();
                tracing::info!(goal = %args.goal, steps, "plan declared");
                session.plan = Some(Plan::new(args.goal, args.steps));
                ActionResult::ok(&inv.id, format!("Plan recorded with {} steps.", steps))
            }
            ValidatedArgs::Edit { .. } | ValidatedArgs::Generic(_) => {
                match self
                    .executor
                    .execute(&inv.capability, inv.arguments.clone())
                    .await
                {
                    Ok(content) => ActionResult::ok(&inv.id, content),
                    Err(e) => ActionResult::failed(&inv.id, e.to_string()),
                }
            }
        }
    }

    /// 采纳暂停：转入 awaiting_input 并给出固定提示
    fn pause(&self, session: &mut Session) {
        tracing::info!(session = %session.id, turn = session.current_turn, "pause honored");
        session.park(PAUSE_MESSAGE, AwaitReason::Paused);
    }
}
