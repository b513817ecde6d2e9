//! 会话数据模型：Session / Turn / ActionInvocation / ActionResult / Plan
//!
//! Session 由单个 Orchestrator 独占，不跨会话共享；Turn 追加后不可变。

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::recovery::StrategyName;
use crate::core::state::{AwaitReason, SessionStatus};

/// 后端请求执行的一次动作调用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionInvocation {
    pub id: String,
    /// 能力 id（如 read_file、ask_user）
    pub capability: String,
    pub arguments: serde_json::Value,
}

impl ActionInvocation {
    pub fn new(
        id: impl Into<String>,
        capability: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            capability: capability.into(),
            arguments,
        }
    }
}

/// 动作调用结果（成功内容或合成的错误结果）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub invocation_id: String,
    pub content: String,
    pub success: bool,
    pub error: Option<String>,
}

impl ActionResult {
    pub fn ok(invocation_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            invocation_id: invocation_id.into(),
            content: content.into(),
            success: true,
            error: None,
        }
    }

    /// 合成错误结果：content 与 error 同为错误描述，后端下一轮可据此自我修正
    pub fn failed(invocation_id: impl Into<String>, error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            invocation_id: invocation_id.into(),
            content: format!("Error: {}", error),
            success: false,
            error: Some(error),
        }
    }
}

/// 一轮：后端思考 + 触发的动作及其结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub thought: String,
    pub action_invocations: Vec<ActionInvocation>,
    pub action_results: Vec<ActionResult>,
    pub timestamp: DateTime<Utc>,
    /// 本轮动作是否为 bootstrap 合成的探测调用
    #[serde(default)]
    pub bootstrap: bool,
}

impl Turn {
    pub fn has_invocations(&self) -> bool {
        !self.action_invocations.is_empty()
    }

    /// 按 invocation id 查找结果
    pub fn result_for(&self, invocation_id: &str) -> Option<&ActionResult> {
        self.action_results
            .iter()
            .find(|r| r.invocation_id == invocation_id)
    }
}

/// 用户在会话中的回复，after_turn 为其紧随的轮次下标（None 表示在第一轮之前）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMessage {
    pub content: String,
    pub after_turn: Option<usize>,
}

/// 建议性计划：仅影响完成判定启发式，从不阻塞推进
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub goal: String,
    pub steps: Vec<String>,
    pub current_step_index: usize,
}

impl Plan {
    pub fn new(goal: impl Into<String>, steps: Vec<String>) -> Self {
        Self {
            goal: goal.into(),
            steps,
            current_step_index: 0,
        }
    }

    pub fn is_on_final_step(&self) -> bool {
        !self.steps.is_empty() && self.current_step_index + 1 >= self.steps.len()
    }

    /// 前进一步，封顶于最后一个下标
    pub fn advance(&mut self) {
        if self.current_step_index + 1 < self.steps.len() {
            self.current_step_index += 1;
        }
    }

    pub fn current_step(&self) -> Option<&str> {
        self.steps.get(self.current_step_index).map(String::as_str)
    }
}

/// 恢复状态：当前生效的策略与各策略已用次数
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecoveryState {
    /// 下一轮构建消息后需要应用的策略
    pub active: Option<StrategyName>,
    pub attempts: HashMap<StrategyName, u32>,
}

impl RecoveryState {
    pub fn attempts_for(&self, name: StrategyName) -> u32 {
        self.attempts.get(&name).copied().unwrap_or(0)
    }

    pub fn reset(&mut self) {
        self.active = None;
        self.attempts.clear();
    }
}

/// 一次任务执行的完整状态
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub query: String,
    pub working_dir: PathBuf,
    pub turns: Vec<Turn>,
    pub user_messages: Vec<UserMessage>,
    /// 0 表示不限
    pub max_turns: usize,
    pub current_turn: usize,
    pub status: SessionStatus,
    pub plan: Option<Plan>,
    pub final_result: Option<String>,
    pub pending_question: Option<String>,
    pub await_reason: Option<AwaitReason>,
    pub paused: bool,
    pub error: Option<String>,
    pub empty_response_count: u32,
    /// 预检得到的知识块
    pub preflight: Option<String>,
    #[serde(default)]
    pub recovery: RecoveryState,
}

impl Session {
    pub fn new(
        query: impl Into<String>,
        working_dir: impl Into<PathBuf>,
        max_turns: usize,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            query: query.into(),
            working_dir: working_dir.into(),
            turns: Vec::new(),
            user_messages: Vec::new(),
            max_turns,
            current_turn: 0,
            status: SessionStatus::Running,
            plan: None,
            final_result: None,
            pending_question: None,
            await_reason: None,
            paused: false,
            error: None,
            empty_response_count: 0,
            preflight: None,
            recovery: RecoveryState::default(),
        }
    }

    /// 最近一个已完成轮次的下标
    pub fn last_turn_index(&self) -> Option<usize> {
        self.turns.len().checked_sub(1)
    }

    /// 追加一轮（轮次只追加、不修改）
    pub fn push_turn(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    /// 追加用户回复，记录其紧随的轮次
    pub fn push_user_message(&mut self, content: impl Into<String>) {
        let after_turn = self.last_turn_index();
        self.user_messages.push(UserMessage {
            content: content.into(),
            after_turn,
        });
    }

    /// 进入 awaiting_input；同一时刻至多一个待回答问题
    pub fn park(&mut self, question: impl Into<String>, reason: AwaitReason) {
        self.transition(SessionStatus::AwaitingInput);
        self.pending_question = Some(question.into());
        self.paused = reason == AwaitReason::Paused;
        self.await_reason = Some(reason);
    }

    /// 从 awaiting_input 恢复为 running
    pub fn unpark(&mut self) {
        self.transition(SessionStatus::Running);
        self.pending_question = None;
        self.await_reason = None;
        self.paused = false;
    }

    pub fn complete(&mut self, result: impl Into<String>) {
        self.transition(SessionStatus::Done);
        self.final_result = Some(result.into());
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.transition(SessionStatus::Failed);
        self.error = Some(error.into());
    }

    /// 所有状态变更的唯一入口
    fn transition(&mut self, next: SessionStatus) {
        if !self.status.can_transition_to(next) {
            tracing::error!(
                session = %self.id,
                from = ?self.status,
                to = ?next,
                "illegal transition"
            );
            debug_assert!(false, "illegal session transition {:?} -> {:?}", self.status, next);
        }
        self.status = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(invocations: usize) -> Turn {
        Turn {
            thought: String::new(),
            action_invocations: (0..invocations)
                .map(|i| ActionInvocation::new(format!("c{i}"), "read_file", serde_json::json!({})))
                .collect(),
            action_results: Vec::new(),
            timestamp: Utc::now(),
            bootstrap: false,
        }
    }

    #[test]
    fn test_plan_advance_caps_at_last_step() {
        let mut plan = Plan::new("goal", vec!["a".into(), "b".into()]);
        assert!(!plan.is_on_final_step());
        plan.advance();
        assert!(plan.is_on_final_step());
        plan.advance();
        assert_eq!(plan.current_step_index, 1);
        assert_eq!(plan.current_step(), Some("b"));
    }

    #[test]
    fn test_user_message_keyed_to_last_turn() {
        let mut session = Session::new("q", ".", 0);
        session.push_user_message("before any turn");
        session.push_turn(turn(1));
        session.push_turn(turn(0));
        session.push_user_message("after second turn");
        assert_eq!(session.user_messages[0].after_turn, None);
        assert_eq!(session.user_messages[1].after_turn, Some(1));
    }

    #[test]
    fn test_park_and_unpark() {
        let mut session = Session::new("q", ".", 0);
        session.park("Which framework?", AwaitReason::Clarification);
        assert_eq!(session.status, SessionStatus::AwaitingInput);
        assert!(!session.paused);
        session.unpark();
        assert_eq!(session.status, SessionStatus::Running);
        assert!(session.pending_question.is_none());
    }

    #[test]
    fn test_failed_result_carries_error() {
        let r = ActionResult::failed("c1", "boom");
        assert!(!r.success);
        assert_eq!(r.error.as_deref(), Some("boom"));
        assert!(r.content.contains("boom"));
    }

    #[test]
    fn test_resume_after_clarification_reaches_done() {
        let mut session = Session::new("q", ".", 0);
        session.park("Which framework?", AwaitReason::Clarification);
        session.unpark();
        session.complete("Scaffolded");
        assert_eq!(session.status, SessionStatus::Done);
        assert_eq!(session.final_result.as_deref(), Some("Scaffolded"));
    }

    #[test]
    #[should_panic(expected = "illegal session transition")]
    fn test_terminal_session_cannot_be_parked() {
        let mut session = Session::new("q", ".", 0);
        session.fail("boom");
        session.park("Anything?", AwaitReason::Clarification);
    }
}
