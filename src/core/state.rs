//! 状态定义：会话状态机与返回给调用方的投影
//!
//! 状态迁移：running → running / awaiting_input / done / failed，awaiting_input → running。
//! done 与 failed 为终态。

use serde::{Deserialize, Serialize};

use crate::core::session::Session;

/// 会话状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    AwaitingInput,
    Done,
    Failed,
}

impl SessionStatus {
    /// 状态机允许的迁移
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, next),
            (Running, Running)
                | (Running, AwaitingInput)
                | (Running, Done)
                | (Running, Failed)
                | (AwaitingInput, Running)
        )
    }
}

/// awaiting_input 的来源：显式澄清请求或协作式暂停
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AwaitReason {
    Clarification,
    Paused,
}

/// execute / resume 返回给调用方的结果投影
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SessionOutcome {
    Done {
        result: String,
        turns: usize,
    },
    AwaitingInput {
        question: String,
        reason: AwaitReason,
    },
    Failed {
        error: String,
        turns: usize,
    },
}

impl SessionOutcome {
    /// 将会话投影为调用方可见的结果；running 状态不应出现在循环退出之后，按失败处理
    pub fn project(session: &Session) -> Self {
        match session.status {
            SessionStatus::Done => SessionOutcome::Done {
                result: session.final_result.clone().unwrap_or_default(),
                turns: session.current_turn,
            },
            SessionStatus::AwaitingInput => SessionOutcome::AwaitingInput {
                question: session.pending_question.clone().unwrap_or_default(),
                reason: session.await_reason.unwrap_or(AwaitReason::Clarification),
            },
            SessionStatus::Failed => SessionOutcome::Failed {
                error: session
                    .error
                    .clone()
                    .unwrap_or_else(|| "Session failed".to_string()),
                turns: session.current_turn,
            },
            SessionStatus::Running => SessionOutcome::Failed {
                error: "Loop exited while session was still running".to_string(),
                turns: session.current_turn,
            },
        }
    }

    pub fn status(&self) -> SessionStatus {
        match self {
            SessionOutcome::Done { .. } => SessionStatus::Done,
            SessionOutcome::AwaitingInput { .. } => SessionStatus::AwaitingInput,
            SessionOutcome::Failed { .. } => SessionStatus::Failed,
        }
    }
}
