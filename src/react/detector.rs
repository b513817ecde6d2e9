//! 完成 / 澄清判定
//!
//! 全部为作用于不可变轮次快照的纯谓词，循环只消费 evaluate 的结论。
//! 优先级：完成标记 > 计划最后一步的完成信号 > 澄清请求 > 连续空闲。

use std::sync::OnceLock;

use regex::Regex;

use crate::core::session::{Plan, Turn};

/// 单轮判定结果
#[derive(Debug, Clone, PartialEq)]
pub enum TurnVerdict {
    Complete { result: String },
    Clarify { question: String },
    Continue,
}

/// 连续多少个无调用的轮次视为空闲耗尽
pub const IDLE_TURNS: usize = 2;

fn step_done_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(step\s+(is\s+)?(now\s+)?(complete|completed|done|finished)|(completed|finished)\s+(this|the\s+current|the)\s+step|moving\s+on\s+to\s+the\s+next\s+step)\b",
        )
        .expect("step pattern")
    })
}

fn clarification_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(could you (please )?(clarify|specify|confirm|tell me)|please (clarify|specify|confirm|let me know)|do you want me to|would you like me to|which (one|option|approach) (do|would|should)|i need (more )?(information|details|clarification))\b",
        )
        .expect("clarification pattern")
    })
}

pub fn has_completion_marker(text: &str, marker: &str) -> bool {
    !marker.is_empty() && text.contains(marker)
}

/// 去掉完成标记后的最终结果
pub fn strip_completion_marker(text: &str, marker: &str) -> String {
    if marker.is_empty() {
        return text.trim().to_string();
    }
    text.replace(marker, "").trim().to_string()
}

/// 文本是否声明当前步骤已完成
pub fn signals_step_done(text: &str) -> bool {
    step_done_re().is_match(text)
}

/// 文本是否像在向用户提问
pub fn is_clarification_request(text: &str) -> bool {
    text.contains('?') || clarification_re().is_match(text)
}

/// 最近 IDLE_TURNS 个轮次都没有任何调用
pub fn is_idle_exhausted(turns: &[Turn]) -> bool {
    turns.len() >= IDLE_TURNS
        && turns[turns.len() - IDLE_TURNS..]
            .iter()
            .all(|t| !t.has_invocations())
}

/// 对最新一轮作出判定；plan 为本轮推进之前的计划状态
pub fn evaluate(turns: &[Turn], plan: Option<&Plan>, completion_marker: &str) -> TurnVerdict {
    let Some((current, earlier)) = turns.split_last() else {
        return TurnVerdict::Continue;
    };
    let thought = current.thought.trim();

    if has_completion_marker(thought, completion_marker) {
        return TurnVerdict::Complete {
            result: strip_completion_marker(thought, completion_marker),
        };
    }

    if plan.is_some_and(Plan::is_on_final_step) && signals_step_done(thought) {
        return TurnVerdict::Complete {
            result: thought.to_string(),
        };
    }

    // 探测调用刚执行过时后端还没见到真实结果，此时的提问不可信
    if !current.has_invocations()
        && !current.bootstrap
        && earlier.iter().any(Turn::has_invocations)
        && is_clarification_request(thought)
    {
        return TurnVerdict::Clarify {
            question: thought.to_string(),
        };
    }

    if is_idle_exhausted(turns) {
        return TurnVerdict::Complete {
            result: thought.to_string(),
        };
    }

    TurnVerdict::Continue
}

/// 完成信号推进计划步骤（封顶于最后一步），返回是否推进
pub fn advance_plan(plan: &mut Plan, thought: &str) -> bool {
    if !signals_step_done(thought) {
        return false;
    }
    let before = plan.current_step_index;
    plan.advance();
    plan.current_step_index != before
}
