//! 退化响应诊断与恢复引擎
//!
//! 仅在后端返回「退化响应」（既无文本也无动作调用）时触发：
//! 先用决策表诊断原因并推荐策略，再按各策略的重试预算逐级升级，对消息列表做纯变换以缩小上下文。
//!
//! | 条件（自上而下首个命中）                         | 原因                  | 推荐策略               |
//! |--------------------------------------------------|-----------------------|------------------------|
//! | 连续退化 ≥ 4                                     | model-stuck           | emergency-mode         |
//! | 估算 token > token_threshold                     | context-too-large     | context-reduction      |
//! | 连续退化 ≥ 3                                     | model-stuck           | aggressive-truncation  |
//! | 消息条数 > long_conversation_messages            | conversation-too-long | history-truncation     |
//! | 最后一条为 user 且超过 tool_result_overload_chars | tool-result-overload  | context-reduction      |
//! | 其它                                             | model-error           | simplify-prompt        |

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::RecoverySection;
use crate::core::session::RecoveryState;
use crate::memory::{total_chars, Message, Role, TokenEstimator};
use crate::react::prompts;

/// 诊断出的失败原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureCause {
    ContextTooLarge,
    ModelStuck,
    ConversationTooLong,
    ToolResultOverload,
    ModelError,
}

impl FailureCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCause::ContextTooLarge => "context-too-large",
            FailureCause::ModelStuck => "model-stuck",
            FailureCause::ConversationTooLong => "conversation-too-long",
            FailureCause::ToolResultOverload => "tool-result-overload",
            FailureCause::ModelError => "model-error",
        }
    }
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 恢复策略名称（按升级顺序排列）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyName {
    ContextReduction,
    SimplifyPrompt,
    HistoryTruncation,
    AggressiveTruncation,
    EmergencyMode,
}

impl StrategyName {
    pub const ESCALATION: [StrategyName; 5] = [
        StrategyName::ContextReduction,
        StrategyName::SimplifyPrompt,
        StrategyName::HistoryTruncation,
        StrategyName::AggressiveTruncation,
        StrategyName::EmergencyMode,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyName::ContextReduction => "context-reduction",
            StrategyName::SimplifyPrompt => "simplify-prompt",
            StrategyName::HistoryTruncation => "history-truncation",
            StrategyName::AggressiveTruncation => "aggressive-truncation",
            StrategyName::EmergencyMode => "emergency-mode",
        }
    }

    fn rank(&self) -> usize {
        Self::ESCALATION
            .iter()
            .position(|s| s == self)
            .unwrap_or(Self::ESCALATION.len() - 1)
    }
}

impl fmt::Display for StrategyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 诊断结果
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnosis {
    pub cause: FailureCause,
    pub recommended: StrategyName,
    pub estimated_tokens: usize,
    pub message_count: usize,
    pub consecutive_empty: u32,
    pub last_role: Option<Role>,
}

/// 变换所需的会话信息（原始任务与完成标记）
#[derive(Debug, Clone)]
pub struct RecoveryInput<'a> {
    pub query: &'a str,
    pub completion_marker: &'a str,
}

/// 恢复策略：名称、重试预算、对消息列表的纯变换
#[derive(Clone, Copy)]
pub struct RecoveryStrategy {
    pub name: StrategyName,
    pub max_retries: u32,
    pub transform: fn(&[Message], &RecoveryInput<'_>) -> Vec<Message>,
}

impl fmt::Debug for RecoveryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecoveryStrategy")
            .field("name", &self.name)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

const CONTEXT_REDUCTION_KEEP: usize = 10;
const SIMPLIFY_PROMPT_KEEP: usize = 8;
/// history-truncation：保留最早 2 轮与最近 3 轮（每轮 assistant + user 两条）
const HISTORY_HEAD_MESSAGES: usize = 4;
const HISTORY_TAIL_MESSAGES: usize = 6;
/// aggressive-truncation：最近 2 轮
const AGGRESSIVE_KEEP: usize = 4;

/// 语义化恢复引擎：诊断退化响应并选择、应用恢复策略
#[derive(Debug)]
pub struct RecoveryEngine {
    config: RecoverySection,
    strategies: Vec<RecoveryStrategy>,
}

impl Default for RecoveryEngine {
    fn default() -> Self {
        Self::new(RecoverySection::default())
    }
}

impl RecoveryEngine {
    pub fn new(config: RecoverySection) -> Self {
        let strategies = vec![
            RecoveryStrategy {
                name: StrategyName::ContextReduction,
                max_retries: config.context_reduction_retries,
                transform: context_reduction,
            },
            RecoveryStrategy {
                name: StrategyName::SimplifyPrompt,
                max_retries: config.simplify_prompt_retries,
                transform: simplify_prompt,
            },
            RecoveryStrategy {
                name: StrategyName::HistoryTruncation,
                max_retries: config.history_truncation_retries,
                transform: history_truncation,
            },
            RecoveryStrategy {
                name: StrategyName::AggressiveTruncation,
                max_retries: config.aggressive_truncation_retries,
                transform: aggressive_truncation,
            },
            RecoveryStrategy {
                name: StrategyName::EmergencyMode,
                max_retries: config.emergency_mode_retries,
                transform: emergency_mode,
            },
        ];
        Self { config, strategies }
    }

    pub fn strategy(&self, name: StrategyName) -> &RecoveryStrategy {
        &self.strategies[name.rank()]
    }

    /// 决策表诊断（见模块文档）
    pub fn diagnose(&self, messages: &[Message], consecutive_empty: u32) -> Diagnosis {
        let estimated_tokens = TokenEstimator::estimate_messages(messages);
        let message_count = messages.len();
        let last = messages.last();
        let last_role = last.map(|m| m.role);
        let last_is_large_user = last
            .map(|m| m.role == Role::User && m.char_len() > self.config.tool_result_overload_chars)
            .unwrap_or(false);

        let (cause, recommended) = if consecutive_empty >= 4 {
            (FailureCause::ModelStuck, StrategyName::EmergencyMode)
        } else if estimated_tokens > self.config.token_threshold {
            (FailureCause::ContextTooLarge, StrategyName::ContextReduction)
        } else if consecutive_empty >= 3 {
            (FailureCause::ModelStuck, StrategyName::AggressiveTruncation)
        } else if message_count > self.config.long_conversation_messages {
            (FailureCause::ConversationTooLong, StrategyName::HistoryTruncation)
        } else if last_is_large_user {
            (FailureCause::ToolResultOverload, StrategyName::ContextReduction)
        } else {
            (FailureCause::ModelError, StrategyName::SimplifyPrompt)
        };

        Diagnosis {
            cause,
            recommended,
            estimated_tokens,
            message_count,
            consecutive_empty,
            last_role,
        }
    }

    /// 选择实际使用的策略：
    /// 1. 推荐策略预算用尽时，沿升级顺序找下一个仍有预算的策略（都用尽则 emergency-mode）
    /// 2. 若所选策略对当前消息列表无可测变化（条数与总字符数均不变），改用 simplify-prompt
    pub fn select(
        &self,
        diagnosis: &Diagnosis,
        messages: &[Message],
        input: &RecoveryInput<'_>,
        state: &RecoveryState,
    ) -> StrategyName {
        let chosen = StrategyName::ESCALATION[diagnosis.recommended.rank()..]
            .iter()
            .copied()
            .find(|name| state.attempts_for(*name) < self.strategy(*name).max_retries)
            .unwrap_or(StrategyName::EmergencyMode);

        if chosen != StrategyName::SimplifyPrompt
            && !produces_change(&self.apply(chosen, messages, input), messages)
        {
            tracing::debug!(
                strategy = %chosen,
                "recovery strategy produced no change, using simplify-prompt"
            );
            return StrategyName::SimplifyPrompt;
        }
        chosen
    }

    pub fn apply(
        &self,
        name: StrategyName,
        messages: &[Message],
        input: &RecoveryInput<'_>,
    ) -> Vec<Message> {
        (self.strategy(name).transform)(messages, input)
    }
}

fn produces_change(after: &[Message], before: &[Message]) -> bool {
    after.len() != before.len() || total_chars(after) != total_chars(before)
}

/// 拆出开头的 system 消息与其余消息
fn split_system(messages: &[Message]) -> (Option<&Message>, &[Message]) {
    match messages.split_first() {
        Some((first, rest)) if first.role == Role::System => (Some(first), rest),
        _ => (None, messages),
    }
}

fn last_n(messages: &[Message], n: usize) -> &[Message] {
    &messages[messages.len().saturating_sub(n)..]
}

/// context-reduction：system + 原始任务消息 + 最近 10 条
fn context_reduction(messages: &[Message], _input: &RecoveryInput<'_>) -> Vec<Message> {
    let (system, rest) = split_system(messages);
    let mut out: Vec<Message> = system.cloned().into_iter().collect();
    if let Some((query, tail)) = rest.split_first() {
        out.push(query.clone());
        out.extend_from_slice(last_n(tail, CONTEXT_REDUCTION_KEEP));
    }
    out
}

/// simplify-prompt：精简 system prompt + 最近 8 条
fn simplify_prompt(messages: &[Message], input: &RecoveryInput<'_>) -> Vec<Message> {
    let (_, rest) = split_system(messages);
    let mut out = vec![Message::system(prompts::reduced_system_prompt(
        input.query,
        input.completion_marker,
    ))];
    out.extend_from_slice(last_n(rest, SIMPLIFY_PROMPT_KEEP));
    out
}

/// history-truncation：最早 2 轮 + 「已移除 N 条」标记 + 最近 3 轮
fn history_truncation(messages: &[Message], _input: &RecoveryInput<'_>) -> Vec<Message> {
    let (system, rest) = split_system(messages);
    if rest.len() <= HISTORY_HEAD_MESSAGES + HISTORY_TAIL_MESSAGES {
        return messages.to_vec();
    }
    let removed = rest.len() - HISTORY_HEAD_MESSAGES - HISTORY_TAIL_MESSAGES;
    let mut out: Vec<Message> = system.cloned().into_iter().collect();
    out.extend_from_slice(&rest[..HISTORY_HEAD_MESSAGES]);
    out.push(Message::user(format!(
        "[{} messages removed from the middle of the conversation to recover from empty responses]",
        removed
    )));
    out.extend_from_slice(last_n(rest, HISTORY_TAIL_MESSAGES));
    out
}

/// aggressive-truncation：最小 system prompt + 最近 2 轮
fn aggressive_truncation(messages: &[Message], input: &RecoveryInput<'_>) -> Vec<Message> {
    let (_, rest) = split_system(messages);
    let mut out = vec![Message::system(prompts::minimal_system_prompt(input.query))];
    out.extend_from_slice(last_n(rest, AGGRESSIVE_KEEP));
    out
}

/// emergency-mode：最小 system prompt + 原始任务 + 强制行动提示，丢弃全部历史
fn emergency_mode(_messages: &[Message], input: &RecoveryInput<'_>) -> Vec<Message> {
    vec![
        Message::system(prompts::minimal_system_prompt(input.query)),
        Message::user(input.query.to_string()),
        Message::user(prompts::forced_action_notice(input.completion_marker)),
    ]
}
