//! 上下文窗口构建
//!
//! 会话状态 → 有序消息列表的纯函数（同一会话调用两次结果相同）：
//! system（任务相关、随模式变化）→ 原始任务 → 可选的预检知识与确认 → 更早轮次的单条摘要
//! → 最近 N 轮的逐字记录（按预算截断）；用户回复按其紧随的轮次插入。

use crate::config::AppConfig;
use crate::core::session::{Session, Turn};
use crate::llm::CapabilitySpec;
use crate::memory::Message;
use crate::react::prompts::{self, SystemPromptInput, PREFLIGHT_ACK};

/// 保留头部截断的标记
pub const TRUNCATION_MARKER: &str = "\n...[truncated]";
/// 保留头尾截断的中间省略标记
pub const ELISION_MARKER: &str = "\n...[middle elided]...\n";

/// 超过 cap 个字符时保留开头，追加截断标记；否则原样返回
pub fn truncate_head(text: &str, cap: usize) -> String {
    if text.chars().count() <= cap {
        return text.to_string();
    }
    let head: String = text.chars().take(cap).collect();
    format!("{}{}", head, TRUNCATION_MARKER)
}

/// 超过 cap 个字符时保留开头与结尾、省略中间；否则原样返回
pub fn truncate_head_tail(text: &str, cap: usize) -> String {
    let len = text.chars().count();
    if len <= cap {
        return text.to_string();
    }
    let head_len = cap / 2;
    let tail_len = cap - head_len;
    let head: String = text.chars().take(head_len).collect();
    let tail: String = text.chars().skip(len - tail_len).collect();
    format!("{}{}{}", head, ELISION_MARKER, tail)
}

/// 压缩为单行（合并空白），超过 cap 个字符时截断并加省略号
pub fn compact_line(text: &str, cap: usize) -> String {
    let line = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if line.chars().count() <= cap {
        return line;
    }
    let head: String = line.chars().take(cap).collect();
    format!("{}...", head)
}

/// 上下文窗口构建器：持有配置与向后端声明的能力列表
pub struct ContextBuilder<'a> {
    config: &'a AppConfig,
    capabilities: &'a [CapabilitySpec],
}

impl<'a> ContextBuilder<'a> {
    pub fn new(config: &'a AppConfig, capabilities: &'a [CapabilitySpec]) -> Self {
        Self {
            config,
            capabilities,
        }
    }

    /// 构建本轮发送给后端的消息列表
    pub fn build(&self, session: &Session) -> Vec<Message> {
        let policy = &self.config.context;
        let protocol = &self.config.protocol;

        let system = prompts::system_prompt(&SystemPromptInput {
            query: &session.query,
            working_dir: &session.working_dir,
            capabilities: self.capabilities,
            plan: session.plan.as_ref(),
            completion_marker: &self.config.engine.completion_marker,
            clarification_capability: &protocol.clarification_capability,
            plan_capability: &protocol.plan_capability,
        });

        let mut messages = vec![Message::system(system), Message::user(session.query.clone())];

        if let Some(knowledge) = session.preflight.as_deref().filter(|k| !k.trim().is_empty()) {
            messages.push(Message::user(format!(
                "Project knowledge gathered before starting:\n{}",
                knowledge
            )));
            messages.push(Message::assistant(PREFLIGHT_ACK));
        }

        push_replies_where(&mut messages, session, |after| after.is_none());

        let split = session.turns.len().saturating_sub(policy.recent_turns);
        let (older, recent) = session.turns.split_at(split);

        if !older.is_empty() {
            messages.push(Message::user(self.summarize(older)));
            push_replies_where(&mut messages, session, |after| {
                matches!(after, Some(t) if t < split)
            });
        }

        for (offset, turn) in recent.iter().enumerate() {
            let index = split + offset;
            messages.push(Message::assistant(render_thought(turn, policy.recent_result_chars)));
            messages.push(Message::user(self.render_results(turn)));
            push_replies_where(&mut messages, session, |after| after == Some(index));
        }

        messages
    }

    /// 更早轮次的摘要：每轮一行（能力名、单行参数标签、单行结果预览），整体受字符预算限制
    fn summarize(&self, turns: &[Turn]) -> String {
        let policy = &self.config.context;
        let mut summary = String::from("[Earlier progress] Condensed record of older turns:\n");
        for (i, turn) in turns.iter().enumerate() {
            let line = if turn.has_invocations() {
                turn.action_invocations
                    .iter()
                    .map(|inv| {
                        let label =
                            compact_line(&inv.arguments.to_string(), policy.arg_label_chars);
                        let outcome = match turn.result_for(&inv.id) {
                            Some(r) => format!(
                                "{} {}",
                                if r.success { "ok" } else { "error" },
                                compact_line(&r.content, policy.older_result_chars)
                            ),
                            None => "no result".to_string(),
                        };
                        format!("{}({}) -> {}", inv.capability, label, outcome)
                    })
                    .collect::<Vec<_>>()
                    .join("; ")
            } else {
                format!(
                    "no actions; {}",
                    compact_line(&turn.thought, policy.older_result_chars)
                )
            };
            summary.push_str(&format!("Turn {}: {}\n", i + 1, line));
        }
        truncate_head(&summary, policy.summary_chars)
    }

    /// 最近轮次的结果消息；读类能力保留头尾，其它保留头部
    fn render_results(&self, turn: &Turn) -> String {
        if !turn.has_invocations() {
            return format!(
                "No capability was invoked. Continue with the task, or reply with {} when it is done.",
                self.config.engine.completion_marker
            );
        }
        let cap = self.config.context.recent_result_chars;
        let mut out = String::from("Results:\n");
        for inv in &turn.action_invocations {
            let body = match turn.result_for(&inv.id) {
                Some(r) if self.config.protocol.is_read_capability(&inv.capability) => {
                    truncate_head_tail(&r.content, cap)
                }
                Some(r) => truncate_head(&r.content, cap),
                None => "(no result)".to_string(),
            };
            let status = match turn.result_for(&inv.id) {
                Some(r) if r.success => "ok",
                Some(_) => "error",
                None => "skipped",
            };
            out.push_str(&format!("[{}] {} ({}):\n{}\n", inv.id, inv.capability, status, body));
        }
        out
    }
}

fn render_thought(turn: &Turn, args_cap: usize) -> String {
    let mut out = turn.thought.trim().to_string();
    for inv in &turn.action_invocations {
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(&format!(
            "Invoked {} [{}] with {}",
            inv.capability,
            inv.id,
            truncate_head(&inv.arguments.to_string(), args_cap)
        ));
    }
    out
}

fn push_replies_where(
    messages: &mut Vec<Message>,
    session: &Session,
    keep: impl Fn(Option<usize>) -> bool,
) {
    for reply in session.user_messages.iter().filter(|m| keep(m.after_turn)) {
        messages.push(Message::user(reply.content.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::session::{ActionInvocation, ActionResult, Plan};
    use crate::memory::Role;
    use chrono::Utc;
    use serde_json::json;

    fn turn(i: usize, capability: &str, content: &str) -> Turn {
        let id = format!("call-{i}");
        Turn {
            thought: format!("thinking {i}"),
            action_invocations: vec![ActionInvocation::new(
                &id,
                capability,
                json!({"path": format!("f{i}.rs")}),
            )],
            action_results: vec![ActionResult::ok(&id, content)],
            timestamp: Utc::now(),
            bootstrap: false,
        }
    }

    fn session_with_turns(n: usize) -> Session {
        let mut session = Session::new("fix the build", "/repo", 0);
        for i in 0..n {
            session.push_turn(turn(i, "read_file", &format!("content {i}")));
        }
        session
    }

    #[test]
    fn test_truncate_head_law() {
        assert_eq!(truncate_head("short", 10), "short");
        let out = truncate_head(&"a".repeat(100), 10);
        assert!(out.chars().count() <= 10 + TRUNCATION_MARKER.chars().count());
        assert!(out.starts_with("aaaaaaaaaa"));
    }

    #[test]
    fn test_truncate_head_tail_keeps_both_ends() {
        let text = format!("BEGIN{}END", "x".repeat(1000));
        let out = truncate_head_tail(&text, 20);
        assert!(out.starts_with("BEGIN"));
        assert!(out.ends_with("END"));
        assert!(out.chars().count() <= 20 + ELISION_MARKER.chars().count());
        assert_eq!(truncate_head_tail("tiny", 20), "tiny");
    }

    #[test]
    fn test_compact_line() {
        assert_eq!(compact_line("a\n  b\tc", 80), "a b c");
        assert_eq!(compact_line("abcdef", 3), "abc...");
    }

    #[test]
    fn test_build_is_pure() {
        let config = AppConfig::default();
        let session = session_with_turns(5);
        let builder = ContextBuilder::new(&config, &[]);
        assert_eq!(builder.build(&session), builder.build(&session));
    }

    #[test]
    fn test_recent_turns_verbatim_older_summarized() {
        let config = AppConfig::default();
        let session = session_with_turns(5);
        let messages = ContextBuilder::new(&config, &[]).build(&session);
        // system, query, summary, 2 × (assistant + results)
        assert_eq!(messages.len(), 7);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[1].content, "fix the build");
        let summary = &messages[2].content;
        assert!(summary.contains("Turn 1: read_file("));
        assert!(summary.contains("Turn 3:"));
        assert!(!summary.contains("Turn 4:"));
        assert!(messages[3].content.contains("thinking 3"));
        assert!(messages[6].content.contains("content 4"));
    }

    #[test]
    fn test_user_replies_interleaved_by_turn() {
        let config = AppConfig::default();
        let mut session = session_with_turns(0);
        session.push_user_message("early reply");
        session.push_turn(turn(0, "read_file", "a"));
        session.push_turn(turn(1, "read_file", "b"));
        session.push_user_message("React");
        session.push_turn(turn(2, "read_file", "c"));
        session.push_turn(turn(3, "read_file", "d"));

        let messages = ContextBuilder::new(&config, &[]).build(&session);
        let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
        let early = contents.iter().position(|c| *c == "early reply").unwrap();
        let react = contents.iter().position(|c| *c == "React").unwrap();
        assert_eq!(early, 2);
        // 回复紧随第 2 轮（已被摘要）之后，位于摘要之后、最近轮次之前
        assert!(contents[react - 1].starts_with("[Earlier progress]"));
        assert!(contents[react + 1].contains("thinking 2"));
    }

    #[test]
    fn test_recent_result_truncation_by_capability() {
        let config = AppConfig::default();
        let mut session = Session::new("q", "/repo", 0);
        let big = format!("HEAD{}TAIL", "z".repeat(10_000));
        session.push_turn(turn(0, "read_file", &big));
        session.push_turn(turn(1, "run_command", &big));
        let messages = ContextBuilder::new(&config, &[]).build(&session);
        let read = &messages[3].content;
        let run = &messages[5].content;
        assert!(read.contains("HEAD") && read.contains("TAIL") && read.contains("middle elided"));
        assert!(run.contains("HEAD") && !run.contains("TAIL") && run.contains("[truncated]"));
    }

    #[test]
    fn test_summary_is_capped() {
        let mut config = AppConfig::default();
        config.context.summary_chars = 200;
        let session = session_with_turns(40);
        let messages = ContextBuilder::new(&config, &[]).build(&session);
        let summary = &messages[2].content;
        assert!(summary.chars().count() <= 200 + TRUNCATION_MARKER.chars().count());
        assert!(summary.ends_with("[truncated]"));
    }

    #[test]
    fn test_preflight_and_plan_mode() {
        let config = AppConfig::default();
        let mut session = session_with_turns(0);
        session.preflight = Some("Uses cargo workspaces.".into());
        session.plan = Some(Plan::new("ship", vec!["build".into(), "test".into()]));
        let messages = ContextBuilder::new(&config, &[]).build(&session);
        assert!(messages[0].content.contains("Plan (advisory)"));
        assert!(messages[2].content.contains("Uses cargo workspaces."));
        assert_eq!(messages[3].role, Role::Assistant);
    }
}
