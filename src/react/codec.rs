//! 动作协议编解码
//!
//! 主通道：后端回复直接携带结构化的动作调用列表。
//! 回退通道：结构化列表为空而文本非空时，从文本中抽取 `<tool_call>` 标签、```json 代码块、
//! 或裸 JSON 对象形式的调用，并从展示用的 thought 中剥离。
//! 仍无调用时，在首轮或恢复周期之后合成一个只读的项目探测调用（bootstrap）。

use std::ops::Range;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::{json, Map, Value};

use crate::config::ProtocolSection;
use crate::core::session::ActionInvocation;
use crate::llm::ChatReply;

/// 解码时需要的会话上下文
pub struct DecodeContext<'a> {
    pub protocol: &'a ProtocolSection,
    pub completion_marker: &'a str,
    /// 会话尚无任何轮次
    pub first_turn: bool,
    /// 上一次迭代应用了恢复策略
    pub after_recovery: bool,
    /// 探测能力已注册
    pub bootstrap_available: bool,
}

/// 解码结果
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedReply {
    pub thought: String,
    pub invocations: Vec<ActionInvocation>,
    /// 调用是否为合成的探测调用
    pub bootstrap: bool,
    /// 既无文本也无调用
    pub degenerate: bool,
}

/// 解码一次后端回复
pub fn decode(reply: &ChatReply, ctx: &DecodeContext<'_>) -> DecodedReply {
    let text = reply.text.as_deref().unwrap_or("").trim();

    let (thought, mut invocations) = if !reply.action_invocations.is_empty() {
        let invocations = reply
            .action_invocations
            .iter()
            .cloned()
            .map(|mut inv| {
                if inv.id.trim().is_empty() {
                    inv.id = new_id("call");
                }
                inv
            })
            .collect();
        (text.to_string(), invocations)
    } else if !text.is_empty() {
        let (calls, stripped) = extract_embedded(text);
        if !calls.is_empty() {
            tracing::debug!(count = calls.len(), "extracted invocations from free text");
        }
        let invocations = calls
            .into_iter()
            .map(|(capability, args)| ActionInvocation::new(new_id("fallback"), capability, args))
            .collect();
        (stripped, invocations)
    } else {
        (String::new(), Vec::new())
    };

    let has_text = !thought.is_empty();
    let mut bootstrap = false;
    if invocations.is_empty()
        && ctx.bootstrap_available
        && !thought.contains(ctx.completion_marker)
        && (ctx.first_turn || (ctx.after_recovery && has_text))
    {
        tracing::debug!(
            capability = %ctx.protocol.bootstrap_capability,
            "no invocation in reply, synthesizing project probe"
        );
        invocations.push(ActionInvocation::new(
            new_id("bootstrap"),
            ctx.protocol.bootstrap_capability.clone(),
            ctx.protocol.bootstrap_args.clone(),
        ));
        bootstrap = true;
    }

    let degenerate = !has_text && invocations.is_empty();
    DecodedReply {
        thought,
        invocations,
        bootstrap,
        degenerate,
    }
}

fn new_id(prefix: &str) -> String {
    format!("{}-{}", prefix, uuid::Uuid::new_v4())
}

fn tool_call_tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<tool_call>(.*?)</tool_call>").expect("tool_call pattern"))
}

fn json_fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```(?:json|JSON)?[ \t]*\n(.*?)```").expect("fence pattern"))
}

/// 从自由文本中抽取调用，返回 (能力, 参数) 列表（按出现顺序）与剥离后的文本
fn extract_embedded(text: &str) -> (Vec<(String, Value)>, String) {
    let mut found: Vec<(usize, Vec<(String, Value)>)> = Vec::new();
    let mut spans: Vec<Range<usize>> = Vec::new();

    for re in [tool_call_tag_re(), json_fence_re()] {
        for caps in re.captures_iter(text) {
            let (Some(whole), Some(body)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            if overlaps(&spans, &whole.range()) {
                continue;
            }
            let calls = parse_calls(body.as_str().trim());
            if !calls.is_empty() {
                found.push((whole.start(), calls));
                spans.push(whole.range());
            }
        }
    }

    for range in json_object_spans(text) {
        if overlaps(&spans, &range) {
            continue;
        }
        let calls = parse_calls(&text[range.clone()]);
        if !calls.is_empty() {
            found.push((range.start, calls));
            spans.push(range);
        }
    }

    found.sort_by_key(|(start, _)| *start);
    spans.sort_by_key(|r| r.start);

    let mut stripped = String::with_capacity(text.len());
    let mut cursor = 0;
    for span in &spans {
        stripped.push_str(&text[cursor..span.start]);
        cursor = span.end;
    }
    stripped.push_str(&text[cursor..]);

    let calls = found.into_iter().flat_map(|(_, calls)| calls).collect();
    (calls, tidy(&stripped))
}

fn overlaps(spans: &[Range<usize>], range: &Range<usize>) -> bool {
    spans
        .iter()
        .any(|s| s.start < range.end && range.start < s.end)
}

fn parse_calls(candidate: &str) -> Vec<(String, Value)> {
    let mut calls = Vec::new();
    if let Ok(value) = serde_json::from_str::<Value>(candidate) {
        collect_calls(&value, &mut calls);
    }
    calls
}

/// 识别 {"tool"/"capability": .., "args": ..} 与 {"name": .., "arguments": ..}，
/// 以及嵌套在 tool_call / function_call / function 下的形式；数组逐项识别
fn collect_calls(value: &Value, out: &mut Vec<(String, Value)>) {
    match value {
        Value::Object(obj) => {
            if let Some(call) = call_from_object(obj) {
                out.push(call);
                return;
            }
            for key in ["tool_call", "toolCall", "function_call", "functionCall", "function"] {
                if let Some(nested) = obj.get(key) {
                    let before = out.len();
                    collect_calls(nested, out);
                    if out.len() > before {
                        return;
                    }
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_calls(item, out);
            }
        }
        _ => {}
    }
}

fn call_from_object(obj: &Map<String, Value>) -> Option<(String, Value)> {
    let args_of = |obj: &Map<String, Value>| {
        ["args", "arguments", "parameters"]
            .iter()
            .find_map(|k| obj.get(*k))
            .cloned()
    };

    let (name, args) = if let Some(tool) = ["tool", "capability"]
        .iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_str))
    {
        (tool, args_of(obj).unwrap_or_else(|| json!({})))
    } else {
        // 只有 name 时要求带参数字段，避免把普通 JSON 数据误认成调用
        let name = obj.get("name").and_then(Value::as_str)?;
        (name, args_of(obj)?)
    };

    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    let args = match args {
        Value::String(raw) => serde_json::from_str(&raw).unwrap_or(Value::String(raw)),
        other => other,
    };
    Some((name.to_string(), args))
}

/// 所有顶层 JSON 对象的字节区间（感知字符串内的括号与转义）
fn json_object_spans(input: &str) -> Vec<Range<usize>> {
    let mut spans = Vec::new();
    let mut start = None;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (idx, ch) in input.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' if depth > 0 => in_string = true,
            '{' => {
                if depth == 0 {
                    start = Some(idx);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(begin) = start.take() {
                        spans.push(begin..idx + 1);
                    }
                }
            }
            _ => {}
        }
    }
    spans
}

/// 去掉剥离后留下的多余空行
fn tidy(text: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    for line in text.lines().map(str::trim_end) {
        if line.trim().is_empty() && out.last().map_or(true, |l| l.trim().is_empty()) {
            continue;
        }
        out.push(line);
    }
    out.join("\n").trim().to_string()
}
