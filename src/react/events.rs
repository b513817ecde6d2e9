//! 生命周期事件：通过注入的 EventSink 上报状态变化与能力调用
//!
//! 事件只做附加通知，从不参与控制流；sink 返回的错误或 panic 都会被吞掉。

use std::panic::{catch_unwind, AssertUnwindSafe};

use serde::Serialize;
use tokio::sync::mpsc;

/// 事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopEventKind {
    /// 新会话开始
    Start,
    /// 暂停或澄清后恢复
    Resume,
    /// 正在调用后端思考
    Thinking,
    /// 开始执行一次动作调用
    ActionStart,
    /// 动作调用结果（预览）
    ActionResult,
    /// 会话进入 awaiting_input
    AwaitingInput,
    /// 会话结束（done 或 failed）
    Done,
    /// 退化响应、恢复、预检失败等异常
    Distress,
}

/// 严重级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// 单个事件（可序列化为 JSON 供前端展示）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoopEvent {
    pub kind: LoopEventKind,
    pub message: String,
    /// 已截断的详情
    pub detail: Option<String>,
    pub severity: Severity,
}

impl LoopEvent {
    pub fn new(kind: LoopEventKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            detail: None,
            severity: Severity::Info,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>, max_chars: usize) -> Self {
        self.detail = Some(preview(&detail.into(), max_chars));
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }
}

/// 截断为单行预览
fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        let head: String = text.chars().take(max_chars).collect();
        format!("{}...", head)
    } else {
        text.to_string()
    }
}

/// 事件接收端
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &LoopEvent) -> anyhow::Result<()>;
}

/// 丢弃所有事件
#[derive(Debug, Default)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn emit(&self, _event: &LoopEvent) -> anyhow::Result<()> {
        Ok(())
    }
}

/// 转发到 tokio 无界通道（如 Web / TUI 前端）
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<LoopEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<LoopEvent>) -> Self {
        Self { tx }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<LoopEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: &LoopEvent) -> anyhow::Result<()> {
        self.tx
            .send(event.clone())
            .map_err(|_| anyhow::anyhow!("event receiver dropped"))
    }
}

/// 发送事件；sink 出错或 panic 只记 debug 日志
pub fn send_event(sink: &dyn EventSink, event: LoopEvent) {
    match catch_unwind(AssertUnwindSafe(|| sink.emit(&event))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::debug!(error = %e, kind = ?event.kind, "event sink failed"),
        Err(_) => tracing::debug!(kind = ?event.kind, "event sink panicked"),
    }
}
