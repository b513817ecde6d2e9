//! 知识预检（两阶段）
//!
//! 阶段一：依次运行已注册的 DiscoveryAgent（外部的项目发现子代理），收集发现；
//! 阶段二：请后端在不提供任何能力、响应形态为 knowledge_summary 的条件下综合为一段知识。
//! 综合为空或失败时退回到截断后的拼接结果。预检失败从不使会话失败，只发出 warning 事件。

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::llm::{ChatOptions, LlmClient};
use crate::memory::Message;
use crate::react::context::truncate_head;
use crate::react::events::{send_event, EventSink, LoopEvent, LoopEventKind, Severity};
use crate::react::prompts;

/// 预检综合时要求的响应形态
pub const KNOWLEDGE_RESPONSE_SHAPE: &str = "knowledge_summary";

/// 项目发现子代理
#[async_trait]
pub trait DiscoveryAgent: Send + Sync {
    fn name(&self) -> &str;

    /// 返回与任务相关的发现；空字符串表示无发现
    async fn discover(&self, query: &str, working_dir: &Path) -> Result<String, String>;
}

/// 预检执行器
#[derive(Default)]
pub struct Preflight {
    agents: Vec<Arc<dyn DiscoveryAgent>>,
    /// 拼接回退结果的字符上限
    max_chars: usize,
}

impl Preflight {
    pub fn new(max_chars: usize) -> Self {
        Self {
            agents: Vec::new(),
            max_chars,
        }
    }

    pub fn add_agent(&mut self, agent: Arc<dyn DiscoveryAgent>) {
        self.agents.push(agent);
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// 运行两阶段预检，返回知识块（无发现时为 None）
    pub async fn run(
        &self,
        backend: &dyn LlmClient,
        query: &str,
        working_dir: &Path,
        sink: &dyn EventSink,
        detail_chars: usize,
    ) -> Option<String> {
        let mut findings: Vec<(String, String)> = Vec::new();
        for agent in &self.agents {
            match agent.discover(query, working_dir).await {
                Ok(found) if !found.trim().is_empty() => {
                    tracing::debug!(
                        agent = agent.name(),
                        chars = found.len(),
                        "discovery finished"
                    );
                    findings.push((agent.name().to_string(), found));
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(agent = agent.name(), error = %e, "discovery agent failed");
                    warn_event(
                        sink,
                        format!("Discovery agent {} failed", agent.name()),
                        e,
                        detail_chars,
                    );
                }
            }
        }
        if findings.is_empty() {
            return None;
        }

        let messages = vec![Message::user(prompts::synthesis_prompt(query, &findings))];
        let options = ChatOptions::default().with_response_shape(KNOWLEDGE_RESPONSE_SHAPE);
        match backend.chat(&messages, &options).await {
            Ok(reply) => {
                if let Some(text) = reply.text.filter(|t| !t.trim().is_empty()) {
                    tracing::info!(
                        agents = findings.len(),
                        chars = text.len(),
                        "preflight synthesized"
                    );
                    return Some(text.trim().to_string());
                }
                tracing::debug!("preflight synthesis empty, using raw findings");
            }
            Err(e) => {
                tracing::warn!(error = %e, "preflight synthesis failed");
                warn_event(
                    sink,
                    "Preflight synthesis failed".to_string(),
                    e.to_string(),
                    detail_chars,
                );
            }
        }
        Some(self.concatenate(&findings))
    }

    fn concatenate(&self, findings: &[(String, String)]) -> String {
        let joined = findings
            .iter()
            .map(|(agent, found)| format!("## {}\n{}", agent, found.trim()))
            .collect::<Vec<_>>()
            .join("\n\n");
        truncate_head(&joined, self.max_chars)
    }
}

fn warn_event(sink: &dyn EventSink, message: String, detail: String, detail_chars: usize) {
    send_event(
        sink,
        LoopEvent::new(LoopEventKind::Distress, message)
            .with_detail(detail, detail_chars)
            .with_severity(Severity::Warning),
    );
}
