//! Mock LLM 客户端（用于测试，无需 API）
//!
//! 按脚本依次返回预设回复并记录每次请求；脚本耗尽后返回带完成标记的文本，保证循环可以结束。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{ChatOptions, ChatReply, LlmClient, LlmError};
use crate::memory::Message;

/// 记录下来的一次请求
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub messages: Vec<Message>,
    pub options: ChatOptions,
}

/// 脚本化 Mock 客户端
#[derive(Debug, Default)]
pub struct MockLlmClient {
    script: Mutex<VecDeque<Result<ChatReply, LlmError>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_replies(replies: impl IntoIterator<Item = ChatReply>) -> Self {
        let client = Self::new();
        for reply in replies {
            client.push_reply(reply);
        }
        client
    }

    pub fn push_reply(&self, reply: ChatReply) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(Ok(reply));
        }
    }

    pub fn push_error(&self, err: LlmError) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(Err(err));
        }
    }

    /// 已记录的请求（按调用顺序）
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn chat(
        &self,
        messages: &[Message],
        options: &ChatOptions,
    ) -> Result<ChatReply, LlmError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCall {
                messages: messages.to_vec(),
                options: options.clone(),
            });
        }
        let next = self.script.lock().ok().and_then(|mut s| s.pop_front());
        next.unwrap_or_else(|| Ok(ChatReply::text("Script exhausted. TASK_COMPLETE")))
    }
}
