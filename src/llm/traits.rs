//! 推理后端抽象
//!
//! 后端视为黑盒请求/响应契约：chat(messages, options) -> { text?, action_invocations? }。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::session::ActionInvocation;
use crate::memory::Message;

/// 向后端声明的单个能力（id、描述、参数 JSON Schema）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilitySpec {
    pub id: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// 单次调用选项：可声明能力列表，并可将输出约束为命名的响应形态
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChatOptions {
    pub capabilities: Vec<CapabilitySpec>,
    pub response_shape: Option<String>,
}

impl ChatOptions {
    pub fn with_capabilities(capabilities: Vec<CapabilitySpec>) -> Self {
        Self {
            capabilities,
            response_shape: None,
        }
    }

    pub fn with_response_shape(mut self, shape: impl Into<String>) -> Self {
        self.response_shape = Some(shape.into());
        self
    }
}

/// 后端回复：可选文本与可选的结构化动作调用列表
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatReply {
    pub text: Option<String>,
    #[serde(default)]
    pub action_invocations: Vec<ActionInvocation>,
}

impl ChatReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            action_invocations: Vec::new(),
        }
    }

    pub fn invocations(invocations: Vec<ActionInvocation>) -> Self {
        Self {
            text: None,
            action_invocations: invocations,
        }
    }

    /// 既无文本也无动作调用的退化响应
    pub fn empty() -> Self {
        Self::default()
    }
}

/// 后端调用错误（对循环而言是致命错误）
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("Rate limited, retry after {retry_after_ms} ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),
}

/// 推理后端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn chat(&self, messages: &[Message], options: &ChatOptions)
        -> Result<ChatReply, LlmError>;
}
