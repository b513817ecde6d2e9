//! 消息模型：发往推理后端的单条消息
//!
//! 上下文窗口是会话状态的派生视图（见 react::context），这里只定义消息本身，不再持有可变的对话缓冲区。

use serde::{Deserialize, Serialize};

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// 内容字符数（按 char 计，非字节）
    pub fn char_len(&self) -> usize {
        self.content.chars().count()
    }
}

/// 消息列表总字符数，用于 token 估算与「恢复策略是否产生变化」的判定
pub fn total_chars(messages: &[Message]) -> usize {
    messages.iter().map(Message::char_len).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_char_len_counts_chars_not_bytes() {
        let msg = Message::user("héllo 世界");
        assert_eq!(msg.char_len(), 8);
    }

    #[test]
    fn test_total_chars() {
        let messages = vec![Message::system("abc"), Message::user("de")];
        assert_eq!(total_chars(&messages), 5);
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let json = serde_json::to_string(&Message::assistant("x")).unwrap();
        assert!(json.contains("\"assistant\""));
    }
}
