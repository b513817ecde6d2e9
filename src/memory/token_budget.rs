//! Token 估算
//!
//! 只用于触发失败诊断（判断上下文是否过大），从不硬性限制请求大小。

use crate::memory::{total_chars, Message};

/// 平均每 token 字符数（粗略启发式）
pub const CHARS_PER_TOKEN: usize = 4;

/// Token 估算器（简单的字符计数近似）
pub struct TokenEstimator;

impl TokenEstimator {
    /// 估算文本的 token 数量：约 4 字符/token，向上取整
    pub fn estimate(text: &str) -> usize {
        Self::from_chars(text.chars().count())
    }

    /// 估算整个消息列表的 token 数量
    pub fn estimate_messages(messages: &[Message]) -> usize {
        Self::from_chars(total_chars(messages))
    }

    fn from_chars(chars: usize) -> usize {
        chars.div_ceil(CHARS_PER_TOKEN)
    }
}
