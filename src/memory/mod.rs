//! 消息层：后端消息模型与 token 估算

pub mod conversation;
pub mod token_budget;

pub use conversation::{total_chars, Message, Role};
pub use token_budget::{TokenEstimator, CHARS_PER_TOKEN};
