//! LLM 层：推理后端契约与 Mock 实现

pub mod mock;
pub mod traits;

pub use mock::{MockLlmClient, RecordedCall};
pub use traits::{CapabilitySpec, ChatOptions, ChatReply, LlmClient, LlmError};
