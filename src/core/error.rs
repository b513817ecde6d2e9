//! Agent 错误类型
//!
//! 能力调用错误与参数校验错误留在回合内（转为合成错误结果）；退化响应由恢复引擎处理；
//! 只有恢复耗尽或编排过程中的其它错误才会使会话失败并返回给调用方。

use thiserror::Error;

use crate::core::recovery::FailureCause;
use crate::llm::LlmError;

/// 循环运行过程中可能出现的错误
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Backend error: {0}")]
    Backend(#[from] LlmError),

    #[error("Capability execution failed: {0}")]
    CapabilityFailed(String),

    #[error("Capability timeout: {0}")]
    CapabilityTimeout(String),

    #[error("Unknown capability: {0}")]
    UnknownCapability(String),

    #[error("No session is awaiting input")]
    NoPendingSession,

    #[error("Turn budget exhausted: reached the limit of {limit} turns without completing the task")]
    TurnBudgetExhausted { limit: usize },

    #[error("Recovery abandoned after {count} consecutive empty responses (last diagnosis: {cause})")]
    RecoveryExhausted { count: u32, cause: FailureCause },

    #[error("Config error: {0}")]
    ConfigError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recovery_exhausted_names_cause() {
        let err = AgentError::RecoveryExhausted {
            count: 5,
            cause: FailureCause::ContextTooLarge,
        };
        let text = err.to_string();
        assert!(text.contains("5 consecutive"));
        assert!(text.contains("context-too-large"));
    }

    #[test]
    fn test_backend_error_converts() {
        let err: AgentError = LlmError::RateLimited { retry_after_ms: 1000 }.into();
        assert!(matches!(err, AgentError::Backend(_)));
    }
}
