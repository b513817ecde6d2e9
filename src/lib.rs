//! Forage - 回合制任务执行引擎
//!
//! 驱动推理后端反复执行「思考 → 行动 → 观察」直到完成开放式编码任务。
//!
//! 模块划分：
//! - **config**: 配置加载（TOML + 环境变量）
//! - **core**: 会话与状态、错误、退化响应诊断与恢复、知识预检、暂停监管、编排器
//! - **llm**: 推理后端契约与脚本化 Mock
//! - **memory**: 消息模型与 token 估算
//! - **observability**: tracing 初始化
//! - **react**: 回合主循环、动作协议编解码、上下文窗口、完成 / 澄清判定、生命周期事件
//! - **tools**: 能力注册、执行（超时 + 审计）、保留能力 schema 与参数校验

pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod react;
pub mod tools;

pub use crate::config::{load_config, AppConfig};
pub use crate::core::{AgentError, Orchestrator, SessionOutcome, SessionStatus, SessionSupervisor};
