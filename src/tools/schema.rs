//! 保留能力的参数 Schema（schemars 自动生成）
//!
//! 「请求澄清」与「声明计划」两个保留能力不走通用分发，但同样向后端声明并经过参数校验。

use schemars::{schema_for, JsonSchema};
use serde::Deserialize;

use crate::config::ProtocolSection;
use crate::llm::CapabilitySpec;

/// 请求澄清：暂停会话并向用户提问
#[derive(Debug, Clone, PartialEq, Deserialize, JsonSchema)]
pub struct ClarificationArgs {
    /// 向用户提出的问题
    pub question: String,
}

/// 声明建议性计划
#[derive(Debug, Clone, PartialEq, Deserialize, JsonSchema)]
pub struct PlanArgs {
    /// 任务目标
    pub goal: String,
    /// 有序步骤
    pub steps: Vec<String>,
}

/// 将类型的 JSON Schema 转为 serde_json::Value
pub fn schema_value<T: JsonSchema>() -> serde_json::Value {
    serde_json::to_value(schema_for!(T)).unwrap_or_else(|_| serde_json::json!({"type": "object"}))
}

/// 保留能力的声明（追加在外部注册能力之后）
pub fn reserved_specs(protocol: &ProtocolSection) -> Vec<CapabilitySpec> {
    vec![
        CapabilitySpec {
            id: protocol.clarification_capability.clone(),
            description: "Ask the user a clarifying question. Use only when the task cannot proceed without their answer.".to_string(),
            parameters: schema_value::<ClarificationArgs>(),
        },
        CapabilitySpec {
            id: protocol.plan_capability.clone(),
            description: "Declare an advisory plan: a goal and ordered steps. The plan never blocks progress.".to_string(),
            parameters: schema_value::<PlanArgs>(),
        },
    ]
}
