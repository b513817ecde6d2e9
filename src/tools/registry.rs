//! 能力注册表
//!
//! 所有外部能力实现 Capability trait（id / description / parameters_schema / execute），
//! 由 CapabilityRegistry 按 id 注册与查找；核心只通过 id 查找发现能力，自身不实现任何能力。

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::llm::CapabilitySpec;

/// 能力 trait：id、描述（供后端理解）、参数 schema、异步执行（args 为 JSON）
#[async_trait]
pub trait Capability: Send + Sync {
    /// 能力 id（动作调用中的 capability 字段）
    fn id(&self) -> &str;

    /// 能力描述
    fn description(&self) -> &str;

    /// 参数 JSON Schema：properties 声明字段与类型，required 声明必填字段。
    /// 默认返回空对象，表示无参数
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    /// 执行能力
    async fn execute(&self, args: Value) -> Result<String, String>;
}

/// 能力注册表：按 id 有序存储（保证向后端声明的顺序稳定）
#[derive(Default)]
pub struct CapabilityRegistry {
    capabilities: BTreeMap<String, Arc<dyn Capability>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, capability: impl Capability + 'static) {
        self.register_arc(Arc::new(capability));
    }

    pub fn register_arc(&mut self, capability: Arc<dyn Capability>) {
        let id = capability.id().to_string();
        self.capabilities.insert(id, capability);
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Capability>> {
        self.capabilities.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.capabilities.contains_key(id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.capabilities.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }

    /// 向后端声明的能力列表
    pub fn specs(&self) -> Vec<CapabilitySpec> {
        self.capabilities
            .iter()
            .map(|(id, cap)| CapabilitySpec {
                id: id.clone(),
                description: cap.description().to_string(),
                parameters: cap.parameters_schema(),
            })
            .collect()
    }
}
