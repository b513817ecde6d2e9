//! 能力执行器
//!
//! 持有 CapabilityRegistry 与全局超时，execute(id, args) 在超时内调用能力，
//! 超时或失败时转为 AgentError（CapabilityTimeout / CapabilityFailed）；每次调用输出结构化审计日志（JSON）。

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::timeout;

use crate::core::AgentError;
use crate::tools::{Capability, CapabilityRegistry};

/// 能力执行器：对每次调用施加超时，并将结果映射为 AgentError
pub struct CapabilityExecutor {
    registry: CapabilityRegistry,
    timeout: Duration,
}

impl CapabilityExecutor {
    pub fn new(registry: CapabilityRegistry, timeout_secs: u64) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    /// 执行指定能力；未注册返回 UnknownCapability，超时返回 CapabilityTimeout，
    /// 能力返回 Err 则转为 CapabilityFailed；输出 JSON 审计日志
    pub async fn execute(&self, id: &str, args: serde_json::Value) -> Result<String, AgentError> {
        let capability = self
            .registry
            .get(id)
            .ok_or_else(|| AgentError::UnknownCapability(id.to_string()))?;

        let start = Instant::now();
        let args_preview = args_preview(&args);
        let result = timeout(self.timeout, capability.execute(args)).await;

        let (ok, outcome): (bool, &str) = match &result {
            Ok(Ok(_)) => (true, "ok"),
            Ok(Err(_)) => (false, "error"),
            Err(_) => (false, "timeout"),
        };
        let duration_ms = start.elapsed().as_millis() as u64;
        let audit = serde_json::json!({
            "event": "capability_audit",
            "capability": id,
            "ok": ok,
            "outcome": outcome,
            "duration_ms": duration_ms,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "capability");

        match result {
            Ok(Ok(content)) => Ok(content),
            Ok(Err(e)) => Err(AgentError::CapabilityFailed(e)),
            Err(_) => Err(AgentError::CapabilityTimeout(id.to_string())),
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Capability>> {
        self.registry.get(id)
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    pub fn ids(&self) -> Vec<String> {
        self.registry.ids()
    }
}

fn args_preview(args: &serde_json::Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
