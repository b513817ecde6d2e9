//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `FORAGE__*` 覆盖（双下划线表示嵌套，如 `FORAGE__ENGINE__MAX_TURNS=40`）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::core::AgentError;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineSection,
    pub context: ContextSection,
    pub recovery: RecoverySection,
    pub protocol: ProtocolSection,
}

impl AppConfig {
    /// 校验加载后无法表达的约束
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.engine.max_consecutive_empty == 0 {
            return Err(AgentError::ConfigError(
                "engine.max_consecutive_empty must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// [engine] 段：回合上限、完成标记、退化响应上限、能力超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    /// 工作目录，未设置时用当前目录
    pub working_dir: Option<PathBuf>,
    /// 回合上限，0 表示不限
    pub max_turns: usize,
    /// 自由文本中出现即判定任务完成
    pub completion_marker: String,
    /// 连续退化响应达到该次数后放弃恢复
    pub max_consecutive_empty: u32,
    /// 单次能力调用超时（秒）
    pub capability_timeout_secs: u64,
    /// 生命周期事件 detail 的最大字符数
    pub event_detail_chars: usize,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            working_dir: None,
            max_turns: 0,
            completion_marker: "TASK_COMPLETE".to_string(),
            max_consecutive_empty: 5,
            capability_timeout_secs: 60,
            event_detail_chars: 200,
        }
    }
}

/// [context] 段：上下文窗口保留策略与字符预算
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ContextSection {
    /// 完整保留的最近轮数
    pub recent_turns: usize,
    /// 最近轮次单条结果上限
    pub recent_result_chars: usize,
    /// 摘要中单条结果预览上限
    pub older_result_chars: usize,
    /// 整段摘要上限
    pub summary_chars: usize,
    /// 摘要中参数标签上限
    pub arg_label_chars: usize,
}

impl Default for ContextSection {
    fn default() -> Self {
        Self {
            recent_turns: 2,
            recent_result_chars: 6000,
            older_result_chars: 160,
            summary_chars: 4000,
            arg_label_chars: 80,
        }
    }
}

/// [recovery] 段：诊断阈值与各策略重试预算
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecoverySection {
    /// 估算 token 超过此值判定为 context-too-large
    pub token_threshold: usize,
    /// 消息条数超过此值判定为 conversation-too-long
    pub long_conversation_messages: usize,
    /// 最后一条 user 消息超过此字符数判定为 tool-result-overload
    pub tool_result_overload_chars: usize,
    pub context_reduction_retries: u32,
    pub simplify_prompt_retries: u32,
    pub history_truncation_retries: u32,
    pub aggressive_truncation_retries: u32,
    pub emergency_mode_retries: u32,
}

impl Default for RecoverySection {
    fn default() -> Self {
        Self {
            token_threshold: 24_000,
            long_conversation_messages: 30,
            tool_result_overload_chars: 8_000,
            context_reduction_retries: 2,
            simplify_prompt_retries: 2,
            history_truncation_retries: 1,
            aggressive_truncation_retries: 1,
            emergency_mode_retries: 1,
        }
    }
}

/// [protocol] 段：bootstrap 探测、编辑/写入能力、读类能力、保留能力 id
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProtocolSection {
    /// 首轮或恢复后无动作时合成的只读探测能力
    pub bootstrap_capability: String,
    pub bootstrap_args: serde_json::Value,
    pub edit_capability: String,
    pub write_capability: String,
    /// 读类能力：截断时保留头尾
    pub read_capabilities: Vec<String>,
    pub clarification_capability: String,
    pub plan_capability: String,
}

impl Default for ProtocolSection {
    fn default() -> Self {
        Self {
            bootstrap_capability: "list_files".to_string(),
            bootstrap_args: serde_json::json!({ "path": "." }),
            edit_capability: "edit_file".to_string(),
            write_capability: "write_file".to_string(),
            read_capabilities: vec![
                "read_file".into(),
                "list_files".into(),
                "search".into(),
                "grep".into(),
            ],
            clarification_capability: "ask_user".to_string(),
            plan_capability: "declare_plan".to_string(),
        }
    }
}

impl ProtocolSection {
    pub fn is_read_capability(&self, id: &str) -> bool {
        self.read_capabilities.iter().any(|c| c == id)
    }

    pub fn is_reserved(&self, id: &str) -> bool {
        id == self.clarification_capability || id == self.plan_capability
    }
}

/// 从 config 目录加载配置，环境变量 FORAGE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 FORAGE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("FORAGE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
