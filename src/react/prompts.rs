//! Prompt 文本：完整 system prompt（按模式变化）、恢复用的精简 / 最小 prompt、预检综合 prompt

use std::path::Path;

use crate::core::session::Plan;
use crate::llm::CapabilitySpec;

/// 构建完整 system prompt 所需的输入
pub struct SystemPromptInput<'a> {
    pub query: &'a str,
    pub working_dir: &'a Path,
    pub capabilities: &'a [CapabilitySpec],
    pub plan: Option<&'a Plan>,
    pub completion_marker: &'a str,
    pub clarification_capability: &'a str,
    pub plan_capability: &'a str,
}

/// 完整 system prompt：任务相关，且随模式变化（探索模式提示先声明计划；计划模式列出步骤并标出当前步）
pub fn system_prompt(input: &SystemPromptInput<'_>) -> String {
    let mut s = String::new();
    s.push_str(
        "You are an autonomous coding agent. Work in rounds: think, invoke capabilities, observe their results, repeat.\n",
    );
    s.push_str(&format!(
        "Working directory: {}\n\n",
        input.working_dir.display()
    ));
    s.push_str(&format!("## Task\n{}\n\n", input.query.trim()));

    s.push_str("## Capabilities\n");
    for cap in input.capabilities {
        s.push_str(&format!("- {}: {}\n", cap.id, cap.description));
    }
    s.push('\n');

    match input.plan {
        Some(plan) => {
            s.push_str(&format!("## Plan (advisory)\nGoal: {}\n", plan.goal));
            for (i, step) in plan.steps.iter().enumerate() {
                let marker = if i == plan.current_step_index { "->" } else { "  " };
                s.push_str(&format!("{} {}. {}\n", marker, i + 1, step));
            }
            s.push_str(
                "When you finish the current step, say \"step complete\" so progress can be tracked.\n\n",
            );
        }
        None => {
            s.push_str(&format!(
                "## Mode: exploring\nInspect the project before changing anything. For multi-step work you may call `{}` with a goal and ordered steps.\n\n",
                input.plan_capability
            ));
        }
    }

    s.push_str("## Rules\n");
    s.push_str("- Invoke capabilities with structured arguments that match their schemas.\n");
    s.push_str(&format!(
        "- If you cannot proceed without the user's input, call `{}` with one concrete question.\n",
        input.clarification_capability
    ));
    s.push_str(&format!(
        "- When the task is fully done, reply with a short summary followed by {}.\n",
        input.completion_marker
    ));
    s
}

/// 精简 system prompt（simplify-prompt 策略）
pub fn reduced_system_prompt(query: &str, completion_marker: &str) -> String {
    format!(
        "You are a coding agent. Task: {}\nRespond with a capability invocation, or with a final summary followed by {} if the task is done.",
        query.trim(),
        completion_marker
    )
}

/// 最小 system prompt（aggressive-truncation / emergency-mode 策略）
pub fn minimal_system_prompt(query: &str) -> String {
    format!("Task: {}\nAct now.", query.trim())
}

/// emergency-mode 的强制行动提示
pub fn forced_action_notice(completion_marker: &str) -> String {
    format!(
        "Your previous replies were empty. History has been discarded. You must now either invoke exactly one capability, or reply with your final answer followed by {}.",
        completion_marker
    )
}

/// 预检第二阶段：请后端把发现整合为一段知识
pub fn synthesis_prompt(query: &str, findings: &[(String, String)]) -> String {
    let mut s = format!(
        "Summarize the following project findings into concise guidance for this task: {}\nKeep only facts that help complete the task.\n\n",
        query.trim()
    );
    for (agent, finding) in findings {
        s.push_str(&format!("### {}\n{}\n\n", agent, finding.trim()));
    }
    s
}

/// 预检知识的确认回复
pub const PREFLIGHT_ACK: &str =
    "Understood. I will use this project knowledge while working on the task.";

/// 协作式暂停时的固定提示
pub const PAUSE_MESSAGE: &str = "Session paused. Reply to resume the task.";

#[cfg(test)]
mod tests {
    use super::*;

    fn input<'a>(plan: Option<&'a Plan>, caps: &'a [CapabilitySpec]) -> SystemPromptInput<'a> {
        SystemPromptInput {
            query: "fix the build",
            working_dir: Path::new("/repo"),
            capabilities: caps,
            plan,
            completion_marker: "TASK_COMPLETE",
            clarification_capability: "ask_user",
            plan_capability: "declare_plan",
        }
    }

    #[test]
    fn test_prompt_is_mode_aware() {
        let caps = vec![CapabilitySpec {
            id: "read_file".into(),
            description: "read a file".into(),
            parameters: serde_json::json!({}),
        }];
        let exploring = system_prompt(&input(None, &caps));
        assert!(exploring.contains("Mode: exploring"));
        assert!(exploring.contains("read_file"));

        let mut plan = Plan::new("ship", vec!["build".into(), "test".into()]);
        plan.advance();
        let planned = system_prompt(&input(Some(&plan), &caps));
        assert!(planned.contains("-> 2. test"));
        assert!(!planned.contains("Mode: exploring"));
    }

    #[test]
    fn test_recovery_prompts_embed_query() {
        assert!(reduced_system_prompt("fix it", "TASK_COMPLETE").contains("fix it"));
        assert!(minimal_system_prompt("fix it").contains("fix it"));
        assert!(
            minimal_system_prompt("x").len() < reduced_system_prompt("x", "TASK_COMPLETE").len()
        );
    }
}
