//! 动作参数校验
//!
//! 在任何能力执行之前，按能力声明的参数 schema 检查每个调用：必填字段存在、非空、类型正确。
//! 编辑类能力的 operations 列表逐项按操作类型校验各自的必填子字段。
//! 校验结果是带标签的 ValidatedArgs，失败时返回具体的 ValidationError（不会抛出到回合之外）。

use serde_json::{Map, Value};
use thiserror::Error;

use crate::config::ProtocolSection;
use crate::core::session::ActionInvocation;
use crate::tools::schema::{ClarificationArgs, PlanArgs};

/// 参数校验错误；每个变体都指明出错的字段或操作下标
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Arguments for '{capability}' must be a JSON object")]
    NotAnObject { capability: String },

    #[error("Missing required field '{field}'")]
    MissingField { field: String },

    #[error("Field '{field}' must not be empty")]
    EmptyField { field: String },

    #[error("Field '{field}' must be of type {expected}, got {actual}")]
    WrongType {
        field: String,
        expected: String,
        actual: String,
    },

    #[error(
        "'{edit_capability}' applies incremental operations and does not take full file content. \
         Pass an 'operations' list, or use '{write_capability}' to replace the whole file"
    )]
    FullContentForEdit {
        edit_capability: String,
        write_capability: String,
    },

    #[error(
        "'{write_capability}' replaces the whole file and does not take 'operations'. \
         Use '{edit_capability}' for incremental edits"
    )]
    OperationsForWrite {
        write_capability: String,
        edit_capability: String,
    },

    #[error("Malformed 'operations' list: {reason}. Expected a JSON array of objects, each with a 'kind' of insert, replace, replace_range or delete_range")]
    MalformedOperations { reason: String },

    #[error("Operation {index} is missing 'kind' (one of insert, replace, replace_range, delete_range)")]
    MissingOperationKind { index: usize },

    #[error("Operation {index} has unknown kind '{kind}' (expected insert, replace, replace_range or delete_range)")]
    UnknownOperationKind { index: usize, kind: String },

    #[error("Operation {index} ({kind}) is missing required field '{field}'")]
    MissingOperationField {
        index: usize,
        kind: String,
        field: String,
    },

    #[error("Operation {index} ({kind}) field '{field}' must be a non-empty string")]
    InvalidOperationField {
        index: usize,
        kind: String,
        field: String,
    },

    #[error("Operation {index} (insert) has invalid position '{value}' (expected 'before' or 'after')")]
    InvalidPosition { index: usize, value: String },
}

/// 插入位置（相对锚点）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertPosition {
    Before,
    After,
}

/// 编辑操作（固定的少量类型）
#[derive(Debug, Clone, PartialEq)]
pub enum EditOperation {
    Insert {
        anchor: String,
        position: InsertPosition,
        content: String,
    },
    Replace {
        find: String,
        replacement: String,
    },
    ReplaceRange {
        start_anchor: String,
        end_anchor: String,
        replacement: String,
    },
    DeleteRange {
        start_anchor: String,
        end_anchor: String,
    },
}

impl EditOperation {
    pub const KINDS: [&'static str; 4] = ["insert", "replace", "replace_range", "delete_range"];
}

/// 校验通过后的参数：每种参数 schema 一个变体
#[derive(Debug, Clone, PartialEq)]
pub enum ValidatedArgs {
    Edit {
        args: Map<String, Value>,
        operations: Vec<EditOperation>,
    },
    Clarification(ClarificationArgs),
    Plan(PlanArgs),
    Generic(Map<String, Value>),
}

/// 参数校验器：依据协议配置识别编辑 / 写入 / 保留能力
pub struct ArgumentValidator<'a> {
    protocol: &'a ProtocolSection,
}

impl<'a> ArgumentValidator<'a> {
    pub fn new(protocol: &'a ProtocolSection) -> Self {
        Self { protocol }
    }

    /// 按 schema 校验一次调用
    pub fn validate(
        &self,
        invocation: &ActionInvocation,
        schema: &Value,
    ) -> Result<ValidatedArgs, ValidationError> {
        let capability = invocation.capability.as_str();
        let args = invocation
            .arguments
            .as_object()
            .ok_or_else(|| ValidationError::NotAnObject {
                capability: capability.to_string(),
            })?;

        if capability == self.protocol.edit_capability {
            return self.validate_edit(args, schema);
        }
        if capability == self.protocol.write_capability && args.contains_key("operations") {
            return Err(ValidationError::OperationsForWrite {
                write_capability: self.protocol.write_capability.clone(),
                edit_capability: self.protocol.edit_capability.clone(),
            });
        }

        check_schema(args, schema, &[])?;

        if capability == self.protocol.clarification_capability {
            let question = string_field(args, "question")?;
            return Ok(ValidatedArgs::Clarification(ClarificationArgs { question }));
        }
        if capability == self.protocol.plan_capability {
            let goal = string_field(args, "goal")?;
            let steps = plan_steps(args)?;
            return Ok(ValidatedArgs::Plan(PlanArgs { goal, steps }));
        }
        Ok(ValidatedArgs::Generic(args.clone()))
    }

    fn validate_edit(
        &self,
        args: &Map<String, Value>,
        schema: &Value,
    ) -> Result<ValidatedArgs, ValidationError> {
        let ops = match args.get("operations") {
            None | Some(Value::Null) => {
                if args.contains_key("content") {
                    return Err(ValidationError::FullContentForEdit {
                        edit_capability: self.protocol.edit_capability.clone(),
                        write_capability: self.protocol.write_capability.clone(),
                    });
                }
                return Err(ValidationError::MissingField {
                    field: "operations".to_string(),
                });
            }
            Some(Value::Array(items)) => items,
            Some(Value::String(_)) => {
                return Err(ValidationError::MalformedOperations {
                    reason: "got a string; pass the operations as a JSON array, not as encoded text"
                        .to_string(),
                })
            }
            Some(other) => {
                return Err(ValidationError::MalformedOperations {
                    reason: format!("got {}", json_type_name(other)),
                })
            }
        };
        if ops.is_empty() {
            return Err(ValidationError::MalformedOperations {
                reason: "the list is empty".to_string(),
            });
        }

        check_schema(args, schema, &["operations"])?;

        let operations = ops
            .iter()
            .enumerate()
            .map(|(index, op)| parse_operation(index, op))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ValidatedArgs::Edit {
            args: args.clone(),
            operations,
        })
    }
}

/// 通用 schema 检查：required 字段存在且非空，已声明类型的字段类型正确
fn check_schema(
    args: &Map<String, Value>,
    schema: &Value,
    skip: &[&str],
) -> Result<(), ValidationError> {
    let required: Vec<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|r| r.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    for field in &required {
        if skip.contains(field) {
            continue;
        }
        match args.get(*field) {
            None | Some(Value::Null) => {
                return Err(ValidationError::MissingField {
                    field: field.to_string(),
                })
            }
            Some(Value::String(s)) if s.trim().is_empty() => {
                return Err(ValidationError::EmptyField {
                    field: field.to_string(),
                })
            }
            Some(Value::Array(a)) if a.is_empty() => {
                return Err(ValidationError::EmptyField {
                    field: field.to_string(),
                })
            }
            _ => {}
        }
    }

    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Ok(());
    };
    for (field, spec) in properties {
        if skip.contains(&field.as_str()) {
            continue;
        }
        let Some(value) = args.get(field) else {
            continue;
        };
        if value.is_null() && !required.contains(&field.as_str()) {
            continue;
        }
        let Some(declared) = spec.get("type") else {
            continue;
        };
        let allowed: Vec<&str> = match declared {
            Value::String(t) => vec![t.as_str()],
            Value::Array(ts) => ts.iter().filter_map(Value::as_str).collect(),
            _ => continue,
        };
        if !allowed.iter().any(|t| matches_type(value, t)) {
            return Err(ValidationError::WrongType {
                field: field.clone(),
                expected: allowed.join(" | "),
                actual: json_type_name(value).to_string(),
            });
        }
    }
    Ok(())
}

fn matches_type(value: &Value, ty: &str) -> bool {
    match ty {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn string_field(args: &Map<String, Value>, field: &str) -> Result<String, ValidationError> {
    match args.get(field) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Some(Value::String(_)) => Err(ValidationError::EmptyField {
            field: field.to_string(),
        }),
        Some(other) if !other.is_null() => Err(ValidationError::WrongType {
            field: field.to_string(),
            expected: "string".to_string(),
            actual: json_type_name(other).to_string(),
        }),
        _ => Err(ValidationError::MissingField {
            field: field.to_string(),
        }),
    }
}

fn plan_steps(args: &Map<String, Value>) -> Result<Vec<String>, ValidationError> {
    let items = args
        .get("steps")
        .and_then(Value::as_array)
        .ok_or_else(|| ValidationError::MissingField {
            field: "steps".to_string(),
        })?;
    let steps: Vec<String> = items
        .iter()
        .filter_map(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();
    if steps.is_empty() {
        return Err(ValidationError::EmptyField {
            field: "steps".to_string(),
        });
    }
    Ok(steps)
}

fn parse_operation(index: usize, op: &Value) -> Result<EditOperation, ValidationError> {
    let obj = op.as_object().ok_or_else(|| ValidationError::MalformedOperations {
        reason: format!("entry {} is {}, not an object", index, json_type_name(op)),
    })?;
    let kind = match obj.get("kind") {
        Some(Value::String(k)) if !k.trim().is_empty() => k.trim().to_string(),
        _ => return Err(ValidationError::MissingOperationKind { index }),
    };

    let anchor = |field: &str| op_field(obj, index, &kind, field, true);
    let text = |field: &str| op_field(obj, index, &kind, field, false);

    match kind.as_str() {
        "insert" => {
            let anchor_text = anchor("anchor")?;
            let position = match text("position")?.trim() {
                "before" => InsertPosition::Before,
                "after" => InsertPosition::After,
                other => {
                    return Err(ValidationError::InvalidPosition {
                        index,
                        value: other.to_string(),
                    })
                }
            };
            let content = anchor("content")?;
            Ok(EditOperation::Insert {
                anchor: anchor_text,
                position,
                content,
            })
        }
        "replace" => Ok(EditOperation::Replace {
            find: anchor("find")?,
            replacement: text("replacement")?,
        }),
        "replace_range" => Ok(EditOperation::ReplaceRange {
            start_anchor: anchor("start_anchor")?,
            end_anchor: anchor("end_anchor")?,
            replacement: text("replacement")?,
        }),
        "delete_range" => Ok(EditOperation::DeleteRange {
            start_anchor: anchor("start_anchor")?,
            end_anchor: anchor("end_anchor")?,
        }),
        _ => Err(ValidationError::UnknownOperationKind { index, kind }),
    }
}

/// 取操作子字段；non_empty 为 true 时要求非空（锚点类字段），否则允许空串（替换文本）
fn op_field(
    obj: &Map<String, Value>,
    index: usize,
    kind: &str,
    field: &str,
    non_empty: bool,
) -> Result<String, ValidationError> {
    match obj.get(field) {
        None | Some(Value::Null) => Err(ValidationError::MissingOperationField {
            index,
            kind: kind.to_string(),
            field: field.to_string(),
        }),
        Some(Value::String(s)) if !non_empty || !s.trim().is_empty() => Ok(s.clone()),
        Some(_) => Err(ValidationError::InvalidOperationField {
            index,
            kind: kind.to_string(),
            field: field.to_string(),
        }),
    }
}
