//! 解析上游的工具调用请求
//!
//! 负载为单个对象或对象数组（同一轮），每个对象形如 `{"name": ..., "arguments": {...}}`。
//! 兼容 `tool` / `args` / `parameters` 等写法，arguments 也可以是 JSON 字符串。

use serde_json::Value;
use thiserror::Error;

use crate::tools::ToolInvocation;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolCallParseError {
    #[error("invalid tool call JSON: {0}")]
    InvalidJson(String),
    #[error("tool call batch is empty")]
    Empty,
    #[error("tool call #{index} has no name")]
    MissingName { index: usize },
    #[error("tool call #{index} must be an object")]
    NotAnObject { index: usize },
}

pub fn parse_tool_calls(payload: &str) -> Result<Vec<ToolInvocation>, ToolCallParseError> {
    let value: Value =
        serde_json::from_str(payload.trim()).map_err(|e| ToolCallParseError::InvalidJson(e.to_string()))?;
    let items = match value {
        Value::Array(items) => items,
        other => vec![other],
    };
    if items.is_empty() {
        return Err(ToolCallParseError::Empty);
    }
    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| parse_one(index, item))
        .collect()
}

fn parse_one(index: usize, item: Value) -> Result<ToolInvocation, ToolCallParseError> {
    let Value::Object(mut obj) = item else {
        return Err(ToolCallParseError::NotAnObject { index });
    };
    let name = ["name", "tool"]
        .iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(String::from)
        .ok_or(ToolCallParseError::MissingName { index })?;
    let arguments = ["arguments", "args", "parameters"]
        .iter()
        .find_map(|k| obj.remove(*k))
        .map(decode_arguments)
        .unwrap_or_else(|| Value::Object(Default::default()));
    Ok(ToolInvocation::new(name, arguments))
}

/// 字符串形式的 arguments 尝试按 JSON 解码
fn decode_arguments(raw: Value) -> Value {
    match raw {
        Value::String(s) => serde_json::from_str(&s).unwrap_or(Value::String(s)),
        other => other,
    }
}
