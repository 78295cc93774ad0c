//! 对外事件：SSE 每帧一个 JSON 对象 `{ "type": ..., ... }`

use serde::{Deserialize, Serialize};

use crate::tools::ToolCallRecord;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundEvent {
    Status { message: String },
    /// 追加到回复末尾的增量片段
    Content { data: String },
    /// 推理过程片段（可选展示）
    Thinking { content: String },
    Tool { tool: ToolEventPayload },
    Intelligence { content: IntelligenceReport },
    /// 终止事件，之后流立即关闭
    Complete,
    Error { message: String },
    /// 仅用于诊断
    Debug { message: String },
}

impl OutboundEvent {
    pub fn status(message: impl Into<String>) -> Self {
        OutboundEvent::Status { message: message.into() }
    }

    pub fn content(data: impl Into<String>) -> Self {
        OutboundEvent::Content { data: data.into() }
    }

    pub fn thinking(content: impl Into<String>) -> Self {
        OutboundEvent::Thinking { content: content.into() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        OutboundEvent::Error { message: message.into() }
    }

    pub fn debug(message: impl Into<String>) -> Self {
        OutboundEvent::Debug { message: message.into() }
    }

    pub fn tool(record: &ToolCallRecord) -> Self {
        OutboundEvent::Tool {
            tool: ToolEventPayload {
                name: record.name.clone(),
                status: record.outcome.wire_status().to_string(),
                duration: record.duration_ms(),
            },
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OutboundEvent::Complete)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            OutboundEvent::Status { .. } => "status",
            OutboundEvent::Content { .. } => "content",
            OutboundEvent::Thinking { .. } => "thinking",
            OutboundEvent::Tool { .. } => "tool",
            OutboundEvent::Intelligence { .. } => "intelligence",
            OutboundEvent::Complete => "complete",
            OutboundEvent::Error { .. } => "error",
            OutboundEvent::Debug { .. } => "debug",
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(r#"{{"type":"error","message":"event encoding failed: {e}"}}"#)
        })
    }

    /// 完整 SSE 帧：`data: {json}\n\n`
    pub fn to_sse_frame(&self) -> String {
        format!("data: {}\n\n", self.to_json())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolEventPayload {
    pub name: String,
    /// "success" | "failed"
    pub status: String,
    /// 毫秒
    pub duration: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntelligenceReport {
    /// 秒，保留两位小数
    pub execution_time: f64,
    pub tokens_used: usize,
    pub tools_called: Vec<ToolUsage>,
    pub thinking_steps: Vec<String>,
    pub models_used: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolUsage {
    pub name: String,
    pub calls: usize,
    pub failures: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_shapes() {
        assert_eq!(
            serde_json::to_value(OutboundEvent::status("hi")).unwrap(),
            json!({ "type": "status", "message": "hi" })
        );
        assert_eq!(
            serde_json::to_value(OutboundEvent::content("x")).unwrap(),
            json!({ "type": "content", "data": "x" })
        );
        assert_eq!(
            serde_json::to_value(OutboundEvent::Complete).unwrap(),
            json!({ "type": "complete" })
        );
        assert_eq!(OutboundEvent::Complete.to_sse_frame(), "data: {\"type\":\"complete\"}\n\n");
    }

    #[test]
    fn test_intelligence_camel_case() {
        let event = OutboundEvent::Intelligence {
            content: IntelligenceReport {
                execution_time: 1.25,
                tokens_used: 42,
                tools_called: vec![ToolUsage { name: "NewsAPI".into(), calls: 2, failures: 1 }],
                thinking_steps: vec!["plan".into()],
                models_used: vec!["gpt-4.1".into()],
            },
        };
        let v = serde_json::to_value(&event).unwrap();
        assert_eq!(v["type"], "intelligence");
        assert_eq!(v["content"]["executionTime"], 1.25);
        assert_eq!(v["content"]["tokensUsed"], 42);
        assert_eq!(v["content"]["toolsCalled"][0]["calls"], 2);
        assert_eq!(v["content"]["thinkingSteps"][0], "plan");
        assert_eq!(v["content"]["modelsUsed"][0], "gpt-4.1");
    }

    #[test]
    fn test_tool_event_from_record() {
        use crate::tools::{NormalizedParams, ToolOutcome};
        let record = ToolCallRecord {
            name: "WeatherAPI".into(),
            parameters: NormalizedParams::new(),
            outcome: ToolOutcome::Timeout,
            duration: std::time::Duration::from_millis(830),
            attempts: 3,
            output: None,
            error: None,
        };
        assert_eq!(
            serde_json::to_value(OutboundEvent::tool(&record)).unwrap(),
            json!({ "type": "tool", "tool": { "name": "WeatherAPI", "status": "failed", "duration": 830 } })
        );
    }
}
