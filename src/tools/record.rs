//! 工具调用记录
//!
//! 分发器每次调用都产出一条终态记录（success / failed / timeout），不存在「进行中」的记录。

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::ToolDiagnostic;
use crate::tools::definition::NormalizedParams;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolOutcome {
    Success,
    Failed,
    Timeout,
}

impl ToolOutcome {
    /// 对外事件只区分 success / failed，timeout 归为 failed
    pub fn wire_status(&self) -> &'static str {
        match self {
            ToolOutcome::Success => "success",
            ToolOutcome::Failed | ToolOutcome::Timeout => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub name: String,
    pub parameters: NormalizedParams,
    pub outcome: ToolOutcome,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
    /// 实际发出的网络请求次数（参数/鉴权校验失败时为 0）
    pub attempts: u32,
    /// 成功时的响应内容（已截断），回注给上游推理进程
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolDiagnostic>,
}

impl ToolCallRecord {
    pub fn is_success(&self) -> bool {
        self.outcome == ToolOutcome::Success
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration.as_millis() as u64
    }

    /// 回注给上游进程的单条结果
    pub fn to_result_json(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.name,
            "status": self.outcome,
            "output": self.output,
            "error": self.error.as_ref().map(|d| d.to_string()),
        })
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
