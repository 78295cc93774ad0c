//! 错误类型：请求级 ResearchError 与工具级 ToolError
//!
//! 请求级错误（上游进程失败、流超时、工具循环超限）会被 SessionController 转成一个 error 事件 + 强制 complete；
//! 工具级错误不会中断请求，只会落到 ToolCallRecord 的诊断字段里，由上游进程自行决定是否继续。

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 单次研究请求过程中可能出现的错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResearchError {
    /// 单次请求内工具调用次数超过上限
    #[error("Tool loop exceeded: more than {limit} tool invocations in one request")]
    ToolLoopExceeded { limit: usize },

    /// 上游推理进程启动失败、崩溃或以非零码退出
    #[error("Upstream process failed: {0}")]
    UpstreamProcessFailed(String),

    /// 单轮无输出超时或整体请求超时
    #[error("Stream timeout: {0}")]
    StreamTimeout(String),

    /// 未知会话：调用方按空上下文处理，不视为致命错误
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// 客户端断开或进程关闭
    #[error("Request cancelled")]
    Cancelled,
}

impl ResearchError {
    /// 是否属于「error + 强制 complete」类的请求致命错误
    pub fn is_request_fatal(&self) -> bool {
        matches!(
            self,
            ResearchError::ToolLoopExceeded { .. }
                | ResearchError::UpstreamProcessFailed(_)
                | ResearchError::StreamTimeout(_)
        )
    }
}

/// 工具调用失败的结构化诊断（错误码 + 问题提示 + 解决建议）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDiagnostic {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
}

impl std::fmt::Display for ToolDiagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ERROR-{}: {}", self.code, self.message)?;
        if let Some(hint) = &self.hint {
            write!(f, "\n- Problem: {hint}")?;
        }
        if let Some(resolution) = &self.resolution {
            write!(f, "\n- Solution: {resolution}")?;
        }
        Ok(())
    }
}

/// 工具分发阶段的错误（均在分发器内部转成 failed / timeout 记录，不向外抛出）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Missing parameter '{param}' for tool {tool}")]
    MissingParameter { tool: String, param: String },

    /// 需要鉴权但未配置密钥（或密钥明显无效）
    #[error("Missing credential for tool {tool}: set {env}")]
    MissingCredential { tool: String, env: String },

    /// 网络错误 / 4xx / 5xx，且重试已用尽或不可重试
    #[error("Tool invocation failed for {tool} after {attempts} attempt(s): {detail}")]
    ToolInvocationFailed {
        tool: String,
        attempts: u32,
        detail: String,
    },
}

impl ToolError {
    /// 转成带错误码与提示的诊断信息
    pub fn diagnostic(&self) -> ToolDiagnostic {
        let message = self.to_string();
        match self {
            ToolError::ToolNotFound(_) => ToolDiagnostic {
                code: "TOOL001".into(),
                message,
                hint: Some("The requested tool is not registered".into()),
                resolution: Some("Use one of the tools listed by GET /api/tools".into()),
            },
            ToolError::MissingParameter { param, .. } => ToolDiagnostic {
                code: "PARAM001".into(),
                message,
                hint: Some(format!("Required parameter '{param}' was not supplied under any accepted alias")),
                resolution: Some("Retry the call with the required parameter".into()),
            },
            ToolError::MissingCredential { env, .. } => ToolDiagnostic {
                code: "AUTH001".into(),
                message,
                hint: Some("Missing or invalid API key".into()),
                resolution: Some(format!("Check your environment for a valid {env}")),
            },
            ToolError::ToolInvocationFailed { .. } => ToolDiagnostic {
                code: "NET001".into(),
                message,
                hint: Some("Network connectivity issue or service unavailability".into()),
                resolution: Some("Check the provider status; the request continues without this result".into()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_fatal_classification() {
        assert!(ResearchError::ToolLoopExceeded { limit: 3 }.is_request_fatal());
        assert!(ResearchError::UpstreamProcessFailed("boom".into()).is_request_fatal());
        assert!(ResearchError::StreamTimeout("turn".into()).is_request_fatal());
        assert!(!ResearchError::SessionNotFound("s1".into()).is_request_fatal());
        assert!(!ResearchError::Cancelled.is_request_fatal());
    }

    #[test]
    fn test_diagnostic_codes() {
        let err = ToolError::ToolNotFound("nope".into());
        assert_eq!(err.diagnostic().code, "TOOL001");

        let err = ToolError::MissingCredential {
            tool: "weather".into(),
            env: "WEATHER_API_KEY".into(),
        };
        let diag = err.diagnostic();
        assert_eq!(diag.code, "AUTH001");
        assert!(diag.resolution.unwrap().contains("WEATHER_API_KEY"));
    }

    #[test]
    fn test_diagnostic_display() {
        let diag = ToolError::MissingParameter {
            tool: "news".into(),
            param: "q".into(),
        }
        .diagnostic();
        let text = diag.to_string();
        assert!(text.starts_with("ERROR-PARAM001"));
        assert!(text.contains("- Problem:"));
    }
}
