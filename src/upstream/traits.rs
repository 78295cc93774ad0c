//! 上游推理进程抽象
//!
//! ReasoningProcess 负责启动一次运行，UpstreamRun 表示运行中的进程：
//! 逐块读 stdout、向 stdin 回写工具结果、强制终止、等待退出。
//! 生产实现是子进程（process.rs），测试使用脚本化替身（mock.rs）。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::ResearchError;

/// 启动时写入上游 stdin 的首行输入
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpstreamInput {
    pub query: String,
    pub model: String,
    pub session_id: String,
    /// 渲染后的历史对话摘要（无历史时为空串）
    pub context: String,
}

/// 上游进程退出状态
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UpstreamExit {
    /// None 表示被信号终止或无法获取退出码
    pub code: Option<i32>,
    /// 捕获到的 stderr（已截断）
    pub stderr: String,
}

impl UpstreamExit {
    pub fn success() -> Self {
        Self {
            code: Some(0),
            stderr: String::new(),
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stderr: stderr.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == Some(0)
    }

    /// 失败时对外展示的错误信息：优先 stderr，否则通用描述
    pub fn failure_message(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        match self.code {
            Some(code) => format!("Reasoning process exited with status {code}"),
            None => "Reasoning process terminated unexpectedly".to_string(),
        }
    }
}

#[async_trait]
pub trait UpstreamRun: Send {
    /// 下一块原始输出（一行 stdout，保留换行符）；None 表示 stdout 已关闭
    async fn next_chunk(&mut self) -> Result<Option<String>, ResearchError>;

    /// 向 stdin 写入一行（自动追加换行）
    async fn send_line(&mut self, line: &str) -> Result<(), ResearchError>;

    /// 立即终止进程（幂等）
    async fn kill(&mut self);

    /// 等待进程退出并返回退出状态
    async fn wait(&mut self) -> UpstreamExit;
}

#[async_trait]
pub trait ReasoningProcess: Send + Sync {
    async fn start(&self, input: &UpstreamInput) -> Result<Box<dyn UpstreamRun>, ResearchError>;
}
