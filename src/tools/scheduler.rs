//! 工具调度：同一轮内的多个工具调用有界并发执行，结果按请求顺序返回
//!
//! 每轮使用独立的 Semaphore（默认 3 个许可），不同请求之间互不争用。
//! 取消令牌触发时立即返回 Cancelled，未完成的调用 future 随之被丢弃。

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::core::ResearchError;
use crate::tools::dispatcher::Dispatcher;
use crate::tools::record::ToolCallRecord;

/// 上游请求的一次工具调用：名称 + 原始参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl ToolInvocation {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ToolScheduler {
    max_concurrency: usize,
}

impl ToolScheduler {
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            max_concurrency: max_concurrency.max(1),
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// 执行一轮工具调用；返回的记录与 `calls` 一一对应、顺序相同
    pub async fn run_turn(
        &self,
        dispatcher: &Dispatcher,
        calls: &[ToolInvocation],
        cancel: &CancellationToken,
    ) -> Result<Vec<ToolCallRecord>, ResearchError> {
        let semaphore = Semaphore::new(self.max_concurrency);
        let tasks = calls.iter().map(|call| {
            let semaphore = &semaphore;
            async move {
                // 本地信号量不会被关闭，acquire 失败时退化为不限流
                let _permit = semaphore.acquire().await.ok();
                dispatcher.dispatch(&call.name, &call.arguments).await
            }
        });

        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(pending = calls.len(), "tool turn cancelled");
                Err(ResearchError::Cancelled)
            }
            records = join_all(tasks) => Ok(records),
        }
    }
}

impl Default for ToolScheduler {
    fn default() -> Self {
        Self::new(3)
    }
}
