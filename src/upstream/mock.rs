//! 脚本化上游（用于测试，无需真实进程）
//!
//! 按「轮」输出预设的 stdout 行：第 0 轮在启动后立即可读，之后每收到一行工具结果推进一轮。
//! 等待工具结果时 next_chunk 挂起（与真实进程阻塞在 stdin 上一致），直到被 kill。
//! UpstreamProbe 在测试中观察：收到的输入、回写的工具结果、是否被终止。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::core::ResearchError;
use crate::upstream::traits::{ReasoningProcess, UpstreamExit, UpstreamInput, UpstreamRun};

/// 测试观察点（所有运行共享）
#[derive(Debug, Clone, Default)]
pub struct UpstreamProbe {
    killed: Arc<AtomicBool>,
    inputs: Arc<Mutex<Vec<UpstreamInput>>>,
    received: Arc<Mutex<Vec<String>>>,
}

impl UpstreamProbe {
    pub fn was_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }

    pub fn inputs(&self) -> Vec<UpstreamInput> {
        self.inputs.lock().map(|v| v.clone()).unwrap_or_default()
    }

    /// 上游 stdin 收到的工具结果行（不含首行输入）
    pub fn received_lines(&self) -> Vec<String> {
        self.received.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScriptedUpstream {
    turns: Vec<Vec<String>>,
    exit: UpstreamExit,
    hang: bool,
    chunk_delay: Option<Duration>,
    start_error: Option<String>,
    probe: UpstreamProbe,
}

impl ScriptedUpstream {
    /// 单轮脚本
    pub fn new<S: Into<String>>(lines: impl IntoIterator<Item = S>) -> Self {
        Self::with_turns(vec![lines.into_iter().map(Into::into).collect()])
    }

    pub fn with_turns(turns: Vec<Vec<String>>) -> Self {
        Self {
            turns,
            exit: UpstreamExit::success(),
            ..Self::default()
        }
    }

    pub fn exit_with(mut self, exit: UpstreamExit) -> Self {
        self.exit = exit;
        self
    }

    /// 脚本输出完后不关闭 stdout，挂起直到被 kill
    pub fn hang_after_script(mut self) -> Self {
        self.hang = true;
        self
    }

    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    pub fn fail_to_start(mut self, message: impl Into<String>) -> Self {
        self.start_error = Some(message.into());
        self
    }

    pub fn probe(&self) -> UpstreamProbe {
        self.probe.clone()
    }
}

#[async_trait]
impl ReasoningProcess for ScriptedUpstream {
    async fn start(&self, input: &UpstreamInput) -> Result<Box<dyn UpstreamRun>, ResearchError> {
        if let Some(message) = &self.start_error {
            return Err(ResearchError::UpstreamProcessFailed(message.clone()));
        }
        if let Ok(mut inputs) = self.probe.inputs.lock() {
            inputs.push(input.clone());
        }
        let mut turns: VecDeque<VecDeque<String>> = self
            .turns
            .iter()
            .map(|t| t.iter().cloned().collect())
            .collect();
        let current = turns.pop_front().unwrap_or_default();
        Ok(Box::new(ScriptedRun {
            current,
            pending: turns,
            awaiting_results: false,
            exit: self.exit.clone(),
            hang: self.hang,
            chunk_delay: self.chunk_delay,
            killed: CancellationToken::new(),
            probe: self.probe.clone(),
        }))
    }
}

struct ScriptedRun {
    current: VecDeque<String>,
    pending: VecDeque<VecDeque<String>>,
    awaiting_results: bool,
    exit: UpstreamExit,
    hang: bool,
    chunk_delay: Option<Duration>,
    killed: CancellationToken,
    probe: UpstreamProbe,
}

impl ScriptedRun {
    /// 挂起直到被 kill
    async fn block_until_killed(&self) {
        self.killed.cancelled().await;
    }
}

#[async_trait]
impl UpstreamRun for ScriptedRun {
    async fn next_chunk(&mut self) -> Result<Option<String>, ResearchError> {
        if self.killed.is_cancelled() {
            return Ok(None);
        }
        if let Some(delay) = self.chunk_delay {
            tokio::select! {
                _ = self.killed.cancelled() => return Ok(None),
                _ = tokio::time::sleep(delay) => {}
            }
        }
        if let Some(line) = self.current.pop_front() {
            return Ok(Some(line));
        }
        if !self.pending.is_empty() {
            // 本轮输出完毕，需要工具结果才能继续
            self.awaiting_results = true;
            self.block_until_killed().await;
            return Ok(None);
        }
        if self.hang {
            self.block_until_killed().await;
        }
        Ok(None)
    }

    async fn send_line(&mut self, line: &str) -> Result<(), ResearchError> {
        if self.killed.is_cancelled() {
            return Err(ResearchError::UpstreamProcessFailed("stdin is closed".into()));
        }
        if let Ok(mut received) = self.probe.received.lock() {
            received.push(line.to_string());
        }
        if let Some(next) = self.pending.pop_front() {
            self.current.extend(next);
        }
        self.awaiting_results = false;
        Ok(())
    }

    async fn kill(&mut self) {
        self.probe.killed.store(true, Ordering::SeqCst);
        self.killed.cancel();
    }

    async fn wait(&mut self) -> UpstreamExit {
        if self.hang || self.awaiting_results {
            self.block_until_killed().await;
        }
        if self.killed.is_cancelled() {
            return UpstreamExit {
                code: None,
                stderr: String::new(),
            };
        }
        self.exit.clone()
    }
}
