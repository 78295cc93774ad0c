//! 子进程实现：每个请求启动一个推理进程
//!
//! stdin 首行写入 UpstreamInput（JSON），之后每轮工具结果各写一行；
//! stdout 按行读取（保留换行符，非 UTF-8 字节有损替换），超过 MAX_CHUNK_BYTES 的行拆成多个块；stderr 由后台任务收集，退出时截断为末尾若干字符。
//! 进程句柄设置了 kill_on_drop，请求被丢弃时进程随之终止。

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;

use crate::core::ResearchError;
use crate::upstream::traits::{ReasoningProcess, UpstreamExit, UpstreamInput, UpstreamRun};

/// 单个 stdout 块的字节上限
const MAX_CHUNK_BYTES: usize = 64 * 1024;

/// 以子进程形式运行的推理进程
#[derive(Debug, Clone)]
pub struct ProcessUpstream {
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    stderr_max_chars: usize,
}

impl ProcessUpstream {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            working_dir: None,
            stderr_max_chars: 4000,
        }
    }

    pub fn with_working_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.working_dir = dir;
        self
    }

    pub fn with_stderr_max_chars(mut self, max: usize) -> Self {
        self.stderr_max_chars = max;
        self
    }

    /// 替换参数中的 `{query}` / `{model}` 占位符
    fn render_args(&self, input: &UpstreamInput) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.replace("{query}", &input.query).replace("{model}", &input.model))
            .collect()
    }
}

#[async_trait]
impl ReasoningProcess for ProcessUpstream {
    async fn start(&self, input: &UpstreamInput) -> Result<Box<dyn UpstreamRun>, ResearchError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.render_args(input))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| {
            ResearchError::UpstreamProcessFailed(format!("failed to start {}: {}", self.program, e))
        })?;
        tracing::info!(program = %self.program, pid = ?child.id(), session_id = %input.session_id, "upstream started");

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ResearchError::UpstreamProcessFailed("stdout not captured".into()))?;
        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let _ = stderr.read_to_end(&mut buf).await;
                String::from_utf8_lossy(&buf).into_owned()
            })
        });

        let mut run = ProcessRun {
            child,
            stdin: None,
            stdout: BufReader::new(stdout),
            carry: Vec::new(),
            stderr_task,
            stderr_max_chars: self.stderr_max_chars,
        };
        run.stdin = run.child.stdin.take();

        let first_line = serde_json::to_string(input)
            .map_err(|e| ResearchError::UpstreamProcessFailed(format!("cannot encode input: {e}")))?;
        run.send_line(&first_line).await?;
        Ok(Box::new(run))
    }
}

struct ProcessRun {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: BufReader<ChildStdout>,
    /// 上一块末尾被截断的不完整 UTF-8 字符
    carry: Vec<u8>,
    stderr_task: Option<JoinHandle<String>>,
    stderr_max_chars: usize,
}

#[async_trait]
impl UpstreamRun for ProcessRun {
    async fn next_chunk(&mut self) -> Result<Option<String>, ResearchError> {
        let mut line = std::mem::take(&mut self.carry);
        let limit = MAX_CHUNK_BYTES.saturating_sub(line.len()) as u64;
        let n = (&mut self.stdout)
            .take(limit)
            .read_until(b'\n', &mut line)
            .await
            .map_err(|e| ResearchError::UpstreamProcessFailed(format!("stdout read failed: {e}")))?;
        if line.is_empty() {
            return Ok(None);
        }
        if n > 0 && !line.ends_with(b"\n") {
            // 达到上限的半行：不完整的末尾字符留给下一块
            if let Err(e) = std::str::from_utf8(&line) {
                if e.error_len().is_none() && e.valid_up_to() > 0 {
                    self.carry = line.split_off(e.valid_up_to());
                }
            }
        }
        Ok(Some(String::from_utf8_lossy(&line).into_owned()))
    }

    async fn send_line(&mut self, line: &str) -> Result<(), ResearchError> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| ResearchError::UpstreamProcessFailed("stdin is closed".into()))?;
        let mut payload = line.trim_end_matches('\n').to_string();
        payload.push('\n');
        stdin
            .write_all(payload.as_bytes())
            .await
            .map_err(|e| ResearchError::UpstreamProcessFailed(format!("stdin write failed: {e}")))?;
        stdin
            .flush()
            .await
            .map_err(|e| ResearchError::UpstreamProcessFailed(format!("stdin flush failed: {e}")))
    }

    async fn kill(&mut self) {
        self.stdin = None;
        if let Err(e) = self.child.start_kill() {
            tracing::debug!(error = %e, "upstream kill ignored");
        }
    }

    async fn wait(&mut self) -> UpstreamExit {
        // 关闭 stdin，让等待输入的进程读到 EOF
        self.stdin = None;
        let code = match self.child.wait().await {
            Ok(status) => status.code(),
            Err(e) => {
                tracing::warn!(error = %e, "upstream wait failed");
                None
            }
        };
        let stderr = match self.stderr_task.take() {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };
        UpstreamExit {
            code,
            stderr: tail_chars(&stderr, self.stderr_max_chars),
        }
    }
}

/// 保留末尾 `max` 个字符（错误堆栈的关键信息通常在最后）
fn tail_chars(s: &str, max: usize) -> String {
    let count = s.chars().count();
    if count <= max {
        s.to_string()
    } else {
        s.chars().skip(count - max).collect()
    }
}
