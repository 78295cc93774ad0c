//! 输出捕获状态机
//!
//! 状态：Idle → Capturing → Done。
//! - Idle：识别报告开始、运行成功、推理步骤、工具调用标记；其余非空行作为 debug 事件
//! - Capturing：累积报告内容，遇分隔线或超过阈值时输出 content；恰好 50 个 `=` 的整行表示报告结束
//! - Done：忽略后续输入
//!
//! 开始标记之后、正文出现之前的 50 位分隔线视为报告的开头线（上游会先打印一条分隔线再打印正文），
//! 只有在已捕获到正文后，才把它当作终止线。

use crate::capture::markers::{
    contains_rule, is_terminal_rule, strip_marker, REPORT_BEGIN, RUN_SUCCEEDED, THINKING_PREFIX,
    TOOL_CALLS_PREFIX,
};
use crate::upstream::UpstreamExit;

pub const GENERATING_REPORT: &str = "Generating report...";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Capturing,
    Done,
}

/// 从原始输出中识别出的事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEvent {
    Status(String),
    Content(String),
    Thinking(String),
    /// 工具调用请求（未解析的 JSON 文本）
    ToolRequest(String),
    Debug(String),
    /// 上游非零退出；总是紧跟一个 Complete
    Failed(String),
    Complete,
}

#[derive(Debug)]
pub struct CaptureMachine {
    state: CaptureState,
    buffer: String,
    flush_threshold: usize,
    /// 进入 Capturing 后是否已经出现过正文
    body_seen: bool,
}

impl CaptureMachine {
    pub fn new(flush_threshold: usize) -> Self {
        Self {
            state: CaptureState::Idle,
            buffer: String::new(),
            flush_threshold: flush_threshold.max(1),
            body_seen: false,
        }
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn is_done(&self) -> bool {
        self.state == CaptureState::Done
    }

    pub fn feed(&mut self, chunk: &str) -> Vec<CaptureEvent> {
        let mut events = Vec::new();
        match self.state {
            CaptureState::Done => {}
            CaptureState::Capturing => self.capture(chunk, &mut events),
            CaptureState::Idle => self.feed_idle(chunk, &mut events),
        }
        events
    }

    /// 上游进程结束：冲刷剩余内容；非零退出先发 Failed；未完成时补发 Complete
    pub fn finish(&mut self, exit: &UpstreamExit) -> Vec<CaptureEvent> {
        let mut events = Vec::new();
        if self.is_done() {
            return events;
        }
        self.flush(&mut events);
        if !exit.is_success() {
            events.push(CaptureEvent::Failed(exit.failure_message()));
        }
        self.complete(&mut events);
        events
    }

    fn feed_idle(&mut self, chunk: &str, events: &mut Vec<CaptureEvent>) {
        if let Some(idx) = chunk.find(REPORT_BEGIN) {
            events.push(CaptureEvent::Status(GENERATING_REPORT.to_string()));
            self.state = CaptureState::Capturing;
            let trailing = &chunk[idx + REPORT_BEGIN.len()..];
            if !trailing.trim().is_empty() {
                self.capture(trailing, events);
            }
        } else if chunk.contains(RUN_SUCCEEDED) {
            self.flush(events);
            self.complete(events);
        } else if let Some(step) = strip_marker(chunk, THINKING_PREFIX) {
            if !step.is_empty() {
                events.push(CaptureEvent::Thinking(step.to_string()));
            }
        } else if let Some(payload) = strip_marker(chunk, TOOL_CALLS_PREFIX) {
            events.push(CaptureEvent::ToolRequest(payload.to_string()));
        } else if !chunk.trim().is_empty() {
            events.push(CaptureEvent::Debug(chunk.trim_end().to_string()));
        }
    }

    fn capture(&mut self, text: &str, events: &mut Vec<CaptureEvent>) {
        self.buffer.push_str(text);
        if contains_rule(text) {
            let terminal = is_terminal_rule(text) && self.body_seen;
            self.flush(events);
            if terminal {
                self.complete(events);
            }
            return;
        }
        if !text.trim().is_empty() {
            self.body_seen = true;
        }
        if self.buffer.chars().count() >= self.flush_threshold {
            self.flush(events);
        }
    }

    fn flush(&mut self, events: &mut Vec<CaptureEvent>) {
        if !self.buffer.is_empty() {
            events.push(CaptureEvent::Content(std::mem::take(&mut self.buffer)));
        }
    }

    fn complete(&mut self, events: &mut Vec<CaptureEvent>) {
        events.push(CaptureEvent::Complete);
        self.state = CaptureState::Done;
    }
}
