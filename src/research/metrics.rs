//! 单次请求的指标累积，收尾时打包成 intelligence 事件

use std::time::Instant;

use crate::memory::TokenEstimator;
use crate::research::events::{IntelligenceReport, ToolUsage};
use crate::tools::ToolCallRecord;

#[derive(Debug)]
pub struct RequestMetrics {
    started: Instant,
    content: String,
    tools: Vec<ToolUsage>,
    thinking_steps: Vec<String>,
    models: Vec<String>,
}

impl RequestMetrics {
    pub fn new(model: &str) -> Self {
        Self {
            started: Instant::now(),
            content: String::new(),
            tools: Vec::new(),
            thinking_steps: Vec::new(),
            models: vec![model.to_string()],
        }
    }

    pub fn record_content(&mut self, data: &str) {
        self.content.push_str(data);
    }

    pub fn record_thinking(&mut self, step: &str) {
        self.thinking_steps.push(step.to_string());
    }

    /// 按首次使用顺序统计每个工具的调用与失败次数
    pub fn record_tool(&mut self, record: &ToolCallRecord) {
        let idx = match self.tools.iter().position(|t| t.name == record.name) {
            Some(idx) => idx,
            None => {
                self.tools.push(ToolUsage {
                    name: record.name.clone(),
                    calls: 0,
                    failures: 0,
                });
                self.tools.len() - 1
            }
        };
        let usage = &mut self.tools[idx];
        usage.calls += 1;
        if !record.is_success() {
            usage.failures += 1;
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn thinking_steps(&self) -> &[String] {
        &self.thinking_steps
    }

    pub fn report(&self) -> IntelligenceReport {
        let secs = self.started.elapsed().as_secs_f64();
        IntelligenceReport {
            execution_time: (secs * 100.0).round() / 100.0,
            tokens_used: TokenEstimator::estimate(&self.content),
            tools_called: self.tools.clone(),
            thinking_steps: self.thinking_steps.clone(),
            models_used: self.models.clone(),
        }
    }
}
