//! 研究请求编排：对外事件、事件出口、请求指标、工具调用解析与会话控制器

pub mod controller;
pub mod events;
pub mod metrics;
pub mod sink;
pub mod tool_call;

pub use controller::{ControllerSettings, ResearchRequest, RunOutcome, SessionController};
pub use events::{IntelligenceReport, OutboundEvent, ToolEventPayload, ToolUsage};
pub use metrics::RequestMetrics;
pub use sink::EventSink;
pub use tool_call::{parse_tool_calls, ToolCallParseError};
