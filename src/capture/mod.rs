//! 上游输出捕获：把带文本标记的原始 stdout 还原成结构化事件

pub mod machine;
pub mod markers;

pub use machine::{CaptureEvent, CaptureMachine, CaptureState};
