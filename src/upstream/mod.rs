//! 上游推理进程：启动、读取原始输出、回写工具结果、终止

pub mod mock;
pub mod process;
pub mod traits;

pub use mock::{ScriptedUpstream, UpstreamProbe};
pub use process::ProcessUpstream;
pub use traits::{ReasoningProcess, UpstreamExit, UpstreamInput, UpstreamRun};
