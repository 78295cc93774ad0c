//! 核心层：错误分类与优雅关闭

pub mod error;
pub mod shutdown;

pub use error::{ResearchError, ToolDiagnostic, ToolError};
pub use shutdown::{ShutdownManager, ShutdownReason};
