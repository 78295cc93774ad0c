pub mod definition;
pub mod dispatcher;
pub mod mock;
pub mod providers;
pub mod record;
pub mod registry;
pub mod scheduler;
pub mod transport;

pub use definition::{AuthMode, NormalizedParams, ParameterSpec, RetryPolicy, ToolDefinition};
pub use dispatcher::Dispatcher;
pub use mock::MockTransport;
pub use providers::default_definitions;
pub use record::{ToolCallRecord, ToolOutcome};
pub use registry::{RegisteredTool, ToolRegistry, ToolSummary};
pub use scheduler::{ToolInvocation, ToolScheduler};
pub use transport::{HttpMethod, HttpTransport, ReqwestTransport, ToolHttpRequest, TransportError, TransportResponse};
