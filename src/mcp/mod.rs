//! MCP 层：会话抽象、stdio 客户端、参数解析与 Mock

pub mod args;
pub mod mock;
pub mod session;
pub mod stdio;
pub mod types;

pub use args::parse_tool_arguments;
pub use mock::{MockConnector, MockResponse, MockToolSession};
pub use session::{McpError, SessionConnector, ToolSession};
pub use stdio::{StdioConnector, StdioSession};
pub use types::{SessionContext, ToolCatalogue, ToolDescriptor};
