//! 核心层：错误类型、会话监管与优雅关闭

pub mod error;
pub mod shutdown;
pub mod supervisor;

pub use error::AgentError;
pub use shutdown::{ShutdownManager, ShutdownReason};
pub use supervisor::{AgentRequest, McpSupervisor, SupervisorConfig, TierClients};
