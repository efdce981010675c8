//! 执行层：分级路由、工具调用循环、过程事件与提示词

pub mod events;
pub mod prompts;
pub mod router;
pub mod worker;

pub use events::AgentEvent;
pub use prompts::{build_worker_system, tool_call_schema_json, ROUTER_SYSTEM_PROMPT};
pub use router::{RouteTier, Router};
pub use worker::ExecutionWorker;
