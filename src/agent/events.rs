//! 请求执行过程事件：供 NDJSON 流式返回给调用方
//!
//! 一次成功派发的请求产生零或多个 tool_call，随后恰好一个终止事件（final 或 error）。

use serde::Serialize;
use serde_json::Value;

/// 单次执行的过程事件（序列化为一行 JSON）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// 工具调用开始（在调用返回前即发出）
    ToolCall { name: String, args: Value },
    /// 最终回复
    Final { output: String },
    /// 终止性错误
    Error { error: String },
}

impl AgentEvent {
    /// final 与 error 为终止事件，每次请求恰好一个
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AgentEvent::ToolCall { .. })
    }
}
