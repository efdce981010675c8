//! MCP 会话抽象
//!
//! ToolSession 是一条存活连接的句柄（列目录 / 按名调用）；SessionConnector 负责建立连接，
//! Supervisor 通过它重建会话，测试时可注入 Mock 实现。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use super::types::ToolCatalogue;

/// MCP 层错误：传输断开 / 协议异常 / 工具级失败
///
/// 只有 Transport 会让 Supervisor 丢弃会话重连；Tool 在执行循环内折叠为 Observation 文本。
#[derive(Error, Debug)]
pub enum McpError {
    #[error("MCP transport failure: {0}")]
    Transport(String),

    #[error("MCP protocol error: {0}")]
    Protocol(String),

    #[error("MCP tool invocation failed: {0}")]
    Tool(String),
}

impl McpError {
    pub fn is_transport(&self) -> bool {
        matches!(self, McpError::Transport(_))
    }
}

/// 一条存活的 MCP 连接：列出工具目录、按名调用工具；两者都可能挂起或出错
#[async_trait]
pub trait ToolSession: Send + Sync {
    async fn list_tools(&self) -> Result<ToolCatalogue, McpError>;

    /// 调用指定工具，成功返回文本结果
    async fn invoke(&self, name: &str, arguments: Value) -> Result<String, McpError>;
}

/// 会话建立器：每次调用产生一条全新连接
#[async_trait]
pub trait SessionConnector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn ToolSession>, McpError>;
}
