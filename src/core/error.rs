//! Agent 错误类型
//!
//! 与 ExecutionWorker 的两类出口对应：可恢复错误（工具失败、参数非法）在循环内折叠为
//! Observation 文本，不走该枚举；终止性错误（传输断开、LLM 失败、步数超限、超时）走该枚举并
//! 产生终止事件。Transport 额外触发 Supervisor 重连。

use thiserror::Error;

/// 请求执行过程中的终止性错误（网络、LLM、步数、超时等）
#[derive(Error, Debug)]
pub enum AgentError {
    /// 当前无存活 MCP 会话（正在重连），提交立即失败
    #[error("MCP agent not ready")]
    NotReady,

    /// 底层传输断开，触发 Supervisor 重连；对该请求表现为终止错误
    #[error("MCP transport failure: {0}")]
    Transport(String),

    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("JSON parse error: {0}")]
    JsonParseError(String),

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("Tool call loop exceeded {0} steps")]
    StepLimitExceeded(usize),

    /// 调用方等待超时；后台执行不一定随之终止
    #[error("Timed out after {0}s")]
    Timeout(u64),

    /// 后台任务返回的终止错误事件（submit 路径）
    #[error("{0}")]
    RunFailed(String),

    #[error("Cancelled by shutdown")]
    Cancelled,

    #[error("Config error: {0}")]
    ConfigError(String),
}

impl AgentError {
    /// 是否为传输类错误（Supervisor 据此决定重建会话）
    pub fn is_transport(&self) -> bool {
        matches!(self, AgentError::Transport(_))
    }
}
