//! Wasp - Rust Jira 智能体网关
//!
//! 维持一条到远端 MCP 服务器的常驻会话，将自然语言请求经分级路由交给
//! 工具调用循环执行，过程事件以 NDJSON 流式返回。
//!
//! 模块划分：
//! - **agent**: 分级路由、执行循环、过程事件与提示词
//! - **chat**: 对话消息类型（LLM 侧与前端侧）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、会话监管（重连/队列/关闭）
//! - **gateway**: HTTP 网关（NDJSON 流式接口、健康检查、时间戳后处理）
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock）
//! - **mcp**: MCP 会话抽象、stdio 客户端、参数解析与 Mock

pub mod agent;
pub mod chat;
pub mod config;
pub mod core;
pub mod gateway;
pub mod llm;
pub mod mcp;
