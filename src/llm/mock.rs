//! Mock LLM 客户端（用于测试，无需 API）
//!
//! ScriptedLlmClient 按脚本回放输出；MockLlmClient 模拟最小代理行为：
//! 路由指令回 "fast"，首轮回显 JSON Tool Call，收到 Observation 后给出最终回复。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::chat::{Message, Role};
use crate::llm::LlmClient;

/// 脚本化客户端：按 FIFO 回放预置输出
pub struct ScriptedLlmClient {
    script: Mutex<VecDeque<String>>,
    /// 脚本耗尽后的固定输出；None 时耗尽即报错，便于测试尽早暴露
    fallback: Option<String>,
    /// 固定错误：每次调用都失败
    fail: Option<String>,
    /// 挂起模式：complete 永不返回（配合暂停时钟测试流超时）
    stall: bool,
    calls: AtomicU64,
}

impl ScriptedLlmClient {
    /// 每次调用都返回同一输出
    pub fn fixed(reply: impl Into<String>) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Some(reply.into()),
            fail: None,
            stall: false,
            calls: AtomicU64::new(0),
        }
    }

    /// 按序回放给定输出，耗尽后报错
    pub fn sequence(replies: Vec<String>) -> Self {
        Self {
            script: Mutex::new(replies.into()),
            fallback: None,
            fail: None,
            stall: false,
            calls: AtomicU64::new(0),
        }
    }

    /// 每次调用都失败
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: None,
            fail: Some(message.into()),
            stall: false,
            calls: AtomicU64::new(0),
        }
    }

    /// 永不返回
    pub fn stalled() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: None,
            fail: None,
            stall: true,
            calls: AtomicU64::new(0),
        }
    }

    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, _messages: &[Message]) -> Result<String, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.stall {
            std::future::pending::<()>().await;
        }
        if let Some(ref msg) = self.fail {
            return Err(msg.clone());
        }
        if let Some(reply) = self.script.lock().unwrap().pop_front() {
            return Ok(reply);
        }
        self.fallback
            .clone()
            .ok_or_else(|| "scripted llm exhausted".to_string())
    }
}

/// Mock 客户端：模拟「路由 → 工具调用 → 最终回复」的最小代理行为
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        let system = messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .unwrap_or("");

        // 路由指令：固定走最便宜层级
        if system.contains("You are a router") {
            return Ok("fast".to_string());
        }

        // 用户原始输入：最后一条非 Observation 的 User 消息
        let last_input = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User && !m.content.starts_with("Observation from"))
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");

        let seen_observation = messages
            .iter()
            .any(|m| m.role == Role::User && m.content.starts_with("Observation from"));

        if seen_observation {
            Ok(format!("Echo from Mock: {}", last_input))
        } else {
            Ok(format!(
                r#"{{"tool": "echo", "arguments": {{"text": "{}"}}}}"#,
                last_input.replace('"', "'")
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_sequence_then_error() {
        let llm = ScriptedLlmClient::sequence(vec!["a".into(), "b".into()]);
        assert_eq!(llm.complete(&[]).await.unwrap(), "a");
        assert_eq!(llm.complete(&[]).await.unwrap(), "b");
        assert!(llm.complete(&[]).await.is_err());
        assert_eq!(llm.call_count(), 3);
    }

    #[tokio::test]
    async fn test_fixed_is_deterministic() {
        let llm = ScriptedLlmClient::fixed("fast");
        assert_eq!(llm.complete(&[]).await.unwrap(), "fast");
        assert_eq!(llm.complete(&[]).await.unwrap(), "fast");
    }

    #[tokio::test]
    async fn test_mock_client_round() {
        let llm = MockLlmClient;
        let first = llm
            .complete(&[Message::user("hello")])
            .await
            .unwrap();
        assert!(first.contains(r#""tool": "echo""#));

        let second = llm
            .complete(&[
                Message::user("hello"),
                Message::assistant("Tool call: echo | Result: ok"),
                Message::user("Observation from echo: ok"),
            ])
            .await
            .unwrap();
        assert_eq!(second, "Echo from Mock: hello");
    }
}
