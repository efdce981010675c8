//! Mock MCP 会话（用于测试，无需代理进程）
//!
//! MockToolSession 按工具名回放预置响应并记录调用顺序；MockConnector 可模拟
//! 连接失败若干次后成功，用于验证 Supervisor 的退避重连。

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use super::session::{McpError, SessionConnector, ToolSession};
use super::types::{ToolCatalogue, ToolDescriptor};

/// 预置的单次工具响应
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// 成功，返回文本
    Text(String),
    /// 工具级失败（折叠进执行循环）
    ToolError(String),
    /// 传输断开（触发 Supervisor 重连）
    Transport(String),
}

/// Mock 会话：回放响应并记录 (工具名, 参数) 调用序列
pub struct MockToolSession {
    catalogue: ToolCatalogue,
    responses: Mutex<HashMap<String, VecDeque<MockResponse>>>,
    /// 未预置响应的工具返回的缺省文本（覆盖上下文预取等旁路调用）
    default_response: String,
    invocations: Mutex<Vec<(String, Value)>>,
}

impl MockToolSession {
    pub fn new() -> Self {
        Self {
            catalogue: ToolCatalogue::default(),
            responses: Mutex::new(HashMap::new()),
            default_response: "{}".to_string(),
            invocations: Mutex::new(Vec::new()),
        }
    }

    /// 向目录添加一个工具
    pub fn with_tool(mut self, name: &str, description: &str) -> Self {
        self.catalogue.tools.push(ToolDescriptor {
            name: name.to_string(),
            description: Some(description.to_string()),
            input_schema: json!({"type": "object"}),
        });
        self
    }

    pub fn with_default_response(mut self, text: &str) -> Self {
        self.default_response = text.to_string();
        self
    }

    /// 为指定工具追加一次预置响应（按 FIFO 回放）
    pub fn script(&self, tool: &str, response: MockResponse) {
        self.responses
            .lock()
            .unwrap()
            .entry(tool.to_string())
            .or_default()
            .push_back(response);
    }

    /// 已发生的调用序列快照
    pub fn invocations(&self) -> Vec<(String, Value)> {
        self.invocations.lock().unwrap().clone()
    }

    pub fn invocation_count(&self) -> usize {
        self.invocations.lock().unwrap().len()
    }
}

impl Default for MockToolSession {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolSession for MockToolSession {
    async fn list_tools(&self) -> Result<ToolCatalogue, McpError> {
        Ok(self.catalogue.clone())
    }

    async fn invoke(&self, name: &str, arguments: Value) -> Result<String, McpError> {
        self.invocations
            .lock()
            .unwrap()
            .push((name.to_string(), arguments));

        let scripted = self
            .responses
            .lock()
            .unwrap()
            .get_mut(name)
            .and_then(VecDeque::pop_front);

        match scripted {
            Some(MockResponse::Text(text)) => Ok(text),
            Some(MockResponse::ToolError(msg)) => Err(McpError::Tool(msg)),
            Some(MockResponse::Transport(msg)) => Err(McpError::Transport(msg)),
            None => Ok(self.default_response.clone()),
        }
    }
}

type ConnectFn = dyn Fn() -> Result<Arc<dyn ToolSession>, McpError> + Send + Sync;

/// Mock 连接器：按注入的闭包决定每次 connect 的结果，并统计尝试次数
pub struct MockConnector {
    connect_fn: Box<ConnectFn>,
    attempts: AtomicUsize,
}

impl MockConnector {
    pub fn with(connect_fn: impl Fn() -> Result<Arc<dyn ToolSession>, McpError> + Send + Sync + 'static) -> Self {
        Self {
            connect_fn: Box::new(connect_fn),
            attempts: AtomicUsize::new(0),
        }
    }

    /// 每次都返回同一个会话
    pub fn always(session: Arc<MockToolSession>) -> Self {
        Self::with(move || Ok(Arc::clone(&session) as Arc<dyn ToolSession>))
    }

    /// 每次都连接失败（远端不可达）
    pub fn always_fail() -> Self {
        Self::with(|| Err(McpError::Transport("connection refused".to_string())))
    }

    /// 前 n 次失败，之后每次返回同一个会话
    pub fn fail_times(n: usize, session: Arc<MockToolSession>) -> Self {
        let remaining = AtomicUsize::new(n);
        Self::with(move || {
            if remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1))
                .is_ok()
            {
                Err(McpError::Transport("connection refused".to_string()))
            } else {
                Ok(Arc::clone(&session) as Arc<dyn ToolSession>)
            }
        })
    }

    /// 已发生的连接尝试次数
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionConnector for MockConnector {
    async fn connect(&self) -> Result<Arc<dyn ToolSession>, McpError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        (self.connect_fn)()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_responses_play_in_order() {
        let session = MockToolSession::new().with_tool("echo", "echo back");
        session.script("echo", MockResponse::Text("first".into()));
        session.script("echo", MockResponse::ToolError("second fails".into()));

        assert_eq!(session.invoke("echo", json!({})).await.unwrap(), "first");
        assert!(matches!(
            session.invoke("echo", json!({})).await,
            Err(McpError::Tool(_))
        ));
        // 脚本耗尽后回落到缺省响应
        assert_eq!(session.invoke("echo", json!({})).await.unwrap(), "{}");
        assert_eq!(session.invocation_count(), 3);
    }

    #[tokio::test]
    async fn test_fail_times_connector() {
        let session = Arc::new(MockToolSession::new());
        let connector = MockConnector::fail_times(2, session);

        assert!(connector.connect().await.is_err());
        assert!(connector.connect().await.is_err());
        assert!(connector.connect().await.is_ok());
        assert_eq!(connector.attempts(), 3);
    }
}
