//! stdio MCP 客户端
//!
//! 通过子进程代理（默认 `npx -y mcp-remote <url>`）连接远端 MCP 服务器，
//! 在子进程 stdin/stdout 上走按行分隔的 JSON-RPC 2.0：initialize 握手后提供
//! tools/list 与 tools/call。响应按 id 路由回挂起的请求；代理进程随会话句柄
//! 销毁（kill_on_drop）。

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::config::McpSection;

use super::session::{McpError, SessionConnector, ToolSession};
use super::types::ToolCatalogue;

/// MCP 协议版本（initialize 握手用）
const PROTOCOL_VERSION: &str = "2024-11-05";

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>;

/// stdio 会话建立器：每次 connect 启动一个新代理进程并完成握手
pub struct StdioConnector {
    config: McpSection,
}

impl StdioConnector {
    pub fn new(config: McpSection) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SessionConnector for StdioConnector {
    async fn connect(&self) -> Result<Arc<dyn ToolSession>, McpError> {
        let session = StdioSession::spawn(&self.config).await?;
        Ok(Arc::new(session))
    }
}

/// 一条存活的 stdio MCP 连接
pub struct StdioSession {
    stdin: Arc<Mutex<ChildStdin>>,
    pending: PendingMap,
    next_id: AtomicU64,
    request_timeout: Duration,
    reader: JoinHandle<()>,
    /// 持有子进程句柄；kill_on_drop 保证会话销毁时代理一并退出
    _child: Child,
}

impl Drop for StdioSession {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

impl StdioSession {
    /// 启动代理进程并完成 initialize 握手
    pub async fn spawn(config: &McpSection) -> Result<Self, McpError> {
        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args)
            .arg(&config.remote_url)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| McpError::Transport(format!("spawn {}: {}", config.command, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::Transport("failed to capture proxy stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::Transport("failed to capture proxy stdout".to_string()))?;

        // 代理进程的 stderr 仅作为调试日志透传
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(target: "wasp::mcp_proxy", "{}", line);
                }
            });
        }

        let stdin = Arc::new(Mutex::new(stdin));
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));

        let reader = tokio::spawn(Self::read_loop(
            stdout,
            Arc::clone(&pending),
            Arc::clone(&stdin),
        ));

        let session = Self {
            stdin,
            pending,
            next_id: AtomicU64::new(1),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            reader,
            _child: child,
        };

        session
            .initialize(Duration::from_secs(config.init_timeout_secs))
            .await?;

        Ok(session)
    }

    /// 读取循环：按 id 将响应路由到挂起请求，回应服务器 ping，其余消息忽略。
    /// stdout 关闭（代理退出）时清空挂起表，使所有等待方收到传输错误。
    async fn read_loop(
        stdout: tokio::process::ChildStdout,
        pending: PendingMap,
        stdin: Arc<Mutex<ChildStdin>>,
    ) {
        let mut lines = BufReader::new(stdout).lines();
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("MCP proxy stdout read failed: {}", e);
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            let value: Value = match serde_json::from_str(&line) {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!("Ignoring non-JSON line from MCP proxy: {}", e);
                    continue;
                }
            };

            let id = value.get("id").and_then(Value::as_u64);
            let method = value.get("method").and_then(Value::as_str);

            match (id, method) {
                // 服务器发来的请求：目前只需回应 ping
                (Some(id), Some("ping")) => {
                    let reply = json!({"jsonrpc": "2.0", "id": id, "result": {}});
                    let mut guard = stdin.lock().await;
                    if write_line(&mut guard, &reply).await.is_err() {
                        break;
                    }
                }
                (Some(_), Some(method)) => {
                    tracing::debug!("Ignoring server request: {}", method);
                }
                // 响应：路由回挂起的请求
                (Some(id), None) => {
                    if let Some(tx) = pending.lock().await.remove(&id) {
                        let _ = tx.send(value);
                    }
                }
                // 通知
                (None, _) => {
                    tracing::debug!("MCP notification: {}", method.unwrap_or("?"));
                }
            }
        }
        // 读端退出：丢弃全部挂起发送端，等待方随即收到连接关闭
        pending.lock().await.clear();
    }

    async fn initialize(&self, init_timeout: Duration) -> Result<(), McpError> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": "wasp",
                "version": env!("CARGO_PKG_VERSION"),
            },
        });
        let response = self.request("initialize", params, init_timeout).await?;
        if let Some(err) = response.get("error") {
            return Err(McpError::Protocol(format!("initialize rejected: {}", err)));
        }
        self.notify("notifications/initialized", json!({})).await?;
        Ok(())
    }

    /// 发送请求并等待对应 id 的响应；超时视为传输劣化
    async fn request(
        &self,
        method: &str,
        params: Value,
        wait: Duration,
    ) -> Result<Value, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        {
            let mut stdin = self.stdin.lock().await;
            if let Err(e) = write_line(&mut stdin, &body).await {
                self.pending.lock().await.remove(&id);
                return Err(McpError::Transport(format!("write {}: {}", method, e)));
            }
        }

        match timeout(wait, rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(McpError::Transport(format!(
                "connection closed while waiting for {}",
                method
            ))),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(McpError::Transport(format!(
                    "{} timed out after {}s",
                    method,
                    wait.as_secs()
                )))
            }
        }
    }

    async fn notify(&self, method: &str, params: Value) -> Result<(), McpError> {
        let body = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        });
        let mut stdin = self.stdin.lock().await;
        write_line(&mut stdin, &body)
            .await
            .map_err(|e| McpError::Transport(format!("write {}: {}", method, e)))
    }
}

async fn write_line(stdin: &mut ChildStdin, body: &Value) -> std::io::Result<()> {
    let mut line = serde_json::to_string(body)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    line.push('\n');
    stdin.write_all(line.as_bytes()).await?;
    stdin.flush().await
}

/// 从 tools/call 结果中抽取文本内容；无文本项时回退为整个 result 的 JSON
fn extract_content_text(result: &Value) -> String {
    let texts: Vec<&str> = result
        .get("content")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("text").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default();

    if texts.is_empty() {
        result.to_string()
    } else {
        texts.join("\n")
    }
}

#[async_trait]
impl ToolSession for StdioSession {
    async fn list_tools(&self) -> Result<ToolCatalogue, McpError> {
        let response = self
            .request("tools/list", json!({}), self.request_timeout)
            .await?;
        if let Some(err) = response.get("error") {
            return Err(McpError::Protocol(format!("tools/list failed: {}", err)));
        }
        let result = response
            .get("result")
            .cloned()
            .ok_or_else(|| McpError::Protocol("tools/list response missing result".to_string()))?;
        serde_json::from_value(result)
            .map_err(|e| McpError::Protocol(format!("decoding tool catalogue: {}", e)))
    }

    async fn invoke(&self, name: &str, arguments: Value) -> Result<String, McpError> {
        let params = json!({"name": name, "arguments": arguments});
        let response = self
            .request("tools/call", params, self.request_timeout)
            .await?;

        if let Some(err) = response.get("error") {
            let message = err
                .get("message")
                .and_then(Value::as_str)
                .map(String::from)
                .unwrap_or_else(|| err.to_string());
            return Err(McpError::Tool(format!("{}: {}", name, message)));
        }

        let result = response
            .get("result")
            .cloned()
            .ok_or_else(|| McpError::Protocol("tools/call response missing result".to_string()))?;

        let text = extract_content_text(&result);
        let is_error = result
            .get("isError")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if is_error {
            return Err(McpError::Tool(format!("{}: {}", name, text)));
        }
        Ok(text)
    }
}
