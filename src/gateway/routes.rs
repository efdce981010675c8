//! HTTP 网关路由
//!
//! POST /mcp 接收 {input, history}，以 NDJSON 逐行返回执行事件（tool_call 即时、
//! final/error 收尾，final 输出经相对时间改写）；GET /health 区分会话就绪与重连中。
//! Content-Type 沿用 application/json 以兼容既有客户端，按行解析即可。

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::json;

use crate::agent::AgentEvent;
use crate::chat::{history_to_messages, HistoryTurn};
use crate::core::{AgentRequest, McpSupervisor};

use super::timefmt::replace_iso8601_with_relative;

/// 网关共享状态
pub struct GatewayState {
    pub supervisor: Arc<McpSupervisor>,
}

/// 构建 axum 应用
pub fn build_router(supervisor: Arc<McpSupervisor>) -> Router {
    let state = Arc::new(GatewayState { supervisor });
    Router::new()
        .route("/mcp", post(api_mcp))
        .route("/health", get(api_health))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct McpRequestBody {
    #[serde(default)]
    input: String,
    #[serde(default)]
    history: Vec<HistoryTurn>,
}

/// GET /health：会话就绪信号（"ready" / "reconnecting"）
async fn api_health(State(state): State<Arc<GatewayState>>) -> Json<serde_json::Value> {
    let session = if state.supervisor.is_ready() {
        "ready"
    } else {
        "reconnecting"
    };
    Json(json!({"status": "ok", "session": session}))
}

/// POST /mcp：流式处理请求，每个事件一行 JSON
async fn api_mcp(
    State(state): State<Arc<GatewayState>>,
    Json(body): Json<McpRequestBody>,
) -> Response {
    if body.input.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "Missing 'input'"})),
        )
            .into_response();
    }

    let request =
        AgentRequest::new(body.input).with_history(history_to_messages(&body.history));
    let events = state.supervisor.stream(request);

    let lines = futures_util::stream::unfold(events, |mut rx| async move {
        rx.recv().await.map(|ev| (event_line(ev), rx))
    })
    .map(Ok::<Bytes, Infallible>);

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from_stream(lines))
        .unwrap()
}

/// 序列化单个事件为一行 NDJSON；仅 final 输出做时间戳后处理
fn event_line(ev: AgentEvent) -> Bytes {
    let ev = match ev {
        AgentEvent::Final { output } => AgentEvent::Final {
            output: replace_iso8601_with_relative(&output),
        },
        other => other,
    };
    let mut line = serde_json::to_string(&ev)
        .unwrap_or_else(|_| r#"{"type":"error","error":"event serialization failed"}"#.to_string());
    line.push('\n');
    Bytes::from(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_event_line_is_ndjson() {
        let line = event_line(AgentEvent::ToolCall {
            name: "getJiraIssue".into(),
            args: json!({"issue": "DE-3"}),
        });
        let text = std::str::from_utf8(&line).unwrap();
        assert!(text.ends_with('\n'));
        let parsed: Value = serde_json::from_str(text.trim()).unwrap();
        assert_eq!(parsed["type"], "tool_call");
        assert_eq!(parsed["name"], "getJiraIssue");
    }

    #[test]
    fn test_event_line_rewrites_final_timestamps() {
        let ts = (chrono::Utc::now() - chrono::Duration::minutes(2))
            .format("%Y-%m-%dT%H:%M:%SZ")
            .to_string();
        let line = event_line(AgentEvent::Final {
            output: format!("updated {}", ts),
        });
        let text = std::str::from_utf8(&line).unwrap();
        assert!(text.contains("2 minutes ago"));
        assert!(!text.contains(&ts));
    }

    #[test]
    fn test_event_line_leaves_error_untouched() {
        let line = event_line(AgentEvent::Error {
            error: "boom".into(),
        });
        let parsed: Value = serde_json::from_str(std::str::from_utf8(&line).unwrap()).unwrap();
        assert_eq!(parsed["type"], "error");
        assert_eq!(parsed["error"], "boom");
    }
}
