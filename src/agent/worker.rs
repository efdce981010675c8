//! 执行循环
//!
//! 单个层级的工具调用主循环：LLM 给出下一步（最终回复或 JSON Tool Call）->
//! 经会话调用工具 -> 结果写回上下文 -> 下一轮，直到产出最终回复或触顶步数限制。
//! 工具失败与参数非法折叠为 Observation 文本继续循环；传输断开与 LLM 失败终止本次执行。

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::chat::Message;
use crate::core::AgentError;
use crate::llm::LlmClient;
use crate::mcp::{parse_tool_arguments, McpError, ToolSession};

use super::events::AgentEvent;
use super::router::RouteTier;

/// LLM 输出中的工具调用 JSON（arguments 可为对象或内联字符串，也接受 "args" 键）
#[derive(Debug, Clone, Deserialize)]
struct RawToolCall {
    tool: String,
    #[serde(default, alias = "args")]
    arguments: Value,
}

/// 解析后的单步动作
#[derive(Debug, Clone)]
pub(crate) enum WorkerStep {
    /// 直接回复用户
    Final(String),
    /// 需要调用工具
    ToolCall { tool: String, arguments: Value },
}

/// 解析 LLM 输出：若含有效 JSON 且 tool 非空则为 ToolCall，否则为最终回复
pub(crate) fn parse_worker_output(output: &str) -> Result<WorkerStep, AgentError> {
    let trimmed = output.trim();

    // 尝试提取 JSON 块（```json ... ``` 或纯 JSON）
    let json_str = if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        rest.find("```")
            .map(|end| rest[..end].trim())
            .unwrap_or(rest.trim())
    } else if let Some(start) = trimmed.find('{') {
        if let Some(end) = trimmed.rfind('}') {
            &trimmed[start..=end]
        } else {
            trimmed
        }
    } else {
        return Ok(WorkerStep::Final(trimmed.to_string()));
    };

    let parsed: RawToolCall = serde_json::from_str(json_str)
        .map_err(|e| AgentError::JsonParseError(format!("{}: {}", e, json_str)))?;

    if parsed.tool.is_empty() {
        Ok(WorkerStep::Final(trimmed.to_string()))
    } else {
        Ok(WorkerStep::ToolCall {
            tool: parsed.tool,
            arguments: parsed.arguments,
        })
    }
}

/// 单层级执行器：绑定该层级的 LLM、当前会话与会话期 system prompt
pub struct ExecutionWorker {
    tier: RouteTier,
    llm: Arc<dyn LlmClient>,
    session: Arc<dyn ToolSession>,
    system_prompt: Arc<str>,
    max_steps: usize,
}

impl ExecutionWorker {
    pub fn new(
        tier: RouteTier,
        llm: Arc<dyn LlmClient>,
        session: Arc<dyn ToolSession>,
        system_prompt: Arc<str>,
        max_steps: usize,
    ) -> Self {
        Self {
            tier,
            llm,
            session,
            system_prompt,
            max_steps,
        }
    }

    pub fn tier(&self) -> RouteTier {
        self.tier
    }

    /// 执行一次请求：tool_call 事件在每次工具调用返回前发出；
    /// 成功返回最终回复文本，终止性失败返回错误（调用方负责发终止事件）。
    pub async fn run(
        &self,
        input: &str,
        history: &[Message],
        events: &mpsc::Sender<AgentEvent>,
    ) -> Result<String, AgentError> {
        let mut messages: Vec<Message> = Vec::with_capacity(history.len() + 2);
        messages.push(Message::system(self.system_prompt.to_string()));
        messages.extend_from_slice(history);
        messages.push(Message::user(input));

        for step in 0..self.max_steps {
            let output = self
                .llm
                .complete(&messages)
                .await
                .map_err(AgentError::LlmError)?;

            match parse_worker_output(&output) {
                Ok(WorkerStep::Final(text)) => {
                    tracing::debug!(tier = self.tier.as_str(), step, "run finished");
                    return Ok(text);
                }
                Ok(WorkerStep::ToolCall { tool, arguments }) => {
                    let observation = match parse_tool_arguments(&arguments) {
                        Ok(args) => {
                            // 事件先于调用返回发出
                            let _ = events
                                .send(AgentEvent::ToolCall {
                                    name: tool.clone(),
                                    args: args.clone(),
                                })
                                .await;
                            tracing::info!(tier = self.tier.as_str(), tool = %tool, step, "invoking MCP tool");
                            match self.session.invoke(&tool, args).await {
                                Ok(result) => result,
                                Err(McpError::Transport(reason)) => {
                                    return Err(AgentError::Transport(reason));
                                }
                                // 工具级失败：转为文本喂回循环，LLM 可调整或致歉
                                Err(e) => format!("Error: {}", e),
                            }
                        }
                        // 参数非法：拒绝本次调用（不发 tool_call 事件），循环继续
                        Err(e) => {
                            tracing::warn!(tool = %tool, "rejected invocation: {}", e);
                            format!("Error: {}", e)
                        }
                    };

                    // 将工具调用与结果写回对话，供下一轮使用
                    messages.push(Message::assistant(format!(
                        "Tool call: {} | Result: {}",
                        tool, observation
                    )));
                    messages.push(Message::user(format!(
                        "Observation from {}: {}",
                        tool, observation
                    )));
                }
                Err(e) => {
                    // 工具调用 JSON 解析失败：注入纠正提示让 LLM 重试（计入步数）
                    tracing::warn!(tier = self.tier.as_str(), step, "unparseable tool call: {}", e);
                    messages.push(Message::assistant(output.clone()));
                    messages.push(Message::user(format!(
                        "Your tool call could not be parsed ({}). Reply with one valid JSON object \
                         {{\"tool\": \"...\", \"arguments\": {{...}}}} or a plain-text final answer.",
                        e
                    )));
                }
            }
        }

        Err(AgentError::StepLimitExceeded(self.max_steps))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlmClient;
    use crate::mcp::{MockResponse, MockToolSession};
    use serde_json::json;

    fn worker_with(
        llm: ScriptedLlmClient,
        session: Arc<MockToolSession>,
        max_steps: usize,
    ) -> ExecutionWorker {
        ExecutionWorker::new(
            RouteTier::Fast,
            Arc::new(llm),
            session,
            Arc::from("You are a test assistant."),
            max_steps,
        )
    }

    #[test]
    fn test_parse_plain_text_is_final() {
        let step = parse_worker_output("The ticket has been moved.").unwrap();
        assert!(matches!(step, WorkerStep::Final(_)));
    }

    #[test]
    fn test_parse_fenced_json_tool_call() {
        let step = parse_worker_output(
            "```json\n{\"tool\": \"getJiraIssue\", \"arguments\": {\"issue\": \"DE-3\"}}\n```",
        )
        .unwrap();
        match step {
            WorkerStep::ToolCall { tool, arguments } => {
                assert_eq!(tool, "getJiraIssue");
                assert_eq!(arguments, json!({"issue": "DE-3"}));
            }
            other => panic!("expected tool call, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_accepts_args_alias() {
        let step =
            parse_worker_output(r#"{"tool": "echo", "args": {"text": "hi"}}"#).unwrap();
        assert!(matches!(step, WorkerStep::ToolCall { .. }));
    }

    #[test]
    fn test_parse_malformed_json_is_error() {
        let err = parse_worker_output(r#"{"tool": "echo", "arguments": {"#).unwrap_err();
        assert!(matches!(err, AgentError::JsonParseError(_)));
    }

    #[test]
    fn test_parse_empty_tool_falls_back_to_final() {
        let step = parse_worker_output(r#"{"tool": "", "arguments": {}}"#).unwrap();
        assert!(matches!(step, WorkerStep::Final(_)));
    }

    #[tokio::test]
    async fn test_run_tool_call_then_final() {
        let session = Arc::new(MockToolSession::new().with_tool("getJiraIssue", "fetch issue"));
        session.script("getJiraIssue", MockResponse::Text("DE-3: In Progress".into()));

        let llm = ScriptedLlmClient::sequence(vec![
            r#"{"tool": "getJiraIssue", "arguments": {"issue": "DE-3"}}"#.into(),
            "DE-3 is currently In Progress.".into(),
        ]);
        let worker = worker_with(llm, Arc::clone(&session), 5);

        let (tx, mut rx) = mpsc::channel(16);
        let output = worker.run("what's DE-3?", &[], &tx).await.unwrap();
        assert_eq!(output, "DE-3 is currently In Progress.");

        let ev = rx.try_recv().unwrap();
        assert!(matches!(ev, AgentEvent::ToolCall { ref name, .. } if name == "getJiraIssue"));
        assert_eq!(session.invocation_count(), 1);
    }

    #[tokio::test]
    async fn test_run_tool_fault_is_folded_not_fatal() {
        let session = Arc::new(MockToolSession::new().with_tool("getJiraIssue", "fetch issue"));
        session.script("getJiraIssue", MockResponse::ToolError("permission denied".into()));

        let llm = ScriptedLlmClient::sequence(vec![
            r#"{"tool": "getJiraIssue", "arguments": {}}"#.into(),
            "Sorry, I could not access that issue.".into(),
        ]);
        let worker = worker_with(llm, session, 5);

        let (tx, _rx) = mpsc::channel(16);
        let output = worker.run("read DE-3", &[], &tx).await.unwrap();
        assert!(output.contains("could not access"));
    }

    #[tokio::test]
    async fn test_run_invalid_arguments_rejected_and_loop_continues() {
        let session = Arc::new(MockToolSession::new().with_tool("getJiraIssue", "fetch issue"));

        let llm = ScriptedLlmClient::sequence(vec![
            r#"{"tool": "getJiraIssue", "arguments": "{not json"}"#.into(),
            "Giving up politely.".into(),
        ]);
        let worker = worker_with(llm, Arc::clone(&session), 5);

        let (tx, mut rx) = mpsc::channel(16);
        let output = worker.run("read DE-3", &[], &tx).await.unwrap();
        assert_eq!(output, "Giving up politely.");
        // 被拒绝的调用不触达工具，也不发 tool_call 事件
        assert_eq!(session.invocation_count(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_run_step_limit() {
        let session = Arc::new(MockToolSession::new().with_tool("echo", "echo"));
        let llm = ScriptedLlmClient::fixed(r#"{"tool": "echo", "arguments": {}}"#);
        let worker = worker_with(llm, session, 3);

        let (tx, _rx) = mpsc::channel(16);
        let err = worker.run("loop forever", &[], &tx).await.unwrap_err();
        assert!(matches!(err, AgentError::StepLimitExceeded(3)));
    }

    #[tokio::test]
    async fn test_run_transport_fault_is_terminal() {
        let session = Arc::new(MockToolSession::new().with_tool("echo", "echo"));
        session.script("echo", MockResponse::Transport("broken pipe".into()));

        let llm = ScriptedLlmClient::fixed(r#"{"tool": "echo", "arguments": {}}"#);
        let worker = worker_with(llm, session, 5);

        let (tx, _rx) = mpsc::channel(16);
        let err = worker.run("anything", &[], &tx).await.unwrap_err();
        assert!(err.is_transport());
    }
}
