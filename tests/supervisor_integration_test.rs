//! 会话监管集成测试
//!
//! 用 Mock 连接器与 Mock LLM 验证：请求串行化、退避重连与归位、NotReady 快速失败、
//! 端到端事件序列、终止事件唯一性、步数上限与流空闲超时。

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;

    use wasp::agent::AgentEvent;
    use wasp::core::{AgentError, AgentRequest, McpSupervisor, SupervisorConfig, TierClients};
    use wasp::llm::{LlmClient, MockLlmClient, ScriptedLlmClient};
    use wasp::mcp::{McpError, MockConnector, MockResponse, MockToolSession, ToolSession};

    fn test_config() -> SupervisorConfig {
        SupervisorConfig {
            max_steps: 6,
            ..SupervisorConfig::default()
        }
    }

    async fn collect_events(mut rx: tokio::sync::mpsc::Receiver<AgentEvent>) -> Vec<AgentEvent> {
        let mut events = Vec::new();
        while let Some(ev) = rx.recv().await {
            let terminal = ev.is_terminal();
            events.push(ev);
            if terminal {
                break;
            }
        }
        events
    }

    fn terminal_count(events: &[AgentEvent]) -> usize {
        events.iter().filter(|e| e.is_terminal()).count()
    }

    #[tokio::test]
    async fn test_concurrent_submits_never_interleave() {
        let session = Arc::new(
            MockToolSession::new()
                .with_tool("stepA", "first step")
                .with_tool("stepB", "second step"),
        );

        // 共享脚本：每个请求消费「路由 + 两次工具调用 + 最终回复」四条。
        // 若两次执行在会话上交错，调用序列将不再是成对的 A/B。
        let mut script = Vec::new();
        for run in 1..=3 {
            script.push("fast".to_string());
            script.push(format!(r#"{{"tool": "stepA", "arguments": {{"run": {run}}}}}"#));
            script.push(format!(r#"{{"tool": "stepB", "arguments": {{"run": {run}}}}}"#));
            script.push(format!("done {run}"));
        }
        let llm: Arc<dyn LlmClient> = Arc::new(ScriptedLlmClient::sequence(script));

        let supervisor = McpSupervisor::start(
            Arc::new(MockConnector::always(Arc::clone(&session))),
            TierClients::uniform(llm),
            test_config(),
        );
        assert!(supervisor.wait_ready().await);

        let supervisor = Arc::new(supervisor);
        let mut handles = Vec::new();
        for i in 0..3 {
            let sup = Arc::clone(&supervisor);
            handles.push(tokio::spawn(async move {
                sup.submit(AgentRequest::new(format!("request {}", i))).await
            }));
        }

        let mut outputs = Vec::new();
        for handle in handles {
            outputs.push(handle.await.unwrap().unwrap());
        }

        // 恰好 N 个终止结果
        assert_eq!(outputs.len(), 3);
        for run in 1..=3 {
            assert!(outputs.contains(&format!("done {run}")));
        }

        // 调用序列成对出现：stepA(run) 紧跟 stepB(run)，绝不交错
        let invocations = session.invocations();
        assert_eq!(invocations.len(), 6);
        for pair in invocations.chunks(2) {
            assert_eq!(pair[0].0, "stepA");
            assert_eq!(pair[1].0, "stepB");
            assert_eq!(pair[0].1["run"], pair[1].1["run"]);
        }

        supervisor.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_fails_fast_when_unreachable() {
        let supervisor = McpSupervisor::start(
            Arc::new(MockConnector::always_fail()),
            TierClients::uniform(Arc::new(MockLlmClient)),
            test_config(),
        );

        // 就绪等待在上限内返回 false，而不是挂起
        let started = tokio::time::Instant::now();
        assert!(!supervisor.wait_ready().await);
        assert!(started.elapsed() <= Duration::from_secs(31));

        let err = supervisor.submit(AgentRequest::new("anything")).await.unwrap_err();
        assert!(matches!(err, AgentError::NotReady));

        // stream 同样立即以 error 事件收尾
        let events = collect_events(supervisor.stream(AgentRequest::new("anything"))).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            AgentEvent::Error { error } if error.contains("not ready")
        ));

        supervisor.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_backoff_then_reset_after_success() {
        let session = Arc::new(MockToolSession::new().with_tool("echo", "echo back"));
        // 第一次会话期间让 echo 触发传输断开，迫使重连
        session.script("echo", MockResponse::Transport("broken pipe".into()));

        // 连接结果序列：3 次失败 -> 成功 -> 1 次失败 -> 此后成功
        let attempts = Arc::new(AtomicUsize::new(0));
        let connector = {
            let session = Arc::clone(&session);
            let attempts = Arc::clone(&attempts);
            MockConnector::with(move || {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                match n {
                    0 | 1 | 2 | 4 => Err(McpError::Transport("connection refused".into())),
                    _ => Ok(Arc::clone(&session) as Arc<dyn ToolSession>),
                }
            })
        };

        let supervisor = McpSupervisor::start(
            Arc::new(connector),
            TierClients::uniform(Arc::new(MockLlmClient)),
            test_config(),
        );

        // 退避 1s + 2s + 4s 后第 4 次尝试成功
        let started = tokio::time::Instant::now();
        assert!(supervisor.wait_ready().await);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(7), "elapsed {:?}", elapsed);
        assert!(elapsed < Duration::from_secs(8), "elapsed {:?}", elapsed);

        // 执行中的请求因传输断开以终止错误收尾
        let err = supervisor.submit(AgentRequest::new("hello")).await.unwrap_err();
        assert!(matches!(err, AgentError::RunFailed(_)));

        // 等待会话标记为断开
        while supervisor.is_ready() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        // 退避已归位：一次失败（1s）后即恢复就绪；若未归位需 8s
        let started = tokio::time::Instant::now();
        assert!(supervisor.wait_ready().await);
        assert!(started.elapsed() < Duration::from_secs(2));

        // 新会话照常服务
        let output = supervisor.submit(AgentRequest::new("again")).await.unwrap();
        assert_eq!(output, "Echo from Mock: again");

        supervisor.stop().await;
    }

    #[tokio::test]
    async fn test_queued_request_survives_reconnect() {
        let session = Arc::new(MockToolSession::new().with_tool("echo", "echo back"));
        // 第一个请求的工具调用断开传输；第二个请求在新会话上正常完成
        session.script("echo", MockResponse::Transport("broken pipe".into()));

        let supervisor = McpSupervisor::start(
            Arc::new(MockConnector::always(Arc::clone(&session))),
            TierClients::uniform(Arc::new(MockLlmClient)),
            test_config(),
        );
        assert!(supervisor.wait_ready().await);

        // stream 同步入队，FIFO 顺序确定：first 在旧会话上失败，second 排队等待新会话
        let rx_first = supervisor.stream(AgentRequest::new("first"));
        let rx_second = supervisor.stream(AgentRequest::new("second"));

        let first_events = collect_events(rx_first).await;
        assert_eq!(terminal_count(&first_events), 1);
        assert!(matches!(
            first_events.last(),
            Some(AgentEvent::Error { error }) if error.contains("transport")
        ));

        let second_events = collect_events(rx_second).await;
        assert_eq!(terminal_count(&second_events), 1);
        assert!(matches!(
            second_events.last(),
            Some(AgentEvent::Final { output }) if output == "Echo from Mock: second"
        ));

        supervisor.stop().await;
    }

    #[tokio::test]
    async fn test_end_to_end_move_ticket() {
        let session = Arc::new(
            MockToolSession::new()
                .with_tool("transitionJiraIssue", "Transition an issue to a new status"),
        );
        session.script(
            "transitionJiraIssue",
            MockResponse::Text(r#"{"ok": true}"#.into()),
        );

        let clients = TierClients {
            router: Arc::new(ScriptedLlmClient::fixed("fast")),
            fast: Arc::new(ScriptedLlmClient::sequence(vec![
                r#"{"tool": "transitionJiraIssue", "arguments": {"issueIdOrKey": "DE-3", "transition": "Done"}}"#
                    .into(),
                "The ticket DE-3 has been successfully moved to 'Done'.".into(),
            ])),
            smart: Arc::new(ScriptedLlmClient::failing("smart tier must not be used")),
            complex: Arc::new(ScriptedLlmClient::failing("complex tier must not be used")),
        };

        let supervisor = McpSupervisor::start(
            Arc::new(MockConnector::always(Arc::clone(&session))),
            clients,
            test_config(),
        );
        assert!(supervisor.wait_ready().await);

        let events =
            collect_events(supervisor.stream(AgentRequest::new("move DE-3 to Done"))).await;

        assert_eq!(events.len(), 2);
        match &events[0] {
            AgentEvent::ToolCall { name, args } => {
                assert_eq!(name, "transitionJiraIssue");
                assert_eq!(args["issueIdOrKey"], json!("DE-3"));
            }
            other => panic!("expected tool_call first, got {:?}", other),
        }
        match &events[1] {
            AgentEvent::Final { output } => {
                assert_eq!(output, "The ticket DE-3 has been successfully moved to 'Done'.");
            }
            other => panic!("expected final last, got {:?}", other),
        }

        supervisor.stop().await;
    }

    #[tokio::test]
    async fn test_tool_fault_still_exactly_one_terminal() {
        let session = Arc::new(MockToolSession::new().with_tool("getJiraIssue", "fetch issue"));
        session.script("getJiraIssue", MockResponse::ToolError("permission denied".into()));

        let clients = TierClients {
            router: Arc::new(ScriptedLlmClient::fixed("fast")),
            fast: Arc::new(ScriptedLlmClient::sequence(vec![
                r#"{"tool": "getJiraIssue", "arguments": {"issue": "DE-9"}}"#.into(),
                "I could not read DE-9: permission denied.".into(),
            ])),
            smart: Arc::new(ScriptedLlmClient::failing("unused")),
            complex: Arc::new(ScriptedLlmClient::failing("unused")),
        };

        let supervisor = McpSupervisor::start(
            Arc::new(MockConnector::always(session)),
            clients,
            test_config(),
        );
        assert!(supervisor.wait_ready().await);

        let events = collect_events(supervisor.stream(AgentRequest::new("read DE-9"))).await;
        assert_eq!(terminal_count(&events), 1);
        assert!(matches!(events.last(), Some(AgentEvent::Final { .. })));

        supervisor.stop().await;
    }

    #[tokio::test]
    async fn test_loop_bound_surfaces_as_error_event() {
        let session = Arc::new(MockToolSession::new().with_tool("echo", "echo back"));

        let clients = TierClients {
            router: Arc::new(ScriptedLlmClient::fixed("fast")),
            fast: Arc::new(ScriptedLlmClient::fixed(
                r#"{"tool": "echo", "arguments": {}}"#,
            )),
            smart: Arc::new(ScriptedLlmClient::failing("unused")),
            complex: Arc::new(ScriptedLlmClient::failing("unused")),
        };

        let config = SupervisorConfig {
            max_steps: 3,
            ..SupervisorConfig::default()
        };
        let supervisor = McpSupervisor::start(
            Arc::new(MockConnector::always(session)),
            clients,
            config,
        );
        assert!(supervisor.wait_ready().await);

        let events = collect_events(supervisor.stream(AgentRequest::new("loop forever"))).await;
        assert_eq!(terminal_count(&events), 1);
        match events.last() {
            Some(AgentEvent::Error { error }) => assert!(error.contains("3 steps")),
            other => panic!("expected error terminal, got {:?}", other),
        }

        // 进程未受影响：Supervisor 仍然就绪
        assert!(supervisor.is_ready());

        supervisor.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_idle_timeout_terminates_stream() {
        let session = Arc::new(MockToolSession::new().with_tool("echo", "echo back"));

        let clients = TierClients {
            router: Arc::new(ScriptedLlmClient::fixed("fast")),
            fast: Arc::new(ScriptedLlmClient::stalled()),
            smart: Arc::new(ScriptedLlmClient::failing("unused")),
            complex: Arc::new(ScriptedLlmClient::failing("unused")),
        };

        let supervisor = McpSupervisor::start(
            Arc::new(MockConnector::always(session)),
            clients,
            test_config(),
        );
        assert!(supervisor.wait_ready().await);

        let events = collect_events(supervisor.stream(AgentRequest::new("hang"))).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            AgentEvent::Error { error } if error.contains("Stream timeout")
        ));

        supervisor.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_in_flight_run() {
        let session = Arc::new(MockToolSession::new().with_tool("echo", "echo back"));

        let clients = TierClients {
            router: Arc::new(ScriptedLlmClient::fixed("fast")),
            fast: Arc::new(ScriptedLlmClient::stalled()),
            smart: Arc::new(ScriptedLlmClient::failing("unused")),
            complex: Arc::new(ScriptedLlmClient::failing("unused")),
        };

        let supervisor = McpSupervisor::start(
            Arc::new(MockConnector::always(session)),
            clients,
            test_config(),
        );
        assert!(supervisor.wait_ready().await);

        let mut rx = supervisor.stream(AgentRequest::new("hang"));
        tokio::time::sleep(Duration::from_millis(50)).await;

        supervisor.stop().await;

        let ev = rx.recv().await.expect("in-flight run must get a terminal event");
        assert!(matches!(
            ev,
            AgentEvent::Error { ref error } if error.contains("Cancelled")
        ));
    }
}
