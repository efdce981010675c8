//! 会话监管：MCP 会话生命周期、退避重连与请求队列
//!
//! 单个后台任务独占 MCP 会话与 Router/Worker 绑定：建立连接 -> 拉取工具目录 ->
//! 预取会话上下文 -> 整体构建 SessionChain -> 标记就绪并按 FIFO 消费请求队列。
//! 任意环节失败则整体丢弃部分状态，按指数退避（1s 起翻倍、封顶 30s、成功归位）
//! 无限重试：远端损坏只表现为「请求失败直到重连成功」，不终止进程。
//! 排队未开始的请求跨重连保留；会话断开时执行中的请求以终止错误收尾。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::agent::{build_worker_system, AgentEvent, ExecutionWorker, RouteTier, Router};
use crate::chat::Message;
use crate::config::AppConfig;
use crate::core::AgentError;
use crate::llm::LlmClient;
use crate::mcp::{McpError, SessionConnector, SessionContext};

/// 一次用户请求：输入 + 只读历史快照（提交后核心不再修改）
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub input: String,
    pub history: Vec<Message>,
}

impl AgentRequest {
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            history: Vec::new(),
        }
    }

    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }
}

/// 各层级 LLM 客户端：进程生命周期内复用，会话绑定每次重连重建
#[derive(Clone)]
pub struct TierClients {
    pub router: Arc<dyn LlmClient>,
    pub fast: Arc<dyn LlmClient>,
    pub smart: Arc<dyn LlmClient>,
    pub complex: Arc<dyn LlmClient>,
}

impl TierClients {
    /// 全部层级共用同一客户端（测试与单模型部署）
    pub fn uniform(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            router: Arc::clone(&llm),
            fast: Arc::clone(&llm),
            smart: Arc::clone(&llm),
            complex: llm,
        }
    }
}

/// Supervisor 行为参数
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// start 后等待首个会话就绪的上限
    pub ready_timeout: Duration,
    /// submit 的总等待上限
    pub submit_timeout: Duration,
    /// stream 相邻事件间的空闲上限
    pub stream_idle_timeout: Duration,
    /// stop 等待后台任务退出的宽限期
    pub shutdown_grace: Duration,
    /// 重连退避下限 / 上限
    pub backoff_floor: Duration,
    pub backoff_cap: Duration,
    /// 单次请求内工具循环最大步数
    pub max_steps: usize,
    /// 事件通道容量
    pub event_buffer: usize,
    /// 目录过滤：名称含任一子串的工具不展示给 LLM
    pub excluded_tools: Vec<String>,
    /// 每次重连后预取的上下文工具
    pub context_tools: Vec<String>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            ready_timeout: Duration::from_secs(30),
            submit_timeout: Duration::from_secs(120),
            stream_idle_timeout: Duration::from_secs(300),
            shutdown_grace: Duration::from_secs(5),
            backoff_floor: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(30),
            max_steps: 12,
            event_buffer: 64,
            excluded_tools: Vec::new(),
            context_tools: Vec::new(),
        }
    }
}

impl From<&AppConfig> for SupervisorConfig {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            ready_timeout: Duration::from_secs(cfg.supervisor.ready_timeout_secs),
            submit_timeout: Duration::from_secs(cfg.supervisor.submit_timeout_secs),
            stream_idle_timeout: Duration::from_secs(cfg.supervisor.stream_idle_timeout_secs),
            shutdown_grace: Duration::from_secs(cfg.supervisor.shutdown_grace_secs),
            backoff_floor: Duration::from_secs(cfg.supervisor.backoff_floor_secs),
            backoff_cap: Duration::from_secs(cfg.supervisor.backoff_cap_secs),
            max_steps: cfg.supervisor.max_steps,
            event_buffer: cfg.supervisor.event_buffer,
            excluded_tools: cfg.mcp.excluded_tools.clone(),
            context_tools: cfg.mcp.context_tools.clone(),
        }
    }
}

/// 队列中的一项：请求 + 事件发送端
struct Job {
    id: String,
    request: AgentRequest,
    events: mpsc::Sender<AgentEvent>,
}

/// serve 循环的退出原因
enum ServeOutcome {
    /// 收到关闭信号
    Stop,
    /// 会话传输断开，需要重连
    SessionLost(String),
}

/// 一条会话的完整绑定：路由器 + 每层级一个执行器。
/// 整体构建、整体丢弃，对外不可见半重建状态。
struct SessionChain {
    router: Router,
    fast: ExecutionWorker,
    smart: ExecutionWorker,
    complex: ExecutionWorker,
}

impl SessionChain {
    fn worker(&self, tier: RouteTier) -> &ExecutionWorker {
        match tier {
            RouteTier::Fast => &self.fast,
            RouteTier::Smart => &self.smart,
            RouteTier::Complex => &self.complex,
        }
    }

    async fn execute(&self, job: &Job) -> Result<String, AgentError> {
        let tier = self.router.classify(&job.request.input).await;
        tracing::info!(request = %job.id, tier = tier.as_str(), "route decided");
        self.worker(tier)
            .run(&job.request.input, &job.request.history, &job.events)
            .await
    }
}

/// 会话监管器：对外提供 submit / stream / 就绪信号 / 关闭
pub struct McpSupervisor {
    job_tx: mpsc::UnboundedSender<Job>,
    ready_rx: watch::Receiver<bool>,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
    config: SupervisorConfig,
}

impl McpSupervisor {
    /// 启动后台任务并立即返回；等待就绪用 wait_ready
    pub fn start(
        connector: Arc<dyn SessionConnector>,
        clients: TierClients,
        config: SupervisorConfig,
    ) -> Self {
        let (job_tx, job_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = watch::channel(false);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(run_loop(
            connector,
            clients,
            config.clone(),
            job_rx,
            ready_tx,
            cancel.clone(),
        ));

        Self {
            job_tx,
            ready_rx,
            cancel,
            handle: Mutex::new(Some(handle)),
            config,
        }
    }

    /// 当前是否有存活会话（false 即正在重连）
    pub fn is_ready(&self) -> bool {
        *self.ready_rx.borrow()
    }

    /// 等待首个会话就绪，超出 ready_timeout 返回 false。
    /// 超时不是致命错误：期间提交以 NotReady 失败，会话建好后自动恢复。
    pub async fn wait_ready(&self) -> bool {
        if self.is_ready() {
            return true;
        }
        let mut rx = self.ready_rx.clone();
        let wait = async {
            while rx.changed().await.is_ok() {
                if *rx.borrow() {
                    return true;
                }
            }
            false
        };
        match tokio::time::timeout(self.config.ready_timeout, wait).await {
            Ok(ready) => ready,
            Err(_) => {
                tracing::warn!(
                    "MCP session not ready within {}s, requests will fail until reconnected",
                    self.config.ready_timeout.as_secs()
                );
                false
            }
        }
    }

    /// 入队一个请求，返回其事件流。流中 tool_call 按发生顺序出现，
    /// 终止事件（final/error）恰好一个且总在最后；相邻事件空闲超限时以 error 收尾。
    pub fn stream(&self, request: AgentRequest) -> mpsc::Receiver<AgentEvent> {
        let (out_tx, out_rx) = mpsc::channel(self.config.event_buffer);

        // 无存活会话时立即失败，不对着死端点无界排队
        if !self.is_ready() {
            let _ = out_tx.try_send(AgentEvent::Error {
                error: AgentError::NotReady.to_string(),
            });
            return out_rx;
        }

        let (inner_tx, inner_rx) = mpsc::channel(self.config.event_buffer);
        let job = Job {
            id: uuid::Uuid::new_v4().to_string(),
            request,
            events: inner_tx,
        };
        if self.job_tx.send(job).is_err() {
            let _ = out_tx.try_send(AgentEvent::Error {
                error: AgentError::NotReady.to_string(),
            });
            return out_rx;
        }

        tokio::spawn(relay(inner_rx, out_tx, self.config.stream_idle_timeout));
        out_rx
    }

    /// 同步语义的提交：丢弃中间 tool_call，返回最终输出或错误。
    /// 总等待受 submit_timeout 约束；超时只结束本次等待，不破坏队列状态。
    pub async fn submit(&self, request: AgentRequest) -> Result<String, AgentError> {
        if !self.is_ready() {
            return Err(AgentError::NotReady);
        }
        let timeout_secs = self.config.submit_timeout.as_secs();
        let mut rx = self.stream(request);
        let collect = async move {
            while let Some(ev) = rx.recv().await {
                match ev {
                    AgentEvent::ToolCall { .. } => continue,
                    AgentEvent::Final { output } => return Ok(output),
                    AgentEvent::Error { error } => return Err(AgentError::RunFailed(error)),
                }
            }
            Err(AgentError::RunFailed(
                "event stream closed without terminal event".to_string(),
            ))
        };
        tokio::time::timeout(self.config.submit_timeout, collect)
            .await
            .unwrap_or(Err(AgentError::Timeout(timeout_secs)))
    }

    /// 触发关闭：取消执行中的工作，宽限期内等待后台任务退出，超时强制中止
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handle = self.handle.lock().await.take();
        if let Some(mut handle) = handle {
            match tokio::time::timeout(self.config.shutdown_grace, &mut handle).await {
                Ok(_) => tracing::info!("supervisor stopped"),
                Err(_) => {
                    tracing::warn!(
                        "supervisor did not exit within {}s, aborting",
                        self.config.shutdown_grace.as_secs()
                    );
                    handle.abort();
                }
            }
        }
    }
}

/// 事件中继：inner -> out，施加空闲超时并兜底「恰好一个终止事件」
async fn relay(
    mut inner: mpsc::Receiver<AgentEvent>,
    out: mpsc::Sender<AgentEvent>,
    idle: Duration,
) {
    let mut terminal_seen = false;
    loop {
        match tokio::time::timeout(idle, inner.recv()).await {
            Ok(Some(ev)) => {
                let is_terminal = ev.is_terminal();
                // 调用方离开后发送失败：义务到「已递交出站通道」为止，不重试
                if out.send(ev).await.is_err() {
                    return;
                }
                if is_terminal {
                    terminal_seen = true;
                    break;
                }
            }
            Ok(None) => break,
            Err(_) => {
                let _ = out
                    .send(AgentEvent::Error {
                        error: format!("Stream timeout: no event within {}s", idle.as_secs()),
                    })
                    .await;
                return;
            }
        }
    }
    if !terminal_seen {
        let _ = out.try_send(AgentEvent::Error {
            error: "event stream closed before completion".to_string(),
        });
    }
}

/// 后台主循环：重连 -> 建链 -> 消费队列；退出前对仍在排队的请求发终止错误
async fn run_loop(
    connector: Arc<dyn SessionConnector>,
    clients: TierClients,
    config: SupervisorConfig,
    mut jobs: mpsc::UnboundedReceiver<Job>,
    ready_tx: watch::Sender<bool>,
    cancel: CancellationToken,
) {
    let mut backoff = config.backoff_floor;
    loop {
        let established = tokio::select! {
            _ = cancel.cancelled() => break,
            result = establish(&*connector, &clients, &config) => result,
        };

        match established {
            Ok(chain) => {
                // 成功后退避归位
                backoff = config.backoff_floor;
                let _ = ready_tx.send(true);
                tracing::info!("MCP session ready");

                let outcome = serve(&chain, &mut jobs, &cancel).await;
                let _ = ready_tx.send(false);
                match outcome {
                    ServeOutcome::Stop => break,
                    ServeOutcome::SessionLost(reason) => {
                        tracing::warn!("MCP session lost: {}, reconnecting", reason);
                        // 旧链在此整体销毁，新链建成前对外不可见
                    }
                }
            }
            Err(e) => {
                tracing::warn!("MCP connect failed: {}, retrying in {:?}", e, backoff);
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff = (backoff * 2).min(config.backoff_cap);
            }
        }
    }

    jobs.close();
    while let Ok(job) = jobs.try_recv() {
        let _ = job.events.try_send(AgentEvent::Error {
            error: AgentError::Cancelled.to_string(),
        });
    }
    tracing::info!("supervisor exited");
}

/// 建立一条会话并构建完整绑定：连接、取目录（过滤）、预取上下文、拼 system prompt、
/// 创建路由器与各层级执行器。任意失败整体作废。
async fn establish(
    connector: &dyn SessionConnector,
    clients: &TierClients,
    config: &SupervisorConfig,
) -> Result<SessionChain, McpError> {
    let session = connector.connect().await?;

    let mut catalogue = session.list_tools().await?;
    let total = catalogue.len();
    catalogue.exclude_by_name(&config.excluded_tools);
    tracing::info!(total, visible = catalogue.len(), "tool catalogue fetched");

    // 预取会话上下文；单项工具级失败嵌入为 JSON 错误串，不阻断建链
    let mut context = SessionContext::default();
    for tool in &config.context_tools {
        let payload = match session.invoke(tool, serde_json::json!({})).await {
            Ok(p) => p,
            Err(e) if e.is_transport() => return Err(e),
            Err(e) => serde_json::json!({"error": format!("Error calling {}: {}", tool, e)})
                .to_string(),
        };
        context.push(tool.clone(), payload);
    }

    let system: Arc<str> = Arc::from(build_worker_system(&catalogue, &context));
    let make_worker = |tier: RouteTier, llm: &Arc<dyn LlmClient>| {
        ExecutionWorker::new(
            tier,
            Arc::clone(llm),
            Arc::clone(&session),
            Arc::clone(&system),
            config.max_steps,
        )
    };

    Ok(SessionChain {
        router: Router::new(Arc::clone(&clients.router)),
        fast: make_worker(RouteTier::Fast, &clients.fast),
        smart: make_worker(RouteTier::Smart, &clients.smart),
        complex: make_worker(RouteTier::Complex, &clients.complex),
    })
}

/// 消费队列直到关闭或会话断开。一次只执行一个请求：同一会话上请求绝不并发。
/// 终止事件（final/error）只在这里发出，保证每个请求恰好一个。
async fn serve(
    chain: &SessionChain,
    jobs: &mut mpsc::UnboundedReceiver<Job>,
    cancel: &CancellationToken,
) -> ServeOutcome {
    loop {
        let job = tokio::select! {
            _ = cancel.cancelled() => return ServeOutcome::Stop,
            job = jobs.recv() => match job {
                Some(job) => job,
                None => return ServeOutcome::Stop,
            },
        };

        tracing::info!(request = %job.id, "processing request");
        let result = tokio::select! {
            _ = cancel.cancelled() => {
                let _ = job.events.send(AgentEvent::Error {
                    error: AgentError::Cancelled.to_string(),
                }).await;
                return ServeOutcome::Stop;
            }
            result = chain.execute(&job) => result,
        };

        match result {
            Ok(output) => {
                let _ = job.events.send(AgentEvent::Final { output }).await;
            }
            Err(e) if e.is_transport() => {
                let _ = job.events.send(AgentEvent::Error { error: e.to_string() }).await;
                return ServeOutcome::SessionLost(e.to_string());
            }
            Err(e) => {
                tracing::warn!(request = %job.id, "run failed: {}", e);
                let _ = job.events.send(AgentEvent::Error { error: e.to_string() }).await;
            }
        }
    }
}
