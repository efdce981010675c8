//! Wasp 网关入口
//!
//! 启动: cargo run
//! 健康检查 GET /health；请求入口 POST /mcp（NDJSON 流式响应）

use std::sync::Arc;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use wasp::config::{load_config, AppConfig, TierEntry};
use wasp::core::{McpSupervisor, ShutdownManager, SupervisorConfig, TierClients};
use wasp::gateway::build_router;
use wasp::llm::{LlmClient, OpenAiClient};
use wasp::mcp::StdioConnector;

/// 按层级配置创建 OpenAI 兼容客户端
fn create_tier_client(entry: &TierEntry) -> Arc<dyn LlmClient> {
    tracing::info!(model = %entry.model, "tier LLM configured");
    Arc::new(OpenAiClient::from_tier(entry))
}

fn create_tier_clients(cfg: &AppConfig) -> TierClients {
    TierClients {
        router: create_tier_client(&cfg.llm.router),
        fast: create_tier_client(&cfg.llm.fast),
        smart: create_tier_client(&cfg.llm.smart),
        complex: create_tier_client(&cfg.llm.complex),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .with(fmt::layer())
        .init();

    let cfg = load_config(None).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });

    let connector = Arc::new(StdioConnector::new(cfg.mcp.clone()));
    let clients = create_tier_clients(&cfg);
    let supervisor = Arc::new(McpSupervisor::start(
        connector,
        clients,
        SupervisorConfig::from(&cfg),
    ));

    // 阻塞到首个会话就绪（或超时）；超时不致命，期间请求返回 NotReady
    if supervisor.wait_ready().await {
        tracing::info!("MCP session established");
    }

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();

    let app = build_router(Arc::clone(&supervisor));
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], cfg.web.port));
    tracing::info!("Wasp gateway: http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let shutdown_wait = Arc::clone(&shutdown);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown_wait.wait_for_shutdown().await })
        .await?;

    supervisor.stop().await;

    Ok(())
}
