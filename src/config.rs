//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `WASP__*` 覆盖（双下划线表示嵌套，如 `WASP__WEB__PORT=9000`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub web: WebSection,
    #[serde(default)]
    pub mcp: McpSection,
    #[serde(default)]
    pub supervisor: SupervisorSection,
    #[serde(default)]
    pub llm: LlmSection,
}

/// [app] 段：应用名
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
}

/// [web] 段：HTTP 网关监听端口
#[derive(Debug, Clone, Deserialize)]
pub struct WebSection {
    #[serde(default = "default_web_port")]
    pub port: u16,
}

impl Default for WebSection {
    fn default() -> Self {
        Self {
            port: default_web_port(),
        }
    }
}

fn default_web_port() -> u16 {
    8000
}

/// [mcp] 段：stdio 代理命令、远端 URL、超时与目录过滤
#[derive(Debug, Clone, Deserialize)]
pub struct McpSection {
    /// 代理进程命令（默认 npx）
    #[serde(default = "default_mcp_command")]
    pub command: String,
    /// 代理进程参数（remote_url 追加在末尾）
    #[serde(default = "default_mcp_args")]
    pub args: Vec<String>,
    /// 远端 MCP 服务器 URL
    #[serde(default = "default_remote_url")]
    pub remote_url: String,
    /// 单次 JSON-RPC 请求超时（秒）
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// initialize 握手超时（秒）
    #[serde(default = "default_init_timeout")]
    pub init_timeout_secs: u64,
    /// 名称含任一子串的工具不展示给 LLM
    #[serde(default)]
    pub excluded_tools: Vec<String>,
    /// 每次重连后预取的会话上下文工具（按序调用，空参数）
    #[serde(default = "default_context_tools")]
    pub context_tools: Vec<String>,
}

impl Default for McpSection {
    fn default() -> Self {
        Self {
            command: default_mcp_command(),
            args: default_mcp_args(),
            remote_url: default_remote_url(),
            request_timeout_secs: default_request_timeout(),
            init_timeout_secs: default_init_timeout(),
            excluded_tools: Vec::new(),
            context_tools: default_context_tools(),
        }
    }
}

fn default_mcp_command() -> String {
    "npx".to_string()
}

fn default_mcp_args() -> Vec<String> {
    vec!["-y".into(), "mcp-remote".into()]
}

fn default_remote_url() -> String {
    "https://mcp.atlassian.com/v1/sse".to_string()
}

fn default_request_timeout() -> u64 {
    60
}

fn default_init_timeout() -> u64 {
    30
}

fn default_context_tools() -> Vec<String> {
    vec![
        "getAccessibleAtlassianResources".into(),
        "atlassianUserInfo".into(),
    ]
}

/// [supervisor] 段：就绪/提交/流超时、退避参数、循环步数上限
#[derive(Debug, Clone, Deserialize)]
pub struct SupervisorSection {
    #[serde(default = "default_ready_timeout")]
    pub ready_timeout_secs: u64,
    #[serde(default = "default_submit_timeout")]
    pub submit_timeout_secs: u64,
    #[serde(default = "default_stream_idle_timeout")]
    pub stream_idle_timeout_secs: u64,
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
    /// 重连退避下限（秒），每次失败翻倍
    #[serde(default = "default_backoff_floor")]
    pub backoff_floor_secs: u64,
    /// 重连退避上限（秒）
    #[serde(default = "default_backoff_cap")]
    pub backoff_cap_secs: u64,
    /// 单次请求内工具循环最大步数，防止死循环
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    /// 事件通道容量
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for SupervisorSection {
    fn default() -> Self {
        Self {
            ready_timeout_secs: default_ready_timeout(),
            submit_timeout_secs: default_submit_timeout(),
            stream_idle_timeout_secs: default_stream_idle_timeout(),
            shutdown_grace_secs: default_shutdown_grace(),
            backoff_floor_secs: default_backoff_floor(),
            backoff_cap_secs: default_backoff_cap(),
            max_steps: default_max_steps(),
            event_buffer: default_event_buffer(),
        }
    }
}

fn default_ready_timeout() -> u64 {
    30
}

fn default_submit_timeout() -> u64 {
    120
}

fn default_stream_idle_timeout() -> u64 {
    300
}

fn default_shutdown_grace() -> u64 {
    5
}

fn default_backoff_floor() -> u64 {
    1
}

fn default_backoff_cap() -> u64 {
    30
}

fn default_max_steps() -> usize {
    12
}

fn default_event_buffer() -> usize {
    64
}

/// [llm] 段：router 与三个执行层级各自的 OpenAI 兼容端点
#[derive(Debug, Clone, Deserialize, Default)]
pub struct LlmSection {
    #[serde(default)]
    pub router: TierEntry,
    #[serde(default)]
    pub fast: TierEntry,
    #[serde(default)]
    pub smart: TierEntry,
    #[serde(default)]
    pub complex: TierEntry,
}

/// 单个层级的模型配置
#[derive(Debug, Clone, Deserialize)]
pub struct TierEntry {
    #[serde(default = "default_tier_model")]
    pub model: String,
    pub base_url: Option<String>,
    /// API Key 所在环境变量名（缺省 OPENAI_API_KEY）
    pub api_key_env: Option<String>,
    pub temperature: Option<f32>,
}

impl Default for TierEntry {
    fn default() -> Self {
        Self {
            model: default_tier_model(),
            base_url: None,
            api_key_env: None,
            temperature: Some(0.0),
        }
    }
}

fn default_tier_model() -> String {
    "gpt-4o-mini".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app: AppSection::default(),
            web: WebSection::default(),
            mcp: McpSection::default(),
            supervisor: SupervisorSection::default(),
            llm: LlmSection::default(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 WASP__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 WASP__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("WASP")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
