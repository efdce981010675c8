//! MCP 数据类型：工具描述、工具目录与会话上下文
//!
//! 目录每次连接成功后获取一次，会话存续期内保持不变，仅在重连时刷新。

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 单个远端工具的描述（名称、说明、参数 JSON Schema）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Value,
}

/// 远端工具目录：tools/list 的结果，可按名称子串过滤后展示给 LLM
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolCatalogue {
    pub tools: Vec<ToolDescriptor>,
}

impl ToolCatalogue {
    /// 移除名称含任一子串的工具（如配置排除 "Confluence" 系工具）
    pub fn exclude_by_name(&mut self, patterns: &[String]) {
        if patterns.is_empty() {
            return;
        }
        self.tools
            .retain(|t| !patterns.iter().any(|p| t.name.contains(p.as_str())));
    }

    /// 序列化为 JSON，拼入 worker system prompt
    pub fn to_docs_json(&self) -> String {
        serde_json::to_string_pretty(&self.tools).unwrap_or_else(|_| "[]".to_string())
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// 会话上下文：每次重连后预取的事实（可访问资源、当前用户等），
/// 原样嵌入该会话期内每次 worker 调用的 system prompt
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    /// (工具名, 调用结果) 列表，按配置顺序
    pub entries: Vec<(String, String)>,
}

impl SessionContext {
    pub fn push(&mut self, tool: impl Into<String>, payload: impl Into<String>) {
        self.entries.push((tool.into(), payload.into()));
    }
}
