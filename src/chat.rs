//! 对话消息类型
//!
//! Message/Role 为 LLM 侧格式；HistoryTurn 为前端提交的历史格式（role 取 "human"/"ai"），
//! 提交后视为只读快照，核心不会修改调用方的历史。

use serde::{Deserialize, Serialize};

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    User,
    Assistant,
    System,
}

/// 单条消息
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// 前端历史消息的角色："human" 或 "ai"
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    Human,
    Ai,
}

/// 前端提交的单条历史消息
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HistoryTurn {
    pub role: TurnRole,
    pub content: String,
}

/// 将前端历史转换为 LLM 消息序列
pub fn history_to_messages(history: &[HistoryTurn]) -> Vec<Message> {
    history
        .iter()
        .map(|t| match t.role {
            TurnRole::Human => Message::user(t.content.clone()),
            TurnRole::Ai => Message::assistant(t.content.clone()),
        })
        .collect()
}
