//! 请求分级路由
//!
//! 在主执行循环前用一次廉价 LLM 调用把请求归入固定层级。层级为封闭枚举，
//! 匹配与优先级集中在 RouteTier::parse：complex > smart > fast，无法识别时回落 fast。

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::chat::Message;
use crate::llm::LlmClient;

use super::prompts::ROUTER_SYSTEM_PROMPT;

/// 执行层级：成本与能力递增
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteTier {
    /// 缺省层级：便宜、快速
    Fast,
    /// 较高能力层级
    Smart,
    /// 依赖分析等最复杂场景
    Complex,
}

impl RouteTier {
    /// 解析路由 LLM 的自由文本输出。归一化（trim + lowercase）后按固定优先级匹配：
    /// 同时出现多个 token 时取最特化者（complex > smart > fast）；都不出现时回落 Fast。
    pub fn parse(raw: &str) -> RouteTier {
        let normalized = raw.trim().to_lowercase();
        if normalized.contains("complex") {
            RouteTier::Complex
        } else if normalized.contains("smart") {
            RouteTier::Smart
        } else {
            RouteTier::Fast
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RouteTier::Fast => "fast",
            RouteTier::Smart => "smart",
            RouteTier::Complex => "complex",
        }
    }
}

/// 路由器：持有路由 LLM，对每个请求独立分类（结果不跨请求缓存）
pub struct Router {
    llm: Arc<dyn LlmClient>,
}

impl Router {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// 分类请求文本。路由 LLM 失败时降级到 Fast 而不是让请求失败。
    pub async fn classify(&self, input: &str) -> RouteTier {
        let messages = vec![
            Message::system(ROUTER_SYSTEM_PROMPT),
            Message::user(input),
        ];
        match self.llm.complete(&messages).await {
            Ok(output) => {
                let tier = RouteTier::parse(&output);
                tracing::debug!(tier = tier.as_str(), raw = %output.trim(), "route decision");
                tier
            }
            Err(e) => {
                tracing::warn!("Router LLM failed, falling back to fast tier: {}", e);
                RouteTier::Fast
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlmClient;

    #[test]
    fn test_parse_plain_tokens() {
        assert_eq!(RouteTier::parse("fast"), RouteTier::Fast);
        assert_eq!(RouteTier::parse("smart"), RouteTier::Smart);
        assert_eq!(RouteTier::parse("complex"), RouteTier::Complex);
    }

    #[test]
    fn test_parse_tolerates_noise() {
        assert_eq!(RouteTier::parse("  Smart.\n"), RouteTier::Smart);
        assert_eq!(RouteTier::parse("COMPLEX!"), RouteTier::Complex);
        assert_eq!(RouteTier::parse("'fast'"), RouteTier::Fast);
    }

    #[test]
    fn test_parse_precedence_most_specialized_wins() {
        assert_eq!(RouteTier::parse("smart or complex"), RouteTier::Complex);
        assert_eq!(RouteTier::parse("fast, maybe smart"), RouteTier::Smart);
    }

    #[test]
    fn test_parse_unknown_falls_back_to_fast() {
        assert_eq!(RouteTier::parse(""), RouteTier::Fast);
        assert_eq!(RouteTier::parse("dunno"), RouteTier::Fast);
    }

    #[tokio::test]
    async fn test_classify_is_idempotent_with_deterministic_llm() {
        let router = Router::new(Arc::new(ScriptedLlmClient::fixed("smart")));
        let first = router.classify("assign DE-3 to Alice").await;
        let second = router.classify("assign DE-3 to Alice").await;
        assert_eq!(first, second);
        assert_eq!(first, RouteTier::Smart);
    }

    #[tokio::test]
    async fn test_classify_degrades_to_fast_on_llm_error() {
        let router = Router::new(Arc::new(ScriptedLlmClient::failing("api down")));
        assert_eq!(router.classify("anything").await, RouteTier::Fast);
    }
}
