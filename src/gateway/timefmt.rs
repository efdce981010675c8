//! 最终输出的时间戳后处理
//!
//! 将文本中内嵌的 ISO 8601 时间戳改写为相对时间（"N minutes ago"）。仅作用于
//! final 输出、仅为展示效果；无法解析的匹配原样保留，绝不破坏非时间戳文本。

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

/// 匹配 ISO 8601 时间戳：2024-01-02T03:04:05(.123)(Z|+08:00|+0800)
const ISO_PATTERN: &str =
    r"\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:?\d{2})?";

/// 将文本中所有可解析的 ISO 8601 时间戳替换为相对时间
pub fn replace_iso8601_with_relative(text: &str) -> String {
    let re = match regex::Regex::new(ISO_PATTERN) {
        Ok(re) => re,
        Err(_) => return text.to_string(),
    };
    re.replace_all(text, |caps: &regex::Captures| {
        let ts = caps.get(0).map(|m| m.as_str()).unwrap_or("");
        match to_relative(ts) {
            Some(rel) => rel,
            None => {
                tracing::debug!("Timestamp {} could not be parsed, leaving as-is", ts);
                ts.to_string()
            }
        }
    })
    .into_owned()
}

/// 解析单个时间戳并格式化为相对时间；无时区时按 UTC 处理
fn to_relative(ts: &str) -> Option<String> {
    let dt: DateTime<Utc> = DateTime::parse_from_rfc3339(ts)
        .map(|d| d.with_timezone(&Utc))
        .or_else(|_| DateTime::parse_from_str(ts, "%Y-%m-%dT%H:%M:%S%.f%z").map(|d| d.with_timezone(&Utc)))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(ts, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|n| Utc.from_utc_datetime(&n))
        })?;

    let seconds = (Utc::now() - dt).num_seconds().max(0);
    Some(if seconds < 60 {
        format!("{} seconds ago", seconds)
    } else if seconds < 3600 {
        format!("{} minutes ago", seconds / 60)
    } else if seconds < 86400 {
        format!("{} hours ago", seconds / 3600)
    } else {
        format!("{} days ago", seconds / 86400)
    })
}
