//! 工具参数解析
//!
//! LLM 给出的 arguments 可能是结构化对象，也可能把整个参数内联成一个字符串。
//! 字符串时：空白 → 空参数；否则严格按 JSON 解析为对象，失败即拒绝本次调用
//! （不尝试宽松解析，避免拿垃圾参数去调工具）。

use serde_json::{json, Value};

use crate::core::AgentError;

/// 归一化工具参数：对象原样返回，null/缺省 → {}，字符串按上述规则解析
pub fn parse_tool_arguments(raw: &Value) -> Result<Value, AgentError> {
    match raw {
        Value::Null => Ok(json!({})),
        Value::Object(_) => Ok(raw.clone()),
        Value::String(s) => {
            let stripped = s.trim();
            if stripped.is_empty() {
                return Ok(json!({}));
            }
            let parsed: Value = serde_json::from_str(stripped).map_err(|e| {
                AgentError::InvalidArguments(format!("{} in {:?}", e, stripped))
            })?;
            match parsed {
                Value::Object(_) => Ok(parsed),
                other => Err(AgentError::InvalidArguments(format!(
                    "expected a JSON object, got: {}",
                    other
                ))),
            }
        }
        other => Err(AgentError::InvalidArguments(format!(
            "expected object or string, got: {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structured_object_passes_through() {
        let raw = json!({"a": 1});
        assert_eq!(parse_tool_arguments(&raw).unwrap(), json!({"a": 1}));
    }

    #[test]
    fn test_string_and_structured_round_trip() {
        let as_string = Value::String(r#"{"a":1}"#.to_string());
        let as_object = json!({"a": 1});
        assert_eq!(
            parse_tool_arguments(&as_string).unwrap(),
            parse_tool_arguments(&as_object).unwrap()
        );
    }

    #[test]
    fn test_empty_and_whitespace_string() {
        assert_eq!(
            parse_tool_arguments(&Value::String("".into())).unwrap(),
            json!({})
        );
        assert_eq!(
            parse_tool_arguments(&Value::String("   \n".into())).unwrap(),
            json!({})
        );
    }

    #[test]
    fn test_null_becomes_empty_object() {
        assert_eq!(parse_tool_arguments(&Value::Null).unwrap(), json!({}));
    }

    #[test]
    fn test_malformed_string_rejected() {
        let err = parse_tool_arguments(&Value::String("{not json".into())).unwrap_err();
        assert!(matches!(err, AgentError::InvalidArguments(_)));
    }

    #[test]
    fn test_non_object_json_rejected() {
        let err = parse_tool_arguments(&Value::String("42".into())).unwrap_err();
        assert!(matches!(err, AgentError::InvalidArguments(_)));

        let err = parse_tool_arguments(&json!(["a", "b"])).unwrap_err();
        assert!(matches!(err, AgentError::InvalidArguments(_)));
    }
}
