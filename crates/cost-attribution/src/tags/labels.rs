//! Label payload parsing.
//!
//! Workload labels and whole-record tag payloads arrive either as a JSON
//! object (`{"app":"web"}`) or pipe-delimited (`app:web|team:core`).

use serde_json::Value;

use crate::error::{AttributionError, Result};

/// Format a label pair the way identity label sets store it.
#[must_use]
pub fn format_label_pair(key: &str, value: &str) -> String {
    format!("{key}={value}")
}

/// Parse a label payload into key/value pairs.
///
/// Entries with an empty or null value are dropped. A blank payload yields
/// no pairs.
///
/// # Errors
///
/// Returns [`AttributionError::TagParse`] when the payload is neither a JSON
/// object nor well-formed `key:value|key:value`.
pub fn parse_label_payload(payload: &str) -> Result<Vec<(String, String)>> {
    let payload = payload.trim();
    if payload.is_empty() {
        return Ok(Vec::new());
    }

    if payload.starts_with('{') {
        parse_json(payload)
    } else {
        parse_pipe_delimited(payload)
    }
}

fn parse_json(payload: &str) -> Result<Vec<(String, String)>> {
    let map: serde_json::Map<String, Value> = serde_json::from_str(payload)
        .map_err(|e| AttributionError::TagParse(format!("invalid JSON labels: {e}")))?;

    let pairs = map
        .into_iter()
        .filter_map(|(key, value)| {
            let value = match value {
                Value::Null => return None,
                Value::String(s) => s,
                other => other.to_string(),
            };
            (!key.is_empty() && !value.is_empty()).then_some((key, value))
        })
        .collect();

    Ok(pairs)
}

fn parse_pipe_delimited(payload: &str) -> Result<Vec<(String, String)>> {
    let mut pairs = Vec::new();

    for segment in payload.split('|').filter(|s| !s.is_empty()) {
        let Some((key, value)) = segment.split_once(':') else {
            return Err(AttributionError::TagParse(format!(
                "label segment '{segment}' is not key:value"
            )));
        };
        if key.is_empty() {
            return Err(AttributionError::TagParse(format!(
                "label segment '{segment}' has an empty key"
            )));
        }
        if !value.is_empty() {
            pairs.push((key.to_string(), value.to_string()));
        }
    }

    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json_object() {
        let pairs = parse_label_payload(r#"{"app":"web","tier":"","replicas":3,"x":null}"#).unwrap();
        assert_eq!(
            pairs,
            vec![
                ("app".to_string(), "web".to_string()),
                ("replicas".to_string(), "3".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_pipe_delimited() {
        let pairs = parse_label_payload("app:web|team:core|url:http://x").unwrap();
        assert_eq!(pairs.len(), 3);
        assert_eq!(pairs[2], ("url".to_string(), "http://x".to_string()));
    }

    #[test]
    fn test_blank_payload_is_empty() {
        assert!(parse_label_payload("   ").unwrap().is_empty());
    }

    #[test]
    fn test_malformed_payloads() {
        assert!(matches!(
            parse_label_payload("{not json"),
            Err(AttributionError::TagParse(_))
        ));
        assert!(parse_label_payload("app=web").is_err());
        assert!(parse_label_payload(":web").is_err());
        assert!(parse_label_payload("[1,2]").is_err());
    }

    #[test]
    fn test_format_label_pair() {
        assert_eq!(format_label_pair("app", "web"), "app=web");
    }
}
