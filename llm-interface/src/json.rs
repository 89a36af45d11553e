//! Helpers for reading JSON out of model replies.

use serde_json::{Map, Value};
use threadscope_core::LlmError;

/// Strip markdown code fences from a response.
pub fn strip_code_blocks(response: &str) -> &str {
    response
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```JSON")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

/// Parses a reply as JSON, tolerating code fences and prose around a
/// single top-level object or array.
pub fn parse_json_value(response: &str) -> Result<Value, LlmError> {
    let stripped = strip_code_blocks(response);
    if stripped.is_empty() {
        return Err(LlmError::malformed("empty response"));
    }

    match serde_json::from_str(stripped) {
        Ok(value) => Ok(value),
        Err(first_error) => embedded_json(stripped)
            .and_then(|candidate| serde_json::from_str(candidate).ok())
            .ok_or_else(|| LlmError::malformed(format!("invalid JSON: {}", first_error))),
    }
}

/// Parses a reply that must be a JSON object.
pub fn parse_json_object(response: &str) -> Result<Map<String, Value>, LlmError> {
    match parse_json_value(response)? {
        Value::Object(map) => Ok(map),
        other => Err(LlmError::malformed(format!(
            "expected a JSON object, got {}",
            kind_of(&other)
        ))),
    }
}

fn embedded_json(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let close = if text[start..].starts_with('{') { '}' } else { ']' };
    let end = text.rfind(close)?;
    (end > start).then(|| &text[start..=end])
}

pub fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_code_blocks() {
        assert_eq!(strip_code_blocks("```json\n{}\n```"), "{}");
        assert_eq!(strip_code_blocks("```\n[1]\n```"), "[1]");
        assert_eq!(strip_code_blocks("  {\"a\": 1} "), "{\"a\": 1}");
    }

    #[test]
    fn test_parse_object_with_surrounding_prose() {
        let map = parse_json_object("Sure! Here it is:\n{\"pain_points\": [\"slow\"]}\nHope that helps")
            .unwrap();
        assert_eq!(map["pain_points"][0], "slow");
    }

    #[test]
    fn test_parse_object_rejects_other_shapes() {
        let err = parse_json_object("[1, 2]").unwrap_err();
        assert!(err.to_string().contains("expected a JSON object"));

        assert!(parse_json_object("not json at all").is_err());
        assert!(parse_json_object("```json\n```").is_err());
    }

    #[test]
    fn test_parse_value_accepts_arrays() {
        let value = parse_json_value("```json\n[{\"theme_name\": \"cost\"}]\n```").unwrap();
        assert!(value.is_array());
    }
}
