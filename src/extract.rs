//! Pulls generated text out of the response envelopes emitted by different
//! serving backends.
//!
//! Shapes are tried in a fixed order and the first match wins:
//!
//! 1. `{"text": "..."}`
//! 2. `{"generated_text": "..."}`
//! 3. `{"outputs": [{"text": "..."}]}`
//! 4. `{"choices": [{"message": {"content": "..."}}]}` or
//!    `{"choices": [{"text": "..."}]}`
//!
//! The matched text is trimmed of surrounding whitespace.

use serde_json::Value;
use thiserror::Error;

/// Longest payload rendering kept in an [`ExtractionError`].
const MAX_PAYLOAD_CHARS: usize = 512;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("no generated text found in response: {payload}")]
pub struct ExtractionError {
    /// The payload as compact JSON, truncated for diagnostics
    pub payload: String,
}

impl ExtractionError {
    fn new(payload: &Value) -> Self {
        Self {
            payload: truncate(&payload.to_string(), MAX_PAYLOAD_CHARS),
        }
    }
}

pub fn extract_text(payload: &Value) -> Result<String, ExtractionError> {
    if let Some(text) = payload.get("text").and_then(Value::as_str) {
        return Ok(text.trim().to_string());
    }

    if let Some(text) = payload.get("generated_text").and_then(Value::as_str) {
        return Ok(text.trim().to_string());
    }

    if let Some(text) = first_element(payload, "outputs")
        .and_then(|output| output.get("text"))
        .and_then(Value::as_str)
    {
        return Ok(text.trim().to_string());
    }

    if let Some(choice) = first_element(payload, "choices") {
        let content = choice
            .get("message")
            .and_then(|message| message.get("content"))
            .and_then(Value::as_str)
            .or_else(|| choice.get("text").and_then(Value::as_str));

        if let Some(text) = content {
            return Ok(text.trim().to_string());
        }
    }

    Err(ExtractionError::new(payload))
}

fn first_element<'a>(payload: &'a Value, field: &str) -> Option<&'a Value> {
    payload.get(field)?.as_array()?.first()
}

/// Cuts `text` to at most `max_chars` characters, marking the cut with `...`.
pub(crate) fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_openai_chat_shape() {
        let payload = json!({"choices": [{"message": {"content": "hi"}}]});
        assert_eq!(extract_text(&payload).unwrap(), "hi");
    }

    #[test]
    fn test_top_level_text_is_trimmed() {
        assert_eq!(extract_text(&json!({"text": " hi "})).unwrap(), "hi");
    }

    #[test]
    fn test_generated_text() {
        let payload = json!({"generated_text": "\nhello world\n"});
        assert_eq!(extract_text(&payload).unwrap(), "hello world");
    }

    #[test]
    fn test_outputs_list() {
        assert_eq!(extract_text(&json!({"outputs": [{"text": "x"}]})).unwrap(), "x");
    }

    #[test]
    fn test_choices_text_fallback() {
        let payload = json!({"choices": [{"text": " completion "}]});
        assert_eq!(extract_text(&payload).unwrap(), "completion");
    }

    #[test]
    fn test_message_content_preferred_over_choice_text() {
        let payload = json!({"choices": [{"message": {"content": "chat"}, "text": "legacy"}]});
        assert_eq!(extract_text(&payload).unwrap(), "chat");
    }

    #[test]
    fn test_priority_order() {
        let payload = json!({
            "generated_text": "second",
            "text": "first",
            "choices": [{"message": {"content": "fourth"}}]
        });
        assert_eq!(extract_text(&payload).unwrap(), "first");

        let payload = json!({
            "outputs": [{"text": "third"}],
            "choices": [{"message": {"content": "fourth"}}]
        });
        assert_eq!(extract_text(&payload).unwrap(), "third");
    }

    #[test]
    fn test_non_string_text_falls_through() {
        let payload = json!({"text": 42, "generated_text": "ok"});
        assert_eq!(extract_text(&payload).unwrap(), "ok");

        // null message content falls back to the choice's text
        let payload = json!({"choices": [{"message": {"content": null}, "text": "t"}]});
        assert_eq!(extract_text(&payload).unwrap(), "t");
    }

    #[test]
    fn test_empty_object_fails() {
        let err = extract_text(&json!({})).unwrap_err();
        assert_eq!(err.payload, "{}");
    }

    #[test]
    fn test_empty_lists_fail() {
        assert!(extract_text(&json!({"choices": []})).is_err());
        assert!(extract_text(&json!({"outputs": []})).is_err());
        assert!(extract_text(&json!({"choices": [{"message": {}}]})).is_err());
        assert!(extract_text(&json!("just a string")).is_err());
    }

    #[test]
    fn test_error_payload_is_truncated() {
        let payload = json!({"detail": "x".repeat(2000)});
        let err = extract_text(&payload).unwrap_err();
        assert!(err.payload.ends_with("..."));
        assert_eq!(err.payload.chars().count(), MAX_PAYLOAD_CHARS + 3);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé...");
        assert_eq!(truncate("abc", 3), "abc");
    }
}
