//! Human-readable messages out of vendor error envelopes.

use serde_json::Value;

use crate::util::truncate_bytes;

const MAX_MESSAGE_LEN: usize = 500;

/// Extract the best available message from an error response body.
///
/// Understands the `OpenAI` envelope (`{"error":{"message":..}}`), the
/// Anthropic envelope (`{"type":"error","error":{"type":..,"message":..}}`),
/// and the Gemini envelope (`{"error":{"code":..,"message":..,"status":..}}`,
/// sometimes wrapped in a one-element array). Anything else falls back to the
/// trimmed body text.
#[must_use]
pub fn extract_error_message(body: &[u8]) -> String {
    if let Ok(json) = serde_json::from_slice::<Value>(body) {
        if let Some(message) = message_from_value(&json) {
            return clip(&message);
        }
    }

    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if text.is_empty() {
        return "empty error body".to_string();
    }
    clip(text)
}

/// Message from an in-stream error object (the value of an `error` key or
/// the whole event).
#[must_use]
pub(crate) fn message_from_value(value: &Value) -> Option<String> {
    if let Some(first) = value.as_array().and_then(|items| items.first()) {
        return message_from_value(first);
    }

    let error = value.get("error").unwrap_or(value);
    if let Some(text) = error.as_str() {
        return Some(text.to_string());
    }

    let message = error.get("message").and_then(Value::as_str);
    let status = error
        .get("status")
        .or_else(|| error.get("type"))
        .or_else(|| error.get("code"))
        .and_then(|v| match v {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        });

    match (message, status) {
        (Some(message), Some(status)) if status != "error" => Some(format!("{status}: {message}")),
        (Some(message), _) => Some(message.to_string()),
        (None, Some(status)) => Some(status),
        (None, None) => None,
    }
}

fn clip(message: &str) -> String {
    let clipped = truncate_bytes(message, MAX_MESSAGE_LEN);
    if clipped.len() < message.len() {
        format!("{clipped}...")
    } else {
        clipped.to_string()
    }
}
