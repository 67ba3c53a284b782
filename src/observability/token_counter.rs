use crate::protocol::canonical::{ConversationMessage, MessagePart, Usage};

/// Estimate the number of tokens in `text`.
///
/// Uses a lightweight heuristic (`bytes / 4`) to avoid loading model BPE tables.
#[must_use]
pub fn estimate_tokens(text: &str) -> u64 {
    (text.len() as u64).div_ceil(4)
}

/// Estimate the input tokens of an outgoing conversation.
///
/// Side-channel data parts are not sent as prompt text and are skipped.
#[must_use]
pub fn estimate_history_tokens(history: &[ConversationMessage]) -> u64 {
    let mut total: u64 = 0;
    for message in history {
        for part in &message.parts {
            total += match part {
                MessagePart::Text(text) | MessagePart::Thinking { text, .. } => {
                    estimate_tokens(text)
                }
                MessagePart::ToolCall {
                    name, arguments, ..
                } => estimate_tokens(name) + estimate_tokens(&arguments.to_string()),
                MessagePart::ToolResult { content, .. } => estimate_tokens(content),
                MessagePart::Data { .. } => 0,
            };
        }
    }
    total
}

/// Merge upstream-reported usage with local estimates.
///
/// Non-zero upstream values always win; estimates only fill gaps.
#[must_use]
pub fn merge_usage(upstream: Option<Usage>, estimated_input: u64, estimated_output: u64) -> Usage {
    let upstream = upstream.unwrap_or_default();
    Usage {
        input_tokens: if upstream.input_tokens > 0 {
            upstream.input_tokens
        } else {
            estimated_input
        },
        output_tokens: if upstream.output_tokens > 0 {
            upstream.output_tokens
        } else {
            estimated_output
        },
        cached_tokens: upstream.cached_tokens,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::canonical::Role;
    use serde_json::json;

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn test_estimate_history_skips_data_parts() {
        let history = vec![
            ConversationMessage::text(Role::User, "abcdefgh"),
            ConversationMessage::new(Role::Assistant)
                .with_part(MessagePart::ToolCall {
                    id: "c".to_string(),
                    name: "run".to_string(),
                    arguments: json!({}),
                })
                .with_part(MessagePart::Data {
                    mime: "x".to_string(),
                    payload: vec![0; 4000],
                }),
        ];
        // 2 for the text, 1 for "run", 1 for "{}"
        assert_eq!(estimate_history_tokens(&history), 4);
    }

    #[test]
    fn test_merge_prefers_upstream() {
        let upstream = Usage {
            input_tokens: 50,
            output_tokens: 0,
            cached_tokens: Some(10),
        };
        let merged = merge_usage(Some(upstream), 99, 7);
        assert_eq!(merged.input_tokens, 50);
        assert_eq!(merged.output_tokens, 7);
        assert_eq!(merged.cached_tokens, Some(10));
    }

    #[test]
    fn test_merge_without_upstream() {
        let merged = merge_usage(None, 12, 3);
        assert_eq!(merged.input_tokens, 12);
        assert_eq!(merged.output_tokens, 3);
        assert_eq!(merged.cached_tokens, None);
    }
}
