use super::canonical::FinishReason;

// ---------------------------------------------------------------------------
// Finish reason mappings
// ---------------------------------------------------------------------------

#[must_use]
pub fn openai_finish_to_canonical(s: &str) -> FinishReason {
    match s {
        "stop" | "end_turn" => FinishReason::Stop,
        "tool_calls" | "function_call" => FinishReason::ToolCalls,
        "length" => FinishReason::Length,
        "content_filter" => FinishReason::ContentFilter,
        _ => FinishReason::Unknown,
    }
}

#[must_use]
pub fn anthropic_stop_to_canonical(s: &str) -> FinishReason {
    match s {
        "end_turn" | "stop_sequence" | "pause_turn" => FinishReason::Stop,
        "tool_use" => FinishReason::ToolCalls,
        "max_tokens" | "model_context_window_exceeded" => FinishReason::Length,
        "refusal" => FinishReason::ContentFilter,
        _ => FinishReason::Unknown,
    }
}

#[must_use]
pub fn gemini_finish_to_canonical(s: &str) -> FinishReason {
    match s {
        "STOP" => FinishReason::Stop,
        "MAX_TOKENS" => FinishReason::Length,
        "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" | "SPII" => {
            FinishReason::ContentFilter
        }
        "MALFORMED_FUNCTION_CALL" => FinishReason::Error,
        _ => FinishReason::Unknown,
    }
}

/// Map the `incomplete_details.reason` of a Responses-API `response.incomplete`.
#[must_use]
pub fn responses_incomplete_to_canonical(reason: Option<&str>) -> FinishReason {
    match reason {
        Some("max_output_tokens") => FinishReason::Length,
        Some("content_filter") => FinishReason::ContentFilter,
        _ => FinishReason::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openai_finish_mapping() {
        assert_eq!(openai_finish_to_canonical("stop"), FinishReason::Stop);
        assert_eq!(
            openai_finish_to_canonical("tool_calls"),
            FinishReason::ToolCalls
        );
        assert_eq!(openai_finish_to_canonical("length"), FinishReason::Length);
        assert_eq!(openai_finish_to_canonical("weird"), FinishReason::Unknown);
    }

    #[test]
    fn test_anthropic_stop_mapping() {
        assert_eq!(
            anthropic_stop_to_canonical("tool_use"),
            FinishReason::ToolCalls
        );
        assert_eq!(
            anthropic_stop_to_canonical("max_tokens"),
            FinishReason::Length
        );
    }

    #[test]
    fn test_gemini_finish_mapping() {
        assert_eq!(gemini_finish_to_canonical("MAX_TOKENS"), FinishReason::Length);
        assert_eq!(
            gemini_finish_to_canonical("SAFETY"),
            FinishReason::ContentFilter
        );
    }

    #[test]
    fn test_responses_incomplete_mapping() {
        assert_eq!(
            responses_incomplete_to_canonical(Some("max_output_tokens")),
            FinishReason::Length
        );
        assert_eq!(responses_incomplete_to_canonical(None), FinishReason::Unknown);
    }
}
