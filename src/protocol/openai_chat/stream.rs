use tracing::debug;

use crate::error::{ParseError, RelayError};
use crate::protocol::canonical::{FinishReason, Usage};
use crate::protocol::error_shapes::message_from_value;
use crate::protocol::mapping::openai_finish_to_canonical;
use crate::stream::{parse_json, EventReporter, FrameAction, ProgressSink, SseEvent, StreamAdapter};

use super::{ChatStreamChunk, ChatUsage};

const VENDOR: &str = "openai_chat";

/// Chat Completions `data:` chunks to reporter calls.
///
/// Only the first choice is followed; `n > 1` streams are not relayed.
#[derive(Debug, Default)]
pub struct ChatCompletionsAdapter {
    finish_reason: Option<FinishReason>,
}

impl ChatCompletionsAdapter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl StreamAdapter for ChatCompletionsAdapter {
    type Event = ChatStreamChunk;

    fn vendor(&self) -> &'static str {
        VENDOR
    }

    fn parse_frame(&self, frame: &SseEvent) -> Result<Option<ChatStreamChunk>, ParseError> {
        if frame.data.trim().is_empty() {
            return Ok(None);
        }
        parse_json(VENDOR, &frame.data).map(Some)
    }

    fn apply<S: ProgressSink>(
        &mut self,
        chunk: ChatStreamChunk,
        reporter: &mut EventReporter<S>,
    ) -> FrameAction {
        if let Some(error) = &chunk.error {
            let message = message_from_value(error).unwrap_or_else(|| error.to_string());
            return FrameAction::Fail(RelayError::Vendor(message));
        }
        if let Some(id) = chunk.id.as_deref() {
            if reporter.upstream_response_id().is_none() {
                reporter.set_upstream_response_id(id);
            }
        }

        for choice in chunk.choices {
            if choice.index != 0 {
                debug!(index = choice.index, "ignoring secondary choice");
                continue;
            }
            let delta = choice.delta;
            if let Some(reasoning) = delta
                .reasoning_content
                .as_deref()
                .or(delta.reasoning.as_deref())
            {
                reporter.buffer_thinking(reasoning);
            }
            if let Some(content) = delta.content.as_deref() {
                reporter.report_text(content);
            }
            if let Some(refusal) = delta.refusal.as_deref() {
                reporter.report_text(refusal);
            }
            for call in delta.tool_calls.unwrap_or_default() {
                let (name, arguments) = match &call.function {
                    Some(function) => (function.name.as_deref(), function.arguments.as_deref()),
                    None => (None, None),
                };
                reporter.accumulate_tool_call(
                    call.index,
                    call.id.as_deref().filter(|id| !id.is_empty()),
                    name.filter(|name| !name.is_empty()),
                    arguments,
                );
            }
            if let Some(reason) = choice.finish_reason.as_deref() {
                self.finish_reason = Some(openai_finish_to_canonical(reason));
            }
        }

        if let Some(usage) = chunk.usage {
            reporter.report_usage(to_usage(usage));
        }
        FrameAction::Continue
    }

    fn finish_reason(&self) -> Option<FinishReason> {
        self.finish_reason
    }
}

fn to_usage(usage: ChatUsage) -> Usage {
    Usage {
        input_tokens: usage.prompt_tokens,
        output_tokens: usage.completion_tokens,
        cached_tokens: usage
            .prompt_tokens_details
            .and_then(|details| details.cached_tokens),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReporterConfig;
    use crate::protocol::canonical::ContentEvent;
    use serde_json::json;

    fn run(frames: &[&str]) -> (Vec<ContentEvent>, Option<FinishReason>, Option<String>) {
        let mut adapter = ChatCompletionsAdapter::new();
        let mut events = Vec::new();
        let upstream_id;
        {
            let mut reporter = EventReporter::new(&mut events, ReporterConfig::default(), None);
            for data in frames {
                let frame = SseEvent {
                    data: (*data).to_string(),
                    ..SseEvent::default()
                };
                let chunk = adapter.parse_frame(&frame).unwrap().unwrap();
                assert!(matches!(
                    adapter.apply(chunk, &mut reporter),
                    FrameAction::Continue
                ));
            }
            reporter.flush_all(adapter.finish_reason().unwrap_or(FinishReason::Unknown));
            upstream_id = reporter.upstream_response_id().map(str::to_string);
        }
        (events, adapter.finish_reason(), upstream_id)
    }

    #[test]
    fn test_text_and_usage() {
        let (events, finish, id) = run(&[
            r#"{"id":"chatcmpl-1","choices":[{"index":0,"delta":{"role":"assistant","content":"Hi"}}]}"#,
            r#"{"id":"chatcmpl-1","choices":[{"index":0,"delta":{"content":" there"},"finish_reason":"stop"}]}"#,
            r#"{"id":"chatcmpl-1","choices":[],"usage":{"prompt_tokens":9,"completion_tokens":2,"prompt_tokens_details":{"cached_tokens":4}}}"#,
        ]);
        assert_eq!(finish, Some(FinishReason::Stop));
        assert_eq!(id.as_deref(), Some("chatcmpl-1"));
        assert_eq!(
            events,
            vec![
                ContentEvent::TextDelta {
                    text: "Hi there".to_string()
                },
                ContentEvent::UsageReport(Usage {
                    input_tokens: 9,
                    output_tokens: 2,
                    cached_tokens: Some(4),
                }),
            ]
        );
    }

    #[test]
    fn test_reasoning_content_becomes_thinking() {
        let (events, _, _) = run(&[
            r#"{"choices":[{"index":0,"delta":{"reasoning_content":"hmm"}}]}"#,
            r#"{"choices":[{"index":0,"delta":{"content":"ok"},"finish_reason":"stop"}]}"#,
        ]);
        assert!(matches!(&events[0], ContentEvent::ThinkingDelta { text, .. } if text == "hmm"));
        assert!(matches!(events[1], ContentEvent::ThinkingEnd { .. }));
        assert_eq!(
            events[2],
            ContentEvent::TextDelta {
                text: "ok".to_string()
            }
        );
    }

    #[test]
    fn test_fragmented_tool_call() {
        let (events, finish, _) = run(&[
            r#"{"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"id":"call_1","type":"function","function":{"name":"get_weather","arguments":""}}]}}]}"#,
            r#"{"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"city\":"}}]}}]}"#,
            r#"{"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"Paris\"}"}}]}}]}"#,
            r#"{"choices":[{"index":0,"delta":{},"finish_reason":"tool_calls"}]}"#,
        ]);
        assert_eq!(finish, Some(FinishReason::ToolCalls));
        assert_eq!(
            events,
            vec![
                ContentEvent::ToolCallStart {
                    index: 0,
                    id: Some("call_1".to_string()),
                    name: Some("get_weather".to_string()),
                },
                ContentEvent::ToolCallComplete {
                    id: "call_1".to_string(),
                    name: "get_weather".to_string(),
                    arguments: json!({"city": "Paris"}),
                },
            ]
        );
    }

    #[test]
    fn test_repeated_full_arguments_are_not_doubled() {
        let (events, _, _) = run(&[
            r#"{"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"id":"c","function":{"name":"f","arguments":"{\"a\":"}}]}}]}"#,
            r#"{"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"a\":1}"}}]}}]}"#,
            r#"{"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"a\":1}"}}]}}]}"#,
        ]);
        let completes: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, ContentEvent::ToolCallComplete { .. }))
            .collect();
        assert_eq!(completes.len(), 1);
        assert!(matches!(
            completes[0],
            ContentEvent::ToolCallComplete { arguments, .. } if arguments == &json!({"a": 1})
        ));
    }

    #[test]
    fn test_in_band_error_fails() {
        let mut adapter = ChatCompletionsAdapter::new();
        let mut reporter = EventReporter::new(Vec::new(), ReporterConfig::default(), None);
        let frame = SseEvent {
            data: r#"{"error":{"message":"overloaded","type":"server_error"}}"#.to_string(),
            ..SseEvent::default()
        };
        let chunk = adapter.parse_frame(&frame).unwrap().unwrap();
        match adapter.apply(chunk, &mut reporter) {
            FrameAction::Fail(RelayError::Vendor(message)) => {
                assert_eq!(message, "server_error: overloaded");
            }
            other => panic!("unexpected action {other:?}"),
        }
    }

    #[test]
    fn test_blank_frame_is_skipped() {
        let adapter = ChatCompletionsAdapter::new();
        assert!(adapter
            .parse_frame(&SseEvent::default())
            .unwrap()
            .is_none());
    }
}
