//! Responses API typed event stream to reporter calls.
//!
//! ```text
//! event: response.output_text.delta
//! data: {"type":"response.output_text.delta","output_index":0,"content_index":0,"delta":"Hi"}
//! ```

use rustc_hash::FxHashSet;

use crate::error::{ParseError, RelayError};
use crate::protocol::canonical::{FinishReason, Usage};
use crate::protocol::error_shapes::message_from_value;
use crate::protocol::mapping::responses_incomplete_to_canonical;
use crate::stream::{parse_json, EventReporter, FrameAction, ProgressSink, SseEvent, StreamAdapter};

use super::{ResponsesEnvelope, ResponsesOutputItem, ResponsesStreamEvent, ResponsesUsage};

const VENDOR: &str = "openai_responses";

#[derive(Debug, Default)]
pub struct ResponsesAdapter {
    finish_reason: Option<FinishReason>,
    /// `(output_index, content_index)` pairs that already streamed deltas;
    /// their `.done` text is a repeat.
    streamed_text: FxHashSet<(u32, u32)>,
}

impl ResponsesAdapter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn settle<S: ProgressSink>(
        &mut self,
        response: &ResponsesEnvelope,
        finish_reason: FinishReason,
        reporter: &mut EventReporter<S>,
    ) -> FrameAction {
        reporter.set_upstream_response_id(&response.id);
        if let Some(usage) = &response.usage {
            reporter.report_usage(to_usage(usage));
        }
        self.finish_reason = Some(finish_reason);
        FrameAction::Done
    }
}

impl StreamAdapter for ResponsesAdapter {
    type Event = ResponsesStreamEvent;

    fn vendor(&self) -> &'static str {
        VENDOR
    }

    fn parse_frame(&self, frame: &SseEvent) -> Result<Option<ResponsesStreamEvent>, ParseError> {
        if frame.data.trim().is_empty() {
            return Ok(None);
        }
        match parse_json(VENDOR, &frame.data)? {
            ResponsesStreamEvent::Unknown => Ok(None),
            event => Ok(Some(event)),
        }
    }

    fn apply<S: ProgressSink>(
        &mut self,
        event: ResponsesStreamEvent,
        reporter: &mut EventReporter<S>,
    ) -> FrameAction {
        match event {
            ResponsesStreamEvent::ResponseCreated { response }
            | ResponsesStreamEvent::ResponseInProgress { response } => {
                reporter.set_upstream_response_id(&response.id);
            }
            ResponsesStreamEvent::OutputItemAdded { output_index, item } => {
                if let ResponsesOutputItem::FunctionCall { call_id, name, .. } = item {
                    reporter.accumulate_tool_call(
                        output_index,
                        call_id.as_deref(),
                        name.as_deref(),
                        None,
                    );
                }
            }
            ResponsesStreamEvent::OutputTextDelta {
                output_index,
                content_index,
                delta,
            } => {
                self.streamed_text.insert((output_index, content_index));
                reporter.report_text(&delta);
            }
            ResponsesStreamEvent::OutputTextDone {
                output_index,
                content_index,
                text,
            } => {
                if !self.streamed_text.contains(&(output_index, content_index)) {
                    reporter.report_text(&text);
                }
            }
            ResponsesStreamEvent::RefusalDelta { delta } => reporter.report_text(&delta),
            ResponsesStreamEvent::ReasoningSummaryTextDelta { delta }
            | ResponsesStreamEvent::ReasoningTextDelta { delta } => {
                reporter.buffer_thinking(&delta);
            }
            ResponsesStreamEvent::ReasoningSummaryTextDone { text }
            | ResponsesStreamEvent::ReasoningTextDone { text } => {
                reporter.buffer_thinking_if_not_already_streamed(&text);
            }
            ResponsesStreamEvent::FunctionCallArgumentsDelta {
                output_index,
                delta,
            } => reporter.accumulate_tool_call(output_index, None, None, Some(&delta)),
            ResponsesStreamEvent::FunctionCallArgumentsDone {
                output_index,
                arguments,
            } => reporter.accumulate_tool_call(output_index, None, None, Some(&arguments)),
            ResponsesStreamEvent::OutputItemDone { output_index, item } => match item {
                ResponsesOutputItem::FunctionCall {
                    call_id,
                    name,
                    arguments,
                } => {
                    reporter.accumulate_tool_call(
                        output_index,
                        call_id.as_deref(),
                        name.as_deref(),
                        arguments.as_deref(),
                    );
                    reporter.finalize_tool_call(output_index);
                }
                ResponsesOutputItem::Reasoning { encrypted_content } => {
                    if let Some(encrypted) = encrypted_content.as_deref() {
                        reporter.set_thinking_signature(encrypted);
                    }
                    reporter.end_thinking_block();
                }
                _ => {}
            },
            ResponsesStreamEvent::ResponseCompleted { response } => {
                let finish_reason = if reporter.has_tool_calls() {
                    FinishReason::ToolCalls
                } else {
                    FinishReason::Stop
                };
                return self.settle(&response, finish_reason, reporter);
            }
            ResponsesStreamEvent::ResponseIncomplete { response } => {
                let reason = response
                    .incomplete_details
                    .as_ref()
                    .and_then(|details| details.reason.as_deref());
                let finish_reason = responses_incomplete_to_canonical(reason);
                return self.settle(&response, finish_reason, reporter);
            }
            ResponsesStreamEvent::ResponseFailed { response } => {
                let message = response
                    .error
                    .as_ref()
                    .and_then(message_from_value)
                    .unwrap_or_else(|| "response failed".to_string());
                return FrameAction::Fail(RelayError::Vendor(message));
            }
            ResponsesStreamEvent::Error { code, message } => {
                let message = match (code, message) {
                    (Some(code), Some(message)) => format!("{code}: {message}"),
                    (None, Some(message)) => message,
                    (Some(code), None) => code,
                    (None, None) => "unknown stream error".to_string(),
                };
                return FrameAction::Fail(RelayError::Vendor(message));
            }
            ResponsesStreamEvent::Unknown => {}
        }
        FrameAction::Continue
    }

    fn finish_reason(&self) -> Option<FinishReason> {
        self.finish_reason
    }
}

fn to_usage(usage: &ResponsesUsage) -> Usage {
    Usage {
        input_tokens: usage.input_tokens,
        output_tokens: usage.output_tokens,
        cached_tokens: usage
            .input_tokens_details
            .as_ref()
            .and_then(|details| details.cached_tokens),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReporterConfig;
    use crate::protocol::canonical::ContentEvent;
    use serde_json::json;

    struct Run {
        events: Vec<ContentEvent>,
        finish_reason: Option<FinishReason>,
        upstream_id: Option<String>,
        last_action: Option<FrameAction>,
    }

    fn run(frames: &[&str]) -> Run {
        let mut adapter = ResponsesAdapter::new();
        let mut events = Vec::new();
        let mut last_action = None;
        let upstream_id;
        {
            let mut reporter = EventReporter::new(&mut events, ReporterConfig::default(), None);
            for data in frames {
                let frame = SseEvent {
                    data: (*data).to_string(),
                    ..SseEvent::default()
                };
                if let Some(event) = adapter.parse_frame(&frame).unwrap() {
                    last_action = Some(adapter.apply(event, &mut reporter));
                }
            }
            reporter.flush_all(adapter.finish_reason().unwrap_or(FinishReason::Unknown));
            upstream_id = reporter.upstream_response_id().map(str::to_string);
        }
        Run {
            events,
            finish_reason: adapter.finish_reason(),
            upstream_id,
            last_action,
        }
    }

    fn text_of(events: &[ContentEvent]) -> String {
        events
            .iter()
            .filter_map(|e| match e {
                ContentEvent::TextDelta { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_text_done_ignored_after_deltas() {
        let run = run(&[
            r#"{"type":"response.created","response":{"id":"resp_1","status":"in_progress"}}"#,
            r#"{"type":"response.output_text.delta","output_index":0,"content_index":0,"delta":"Hel"}"#,
            r#"{"type":"response.output_text.delta","output_index":0,"content_index":0,"delta":"lo"}"#,
            r#"{"type":"response.output_text.done","output_index":0,"content_index":0,"text":"Hello"}"#,
            r#"{"type":"response.completed","response":{"id":"resp_1","status":"completed","usage":{"input_tokens":5,"output_tokens":1,"input_tokens_details":{"cached_tokens":0}}}}"#,
        ]);
        assert_eq!(text_of(&run.events), "Hello");
        assert_eq!(run.finish_reason, Some(FinishReason::Stop));
        assert_eq!(run.upstream_id.as_deref(), Some("resp_1"));
        assert!(matches!(run.last_action, Some(FrameAction::Done)));
        assert_eq!(
            run.events.last(),
            Some(&ContentEvent::UsageReport(Usage {
                input_tokens: 5,
                output_tokens: 1,
                cached_tokens: Some(0),
            }))
        );
    }

    #[test]
    fn test_text_done_used_without_deltas() {
        let run = run(&[
            r#"{"type":"response.output_text.done","output_index":0,"content_index":0,"text":"whole"}"#,
        ]);
        assert_eq!(text_of(&run.events), "whole");
    }

    #[test]
    fn test_function_call_lifecycle() {
        let run = run(&[
            r#"{"type":"response.output_item.added","output_index":1,"item":{"type":"function_call","id":"fc_1","call_id":"call_9","name":"search","arguments":""}}"#,
            r#"{"type":"response.function_call_arguments.delta","output_index":1,"delta":"{\"q\":\"ru"}"#,
            r#"{"type":"response.function_call_arguments.delta","output_index":1,"delta":"st\"}"}"#,
            r#"{"type":"response.function_call_arguments.done","output_index":1,"arguments":"{\"q\":\"rust\"}"}"#,
            r#"{"type":"response.output_item.done","output_index":1,"item":{"type":"function_call","id":"fc_1","call_id":"call_9","name":"search","arguments":"{\"q\":\"rust\"}"}}"#,
            r#"{"type":"response.completed","response":{"id":"resp_2"}}"#,
        ]);
        assert_eq!(run.finish_reason, Some(FinishReason::ToolCalls));
        let completes: Vec<_> = run
            .events
            .iter()
            .filter(|e| matches!(e, ContentEvent::ToolCallComplete { .. }))
            .collect();
        assert_eq!(
            completes,
            vec![&ContentEvent::ToolCallComplete {
                id: "call_9".to_string(),
                name: "search".to_string(),
                arguments: json!({"q": "rust"}),
            }]
        );
    }

    #[test]
    fn test_reasoning_summary_and_encrypted_signature() {
        let run = run(&[
            r#"{"type":"response.reasoning_summary_text.delta","output_index":0,"summary_index":0,"delta":"Thinking it over"}"#,
            r#"{"type":"response.reasoning_summary_text.done","output_index":0,"summary_index":0,"text":"Thinking it over"}"#,
            r#"{"type":"response.output_item.done","output_index":0,"item":{"type":"reasoning","id":"rs_1","summary":[],"encrypted_content":"gAAAA"}}"#,
            r#"{"type":"response.output_text.delta","output_index":1,"content_index":0,"delta":"Answer"}"#,
            r#"{"type":"response.completed","response":{"id":"resp_3"}}"#,
        ]);
        assert!(matches!(
            &run.events[0],
            ContentEvent::ThinkingDelta { text, .. } if text == "Thinking it over"
        ));
        assert!(matches!(
            &run.events[1],
            ContentEvent::ThinkingEnd { signature: Some(sig), .. } if sig == "gAAAA"
        ));
        assert_eq!(text_of(&run.events), "Answer");
    }

    #[test]
    fn test_each_reasoning_item_ends_its_own_chain() {
        let run = run(&[
            r#"{"type":"response.reasoning_summary_text.delta","output_index":0,"summary_index":0,"delta":"Plan"}"#,
            r#"{"type":"response.output_item.done","output_index":0,"item":{"type":"reasoning","id":"rs_1","summary":[],"encrypted_content":"enc-1"}}"#,
            r#"{"type":"response.reasoning_summary_text.done","output_index":1,"summary_index":0,"text":"Check"}"#,
            r#"{"type":"response.output_item.done","output_index":1,"item":{"type":"reasoning","id":"rs_2","summary":[],"encrypted_content":"enc-2"}}"#,
            r#"{"type":"response.output_text.delta","output_index":2,"content_index":0,"delta":"Done"}"#,
            r#"{"type":"response.completed","response":{"id":"resp_6"}}"#,
        ]);
        let signatures: Vec<Option<&str>> = run
            .events
            .iter()
            .filter_map(|e| match e {
                ContentEvent::ThinkingEnd { signature, .. } => Some(signature.as_deref()),
                _ => None,
            })
            .collect();
        assert_eq!(signatures, vec![Some("enc-1"), Some("enc-2")]);
        assert!(run.events.iter().any(|e| matches!(
            e,
            ContentEvent::ThinkingDelta { text, .. } if text == "Check"
        )));
    }

    #[test]
    fn test_incomplete_maps_reason() {
        let run = run(&[
            r#"{"type":"response.output_text.delta","output_index":0,"content_index":0,"delta":"partial"}"#,
            r#"{"type":"response.incomplete","response":{"id":"resp_4","incomplete_details":{"reason":"max_output_tokens"}}}"#,
        ]);
        assert_eq!(run.finish_reason, Some(FinishReason::Length));
    }

    #[test]
    fn test_failed_and_error_events_fail() {
        let run_failed = run(&[
            r#"{"type":"response.failed","response":{"id":"resp_5","error":{"code":"server_error","message":"boom"}}}"#,
        ]);
        assert!(matches!(
            run_failed.last_action,
            Some(FrameAction::Fail(RelayError::Vendor(ref m))) if m == "server_error: boom"
        ));

        let run_error = run(&[r#"{"type":"error","code":"rate_limit_exceeded","message":"slow down"}"#]);
        assert!(matches!(
            run_error.last_action,
            Some(FrameAction::Fail(RelayError::Vendor(ref m))) if m == "rate_limit_exceeded: slow down"
        ));
    }

    #[test]
    fn test_unknown_event_types_are_skipped() {
        let adapter = ResponsesAdapter::new();
        let frame = SseEvent {
            data: r#"{"type":"response.content_part.added","output_index":0,"content_index":0,"part":{"type":"output_text","text":""}}"#.to_string(),
            ..SseEvent::default()
        };
        assert!(adapter.parse_frame(&frame).unwrap().is_none());
    }
}
