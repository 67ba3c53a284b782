use serde_json::Value;
use tracing::debug;

use crate::error::{ParseError, RelayError};
use crate::protocol::canonical::{FinishReason, Usage};
use crate::protocol::error_shapes::message_from_value;
use crate::protocol::mapping::gemini_finish_to_canonical;
use crate::stream::{parse_json, EventReporter, FrameAction, ProgressSink, SseEvent, StreamAdapter};
use crate::util::next_call_id;

use super::{GeminiPart, GeminiStreamChunk, GeminiUsageMetadata};

const VENDOR: &str = "gemini";

/// Gemini `alt=sse` chunks to reporter calls.
///
/// Gemini delivers function calls whole and without ids; ids are minted
/// locally when absent. The stream has no terminal sentinel and ends at EOF.
#[derive(Debug, Default)]
pub struct GenerateContentAdapter {
    finish_reason: Option<FinishReason>,
}

impl GenerateContentAdapter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn apply_part<S: ProgressSink>(part: GeminiPart, reporter: &mut EventReporter<S>) {
        if part.thought {
            if let Some(text) = part.text.as_deref() {
                reporter.buffer_thinking(text);
            }
            if let Some(signature) = part.thought_signature.as_deref() {
                reporter.set_thinking_signature(signature);
            }
            return;
        }

        // The signature of a thinking turn may ride on the first answer part.
        if let Some(signature) = part.thought_signature.as_deref() {
            reporter.set_thinking_signature(signature);
        }
        if let Some(text) = part.text.as_deref() {
            reporter.report_text(text);
        }
        if let Some(call) = part.function_call {
            let id = call
                .id
                .filter(|id| !id.is_empty())
                .unwrap_or_else(next_call_id);
            let arguments = match call.args {
                Some(Value::Null) | None => Value::Object(serde_json::Map::new()),
                Some(args) => args,
            };
            reporter.report_tool_call(&id, &call.name, arguments);
        }
    }
}

impl StreamAdapter for GenerateContentAdapter {
    type Event = GeminiStreamChunk;

    fn vendor(&self) -> &'static str {
        VENDOR
    }

    fn parse_frame(&self, frame: &SseEvent) -> Result<Option<GeminiStreamChunk>, ParseError> {
        if frame.data.trim().is_empty() {
            return Ok(None);
        }
        parse_json(VENDOR, &frame.data).map(Some)
    }

    fn apply<S: ProgressSink>(
        &mut self,
        chunk: GeminiStreamChunk,
        reporter: &mut EventReporter<S>,
    ) -> FrameAction {
        if let Some(error) = &chunk.error {
            let message = message_from_value(error).unwrap_or_else(|| error.to_string());
            return FrameAction::Fail(RelayError::Vendor(message));
        }
        if let Some(id) = chunk.response_id.as_deref() {
            reporter.set_upstream_response_id(id);
        }

        for candidate in chunk.candidates {
            if candidate.index.unwrap_or(0) != 0 {
                debug!(index = ?candidate.index, "ignoring secondary candidate");
                continue;
            }
            if let Some(content) = candidate.content {
                for part in content.parts {
                    Self::apply_part(part, reporter);
                }
            }
            if let Some(reason) = candidate.finish_reason.as_deref() {
                let mapped = gemini_finish_to_canonical(reason);
                self.finish_reason = Some(if mapped == FinishReason::Stop && reporter.has_tool_calls() {
                    FinishReason::ToolCalls
                } else {
                    mapped
                });
            }
        }

        if let Some(usage) = chunk.usage_metadata {
            reporter.report_usage(to_usage(&usage));
        }
        FrameAction::Continue
    }

    fn finish_reason(&self) -> Option<FinishReason> {
        self.finish_reason
    }
}

fn to_usage(usage: &GeminiUsageMetadata) -> Usage {
    Usage {
        input_tokens: usage.prompt_token_count.unwrap_or(0),
        output_tokens: usage.candidates_token_count.unwrap_or(0)
            + usage.thoughts_token_count.unwrap_or(0),
        cached_tokens: usage.cached_content_token_count,
    }
}
