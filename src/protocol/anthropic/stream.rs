use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::Value;

use crate::error::{ParseError, RelayError};
use crate::protocol::canonical::{FinishReason, Usage};
use crate::protocol::error_shapes::message_from_value;
use crate::protocol::mapping::anthropic_stop_to_canonical;
use crate::stream::{parse_json, EventReporter, FrameAction, ProgressSink, SseEvent, StreamAdapter};

use super::{AnthropicContentBlock, AnthropicDelta, AnthropicStreamEvent, AnthropicUsage};

const VENDOR: &str = "anthropic";

/// A `tool_use` block that has not been closed yet.
#[derive(Debug, Default)]
struct OpenToolBlock {
    /// Input sent whole in `content_block_start`, used when no
    /// `input_json_delta` follows.
    initial_input: Option<Value>,
    saw_delta: bool,
}

/// Anthropic Messages named-event stream to reporter calls.
#[derive(Debug, Default)]
pub struct MessagesAdapter {
    finish_reason: Option<FinishReason>,
    tool_blocks: FxHashMap<u32, OpenToolBlock>,
    thinking_blocks: FxHashSet<u32>,
}

impl MessagesAdapter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn start_block<S: ProgressSink>(
        &mut self,
        index: u32,
        block: AnthropicContentBlock,
        reporter: &mut EventReporter<S>,
    ) {
        match block {
            AnthropicContentBlock::Text { text } => reporter.report_text(&text),
            AnthropicContentBlock::Thinking {
                thinking,
                signature,
            } => {
                self.thinking_blocks.insert(index);
                reporter.buffer_thinking(&thinking);
                if let Some(signature) = signature.filter(|s| !s.is_empty()) {
                    reporter.set_thinking_signature(&signature);
                }
            }
            AnthropicContentBlock::RedactedThinking { data } => {
                self.thinking_blocks.insert(index);
                reporter.set_redacted_thinking(&data);
            }
            AnthropicContentBlock::ToolUse { id, name, input } => {
                let initial_input = input.filter(|value| match value {
                    Value::Object(map) => !map.is_empty(),
                    Value::Null => false,
                    _ => true,
                });
                self.tool_blocks.insert(
                    index,
                    OpenToolBlock {
                        initial_input,
                        saw_delta: false,
                    },
                );
                reporter.accumulate_tool_call(index, Some(&id), Some(&name), None);
            }
            AnthropicContentBlock::Other => {}
        }
    }

    fn stop_block<S: ProgressSink>(&mut self, index: u32, reporter: &mut EventReporter<S>) {
        if self.thinking_blocks.remove(&index) {
            reporter.end_thinking_block();
            return;
        }
        let Some(block) = self.tool_blocks.remove(&index) else {
            return;
        };
        if !block.saw_delta {
            if let Some(input) = block.initial_input {
                reporter.accumulate_tool_call(index, None, None, Some(&input.to_string()));
            }
        }
        reporter.finalize_tool_call(index);
    }
}

impl StreamAdapter for MessagesAdapter {
    type Event = AnthropicStreamEvent;

    fn vendor(&self) -> &'static str {
        VENDOR
    }

    fn parse_frame(&self, frame: &SseEvent) -> Result<Option<AnthropicStreamEvent>, ParseError> {
        // Named events; the `type` field inside `data` repeats the name.
        match frame.event.as_deref() {
            Some(
                "message_start" | "content_block_start" | "content_block_delta"
                | "content_block_stop" | "message_delta" | "message_stop" | "error",
            )
            | None => {}
            Some(_) => return Ok(None),
        }
        if frame.data.trim().is_empty() {
            return Ok(None);
        }
        match parse_json(VENDOR, &frame.data)? {
            AnthropicStreamEvent::Ping {} => Ok(None),
            event => Ok(Some(event)),
        }
    }

    fn apply<S: ProgressSink>(
        &mut self,
        event: AnthropicStreamEvent,
        reporter: &mut EventReporter<S>,
    ) -> FrameAction {
        match event {
            AnthropicStreamEvent::MessageStart { message } => {
                reporter.set_upstream_response_id(&message.id);
                reporter.report_usage(to_usage(&message.usage));
            }
            AnthropicStreamEvent::ContentBlockStart {
                index,
                content_block,
            } => self.start_block(index, content_block, reporter),
            AnthropicStreamEvent::ContentBlockDelta { index, delta } => match delta {
                AnthropicDelta::TextDelta { text } => reporter.report_text(&text),
                AnthropicDelta::ThinkingDelta { thinking } => reporter.buffer_thinking(&thinking),
                AnthropicDelta::SignatureDelta { signature } => {
                    reporter.set_thinking_signature(&signature);
                }
                AnthropicDelta::InputJsonDelta { partial_json } => {
                    if let Some(block) = self.tool_blocks.get_mut(&index) {
                        block.saw_delta = true;
                    }
                    reporter.accumulate_tool_call(index, None, None, Some(&partial_json));
                }
                AnthropicDelta::Other => {}
            },
            AnthropicStreamEvent::ContentBlockStop { index } => self.stop_block(index, reporter),
            AnthropicStreamEvent::MessageDelta { delta, usage } => {
                if let Some(reason) = delta.stop_reason.as_deref() {
                    self.finish_reason = Some(anthropic_stop_to_canonical(reason));
                }
                if let Some(usage) = usage {
                    reporter.report_usage(to_usage(&usage));
                }
            }
            AnthropicStreamEvent::MessageStop {} => return FrameAction::Done,
            AnthropicStreamEvent::Ping {} => {}
            AnthropicStreamEvent::Error { error } => {
                let message = message_from_value(&error).unwrap_or_else(|| error.to_string());
                return FrameAction::Fail(RelayError::Vendor(message));
            }
        }
        FrameAction::Continue
    }

    fn finish_reason(&self) -> Option<FinishReason> {
        self.finish_reason
    }
}

fn to_usage(usage: &AnthropicUsage) -> Usage {
    Usage {
        input_tokens: usage.input_tokens,
        output_tokens: usage.output_tokens,
        cached_tokens: usage.cache_read_input_tokens,
    }
}
