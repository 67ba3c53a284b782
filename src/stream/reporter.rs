//! Canonical event reporter.
//!
//! Adapters call into an [`EventReporter`] in stream order. The reporter
//! buffers text and reasoning, reassembles tool calls, and guarantees the
//! ordering of the canonical event stream: an open thinking chain is always
//! closed before any text or tool-call event.

use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use super::thinking::ThinkingChain;
use super::tool_calls::{CompletedToolCall, FragmentOutcome, ToolCallBuffer};
use super::ProgressSink;
use crate::config::ReporterConfig;
use crate::protocol::canonical::{
    ContentEvent, ConversationMessage, FinishReason, MessagePart, ProtocolVariant, Role, Usage,
};
use crate::session::codec::{encode_marker, ContinuityMarker, CONTINUITY_MIME};
use crate::util::unix_now_millis;

/// What the reporter needs to mint a continuity marker at flush time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContinuitySeed {
    pub vendor: String,
    pub protocol: ProtocolVariant,
    pub model_id: String,
    pub session_id: String,
    pub ttl: Option<Duration>,
}

pub struct EventReporter<S: ProgressSink> {
    sink: S,
    config: ReporterConfig,
    text: String,
    text_chars: usize,
    thinking: ThinkingChain,
    tool_calls: ToolCallBuffer,
    usage: Option<Usage>,
    seed: Option<ContinuitySeed>,
    upstream_response_id: Option<String>,
    saw_thinking: bool,
    streamed_thinking: bool,
    emitted_text: bool,
    emitted_tool_call: bool,
    flushed: bool,
    sink_closed: bool,
    recorded_text: String,
    recorded_thinking: String,
    recorded_signature: Option<String>,
    recorded_calls: Vec<CompletedToolCall>,
}

impl<S: ProgressSink> EventReporter<S> {
    pub fn new(sink: S, config: ReporterConfig, seed: Option<ContinuitySeed>) -> Self {
        let thinking = ThinkingChain::new(config.thinking_flush_chars);
        Self {
            sink,
            config,
            text: String::new(),
            text_chars: 0,
            thinking,
            tool_calls: ToolCallBuffer::new(),
            usage: None,
            seed,
            upstream_response_id: None,
            saw_thinking: false,
            streamed_thinking: false,
            emitted_text: false,
            emitted_tool_call: false,
            flushed: false,
            sink_closed: false,
            recorded_text: String::new(),
            recorded_thinking: String::new(),
            recorded_signature: None,
            recorded_calls: Vec::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Text
    // -----------------------------------------------------------------------

    pub fn report_text(&mut self, delta: &str) {
        if delta.is_empty() || self.ignore_after_flush("text") {
            return;
        }
        self.close_thinking_chain(false);
        self.recorded_text.push_str(delta);
        self.text.push_str(delta);
        self.text_chars += delta.chars().count();
        if self.text_chars >= self.config.text_flush_chars {
            self.flush_text();
        }
    }

    fn flush_text(&mut self) {
        if self.text.is_empty() {
            return;
        }
        self.text_chars = 0;
        self.emitted_text = true;
        let text = std::mem::take(&mut self.text);
        self.emit(ContentEvent::TextDelta { text });
    }

    // -----------------------------------------------------------------------
    // Thinking
    // -----------------------------------------------------------------------

    pub fn buffer_thinking(&mut self, delta: &str) {
        if delta.is_empty() || self.ignore_after_flush("thinking") {
            return;
        }
        self.streamed_thinking = true;
        self.push_thinking(delta);
    }

    /// Full reasoning text sent after (or instead of) incremental deltas.
    /// Honored only when no incremental reasoning was seen.
    pub fn buffer_thinking_if_not_already_streamed(&mut self, text: &str) {
        if self.streamed_thinking {
            debug!("ignoring final reasoning text already streamed as deltas");
            return;
        }
        if text.is_empty() || self.ignore_after_flush("thinking") {
            return;
        }
        self.push_thinking(text);
    }

    fn push_thinking(&mut self, delta: &str) {
        self.flush_text();
        self.saw_thinking = true;
        self.recorded_thinking.push_str(delta);
        if let Some(event) = self.thinking.push(delta) {
            self.emit(event);
        }
    }

    /// Attach a signature to the open chain. A second signature belongs to
    /// a new reasoning block, so the signed chain is closed first.
    pub fn set_thinking_signature(&mut self, signature: &str) {
        if signature.is_empty() || self.ignore_after_flush("signature") {
            return;
        }
        if self.thinking.has_signature() {
            self.close_thinking_chain(false);
        }
        if !self.thinking.is_open() {
            self.flush_text();
        }
        self.recorded_signature = Some(signature.to_string());
        self.thinking.set_signature(signature);
    }

    pub fn set_redacted_thinking(&mut self, data: &str) {
        if self.ignore_after_flush("redacted thinking") {
            return;
        }
        if !self.thinking.is_open() {
            self.flush_text();
        }
        self.saw_thinking = true;
        self.thinking.set_redacted(data);
    }

    /// The vendor closed a reasoning block; the next reasoning content starts
    /// a new chain, and its final full text is honored again.
    pub fn end_thinking_block(&mut self) {
        if self.flushed {
            return;
        }
        self.close_thinking_chain(false);
        self.streamed_thinking = false;
    }

    /// Close the open chain, if any: flush (or drop) its buffer, then end it.
    fn close_thinking_chain(&mut self, drop_pending: bool) {
        for event in self.thinking.close(drop_pending) {
            self.emit(event);
        }
    }

    // -----------------------------------------------------------------------
    // Tool calls
    // -----------------------------------------------------------------------

    pub fn accumulate_tool_call(
        &mut self,
        index: u32,
        id: Option<&str>,
        name: Option<&str>,
        args_fragment: Option<&str>,
    ) {
        if self.ignore_after_flush("tool call fragment") {
            return;
        }
        self.close_thinking_chain(false);
        self.flush_text();
        let FragmentOutcome { started, completed } =
            self.tool_calls.accumulate(index, id, name, args_fragment);
        if let Some((id, name)) = started {
            self.emit(ContentEvent::ToolCallStart { index, id, name });
        }
        if let Some(call) = completed {
            self.emit_tool_call(call);
        }
    }

    /// Complete the pending call at `index` now, for vendors that mark the
    /// end of a tool-call block explicitly.
    pub fn finalize_tool_call(&mut self, index: u32) {
        if self.flushed {
            return;
        }
        if let Some(call) = self.tool_calls.finalize(index) {
            self.close_thinking_chain(false);
            self.flush_text();
            self.emit_tool_call(call);
        }
    }

    /// A tool call delivered in one piece.
    pub fn report_tool_call(&mut self, id: &str, name: &str, arguments: Value) {
        if self.ignore_after_flush("tool call") {
            return;
        }
        self.close_thinking_chain(false);
        self.flush_text();
        let index = self.tool_calls.next_free_index();
        self.tool_calls.mark_completed(index);
        self.emit(ContentEvent::ToolCallStart {
            index,
            id: Some(id.to_string()),
            name: Some(name.to_string()),
        });
        self.emit_tool_call(CompletedToolCall {
            index,
            id: id.to_string(),
            name: name.to_string(),
            arguments,
        });
    }

    fn emit_tool_call(&mut self, call: CompletedToolCall) {
        self.emitted_tool_call = true;
        self.emit(ContentEvent::ToolCallComplete {
            id: call.id.clone(),
            name: call.name.clone(),
            arguments: call.arguments.clone(),
        });
        self.recorded_calls.push(call);
    }

    // -----------------------------------------------------------------------
    // Metadata
    // -----------------------------------------------------------------------

    pub fn report_usage(&mut self, usage: Usage) {
        match &mut self.usage {
            Some(existing) => existing.merge(usage),
            None => self.usage = Some(usage),
        }
    }

    pub fn set_upstream_response_id(&mut self, id: &str) {
        if !id.is_empty() {
            self.upstream_response_id = Some(id.to_string());
        }
    }

    #[must_use]
    pub fn upstream_response_id(&self) -> Option<&str> {
        self.upstream_response_id.as_deref()
    }

    #[must_use]
    pub fn usage(&self) -> Option<Usage> {
        self.usage
    }

    #[must_use]
    pub fn has_tool_calls(&self) -> bool {
        self.emitted_tool_call || !self.tool_calls.is_empty()
    }

    // -----------------------------------------------------------------------
    // Flush
    // -----------------------------------------------------------------------

    /// Emit everything still buffered, in canonical order. A second call
    /// emits nothing.
    pub fn flush_all(&mut self, finish_reason: FinishReason) {
        if self.flushed {
            return;
        }

        let truncated = finish_reason == FinishReason::Length;
        if truncated && self.thinking.is_open() {
            debug!("dropping buffered reasoning after length truncation");
        }
        self.close_thinking_chain(truncated);
        self.flush_text();

        for call in self.tool_calls.drain_pending() {
            self.emit_tool_call(call);
        }

        if self.saw_thinking && !self.emitted_text && !self.emitted_tool_call {
            let text = self.config.placeholder_text.clone();
            self.recorded_text.push_str(&text);
            self.emitted_text = true;
            self.emit(ContentEvent::TextDelta { text });
        }

        if let Some(usage) = self.usage {
            self.emit(ContentEvent::UsageReport(usage));
        }

        if finish_reason.is_successful() {
            self.emit_continuity_marker();
        }
        self.flushed = true;
    }

    fn emit_continuity_marker(&mut self) {
        let (Some(seed), Some(response_id)) = (&self.seed, &self.upstream_response_id) else {
            return;
        };
        let marker = ContinuityMarker {
            vendor: seed.vendor.clone(),
            protocol: seed.protocol,
            model_id: seed.model_id.clone(),
            session_id: seed.session_id.clone(),
            upstream_response_id: response_id.clone(),
            expires_at: seed.ttl.map(|ttl| {
                unix_now_millis().saturating_add(u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX))
            }),
        };
        let payload = encode_marker(&marker);
        self.emit(ContentEvent::SessionData {
            mime: CONTINUITY_MIME.to_string(),
            payload,
        });
    }

    /// The assistant turn as produced so far, used for response summaries.
    #[must_use]
    pub fn assistant_message(&self) -> ConversationMessage {
        let mut message = ConversationMessage::new(Role::Assistant);
        if !self.recorded_thinking.is_empty() {
            message.parts.push(MessagePart::Thinking {
                text: self.recorded_thinking.clone(),
                signature: self.recorded_signature.clone(),
            });
        }
        if !self.recorded_text.is_empty() {
            message
                .parts
                .push(MessagePart::Text(self.recorded_text.clone()));
        }
        for call in &self.recorded_calls {
            message.parts.push(MessagePart::ToolCall {
                id: call.id.clone(),
                name: call.name.clone(),
                arguments: call.arguments.clone(),
            });
        }
        message
    }

    fn ignore_after_flush(&self, what: &'static str) -> bool {
        if self.flushed {
            debug!(what, "ignoring content reported after flush");
        }
        self.flushed
    }

    fn emit(&mut self, event: ContentEvent) {
        if self.sink_closed {
            return;
        }
        if let Err(err) = self.sink.emit(event) {
            debug!(error = %err, "progress sink closed; discarding further events");
            self.sink_closed = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn reporter(text_flush: usize, thinking_flush: usize) -> EventReporter<Vec<ContentEvent>> {
        let config = ReporterConfig {
            text_flush_chars: text_flush,
            thinking_flush_chars: thinking_flush,
            ..ReporterConfig::default()
        };
        EventReporter::new(Vec::new(), config, None)
    }

    fn events(reporter: &EventReporter<Vec<ContentEvent>>) -> &[ContentEvent] {
        &reporter.sink
    }

    fn assert_no_text_inside_chain(events: &[ContentEvent]) {
        let mut open: Option<&str> = None;
        for event in events {
            match event {
                ContentEvent::ThinkingDelta { chain_id, .. } => {
                    if let Some(current) = open {
                        assert_eq!(current, chain_id, "two chains open at once");
                    }
                    open = Some(chain_id.as_str());
                }
                ContentEvent::ThinkingEnd { .. } => open = None,
                ContentEvent::TextDelta { .. }
                | ContentEvent::ToolCallStart { .. }
                | ContentEvent::ToolCallComplete { .. } => {
                    assert!(open.is_none(), "{event:?} emitted inside an open chain");
                }
                _ => {}
            }
        }
    }

    #[test]
    fn test_text_buffers_until_threshold() {
        let mut r = reporter(5, 100);
        r.report_text("ab");
        assert!(events(&r).is_empty());
        r.report_text("cde");
        assert_eq!(
            events(&r),
            &[ContentEvent::TextDelta {
                text: "abcde".to_string()
            }]
        );
    }

    #[test]
    fn test_text_closes_thinking_chain() {
        let mut r = reporter(1, 100);
        r.buffer_thinking("let me think");
        r.report_text("answer");
        r.flush_all(FinishReason::Stop);
        let events = events(&r);
        assert!(matches!(events[0], ContentEvent::ThinkingDelta { .. }));
        assert!(matches!(events[1], ContentEvent::ThinkingEnd { .. }));
        assert!(matches!(events[2], ContentEvent::TextDelta { .. }));
        assert_no_text_inside_chain(events);
    }

    #[test]
    fn test_interleaved_stream_keeps_ordering() {
        let mut r = reporter(3, 4);
        r.buffer_thinking("first thought");
        r.report_text("hello ");
        r.buffer_thinking("second");
        r.buffer_thinking(" thought");
        r.accumulate_tool_call(0, Some("c1"), Some("search"), Some("{\"q\":"));
        r.buffer_thinking("third");
        r.accumulate_tool_call(0, None, None, Some("1}"));
        r.report_text("done");
        r.flush_all(FinishReason::ToolCalls);
        assert_no_text_inside_chain(events(&r));
        let ends = events(&r)
            .iter()
            .filter(|e| matches!(e, ContentEvent::ThinkingEnd { .. }))
            .count();
        assert_eq!(ends, 3);
    }

    #[test]
    fn test_flush_all_twice_emits_nothing_second_time() {
        let mut r = reporter(100, 100);
        r.buffer_thinking("x");
        r.report_text("y");
        r.flush_all(FinishReason::Stop);
        let first = events(&r).len();
        assert!(first > 0);
        r.flush_all(FinishReason::Stop);
        assert_eq!(events(&r).len(), first);
    }

    #[test]
    fn test_thinking_only_turn_gets_one_placeholder() {
        let mut r = reporter(100, 100);
        r.buffer_thinking("only reasoning");
        r.flush_all(FinishReason::Stop);
        let texts: Vec<_> = events(&r)
            .iter()
            .filter(|e| matches!(e, ContentEvent::TextDelta { .. }))
            .collect();
        assert_eq!(texts.len(), 1);
        assert_eq!(
            texts[0],
            &ContentEvent::TextDelta {
                text: ReporterConfig::default().placeholder_text
            }
        );
    }

    #[test]
    fn test_no_placeholder_for_empty_turn_without_thinking() {
        let mut r = reporter(100, 100);
        r.flush_all(FinishReason::Stop);
        assert!(events(&r).is_empty());
    }

    #[test]
    fn test_length_truncation_drops_buffered_thinking() {
        let mut r = reporter(100, 100);
        r.buffer_thinking("cut off mid");
        r.flush_all(FinishReason::Length);
        assert!(!events(&r)
            .iter()
            .any(|e| matches!(e, ContentEvent::ThinkingDelta { .. })));
        // The turn still is not empty.
        assert!(matches!(events(&r)[0], ContentEvent::TextDelta { .. }));
    }

    #[test]
    fn test_final_reasoning_ignored_after_deltas() {
        let mut r = reporter(100, 1);
        r.buffer_thinking("ab");
        r.buffer_thinking_if_not_already_streamed("ab");
        r.flush_all(FinishReason::Stop);
        let thinking: String = events(&r)
            .iter()
            .filter_map(|e| match e {
                ContentEvent::ThinkingDelta { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(thinking, "ab");
    }

    #[test]
    fn test_final_reasoning_used_without_deltas() {
        let mut r = reporter(100, 100);
        r.buffer_thinking_if_not_already_streamed("summary");
        r.flush_all(FinishReason::Stop);
        assert!(matches!(
            &events(&r)[0],
            ContentEvent::ThinkingDelta { text, .. } if text == "summary"
        ));
    }

    #[test]
    fn test_signature_flushed_before_chain_end() {
        let mut r = reporter(100, 100);
        r.buffer_thinking("t");
        r.set_thinking_signature("sig-1");
        r.flush_all(FinishReason::Stop);
        assert!(matches!(
            &events(&r)[1],
            ContentEvent::ThinkingEnd { signature: Some(sig), .. } if sig == "sig-1"
        ));
    }

    #[test]
    fn test_pending_tool_calls_emitted_at_flush() {
        let mut r = reporter(100, 100);
        r.accumulate_tool_call(0, Some("c1"), Some("read_file"), Some("{\"path\":\"a.rs\""));
        r.accumulate_tool_call(1, Some("c2"), Some("broken"), Some("{\"x\":]"));
        r.flush_all(FinishReason::ToolCalls);
        let completes: Vec<_> = events(&r)
            .iter()
            .filter_map(|e| match e {
                ContentEvent::ToolCallComplete { name, arguments, .. } => Some((name, arguments)),
                _ => None,
            })
            .collect();
        assert_eq!(completes.len(), 1);
        assert_eq!(completes[0].0, "read_file");
        assert_eq!(completes[0].1, &json!({"path": "a.rs"}));
    }

    #[test]
    fn test_second_signature_starts_new_chain() {
        let mut r = reporter(100, 100);
        r.buffer_thinking("one");
        r.set_thinking_signature("s1");
        r.buffer_thinking("two");
        r.set_thinking_signature("s2");
        r.report_text("done");
        r.flush_all(FinishReason::Stop);
        let signatures: Vec<Option<&str>> = events(&r)
            .iter()
            .filter_map(|e| match e {
                ContentEvent::ThinkingEnd { signature, .. } => Some(signature.as_deref()),
                _ => None,
            })
            .collect();
        assert_eq!(signatures, vec![Some("s1"), Some("s2")]);
        assert_no_text_inside_chain(events(&r));
    }

    #[test]
    fn test_replayed_incomplete_fragments_keep_tool_call() {
        let mut r = reporter(100, 100);
        for _ in 0..2 {
            r.accumulate_tool_call(0, Some("c1"), Some("set"), Some("{\"a\":"));
            r.accumulate_tool_call(0, None, None, Some("1"));
        }
        r.flush_all(FinishReason::ToolCalls);
        let completes: Vec<&Value> = events(&r)
            .iter()
            .filter_map(|e| match e {
                ContentEvent::ToolCallComplete { arguments, .. } => Some(arguments),
                _ => None,
            })
            .collect();
        assert_eq!(completes, vec![&json!({"a": 1})]);
    }

    #[test]
    fn test_atomic_tool_call() {
        let mut r = reporter(100, 100);
        r.report_tool_call("g1", "lookup", json!({"id": 3}));
        r.report_tool_call("g2", "lookup", json!({"id": 4}));
        let starts: Vec<u32> = events(&r)
            .iter()
            .filter_map(|e| match e {
                ContentEvent::ToolCallStart { index, .. } => Some(*index),
                _ => None,
            })
            .collect();
        assert_eq!(starts, vec![0, 1]);
    }

    #[test]
    fn test_usage_emitted_once_at_flush() {
        let mut r = reporter(100, 100);
        r.report_usage(Usage {
            input_tokens: 10,
            output_tokens: 0,
            cached_tokens: None,
        });
        r.report_text("hi");
        r.report_usage(Usage {
            input_tokens: 0,
            output_tokens: 2,
            cached_tokens: None,
        });
        r.flush_all(FinishReason::Stop);
        let last = events(&r).last().unwrap();
        assert_eq!(
            last,
            &ContentEvent::UsageReport(Usage {
                input_tokens: 10,
                output_tokens: 2,
                cached_tokens: None,
            })
        );
    }

    #[test]
    fn test_continuity_marker_is_last_and_only_on_success() {
        let seed = ContinuitySeed {
            vendor: "openai".to_string(),
            protocol: ProtocolVariant::Responses,
            model_id: "gpt-x".to_string(),
            session_id: "conv-1".to_string(),
            ttl: None,
        };
        let mut ok = EventReporter::new(Vec::new(), ReporterConfig::default(), Some(seed.clone()));
        ok.set_upstream_response_id("resp_1");
        ok.report_text("hi");
        ok.flush_all(FinishReason::Stop);
        assert!(matches!(
            ok.sink.last(),
            Some(ContentEvent::SessionData { mime, .. }) if mime == CONTINUITY_MIME
        ));

        for finish in [FinishReason::Cancelled, FinishReason::Error, FinishReason::Unknown] {
            let mut r = EventReporter::new(Vec::new(), ReporterConfig::default(), Some(seed.clone()));
            r.set_upstream_response_id("resp_2");
            r.report_text("hi");
            r.flush_all(finish);
            assert!(
                !r.sink
                    .iter()
                    .any(|e| matches!(e, ContentEvent::SessionData { .. })),
                "marker minted for {finish:?}"
            );
        }
    }

    #[test]
    fn test_content_after_flush_is_ignored() {
        let mut r = reporter(1, 1);
        r.flush_all(FinishReason::Stop);
        r.report_text("late");
        r.buffer_thinking("late");
        assert!(events(&r).is_empty());
    }

    #[test]
    fn test_assistant_message_records_everything() {
        let mut r = reporter(1, 1);
        r.buffer_thinking("plan");
        r.report_text("ok");
        r.report_tool_call("t1", "run", json!({}));
        r.flush_all(FinishReason::ToolCalls);
        let message = r.assistant_message();
        assert_eq!(message.role, Role::Assistant);
        assert_eq!(message.parts.len(), 3);
        assert!(matches!(&message.parts[1], MessagePart::Text(t) if t == "ok"));
    }
}
