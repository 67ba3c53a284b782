/// Incremental SSE (Server-Sent Events) frame parser.
///
/// Handles buffering partial lines across arbitrary byte boundaries and the
/// field semantics of the
/// [SSE specification](https://html.spec.whatwg.org/multipage/server-sent-events.html).
use super::SseEvent;
use memchr::memchr2;

/// Incremental SSE line parser over raw bytes.
///
/// Lines are only decoded once complete, so a multi-byte UTF-8 sequence
/// split across two network chunks is reassembled before decoding.
pub struct SseParser {
    buffer: Vec<u8>,
    read_offset: usize,
    event_type: Option<String>,
    data_buffer: String,
    has_data: bool,
    last_event_id: Option<String>,
    retry: Option<u64>,
    /// The last line ended in `\r` at the end of a chunk; a leading `\n`
    /// in the next chunk belongs to that line ending.
    skip_lf: bool,
}

impl SseParser {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            read_offset: 0,
            event_type: None,
            data_buffer: String::new(),
            has_data: false,
            last_event_id: None,
            retry: None,
            skip_lf: false,
        }
    }

    /// Feed raw bytes and return any complete events parsed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        let mut out = Vec::new();
        self.feed_into(chunk, &mut out);
        out
    }

    /// Feed raw bytes and append complete events into a caller-provided buffer.
    ///
    /// - `event:` sets the event type for the next frame
    /// - `data:` appends to the data buffer, multiple lines joined with `\n`
    /// - an empty line dispatches the frame
    /// - `:` starts a comment
    /// - `id:` and `retry:` are carried on the dispatched event
    ///
    /// Lines end in `\n`, `\r\n` or a lone `\r`.
    pub fn feed_into(&mut self, chunk: &[u8], out: &mut Vec<SseEvent>) {
        self.buffer.extend_from_slice(chunk);
        let mut processed_up_to = self.read_offset;
        if self.skip_lf && processed_up_to < self.buffer.len() {
            if self.buffer[processed_up_to] == b'\n' {
                processed_up_to += 1;
            }
            self.skip_lf = false;
        }
        while let Some(rel_pos) = memchr2(b'\r', b'\n', &self.buffer[processed_up_to..]) {
            let line_end = processed_up_to + rel_pos;
            let line = String::from_utf8_lossy(&self.buffer[processed_up_to..line_end]);
            Self::process_line(
                &line,
                &mut self.event_type,
                &mut self.data_buffer,
                &mut self.has_data,
                &mut self.last_event_id,
                &mut self.retry,
                out,
            );
            let mut next = line_end + 1;
            if self.buffer[line_end] == b'\r' {
                match self.buffer.get(next) {
                    Some(b'\n') => next += 1,
                    Some(_) => {}
                    None => self.skip_lf = true,
                }
            }
            processed_up_to = next;
        }

        self.read_offset = processed_up_to;
        if self.read_offset == self.buffer.len() {
            self.buffer.clear();
            self.read_offset = 0;
            return;
        }
        let should_compact = self.read_offset > 0
            && (self.read_offset >= self.buffer.len() / 2 || self.read_offset >= 8 * 1024);
        if should_compact {
            self.buffer.drain(..self.read_offset);
            self.read_offset = 0;
        }
    }

    /// Drain whatever is left at end of stream.
    ///
    /// Some vendors close the connection right after the last `data:` line
    /// without the terminating blank line; that frame is still dispatched.
    pub fn finish_into(&mut self, out: &mut Vec<SseEvent>) {
        if self.read_offset < self.buffer.len() {
            let tail = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&tail[self.read_offset..]);
            Self::process_line(
                &line,
                &mut self.event_type,
                &mut self.data_buffer,
                &mut self.has_data,
                &mut self.last_event_id,
                &mut self.retry,
                out,
            );
        }
        self.buffer.clear();
        self.read_offset = 0;
        self.skip_lf = false;
        Self::process_line(
            "",
            &mut self.event_type,
            &mut self.data_buffer,
            &mut self.has_data,
            &mut self.last_event_id,
            &mut self.retry,
            out,
        );
    }

    fn process_line(
        line: &str,
        event_type: &mut Option<String>,
        data_buffer: &mut String,
        has_data: &mut bool,
        last_event_id: &mut Option<String>,
        retry: &mut Option<u64>,
        events: &mut Vec<SseEvent>,
    ) {
        if line.is_empty() {
            if *has_data {
                events.push(SseEvent {
                    event: event_type.take(),
                    data: std::mem::take(data_buffer),
                    id: last_event_id.clone(),
                    retry: retry.take(),
                });
                *has_data = false;
            } else {
                // A bare event line with no data is dropped with its type.
                *event_type = None;
            }
            return;
        }

        if line.starts_with(':') {
            return;
        }

        if let Some(value) = line.strip_prefix("data:") {
            let value = value.strip_prefix(' ').unwrap_or(value);
            if *has_data {
                data_buffer.push('\n');
            } else {
                *has_data = true;
            }
            data_buffer.push_str(value);
        } else if let Some(value) = line.strip_prefix("event:") {
            let value = value.strip_prefix(' ').unwrap_or(value);
            *event_type = Some(value.to_string());
        } else if let Some(value) = line.strip_prefix("id:") {
            let value = value.strip_prefix(' ').unwrap_or(value);
            *last_event_id = Some(value.to_string());
        } else if let Some(value) = line.strip_prefix("retry:") {
            if let Ok(ms) = value.trim().parse::<u64>() {
                *retry = Some(ms);
            }
        }
        // Unknown field names are ignored.
    }
}

impl Default for SseParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Check if an [`SseEvent`] is the `OpenAI`-style `[DONE]` sentinel.
#[must_use]
pub fn is_done_event(event: &SseEvent) -> bool {
    event.data.trim() == "[DONE]"
}
