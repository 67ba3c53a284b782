//! Lifecycle of a single reasoning span.

use smallvec::SmallVec;

use crate::protocol::canonical::ContentEvent;
use crate::util::next_chain_id;

/// At most one open chain per response.
///
/// A chain opens on the first reasoning delta (or on signature metadata),
/// emits buffered text each time the buffer reaches the flush threshold,
/// and closes with a single `ThinkingEnd`. Content arriving after close
/// starts a fresh chain with a new id.
#[derive(Debug)]
pub struct ThinkingChain {
    flush_chars: usize,
    id: Option<String>,
    buffer: String,
    buffered_chars: usize,
    emitted: bool,
    signature: Option<String>,
    redacted: Option<String>,
}

impl ThinkingChain {
    #[must_use]
    pub fn new(flush_chars: usize) -> Self {
        Self {
            flush_chars: flush_chars.max(1),
            id: None,
            buffer: String::new(),
            buffered_chars: 0,
            emitted: false,
            signature: None,
            redacted: None,
        }
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.id.is_some()
    }

    #[must_use]
    pub fn has_signature(&self) -> bool {
        self.signature.is_some()
    }

    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn open(&mut self) {
        if self.id.is_none() {
            self.id = Some(next_chain_id());
        }
    }

    /// Buffer a reasoning delta, returning a `ThinkingDelta` once the
    /// buffer reaches the threshold.
    pub fn push(&mut self, delta: &str) -> Option<ContentEvent> {
        if delta.is_empty() {
            return None;
        }
        self.open();
        self.buffer.push_str(delta);
        self.buffered_chars += delta.chars().count();
        if self.buffered_chars >= self.flush_chars {
            return self.flush();
        }
        None
    }

    /// Emit whatever is buffered.
    pub fn flush(&mut self) -> Option<ContentEvent> {
        if self.buffer.is_empty() {
            return None;
        }
        let chain_id = self.id.clone()?;
        self.emitted = true;
        self.buffered_chars = 0;
        Some(ContentEvent::ThinkingDelta {
            text: std::mem::take(&mut self.buffer),
            chain_id,
        })
    }

    pub fn set_signature(&mut self, signature: &str) {
        if signature.is_empty() {
            return;
        }
        self.open();
        self.signature = Some(signature.to_string());
    }

    pub fn set_redacted(&mut self, data: &str) {
        if data.is_empty() {
            return;
        }
        self.open();
        match &mut self.redacted {
            Some(existing) => {
                existing.push('\n');
                existing.push_str(data);
            }
            None => self.redacted = Some(data.to_string()),
        }
    }

    /// Close the chain. With `drop_pending` the unflushed buffer is
    /// discarded instead of emitted. Nothing is emitted for a chain that
    /// produced no deltas and carries no metadata.
    pub fn close(&mut self, drop_pending: bool) -> SmallVec<[ContentEvent; 2]> {
        let mut out = SmallVec::new();
        if !self.is_open() {
            return out;
        }
        if drop_pending {
            self.buffer.clear();
            self.buffered_chars = 0;
        } else if let Some(delta) = self.flush() {
            out.push(delta);
        }

        let chain_id = self.id.take();
        let signature = self.signature.take();
        let redacted = self.redacted.take();
        let emitted = std::mem::take(&mut self.emitted);
        if let Some(chain_id) = chain_id {
            if emitted || signature.is_some() || redacted.is_some() {
                out.push(ContentEvent::ThinkingEnd {
                    chain_id,
                    signature,
                    redacted,
                });
            }
        }
        out
    }
}
