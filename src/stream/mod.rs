pub mod driver;
pub mod reporter;
pub mod sse;
pub mod thinking;
pub mod tool_calls;

pub use driver::{handle_stream, handle_vendor_stream, RequestMeta, StreamContext};
pub use reporter::{ContinuitySeed, EventReporter};
pub use sse::SseParser;

use serde::de::DeserializeOwned;
use tokio::sync::mpsc;

use crate::error::{ParseError, RelayError};
use crate::protocol::canonical::{ContentEvent, FinishReason};

/// A parsed SSE frame from the upstream.
#[derive(Debug, Clone, Default)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
    pub retry: Option<u64>,
}

/// The receiving side of a progress sink went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("progress sink closed")]
pub struct SinkClosed;

/// Receiver of canonical content events, in order.
pub trait ProgressSink {
    /// # Errors
    ///
    /// Returns [`SinkClosed`] once the consumer stopped listening.
    fn emit(&mut self, event: ContentEvent) -> Result<(), SinkClosed>;
}

impl ProgressSink for Vec<ContentEvent> {
    fn emit(&mut self, event: ContentEvent) -> Result<(), SinkClosed> {
        self.push(event);
        Ok(())
    }
}

impl ProgressSink for mpsc::UnboundedSender<ContentEvent> {
    fn emit(&mut self, event: ContentEvent) -> Result<(), SinkClosed> {
        self.send(event).map_err(|_| SinkClosed)
    }
}

impl<S: ProgressSink + ?Sized> ProgressSink for &mut S {
    fn emit(&mut self, event: ContentEvent) -> Result<(), SinkClosed> {
        (**self).emit(event)
    }
}

/// What the driver does after an adapter handled one event.
#[derive(Debug)]
pub enum FrameAction {
    Continue,
    /// The vendor signalled the end of the response.
    Done,
    /// The vendor reported an error mid-stream.
    Fail(RelayError),
}

/// Per-protocol parser that turns SSE frames into reporter calls.
///
/// One instance serves exactly one response.
pub trait StreamAdapter {
    type Event;

    fn vendor(&self) -> &'static str;

    /// Typed parse of one frame. `Ok(None)` means the frame carries nothing
    /// of interest (keep-alives, unknown event types).
    ///
    /// # Errors
    ///
    /// Returns [`ParseError`] for a malformed frame; the driver logs and
    /// skips it.
    fn parse_frame(&self, frame: &SseEvent) -> Result<Option<Self::Event>, ParseError>;

    fn apply<S: ProgressSink>(
        &mut self,
        event: Self::Event,
        reporter: &mut EventReporter<S>,
    ) -> FrameAction;

    /// Finish reason reported by the vendor so far.
    fn finish_reason(&self) -> Option<FinishReason>;
}

/// Deserialize a frame payload, tagging failures with the vendor.
pub(crate) fn parse_json<T: DeserializeOwned>(
    vendor: &'static str,
    data: &str,
) -> Result<T, ParseError> {
    serde_json::from_str(data).map_err(|source| ParseError::Json { vendor, source })
}
