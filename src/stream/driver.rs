//! Drives one upstream response body through an adapter and a reporter.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tokio::time::error::Elapsed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::reporter::{ContinuitySeed, EventReporter};
use super::sse::{is_done_event, SseParser};
use super::{FrameAction, ProgressSink, SseEvent, StreamAdapter};
use crate::config::EngineConfig;
use crate::error::{RelayError, StreamOutcome};
use crate::observability::token_counter::{estimate_history_tokens, merge_usage};
use crate::observability::usage::{RequestStatus, UsageSink};
use crate::protocol::anthropic::stream::MessagesAdapter;
use crate::protocol::canonical::{FinishReason, ProtocolVariant};
use crate::protocol::gemini::stream::GenerateContentAdapter;
use crate::protocol::openai_chat::stream::ChatCompletionsAdapter;
use crate::protocol::openai_responses::stream::ResponsesAdapter;
use crate::session::{ContinuationCache, ContinuationScope};

/// Identity of one upstream request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestMeta {
    pub request_id: String,
    /// Vendor key, e.g. `openai` or a gateway name.
    pub vendor: String,
    pub protocol: ProtocolVariant,
    pub model_id: String,
    /// Conversation the response belongs to. Without it no continuity
    /// marker is minted.
    pub session_id: Option<String>,
    pub estimated_input_tokens: u64,
}

impl RequestMeta {
    #[must_use]
    pub fn new(vendor: impl Into<String>, protocol: ProtocolVariant, model_id: impl Into<String>) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            vendor: vendor.into(),
            protocol,
            model_id: model_id.into(),
            session_id: None,
            estimated_input_tokens: 0,
        }
    }

    #[must_use]
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    #[must_use]
    pub fn with_estimated_input_tokens(mut self, tokens: u64) -> Self {
        self.estimated_input_tokens = tokens;
        self
    }

    /// Scope under which this request's response is cached and looked up.
    #[must_use]
    pub fn continuation_scope(&self) -> ContinuationScope {
        ContinuationScope::new(&*self.vendor, self.protocol, &*self.model_id)
    }
}

/// Collaborators shared by every stream the dispatch loop runs.
pub struct StreamContext<'a> {
    pub config: &'a EngineConfig,
    pub cancel: CancellationToken,
    pub usage_sink: &'a dyn UsageSink,
    pub continuations: Option<&'a ContinuationCache>,
}

enum Ending {
    Terminal,
    Eof,
    Cancelled,
    IdleTimeout,
    Failed(RelayError),
}

/// Run `body` through the adapter matching `meta.protocol`.
///
/// # Errors
///
/// See [`handle_stream`].
pub async fn handle_vendor_stream<B, E, S>(
    meta: &RequestMeta,
    body: B,
    sink: S,
    ctx: &StreamContext<'_>,
) -> Result<StreamOutcome, RelayError>
where
    B: Stream<Item = Result<Bytes, E>>,
    E: fmt::Display,
    S: ProgressSink,
{
    match meta.protocol {
        ProtocolVariant::ChatCompletions => {
            handle_stream(meta, ChatCompletionsAdapter::new(), body, sink, ctx).await
        }
        ProtocolVariant::Responses => {
            handle_stream(meta, ResponsesAdapter::new(), body, sink, ctx).await
        }
        ProtocolVariant::Messages => {
            handle_stream(meta, MessagesAdapter::new(), body, sink, ctx).await
        }
        ProtocolVariant::GenerateContent => {
            handle_stream(meta, GenerateContentAdapter::new(), body, sink, ctx).await
        }
    }
}

/// Read `body` to completion, cancellation or failure, feeding every frame
/// through `adapter` into a fresh reporter that emits into `sink`.
///
/// The reporter is flushed on every path, so content already buffered is
/// never lost. Cancellation (including an idle upstream) is an `Ok` outcome.
///
/// # Errors
///
/// Returns [`RelayError::Transport`] when the body fails mid-read and
/// [`RelayError::Vendor`] when the vendor reports an error in-stream.
pub async fn handle_stream<A, B, E, S>(
    meta: &RequestMeta,
    mut adapter: A,
    body: B,
    sink: S,
    ctx: &StreamContext<'_>,
) -> Result<StreamOutcome, RelayError>
where
    A: StreamAdapter,
    B: Stream<Item = Result<Bytes, E>>,
    E: fmt::Display,
    S: ProgressSink,
{
    let seed = meta.session_id.as_ref().map(|session_id| ContinuitySeed {
        vendor: meta.vendor.clone(),
        protocol: meta.protocol,
        model_id: meta.model_id.clone(),
        session_id: session_id.clone(),
        ttl: ctx.config.session.marker_ttl(),
    });
    let mut reporter = EventReporter::new(sink, ctx.config.reporter.clone(), seed);

    if let Err(err) = ctx.usage_sink.record_estimated_tokens(
        &meta.request_id,
        &meta.model_id,
        meta.estimated_input_tokens,
    ) {
        warn!(request_id = %meta.request_id, error = %err, "failed to record estimated usage");
    }

    let mut body = std::pin::pin!(body);
    let mut parser = SseParser::new();
    let mut frames: Vec<SseEvent> = Vec::with_capacity(8);
    let idle_timeout = ctx.config.stream.idle_timeout();

    let ending = loop {
        let next = tokio::select! {
            biased;
            () = ctx.cancel.cancelled() => break Ending::Cancelled,
            next = next_chunk(&mut body, idle_timeout) => next,
        };
        match next {
            Err(_) => break Ending::IdleTimeout,
            Ok(None) => {
                parser.finish_into(&mut frames);
                break dispatch_frames(meta, &mut adapter, &mut frames, &mut reporter)
                    .unwrap_or(Ending::Eof);
            }
            Ok(Some(Err(err))) => {
                break Ending::Failed(RelayError::Transport(format!(
                    "failed to read upstream body: {err}"
                )));
            }
            Ok(Some(Ok(chunk))) => {
                parser.feed_into(&chunk, &mut frames);
                if let Some(ending) = dispatch_frames(meta, &mut adapter, &mut frames, &mut reporter)
                {
                    break ending;
                }
            }
        }
    };

    let (result, finish_reason, status) = match ending {
        Ending::Terminal => {
            let finish_reason = adapter.finish_reason().unwrap_or(FinishReason::Stop);
            completed(finish_reason)
        }
        Ending::Eof => {
            let finish_reason = adapter.finish_reason().unwrap_or_else(|| {
                warn!(
                    request_id = %meta.request_id,
                    vendor = adapter.vendor(),
                    "upstream closed without a finish signal"
                );
                FinishReason::Unknown
            });
            completed(finish_reason)
        }
        Ending::Cancelled => {
            debug!(request_id = %meta.request_id, "stream cancelled");
            cancelled()
        }
        Ending::IdleTimeout => {
            info!(request_id = %meta.request_id, "upstream idle timeout; cancelling stream");
            cancelled()
        }
        Ending::Failed(err) => {
            warn!(request_id = %meta.request_id, error = %err, "stream failed");
            (Err(err), FinishReason::Error, RequestStatus::Failed)
        }
    };

    reporter.flush_all(finish_reason);

    let message = reporter.assistant_message();
    if status == RequestStatus::Completed && finish_reason.is_successful() {
        if let (Some(cache), Some(response_id)) =
            (ctx.continuations, reporter.upstream_response_id())
        {
            cache.save(&meta.continuation_scope(), response_id, &message);
        }
    }

    let usage = merge_usage(
        reporter.usage(),
        meta.estimated_input_tokens,
        estimate_history_tokens(std::slice::from_ref(&message)),
    );
    if let Err(err) = ctx
        .usage_sink
        .update_actual_tokens(&meta.request_id, usage, status)
    {
        warn!(request_id = %meta.request_id, error = %err, "failed to record actual usage");
    }

    info!(
        request_id = %meta.request_id,
        vendor = %meta.vendor,
        model = %meta.model_id,
        ?finish_reason,
        %status,
        "stream finished"
    );
    result
}

type Settled = (Result<StreamOutcome, RelayError>, FinishReason, RequestStatus);

fn completed(finish_reason: FinishReason) -> Settled {
    (
        Ok(StreamOutcome::Completed { finish_reason }),
        finish_reason,
        RequestStatus::Completed,
    )
}

fn cancelled() -> Settled {
    (
        Ok(StreamOutcome::Cancelled),
        FinishReason::Cancelled,
        RequestStatus::Cancelled,
    )
}

async fn next_chunk<B>(body: &mut B, idle_timeout: Option<Duration>) -> Result<Option<B::Item>, Elapsed>
where
    B: Stream + Unpin,
{
    match idle_timeout {
        Some(timeout) => tokio::time::timeout(timeout, body.next()).await,
        None => Ok(body.next().await),
    }
}

/// Feed parsed frames to the adapter. Returns an ending once the vendor
/// signals completion or failure; frames after that point are discarded.
fn dispatch_frames<A, S>(
    meta: &RequestMeta,
    adapter: &mut A,
    frames: &mut Vec<SseEvent>,
    reporter: &mut EventReporter<S>,
) -> Option<Ending>
where
    A: StreamAdapter,
    S: ProgressSink,
{
    for frame in frames.drain(..) {
        if is_done_event(&frame) {
            return Some(Ending::Terminal);
        }
        match adapter.parse_frame(&frame) {
            Ok(Some(event)) => match adapter.apply(event, reporter) {
                FrameAction::Continue => {}
                FrameAction::Done => return Some(Ending::Terminal),
                FrameAction::Fail(err) => return Some(Ending::Failed(err)),
            },
            Ok(None) => {}
            Err(err) => {
                warn!(
                    request_id = %meta.request_id,
                    vendor = adapter.vendor(),
                    error = %err,
                    "skipping malformed frame"
                );
            }
        }
    }
    None
}
