//! Replays a captured upstream SSE body through the engine and prints the
//! canonical events as JSON lines.

use std::path::PathBuf;
use std::process::ExitCode;

use bytes::Bytes;
use llm_relay::config::{load_config, EngineConfig};
use llm_relay::error::StreamOutcome;
use llm_relay::observability::init_tracing;
use llm_relay::observability::usage::TracingUsageSink;
use llm_relay::protocol::canonical::{ContentEvent, ProtocolVariant};
use llm_relay::session::ContinuationCache;
use llm_relay::stream::{handle_vendor_stream, RequestMeta, StreamContext};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Bytes handed to the parser per read, to exercise frame reassembly.
const REPLAY_CHUNK_BYTES: usize = 512;

struct Args {
    protocol: ProtocolVariant,
    capture: PathBuf,
    config: Option<PathBuf>,
    session_id: Option<String>,
}

fn usage() -> String {
    "usage: relay-replay <chat_completions|responses|messages|generate_content> <capture-file> [config.yaml] [--session <id>]".to_string()
}

fn parse_args() -> Result<Args, String> {
    let mut positional = Vec::new();
    let mut session_id = None;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--session" {
            session_id = Some(args.next().ok_or_else(usage)?);
        } else {
            positional.push(arg);
        }
    }
    let mut positional = positional.into_iter();
    let protocol = positional.next().ok_or_else(usage)?;
    let protocol =
        ProtocolVariant::parse(&protocol).ok_or_else(|| format!("unknown protocol {protocol:?}"))?;
    let capture = positional.next().map(PathBuf::from).ok_or_else(usage)?;
    Ok(Args {
        protocol,
        capture,
        config: positional.next().map(PathBuf::from),
        session_id,
    })
}

fn main() -> ExitCode {
    let args = match parse_args() {
        Ok(args) => args,
        Err(message) => {
            eprintln!("{message}");
            return ExitCode::from(2);
        }
    };

    let config = match &args.config {
        Some(path) => match load_config(path) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("Failed to load configuration: {err}");
                return ExitCode::FAILURE;
            }
        },
        None => EngineConfig::default(),
    };
    init_tracing(&config.log_level, config.log_format);

    let capture = match std::fs::read(&args.capture) {
        Ok(bytes) => bytes,
        Err(err) => {
            eprintln!("Failed to read {}: {err}", args.capture.display());
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("Failed to initialize Tokio runtime: {err}");
            return ExitCode::FAILURE;
        }
    };

    runtime.block_on(replay(args, config, capture))
}

async fn replay(args: Args, config: EngineConfig, capture: Vec<u8>) -> ExitCode {
    let mut meta = RequestMeta::new(args.protocol.as_str(), args.protocol, "replay");
    if let Some(session_id) = args.session_id {
        meta = meta.with_session(session_id);
    }

    let continuations = ContinuationCache::new(config.continuation.clone());
    let ctx = StreamContext {
        config: &config,
        cancel: CancellationToken::new(),
        usage_sink: &TracingUsageSink,
        continuations: Some(&continuations),
    };

    let chunks: Vec<Result<Bytes, std::convert::Infallible>> = capture
        .chunks(REPLAY_CHUNK_BYTES)
        .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
        .collect();
    let body = futures_util::stream::iter(chunks);

    let (tx, mut rx) = mpsc::unbounded_channel::<ContentEvent>();
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(err) => eprintln!("Failed to serialize event: {err}"),
            }
        }
    });

    let outcome = handle_vendor_stream(&meta, body, tx, &ctx).await;
    if let Err(err) = printer.await {
        eprintln!("Event printer failed: {err}");
    }

    match outcome {
        Ok(StreamOutcome::Completed { finish_reason }) => {
            eprintln!("completed: {finish_reason:?}");
            ExitCode::SUCCESS
        }
        Ok(StreamOutcome::Cancelled) => {
            eprintln!("cancelled");
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("stream failed: {err}");
            ExitCode::FAILURE
        }
    }
}
