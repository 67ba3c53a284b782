use criterion::{black_box, criterion_group, criterion_main, Criterion};

use llm_relay::config::ReporterConfig;
use llm_relay::protocol::canonical::{ConversationMessage, FinishReason, ProtocolVariant, Role};
use llm_relay::session::similarity::similarity_percent;
use llm_relay::session::{ContinuationCache, ContinuationScope, ResponseSummary};
use llm_relay::stream::{EventReporter, SseParser};

fn bench_reporter_text(c: &mut Criterion) {
    let deltas: Vec<String> = (0..256).map(|i| format!("token{i} ")).collect();

    c.bench_function("reporter_text_256_deltas", |b| {
        b.iter(|| {
            let mut reporter = EventReporter::new(Vec::new(), ReporterConfig::default(), None);
            for delta in &deltas {
                reporter.report_text(black_box(delta));
            }
            reporter.flush_all(FinishReason::Stop);
            black_box(reporter.assistant_message());
        });
    });

    c.bench_function("reporter_interleaved_thinking_text_256", |b| {
        b.iter(|| {
            let mut reporter = EventReporter::new(Vec::new(), ReporterConfig::default(), None);
            for (i, delta) in deltas.iter().enumerate() {
                if i % 8 < 4 {
                    reporter.buffer_thinking(black_box(delta));
                } else {
                    reporter.report_text(black_box(delta));
                }
            }
            reporter.flush_all(FinishReason::Stop);
        });
    });
}

fn bench_tool_call_fragments(c: &mut Criterion) {
    let fragments: Vec<String> = std::iter::once("{\"items\":[".to_string())
        .chain((0..128).map(|i| format!("{{\"n\":{i}}},")))
        .chain(std::iter::once("{\"n\":-1}]}".to_string()))
        .collect();

    c.bench_function("reporter_tool_call_130_fragments", |b| {
        b.iter(|| {
            let mut reporter = EventReporter::new(Vec::new(), ReporterConfig::default(), None);
            reporter.accumulate_tool_call(0, Some("call_1"), Some("batch"), None);
            for fragment in &fragments {
                reporter.accumulate_tool_call(0, None, None, Some(black_box(fragment)));
            }
            reporter.flush_all(FinishReason::ToolCalls);
        });
    });
}

fn bench_sse_parser(c: &mut Criterion) {
    let frame = "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"hello world\"}}]}\n\n";
    let body = frame.repeat(64);
    let chunks: Vec<&[u8]> = body.as_bytes().chunks(97).collect();

    c.bench_function("sse_parser_64_frames_odd_chunks", |b| {
        b.iter(|| {
            let mut parser = SseParser::new();
            let mut out = Vec::with_capacity(64);
            for chunk in &chunks {
                parser.feed_into(black_box(chunk), &mut out);
            }
            black_box(out.len());
        });
    });
}

fn bench_similarity(c: &mut Criterion) {
    let a = "The failing test is caused by an off-by-one error in the tokenizer when the input ends with a multi-byte character.".repeat(2);
    let b_text = a.replace("off-by-one", "off by one");

    c.bench_function("similarity_percent_200_chars", |b| {
        b.iter(|| black_box(similarity_percent(black_box(&a), black_box(&b_text))));
    });
}

fn bench_continuation_lookup(c: &mut Criterion) {
    let cache = ContinuationCache::default();
    let scope = ContinuationScope::new("openai", ProtocolVariant::Responses, "gpt-4.1");
    for i in 0..100 {
        let message = ConversationMessage::text(Role::Assistant, format!("cached reply number {i} with some body text"));
        cache.save(&scope, &format!("resp_{i}"), &message);
    }
    let history = vec![
        ConversationMessage::text(Role::User, "question"),
        ConversationMessage::text(Role::Assistant, "cached reply number 3 with some body text"),
        ConversationMessage::text(Role::User, "follow-up"),
    ];
    let summary = ResponseSummary::from_message(&history[1], 200);

    c.bench_function("continuation_lookup_100_entries", |b| {
        b.iter(|| black_box(cache.find_continuation(&scope, black_box(&history))));
    });

    c.bench_function("summary_render_and_parse", |b| {
        b.iter(|| {
            let rendered = black_box(&summary).to_string();
            black_box(ResponseSummary::parse(&rendered).ok());
        });
    });
}

criterion_group!(
    benches,
    bench_reporter_text,
    bench_tool_call_fragments,
    bench_sse_parser,
    bench_similarity,
    bench_continuation_lookup
);
criterion_main!(benches);
