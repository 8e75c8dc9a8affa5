//! Criterion benchmarks for the frame codec.
//!
//! Measures header encoding and frame decoding for every length-field width,
//! using an opaque-bytes router so only the codec itself is timed.
//!
//! Run with:
//! ```bash
//! cargo bench --package gate-core --bench codec_bench
//! ```

use async_trait::async_trait;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use gate_core::{AgentRef, ByteOrder, FieldWidth, FrameParser, RouteError, Router};

struct BytesRouter;

#[async_trait]
impl Router for BytesRouter {
    type Message = Vec<u8>;

    async fn route(&self, _msg: Vec<u8>, _agent: AgentRef<Vec<u8>>) -> Result<(), RouteError> {
        Ok(())
    }

    fn unmarshal(&self, data: &[u8]) -> Result<Vec<u8>, RouteError> {
        Ok(data.to_vec())
    }

    fn marshal(&self, msg: &Vec<u8>) -> Result<Vec<u8>, RouteError> {
        Ok(msg.clone())
    }
}

// ── Fixtures ──────────────────────────────────────────────────────────────────

/// `id + body` with a 2-byte id and a body of `body_len` bytes.
fn payload(body_len: usize) -> Vec<u8> {
    let mut data = vec![0x00, 0x01];
    data.extend(std::iter::repeat(0xAB).take(body_len));
    data
}

fn parsers() -> Vec<(&'static str, FrameParser)> {
    vec![
        ("len1", FrameParser::new(FieldWidth::One, FieldWidth::Two, ByteOrder::BigEndian)),
        ("len2", FrameParser::new(FieldWidth::Two, FieldWidth::Two, ByteOrder::BigEndian)),
        ("len4", FrameParser::new(FieldWidth::Four, FieldWidth::Two, ByteOrder::LittleEndian)),
    ]
}

// ── Benchmark groups ──────────────────────────────────────────────────────────

/// Benchmarks `write_msg` (marshal + header) for a small game-state sized body.
fn bench_encode(c: &mut Criterion) {
    let msg = payload(200);
    let mut group = c.benchmark_group("write_msg");
    for (name, parser) in parsers() {
        group.bench_with_input(BenchmarkId::new("width", name), &parser, |b, parser| {
            b.iter(|| {
                parser
                    .write_msg(&BytesRouter, black_box(&msg))
                    .expect("encode must succeed")
            })
        });
    }
    group.finish();
}

/// Benchmarks `read_msg` from a pre-encoded in-memory frame.
fn bench_decode(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("runtime for benchmark");
    let msg = payload(200);

    let mut group = c.benchmark_group("read_msg");
    for (name, parser) in parsers() {
        let frame = parser
            .write_msg(&BytesRouter, &msg)
            .expect("encode must succeed for benchmark setup");
        group.bench_with_input(BenchmarkId::new("width", name), &frame, |b, frame| {
            b.iter(|| {
                runtime
                    .block_on(parser.read_msg(&BytesRouter, &mut black_box(&frame[..])))
                    .expect("decode must succeed")
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
