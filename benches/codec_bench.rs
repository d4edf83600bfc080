//! Performance benchmarks for LineCodec and response parsing.
//!
//! Every command round trip decodes one line and, for `COUNTS?`, parses
//! `channel_count + 1` integers. These benchmarks keep both well below the
//! default 10 ms command spacing.
//!
//! Run benchmarks with:
//! ```sh
//! cargo bench --bench codec_bench
//! ```

use bytes::BytesMut;
use countlink_protocol::{Command, LineCodec, parse_counts, parse_identity};
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;
use tokio_util::codec::{Decoder, Encoder};

/// A counts line for `channels` channels plus the overflow mask.
fn counts_line(channels: usize) -> String {
    let mut fields: Vec<String> = (0..channels)
        .map(|ch| (ch as u64 * 12_345).to_string())
        .collect();
    fields.push("0".to_string());
    fields.join(" ")
}

/// Benchmark framing typed commands.
fn bench_encode_commands(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_command");
    group.throughput(Throughput::Elements(1));

    let commands = [
        Command::Identify,
        Command::ReadCounts,
        Command::SetWindow { ns: 25 },
    ];

    for command in commands {
        let wire = command.to_wire();
        group.bench_with_input(BenchmarkId::from_parameter(&wire), &wire, |b, wire| {
            b.iter(|| {
                let mut codec = LineCodec::new();
                let mut buffer = BytesMut::new();
                codec.encode(black_box(wire.as_str()), &mut buffer).unwrap();
                black_box(buffer);
            });
        });
    }

    group.finish();
}

/// Benchmark decoding one CRLF-terminated counts line.
fn bench_decode_line(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_line");
    group.throughput(Throughput::Elements(1));

    let wire = format!("{}\r\n", counts_line(8));

    group.bench_function("decode_counts_line", |b| {
        b.iter(|| {
            let mut codec = LineCodec::new();
            let mut buffer = BytesMut::from(wire.as_bytes());
            let line = codec.decode(&mut buffer).unwrap();
            black_box(line);
        });
    });

    group.finish();
}

/// Benchmark decoding a line that arrives in small serial reads.
fn bench_decode_partial_streaming(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_partial_streaming");

    let wire = format!("{}\r\n", counts_line(8));

    for chunk in [1usize, 8, 32] {
        group.throughput(Throughput::Bytes(wire.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(chunk), &chunk, |b, &chunk| {
            b.iter(|| {
                let mut codec = LineCodec::new();
                let mut buffer = BytesMut::new();
                let mut result = None;

                for piece in wire.as_bytes().chunks(chunk) {
                    buffer.extend_from_slice(piece);
                    if let Some(line) = codec.decode(&mut buffer).unwrap() {
                        result = Some(line);
                        break;
                    }
                }

                black_box(result);
            });
        });
    }

    group.finish();
}

/// Benchmark parsing counts lines for growing channel counts.
fn bench_parse_counts(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_counts");

    for channels in [4usize, 8, 16, 64] {
        let line = counts_line(channels);
        group.throughput(Throughput::Elements(channels as u64));
        group.bench_with_input(BenchmarkId::from_parameter(channels), &line, |b, line| {
            b.iter(|| {
                let reading = parse_counts("COUNTS?", black_box(line), channels).unwrap();
                black_box(reading);
            });
        });
    }

    group.finish();
}

/// Benchmark parsing the identification string.
fn bench_parse_identity(c: &mut Criterion) {
    let line = "Countlink,CL-8,SN00042,2.1.0";

    c.bench_function("parse_identity", |b| {
        b.iter(|| {
            let identity = parse_identity("*IDN?", black_box(line)).unwrap();
            black_box(identity);
        });
    });
}

criterion_group!(
    benches,
    bench_encode_commands,
    bench_decode_line,
    bench_decode_partial_streaming,
    bench_parse_counts,
    bench_parse_identity,
);

criterion_main!(benches);
