//! Block codec benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use geoblock_bench::{clustered_nodes, random_nodes, raw_payload, sorted};
use geoblock_codec::{BlockCodec, Compression, FRAME_HEADER_SIZE};

const CODECS: [Compression; 3] = [Compression::None, Compression::Zlib, Compression::Lz4];

/// Benchmark compressing one full block of sorted nodes.
fn bench_compress(c: &mut Criterion) {
    let mut group = c.benchmark_group("compress");

    for (name, nodes) in [
        ("clustered", clustered_nodes(1, 8192)),
        ("random", random_nodes(1, 8192)),
    ] {
        let raw = raw_payload(&sorted(nodes));
        group.throughput(Throughput::Bytes(raw.len() as u64));

        for compression in CODECS {
            let id = BenchmarkId::new(format!("{compression:?}"), name);
            group.bench_with_input(id, &raw, |b, raw| {
                let mut codec = BlockCodec::new(compression);
                let mut out = vec![0u8; raw.len() + FRAME_HEADER_SIZE];
                b.iter(|| {
                    let written = codec.compress(black_box(raw), &mut out).unwrap();
                    black_box(written);
                });
            });
        }
    }

    group.finish();
}

/// Benchmark decompressing one full block of sorted nodes.
fn bench_decompress(c: &mut Criterion) {
    let mut group = c.benchmark_group("decompress");
    let raw = raw_payload(&sorted(clustered_nodes(1, 8192)));
    group.throughput(Throughput::Bytes(raw.len() as u64));

    for compression in CODECS {
        let mut codec = BlockCodec::new(compression);
        let mut frame = vec![0u8; raw.len() + FRAME_HEADER_SIZE];
        let written = codec.compress(&raw, &mut frame).unwrap();
        frame.truncate(written);

        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{compression:?}")),
            &frame,
            |b, frame| {
                let mut out = vec![0u8; raw.len()];
                b.iter(|| {
                    let len = codec.decompress(black_box(frame), &mut out).unwrap();
                    black_box(len);
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_compress, bench_decompress);

criterion_main!(benches);
