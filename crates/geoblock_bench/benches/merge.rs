//! Flush, merge and lookup benchmarks.

use criterion::{
    black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput,
};
use geoblock_bench::{random_nodes, sorted};
use geoblock_core::{
    flush_run, BlockStore, GeoKey, IndexFile, IngestSession, NodeRecord, Reader, StoreConfig,
    StoreDir,
};
use tempfile::TempDir;

fn config() -> StoreConfig {
    StoreConfig::new().block_size(64 * 1024).capacity(2048)
}

fn loaded(count: usize) -> (IndexFile, BlockStore<NodeRecord>) {
    let mut index = IndexFile::new(&config());
    let mut blocks = BlockStore::in_memory(config()).unwrap();
    flush_run(&mut index, &mut blocks, sorted(random_nodes(1, count))).unwrap();
    (index, blocks)
}

/// Benchmark the first flush into an empty store.
fn bench_initial_load(c: &mut Criterion) {
    let mut group = c.benchmark_group("initial_load");
    group.sample_size(20);

    for count in [10_000usize, 100_000] {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter_batched(
                || sorted(random_nodes(1, count)),
                |run| {
                    let mut index = IndexFile::new(&config());
                    let mut blocks = BlockStore::in_memory(config()).unwrap();
                    black_box(flush_run(&mut index, &mut blocks, run).unwrap());
                },
                BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

/// Benchmark merging a run into an existing store.
fn bench_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge");
    group.sample_size(20);

    for count in [1_000usize, 10_000] {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter_batched(
                || (loaded(100_000), sorted(random_nodes(200_000, count))),
                |((mut index, mut blocks), run)| {
                    black_box(flush_run(&mut index, &mut blocks, run).unwrap());
                },
                BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

/// Benchmark range lookups of growing width.
fn bench_lookup_range(c: &mut Criterion) {
    let mut group = c.benchmark_group("lookup_range");
    let (index, blocks) = loaded(100_000);
    let reader = Reader::new(&index, &blocks);
    let mid = u64::MAX / 2;

    for width in [1u64 << 40, 1 << 50, 1 << 56] {
        group.bench_with_input(BenchmarkId::from_parameter(width), &width, |b, &width| {
            let scan = reader.lookup_range(GeoKey::new(mid), GeoKey::new(mid + width));
            b.iter(|| {
                let hits = scan.collect_vec().unwrap();
                black_box(hits);
            });
        });
    }

    group.finish();
}

/// Benchmark a file-backed ingest session end to end.
fn bench_file_ingest(c: &mut Criterion) {
    let mut group = c.benchmark_group("file_ingest");
    group.sample_size(10);
    let count = 50_000usize;
    group.throughput(Throughput::Elements(count as u64));

    group.bench_function(BenchmarkId::from_parameter(count), |b| {
        b.iter_batched(
            || (TempDir::new().unwrap(), random_nodes(1, count)),
            |(temp_dir, nodes)| {
                let dir = StoreDir::open(temp_dir.path(), true).unwrap();
                let mut session =
                    IngestSession::<NodeRecord>::open(&dir, config().flush_interval(20_000))
                        .unwrap();
                for node in nodes {
                    session.push(node).unwrap();
                }
                black_box(session.finish().unwrap());
            },
            BatchSize::PerIteration,
        );
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_initial_load,
    bench_merge,
    bench_lookup_range,
    bench_file_ingest,
);

criterion_main!(benches);
