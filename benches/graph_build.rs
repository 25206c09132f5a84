//! Run with:
//! ```bash
//! RUSTFLAGS="-C target-cpu=native" cargo bench --bench graph_build
//! ```
//!
//! Extends `benchmark.rs`'s brute-force-era scenarios with the graph
//! build/search throughput scenarios this crate actually cares about:
//! the parallel bulk build (`VamanaIndex::build_from`) and the streaming
//! single-record insert path (`GraphBuilder::add_node`, exercised here
//! directly rather than through the facade's per-call buffer-clone
//! overhead — see `src/lib.rs::VamanaIndex::add`'s doc comment).

use rand::{rngs::StdRng, Rng, SeedableRng};
use vamana_core::graph::builder::{GraphBuilder, GraphBuilderConfig};
use vamana_core::source::FlatVectorStore;
use vamana_core::vector::Similarity;
use vamana_core::{VamanaConfig, VamanaIndex};

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

const DIM: usize = 128;
const SEED: u64 = 0x5EED_F00D_1234_5678;

fn generate_random_vectors(n: usize, dim: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| (0..dim).map(|_| rng.gen::<f32>() * 2.0 - 1.0).collect())
        .collect()
}

/// Bulk parallel build throughput across index sizes — dominated by
/// per-node best-first search plus diversity pruning, fanned out over
/// `rayon`'s thread pool.
fn bench_build_from(c: &mut Criterion) {
    let mut group = c.benchmark_group("build_from");
    for n in [1_000usize, 5_000, 20_000] {
        let vecs = generate_random_vectors(n, DIM, SEED);
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _n| {
            b.iter_batched(
                || vecs.iter().enumerate().map(|(i, v)| (i as u64, v.clone())).collect::<Vec<_>>(),
                |items| black_box(VamanaIndex::build_from(items, VamanaConfig::default()).unwrap()),
                criterion::BatchSize::LargeInput,
            )
        });
    }
    group.finish();
}

/// Single-node `add_node` throughput against a fixed backing store,
/// isolating the graph builder's own cost from the facade's snapshot
/// overhead (`VamanaIndex::add` clones the whole buffer per call; this
/// benchmark calls the builder directly against one static
/// `FlatVectorStore`).
fn bench_add_node(c: &mut Criterion) {
    const N: usize = 20_000;
    let vecs = generate_random_vectors(N, DIM, SEED + 1);
    let refs: Vec<&[f32]> = vecs.iter().map(|v| v.as_slice()).collect();
    let store = FlatVectorStore::from_rows(&refs, DIM);

    let mut group = c.benchmark_group("add_node_throughput");
    group.throughput(Throughput::Elements(1));

    group.bench_function("sequential_insert", |b| {
        b.iter_batched(
            || GraphBuilder::with_capacity(Similarity::DotProduct, GraphBuilderConfig::default(), N),
            |builder| {
                for ord in 0..1000u32 {
                    builder.add_node(black_box(ord), &store).unwrap();
                }
                builder
            },
            criterion::BatchSize::LargeInput,
        )
    });

    group.finish();
}

/// Search throughput/recall-adjacent latency over a prebuilt graph — the
/// companion measurement to `bench_build_from`, matching the common
/// "build once, search many times" usage pattern.
fn bench_search_over_built_graph(c: &mut Criterion) {
    const N: usize = 20_000;
    let vecs = generate_random_vectors(N, DIM, SEED + 2);
    let items: Vec<(u64, Vec<f32>)> = vecs.iter().enumerate().map(|(i, v)| (i as u64, v.clone())).collect();
    let idx = VamanaIndex::build_from(items, VamanaConfig::default()).unwrap();
    let query = generate_random_vectors(1, DIM, SEED + 3).remove(0);

    let mut group = c.benchmark_group("search_over_built_graph");
    group.throughput(Throughput::Elements(1));
    for top_k in [1usize, 10, 100] {
        group.bench_with_input(BenchmarkId::from_parameter(top_k), &top_k, |b, &top_k| {
            b.iter(|| black_box(idx.search(black_box(&query), top_k)))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_build_from, bench_add_node, bench_search_over_built_graph);
criterion_main!(benches);
