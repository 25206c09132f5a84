//! Run with:
//! ```bash
//! RUSTFLAGS="-C target-cpu=native" cargo bench --bench benchmark
//! ```

use rand::{rngs::StdRng, Rng, SeedableRng};
use vamana_core::{VamanaConfig, VamanaIndex};

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

/// OpenAI text-embedding-ada-002 / text-embedding-3-small output dimension.
const DIM: usize = 1536;
/// Number of vectors in the index for the main benchmarks.
const N_VECS: usize = 10_000;
/// Fixed RNG seed for reproducible benchmarks.
const SEED: u64 = 0xDEAD_BEEF_CAFE_BABE;

/// Generate `n` random f32 vectors of dimension `dim`.
/// Using a seeded RNG ensures the benchmark data is identical across runs,
/// making benchmark comparisons statistically valid.
fn generate_random_vectors(n: usize, dim: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| (0..dim).map(|_| rng.gen::<f32>() * 2.0 - 1.0).collect())
        .collect()
}

/// Build a `VamanaIndex` pre-loaded with `n_vecs` random vectors of `dim`,
/// via the parallel bulk build path.
fn build_index(n_vecs: usize, dim: usize) -> VamanaIndex {
    let vecs = generate_random_vectors(n_vecs, dim, SEED);
    let items: Vec<(u64, Vec<f32>)> = vecs.into_iter().enumerate().map(|(i, v)| (i as u64, v)).collect();
    VamanaIndex::build_from(items, VamanaConfig::default()).expect("bulk build failed")
}

/// Measures top-1 graph search over a 10,000 x 1536-dim index.
///
/// `black_box()` prevents the compiler from:
///   1. Hoisting the entire benchmark out of the loop (since it has no side effects).
///   2. Constant-folding the result away.
///   3. Reordering memory loads speculatively across benchmark iterations.
fn bench_search(c: &mut Criterion) {
    let idx = build_index(N_VECS, DIM);
    let query = generate_random_vectors(1, DIM, SEED + 1).remove(0);

    let mut group = c.benchmark_group("graph_search");
    group.throughput(Throughput::Elements(1));

    group.bench_function(BenchmarkId::new("top1", format!("{N_VECS}vecs_dim{DIM}")), |b| {
        b.iter(|| black_box(idx.search(black_box(&query), black_box(1))))
    });

    group.finish();
}

/// Measures how latency scales from 100 to 10,000 vectors.
fn bench_scaling(c: &mut Criterion) {
    let query = generate_random_vectors(1, DIM, SEED + 99).remove(0);

    let mut group = c.benchmark_group("scaling_by_n_vecs");
    for n in [100usize, 500, 1_000, 5_000, 10_000] {
        let idx = build_index(n, DIM);
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _n| {
            b.iter(|| black_box(idx.search(black_box(&query), black_box(10))))
        });
    }
    group.finish();
}

/// Measures the streaming single-record `add` path's throughput — this
/// bounds live-ingestion workloads, as distinct from `build_from`'s bulk
/// parallel path measured by `graph_build.rs`.
fn bench_add(c: &mut Criterion) {
    let vecs = generate_random_vectors(N_VECS, DIM, SEED);

    let mut group = c.benchmark_group("add_throughput");
    group.throughput(Throughput::Elements(1));

    group.bench_function("add_single_vector", |b| {
        b.iter_batched(
            || VamanaIndex::new(DIM, N_VECS + 1, VamanaConfig::default()).unwrap(),
            |idx| {
                idx.add(0, black_box(&vecs[0])).unwrap();
                idx
            },
            criterion::BatchSize::SmallInput,
        )
    });

    group.finish();
}

criterion_group!(benches, bench_search, bench_scaling, bench_add);
criterion_main!(benches);
