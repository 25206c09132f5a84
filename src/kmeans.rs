//! k-means clusterer, including the anisotropic variant used
//! by product quantization for inner-product-friendly
//! encoding.
//!
//! Grounded in an existing `rand` dependency (already present for
//! benchmark/test determinism via `StdRng::seed_from_u64`) generalized
//! from "generate random test vectors" to "k-means++ weighted sampling",
//! and in an existing `rayon` dependency for the per-subspace parallel
//! fan-out used by `pq.rs`. `rand_distr::WeightedIndex` is pulled in for the
//! squared-distance-weighted centroid pick — hand-rolling a cumulative
//! wheel is exactly what that type exists to avoid getting subtly wrong
//! (the degenerate-all-zero fallback below mirrors what `WeightedIndex`
//! itself would reject as a construction error).

use crate::vector::{self, sub};
use rand::Rng;
use rand_distr::{Distribution, WeightedIndex};

/// Sentinel anisotropic threshold disabling the parallel-error weighting
/// — plain squared-L2 assignment is used instead.
pub const UNWEIGHTED: f32 = -1.0;

/// Result of a clustering run.
#[derive(Debug, Clone)]
pub struct ClusterResult {
    pub centroids: Vec<Vec<f32>>,
    pub assignments: Vec<u32>,
}

/// `h = (D - 1) * T^2 / (1 - T^2)`, the parallel-cost multiplier.
/// `original_dim` is `D`, the *un-normalized* dimension (the anisotropic
/// variant is applied per PQ subspace, so `D` here is the subspace's own
/// dimension, not the whole vector's).
fn anisotropic_h(original_dim: usize, threshold: f32) -> f32 {
    if threshold <= UNWEIGHTED {
        return 1.0;
    }
    let d = original_dim as f32;
    let t2 = threshold * threshold;
    (d - 1.0) * t2 / (1.0 - t2)
}

/// Assignment cost for the anisotropic variant: the residual `v - c` is
/// split into components parallel and perpendicular to `v` itself (`v`
/// must be unit-normalized), and the parallel component is inflated by
/// `h` relative to the perpendicular one.
fn anisotropic_cost(v: &[f32], c: &[f32], h: f32) -> f32 {
    let residual = sub(v, c);
    let parallel_mag = vector::dot(&residual, v);
    let residual_sq = vector::dot(&residual, &residual);
    let parallel_sq = parallel_mag * parallel_mag;
    let perp_sq = (residual_sq - parallel_sq).max(0.0);
    h * parallel_sq + perp_sq
}

fn assignment_cost(v: &[f32], c: &[f32], h: Option<f32>) -> f32 {
    match h {
        Some(h) => anisotropic_cost(v, c, h),
        None => vector::squared_l2(v, c),
    }
}

fn nearest_centroid(v: &[f32], centroids: &[Vec<f32>], h: Option<f32>) -> (usize, f32) {
    let mut best_idx = 0;
    let mut best_cost = f32::INFINITY;
    for (i, c) in centroids.iter().enumerate() {
        let cost = assignment_cost(v, c, h);
        if cost < best_cost {
            best_cost = cost;
            best_idx = i;
        }
    }
    (best_idx, best_cost)
}

/// k-means++ initialization: first centroid uniform at random, each
/// subsequent centroid picked with probability proportional to its
/// squared distance to the nearest already-chosen centroid. Falls back
/// to a uniform random pick if the cumulative distance wheel underflows
/// (every remaining point has zero distance to some existing centroid).
pub fn kmeans_pp_init(points: &[&[f32]], k: usize, rng: &mut impl Rng) -> Vec<Vec<f32>> {
    assert!(!points.is_empty(), "cannot cluster zero points");
    assert!(k > 0 && k <= points.len(), "invalid k={k} for {} points", points.len());

    let mut centroids: Vec<Vec<f32>> = Vec::with_capacity(k);
    let first = rng.gen_range(0..points.len());
    centroids.push(points[first].to_vec());

    while centroids.len() < k {
        let weights: Vec<f64> = points
            .iter()
            .map(|p| {
                let (_, d2) = nearest_centroid(p, &centroids, None);
                d2.max(0.0) as f64
            })
            .collect();

        let total: f64 = weights.iter().sum();
        let next = if total <= 0.0 {
            rng.gen_range(0..points.len())
        } else {
            match WeightedIndex::new(&weights) {
                Ok(dist) => dist.sample(rng),
                Err(_) => rng.gen_range(0..points.len()),
            }
        };
        centroids.push(points[next].to_vec());
    }

    centroids
}

/// Runs Lloyd's algorithm for up to `iterations` rounds, stopping early
/// if fewer than 1% of points change assignment in a round. Empty
/// clusters are reinitialized to a uniformly random point.
pub fn cluster(points: &[&[f32]], k: usize, iterations: usize, rng: &mut impl Rng) -> ClusterResult {
    cluster_impl(points, k, iterations, None, rng)
}

/// Anisotropic variant used by PQ when `threshold > UNWEIGHTED`. `points`
/// must be unit-normalized; `original_dim` is the dimension used in the
/// `h` formula.
pub fn cluster_anisotropic(
    points: &[&[f32]],
    k: usize,
    iterations: usize,
    threshold: f32,
    original_dim: usize,
    rng: &mut impl Rng,
) -> ClusterResult {
    let h = anisotropic_h(original_dim, threshold);
    cluster_impl(points, k, iterations, Some(h), rng)
}

fn cluster_impl(
    points: &[&[f32]],
    k: usize,
    iterations: usize,
    h: Option<f32>,
    rng: &mut impl Rng,
) -> ClusterResult {
    assert!(!points.is_empty(), "cannot cluster zero points");
    let dim = points[0].len();

    let mut centroids = kmeans_pp_init(points, k, rng);
    let mut assignments = vec![0u32; points.len()];

    for _ in 0..iterations.max(1) {
        let mut changed = 0usize;
        let mut sums = vec![vec![0.0f32; dim]; k];
        let mut counts = vec![0usize; k];

        for (i, p) in points.iter().enumerate() {
            let (best, _) = nearest_centroid(p, &centroids, h);
            if assignments[i] != best as u32 {
                changed += 1;
            }
            assignments[i] = best as u32;
            counts[best] += 1;
            for (s, x) in sums[best].iter_mut().zip(p.iter()) {
                *s += x;
            }
        }

        for c in 0..k {
            if counts[c] == 0 {
                let idx = rng.gen_range(0..points.len());
                centroids[c] = points[idx].to_vec();
            } else {
                let n = counts[c] as f32;
                centroids[c] = sums[c].iter().map(|s| s / n).collect();
            }
        }

        let fraction_changed = changed as f64 / points.len() as f64;
        if fraction_changed < 0.01 {
            break;
        }
    }

    ClusterResult {
        centroids,
        assignments,
    }
}

/// Total quantization loss (sum of squared distances from each point to
/// its assigned centroid). Used by tests to check that Lloyd iterations
/// improve (or hold) the clustering.
pub fn total_loss(points: &[&[f32]], result: &ClusterResult) -> f64 {
    points
        .iter()
        .zip(result.assignments.iter())
        .map(|(p, &a)| vector::squared_l2(p, &result.centroids[a as usize]) as f64)
        .sum()
}
