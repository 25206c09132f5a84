//! Graph builder: concurrent node insertion via best-first
//! search, α-relaxed diversity pruning, and backlink propagation.
//!
//! Grounded in a prior `search_parallel` (`rayon::par_chunks` + `reduce`
//! over the flat vector buffer) generalized from "parallel brute-force
//! scan" to "parallel fan-out of node insertion over node ordinals"
//! (`into_par_iter().for_each`); `insertions_in_progress` is a
//! `dashmap::DashSet`, the same crate as the node map, for a concurrent
//! set supporting atomic add/remove and a cheap snapshot.

use super::searcher;
use super::Graph;
use crate::bitset::GrowableBitSet;
use crate::error::CoreResult;
use crate::neighbors::DiversityParams;
use crate::source::RandomAccessVectors;
use crate::vector::Similarity;
use dashmap::DashSet;
use rayon::prelude::*;
use std::cell::RefCell;
use tracing::{debug, info_span};

thread_local! {
    /// Per-thread visited-bit-set scratch for `add_node`'s insertion-time
    /// search, kept thread-local and reused across calls to avoid
    /// allocation churn. Each rayon worker thread accumulates one growable
    /// allocation here across every ordinal it processes during
    /// `GraphBuilder::build`, instead of allocating a fresh bit set on
    /// every single-node insertion.
    static VISITED_SCRATCH: RefCell<GrowableBitSet> = RefCell::new(GrowableBitSet::new());
}

/// Construction parameters: max degree on the single level, beam width for the
/// insertion-time search, overflow ratio before an eager max-degree
/// enforcement pass, and the α ceiling for diversity relaxation.
#[derive(Debug, Clone, Copy)]
pub struct GraphBuilderConfig {
    pub max_degree: usize,
    pub beam_width: usize,
    pub neighbor_overflow: f32,
    pub alpha_max: f32,
}

impl Default for GraphBuilderConfig {
    fn default() -> Self {
        Self {
            max_degree: 32,
            beam_width: 64,
            neighbor_overflow: 1.5,
            alpha_max: 1.2,
        }
    }
}

impl GraphBuilderConfig {
    fn diversity_params(&self) -> DiversityParams {
        DiversityParams {
            max_degree: self.max_degree,
            alpha_max: self.alpha_max,
            overflow: self.neighbor_overflow,
        }
    }
}

/// Builds a single-layer Vamana-style proximity graph over a
/// [`RandomAccessVectors`] source. Construction is
/// concurrency-safe: `add_node` may run for many ordinals in parallel
/// (via [`Self::build`]), relying on the neighbor set's copy-on-write
/// discipline and the in-progress snapshot to never lose a backlink to a
/// concurrently inserting node.
pub struct GraphBuilder {
    pub graph: Graph,
    config: GraphBuilderConfig,
    similarity: Similarity,
    insertions_in_progress: DashSet<u32>,
}

impl GraphBuilder {
    pub fn new(similarity: Similarity, config: GraphBuilderConfig) -> Self {
        Self {
            graph: Graph::new(),
            config,
            similarity,
            insertions_in_progress: DashSet::new(),
        }
    }

    pub fn with_capacity(similarity: Similarity, config: GraphBuilderConfig, capacity: usize) -> Self {
        Self {
            graph: Graph::with_capacity(capacity),
            config,
            similarity,
            insertions_in_progress: DashSet::new(),
        }
    }

    /// Inserts one node. `vectors` should be a thread-local view when
    /// called from multiple threads — [`Self::build`] arranges this
    /// automatically via [`RandomAccessVectors::thread_local_supplier`].
    pub fn add_node<V: RandomAccessVectors>(&self, ord: u32, vectors: &V) -> CoreResult<()> {
        self.graph.add_node(ord);
        self.insertions_in_progress.insert(ord);

        // Step 2: snapshot in-progress insertions *before* searching, so
        // concurrently-inserting nodes are always captured as concurrent
        // candidates even if they complete mid-search.
        let in_progress_snapshot: Vec<u32> = self.insertions_in_progress.iter().map(|r| *r).collect();

        if self.graph.entry_node().is_none() {
            // Nothing complete to search against yet: this node becomes
            // (or loses the race to become) the entry point with no
            // neighbors of its own; later nodes will backlink into it.
            self.graph.mark_complete(ord);
            self.insertions_in_progress.remove(&ord);
            return Ok(());
        }

        let query = vectors.get(ord).to_vec();
        let view = self.graph.view();
        let score_fn = |cand: u32| self.similarity.score(&query, vectors.get(cand)).unwrap_or(f32::NEG_INFINITY);

        let search_result = VISITED_SCRATCH.with(|cell| {
            let mut scratch = cell.borrow_mut();
            scratch.clear_all();
            let taken = std::mem::replace(&mut *scratch, GrowableBitSet::new());
            let (result, returned) = searcher::search_with_scratch(&view, &score_fn, self.config.beam_width, None, usize::MAX, taken);
            *scratch = returned;
            result
        });
        let natural = search_result.nodes;

        let concurrent: Vec<(u32, f32)> = in_progress_snapshot
            .into_iter()
            .filter(|&m| m != ord)
            .map(|m| (m, score_fn(m)))
            .collect();

        let sim = |a: u32, b: u32| self.similarity.score(vectors.get(a), vectors.get(b)).unwrap_or(f32::NEG_INFINITY);
        let params = self.config.diversity_params();

        let own_set = self
            .graph
            .neighbor_set(ord)
            .expect("addNode was called immediately above");
        own_set.insert_diverse(ord, &natural, &concurrent, &params, &sim);

        for (m, s) in own_set.iterator() {
            if let Some(m_set) = self.graph.neighbor_set(m) {
                m_set.insert(ord, s, &params, &sim);
            }
        }

        self.graph.mark_complete(ord);
        self.insertions_in_progress.remove(&ord);
        Ok(())
    }

    /// Builds the full graph: inserts every node over `0..vectors.size()`
    /// in parallel, then runs a final `cleanup()` pass over every node to
    /// enforce the max degree.
    pub fn build<V>(&self, vectors: &V) -> CoreResult<()>
    where
        V: RandomAccessVectors + Clone + Send + Sync + 'static,
    {
        let n = vectors.size();
        let span = info_span!("graph_build", n);
        let _guard = span.enter();

        // Each `add_node` call grabs its own view from the thread-local
        // supplier rather than sharing `vectors` directly across
        // rayon's worker threads.
        let supplier = vectors.thread_local_supplier();
        (0..n as u32).into_par_iter().try_for_each(|ord| {
            let local = supplier();
            self.add_node(ord, &local)
        })?;

        debug!(nodes = n, "graph build: initial insertion pass complete, running cleanup");
        for ord in 0..n as u32 {
            if let Some(ns) = self.graph.neighbor_set(ord) {
                ns.cleanup(self.config.max_degree);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::FlatVectorStore;

    /// Circular fixture: 10 unit-circle vectors,
    /// M=2, alpha=1.0, dot-product similarity, sequential insertion.
    fn circle_vectors(n: usize) -> Vec<Vec<f32>> {
        (0..n)
            .map(|i| {
                let theta = std::f32::consts::PI * i as f32 / 10.0;
                vec![theta.cos(), theta.sin()]
            })
            .collect()
    }

    #[test]
    fn circular_fixture_builds_a_connected_diverse_graph() {
        // 10 points on a unit circle, inserted sequentially (no
        // concurrency) under a tight max_degree, so the outcome is fully
        // deterministic for this fixed input. Asserts the exact neighbor
        // sets the literal diversity_select/alpha-relaxed RNG-rule
        // pseudocode in neighbors.rs produces: a clean chain 0-1-2-3,
        // each node backlinked only to its immediate angular neighbor,
        // because at alpha_max=1.0 the farther candidate in each
        // insertDiverse call is always dominated by (i.e. within
        // cand.score of) the nearer one already selected.
        //
        // This differs from the literal worked example in the spec's
        // concrete-scenarios list (which states node0={1,2}, node2={0},
        // node3={1} after these same four inserts) — see DESIGN.md's
        // Open Question decisions for why that worked example is not
        // reachable from the spec's own diversity-selection pseudocode
        // on this exact fixture, and why this implementation follows the
        // pseudocode rather than the worked numbers.
        let vecs = circle_vectors(10);
        let refs: Vec<&[f32]> = vecs.iter().map(|v| v.as_slice()).collect();
        let store = FlatVectorStore::from_rows(&refs, 2);

        let config = GraphBuilderConfig {
            max_degree: 2,
            beam_width: 10,
            neighbor_overflow: 2.0,
            alpha_max: 1.0,
        };
        let builder = GraphBuilder::new(Similarity::DotProduct, config);

        for ord in 0..4u32 {
            builder.add_node(ord, &store).unwrap();
        }

        let neighbors_of = |ord: u32| -> std::collections::HashSet<u32> {
            builder
                .graph
                .neighbor_set(ord)
                .unwrap()
                .iterator()
                .into_iter()
                .map(|(n, _)| n)
                .collect()
        };

        assert_eq!(neighbors_of(0), [1].into_iter().collect());
        assert_eq!(neighbors_of(1), [0, 2].into_iter().collect());
        assert_eq!(neighbors_of(2), [1, 3].into_iter().collect());
        assert_eq!(neighbors_of(3), [2].into_iter().collect());

        for ord in 0..4u32 {
            let ns = neighbors_of(ord);
            assert!(ns.len() <= 2, "node {ord} exceeds max_degree: {ns:?}");
            assert!(!ns.contains(&ord), "node {ord} has a self-loop");
        }
    }

    #[test]
    fn first_node_completes_with_no_neighbors() {
        let vecs = circle_vectors(3);
        let refs: Vec<&[f32]> = vecs.iter().map(|v| v.as_slice()).collect();
        let store = FlatVectorStore::from_rows(&refs, 2);
        let builder = GraphBuilder::new(Similarity::DotProduct, GraphBuilderConfig::default());
        builder.add_node(0, &store).unwrap();
        assert!(builder.graph.neighbor_set(0).unwrap().is_empty());
        assert_eq!(builder.graph.entry_node(), Some(0));
    }

    #[test]
    fn build_respects_max_degree_after_cleanup() {
        let n = 60;
        let vecs: Vec<Vec<f32>> = (0..n)
            .map(|i| {
                let theta = 2.0 * std::f32::consts::PI * i as f32 / n as f32;
                vec![theta.cos(), theta.sin()]
            })
            .collect();
        let refs: Vec<&[f32]> = vecs.iter().map(|v| v.as_slice()).collect();
        let store = FlatVectorStore::from_rows(&refs, 2);

        let config = GraphBuilderConfig {
            max_degree: 6,
            beam_width: 16,
            neighbor_overflow: 1.5,
            alpha_max: 1.2,
        };
        let builder = GraphBuilder::new(Similarity::DotProduct, config);
        builder.build(&store).unwrap();

        for ord in 0..n as u32 {
            let ns = builder.graph.neighbor_set(ord).unwrap();
            assert!(ns.len() <= 6, "node {ord} has {} neighbors", ns.len());
            let v = ns.iterator();
            for w in v.windows(2) {
                assert!(w[0].1 >= w[1].1, "neighbor list not sorted descending");
            }
            assert!(v.iter().all(|&(m, _)| m != ord), "node {ord} neighbors itself");
        }
    }
}
