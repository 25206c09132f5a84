//! Concurrent neighbor set: a copy-on-write sorted neighbor
//! list with α-relaxed diversity pruning (the "RNG rule").
//!
//! A copy-on-write neighbor array maps cleanly onto an atomic pointer to
//! an immutable sorted slice, where an update is a single CAS — realized
//! here with `arc_swap::ArcSwap`, the same CAS-replace-whole-value crate
//! `cyrup-ai-paraphym` uses for this pattern, and a step up from a
//! `parking_lot::RwLock`-around-a-struct style for the one place in this
//! crate where a full reader-writer lock would be heavier than a single
//! atomic pointer swap.
//!
//! Every operation here is agnostic to *how* similarity between two
//! non-owner neighbor nodes is computed (raw vectors, PQ ADC, NVQ) — that
//! is supplied by the caller as a `Fn(u32, u32) -> f32` closure, matching
//! the graph builder's role as the only component that holds both a
//! vector source and this module's neighbor sets.

use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::sync::Arc;

/// `max_degree`/`alpha_max` pair threaded through every diversity-aware
/// operation. `overflow` (typically in `[1, 2]`) bounds how far a plain
/// [`NeighborSet::insert`] may grow before triggering
/// [`NeighborSet::enforce_max_degree`].
#[derive(Debug, Clone, Copy)]
pub struct DiversityParams {
    pub max_degree: usize,
    pub alpha_max: f32,
    pub overflow: f32,
}

impl Default for DiversityParams {
    fn default() -> Self {
        Self {
            max_degree: 32,
            alpha_max: 1.2,
            overflow: 1.5,
        }
    }
}

const ALPHA_STEP: f32 = 0.2;

/// Copy-on-write sorted neighbor list for one graph node. The current
/// state is an immutable, descending-by-score `Vec<(u32, f32)>` behind an
/// `ArcSwap`; every mutation builds a new `Vec` and swaps it in with a
/// single atomic store (or a CAS retry loop via `rcu`, for read-modify-
/// write operations that must not lose a concurrent writer's update).
pub struct NeighborSet {
    current: ArcSwap<Vec<(u32, f32)>>,
}

impl Default for NeighborSet {
    fn default() -> Self {
        Self::new()
    }
}

impl NeighborSet {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::new(Arc::new(Vec::new())),
        }
    }

    /// Stable snapshot for iteration. The returned `Arc` is unaffected by
    /// any mutation that happens after this call returns.
    pub fn snapshot(&self) -> Arc<Vec<(u32, f32)>> {
        self.current.load_full()
    }

    pub fn iterator(&self) -> Vec<(u32, f32)> {
        (*self.snapshot()).clone()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy-on-write insert of `(n, s)`, preserving descending-score
    /// order. A duplicate ordinal is a no-op. If the resulting length
    /// exceeds `overflow * max_degree`, [`Self::enforce_max_degree`] runs
    /// immediately afterward.
    pub fn insert(&self, n: u32, s: f32, params: &DiversityParams, sim: &dyn Fn(u32, u32) -> f32) {
        self.current.rcu(|cur| {
            if cur.iter().any(|&(m, _)| m == n) {
                return Arc::clone(cur);
            }
            let mut v = (**cur).clone();
            let pos = v.partition_point(|&(_, sc)| sc > s);
            v.insert(pos, (n, s));
            Arc::new(v)
        });

        if self.len() as f32 > params.overflow * params.max_degree as f32 {
            self.enforce_max_degree(params, sim);
        }
    }

    /// Merges the current list with `natural` and `concurrent` candidate
    /// lists (deduped by node, keeping the highest score seen for a
    /// repeated node), then installs the α-relaxed diversity selection
    /// over the merged set. `owner` is excluded from the candidate pool
    /// even if it appears in an input.
    pub fn insert_diverse(
        &self,
        owner: u32,
        natural: &[(u32, f32)],
        concurrent: &[(u32, f32)],
        params: &DiversityParams,
        sim: &dyn Fn(u32, u32) -> f32,
    ) {
        let current = self.snapshot();
        let mut best: HashMap<u32, f32> = HashMap::new();
        for &(n, s) in current.iter().chain(natural).chain(concurrent) {
            if n == owner {
                continue;
            }
            best.entry(n)
                .and_modify(|e| {
                    if s > *e {
                        *e = s;
                    }
                })
                .or_insert(s);
        }
        let mut merged: Vec<(u32, f32)> = best.into_iter().collect();
        merged.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let selected = diversity_select(&merged, params.max_degree, params.alpha_max, sim);
        self.current.store(Arc::new(selected));
    }

    /// "Remove least diverse" max-degree enforcement: walks
    /// from the tail towards the head, dropping any entry whose
    /// similarity to an earlier (closer-to-owner) kept entry exceeds its
    /// own owner-relative score scaled by `alpha_max`. Repeats until the
    /// list fits `max_degree` or no further removal is possible; any
    /// remainder is dropped from the tail.
    pub fn enforce_max_degree(&self, params: &DiversityParams, sim: &dyn Fn(u32, u32) -> f32) {
        self.current.rcu(|cur| {
            if cur.len() <= params.max_degree {
                return Arc::clone(cur);
            }
            let mut v = (**cur).clone();
            loop {
                if v.len() <= params.max_degree {
                    break;
                }
                let mut removed_any = false;
                let mut i = v.len();
                while i > 1 {
                    i -= 1;
                    let (e1_node, e1_score) = v[i];
                    let should_remove = v[..i]
                        .iter()
                        .any(|&(e2_node, _)| sim(e1_node, e2_node) > e1_score * params.alpha_max);
                    if should_remove {
                        v.remove(i);
                        removed_any = true;
                        if v.len() <= params.max_degree {
                            break;
                        }
                    }
                }
                if !removed_any {
                    break;
                }
            }
            if v.len() > params.max_degree {
                v.truncate(params.max_degree);
            }
            Arc::new(v)
        });
    }

    /// Enforces `max_degree` by plain truncation of the (already
    /// score-sorted) list, without any diversity pruning pass — the final
    /// pass `GraphBuilder::build` runs over every node.
    pub fn cleanup(&self, max_degree: usize) {
        self.current.rcu(|cur| {
            if cur.len() <= max_degree {
                Arc::clone(cur)
            } else {
                let mut v = (**cur).clone();
                v.truncate(max_degree);
                Arc::new(v)
            }
        });
    }

    /// For each `(m, s)` currently held, inserts `(owner, s)` into node
    /// `m`'s neighbor set via `lookup`, propagating a backlink to every
    /// neighbor this node just gained. Missing lookups (neighbor not yet
    /// present — should not happen once `addNode` precedes any scoring)
    /// are silently skipped.
    pub fn backlink(
        &self,
        owner: u32,
        params: &DiversityParams,
        lookup: &dyn Fn(u32) -> Option<Arc<NeighborSet>>,
        sim: &dyn Fn(u32, u32) -> f32,
    ) {
        for (m, s) in self.iterator() {
            if let Some(neighbor_set) = lookup(m) {
                neighbor_set.insert(owner, s, params, sim);
            }
        }
    }
}

/// α-relaxed RNG-rule diversity selection. `merged` must
/// already be sorted descending by score. Scans the full candidate list
/// once per α step in `1.0, 1.2, ..., alpha_max`; a candidate already
/// selected at a smaller α stays selected — later passes only add more
/// candidates, they never remove one.
fn diversity_select(merged: &[(u32, f32)], max_degree: usize, alpha_max: f32, sim: &dyn Fn(u32, u32) -> f32) -> Vec<(u32, f32)> {
    let n = merged.len();
    let mut selected = vec![false; n];
    let mut count = 0usize;
    let cap = max_degree.min(n);
    let mut alpha = 1.0f32;

    loop {
        for i in 0..n {
            if selected[i] || count >= cap {
                continue;
            }
            let (cand_node, cand_score) = merged[i];
            let diverse = (0..n).all(|j| {
                if !selected[j] {
                    return true;
                }
                let (other_node, _) = merged[j];
                other_node == cand_node || sim(cand_node, other_node) <= cand_score * alpha
            });
            if diverse {
                selected[i] = true;
                count += 1;
            }
        }
        if count >= cap || alpha >= alpha_max - f32::EPSILON {
            break;
        }
        alpha = (alpha + ALPHA_STEP).min(alpha_max);
    }

    (0..n).filter(|&i| selected[i]).map(|i| merged[i]).collect()
}
