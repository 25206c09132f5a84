//! Graph searcher: beam-style best-first search over a
//! [`GraphView`], with an accept-bits filter and a cooperative visit-limit
//! cancellation, plus `resume` to progressively widen an already-run
//! search.
//!
//! Grounded in `vigna-webgraph-rs/algo`'s visited-frontier traversal idiom
//! (`algo/src/visits/breadth_first`: a frontier queue, a visited bit set,
//! and a counter the caller can use to stop cooperatively) adapted here
//! from unweighted BFS to a best-first search keyed by score, using this
//! crate's own [`NodeQueue`] (component C) and [`GrowableBitSet`]
//! (component B) rather than introducing another dependency.

use super::GraphView;
use crate::bitset::GrowableBitSet;
use crate::heap::NodeQueue;

/// Result of one [`search`] call (or the state of a [`GraphSearcher`] at
/// the time [`GraphSearcher::finish`] is called).
#[derive(Debug, Clone)]
pub struct SearchResult {
    /// Up to `topK` `(ordinal, score)` pairs, descending by score.
    pub nodes: Vec<(u32, f32)>,
    pub visited_count: usize,
    /// `true` if the visit limit was reached before the search could
    /// prove it had found the true top-K.
    pub incomplete: bool,
}

/// One-shot best-first search. `score_fn(ordinal)` must score
/// that ordinal against the (fixed, caller-held) query. `accept` is an
/// optional predicate restricting which ordinals may enter the result set
/// (they still participate in graph traversal either way).
pub fn search(
    view: &GraphView<'_>,
    score_fn: &dyn Fn(u32) -> f32,
    top_k: usize,
    accept: Option<&dyn Fn(u32) -> bool>,
    visit_limit: usize,
) -> SearchResult {
    match GraphSearcher::new(view, top_k, visit_limit, score_fn, accept) {
        Some(mut s) => {
            s.run(score_fn, accept);
            s.finish()
        }
        None => SearchResult {
            nodes: Vec::new(),
            visited_count: 0,
            incomplete: false,
        },
    }
}

/// A resumable search-in-progress. Holds the candidate frontier, the
/// bounded result queue, and the visited set so a caller can widen
/// `topK`/`visit_limit` and continue without reseeding.
pub struct GraphSearcher<'a> {
    view: &'a GraphView<'a>,
    candidates: NodeQueue,
    results: NodeQueue,
    visited: GrowableBitSet,
    visited_count: usize,
    visit_limit: usize,
    top_k: usize,
    min_accepted: f32,
}

impl<'a> GraphSearcher<'a> {
    /// Seeds a new search from the view's entry node. Returns `None` for
    /// an empty graph (no entry point) — callers should then report an
    /// empty, complete result.
    pub fn new(
        view: &'a GraphView<'a>,
        top_k: usize,
        visit_limit: usize,
        score_fn: &dyn Fn(u32) -> f32,
        accept: Option<&dyn Fn(u32) -> bool>,
    ) -> Option<Self> {
        Self::new_with_visited(view, top_k, visit_limit, score_fn, accept, GrowableBitSet::new())
    }

    /// Same as [`Self::new`], but reuses a caller-supplied (already
    /// cleared) visited bit set instead of allocating one. Pairs with
    /// [`Self::into_visited`] so a per-thread scratch buffer can be
    /// carried across searches without reallocating on every call.
    pub fn new_with_visited(
        view: &'a GraphView<'a>,
        top_k: usize,
        visit_limit: usize,
        score_fn: &dyn Fn(u32) -> f32,
        accept: Option<&dyn Fn(u32) -> bool>,
        visited: GrowableBitSet,
    ) -> Option<Self> {
        let entry = view.entry_node()?;
        let top_k = top_k.max(1);
        let mut s = Self {
            view,
            candidates: NodeQueue::new_max_unbounded(),
            results: NodeQueue::new_min_bounded(top_k),
            visited,
            visited_count: 0,
            visit_limit,
            top_k,
            min_accepted: f32::NEG_INFINITY,
        };
        s.seed(entry, score_fn, accept);
        Some(s)
    }

    fn seed(&mut self, entry: u32, score_fn: &dyn Fn(u32) -> f32, accept: Option<&dyn Fn(u32) -> bool>) {
        let score = score_fn(entry);
        self.visited.set(entry as usize);
        self.visited_count += 1;
        self.candidates.push(entry, score);
        if accept.map_or(true, |f| f(entry)) {
            self.results.push(entry, score);
        }
        self.update_min_accepted();
    }

    fn update_min_accepted(&mut self) {
        self.min_accepted = if self.results.is_full() {
            self.results.top_score().unwrap_or(f32::NEG_INFINITY)
        } else {
            f32::NEG_INFINITY
        };
    }

    /// Runs the best-first loop until the frontier is exhausted, the
    /// visit limit is hit, or no remaining candidate can possibly beat
    /// the current worst accepted result.
    pub fn run(&mut self, score_fn: &dyn Fn(u32) -> f32, accept: Option<&dyn Fn(u32) -> bool>) {
        while !self.candidates.is_empty() && !self.results.incomplete() {
            let top_score = self.candidates.top_score().unwrap();
            if top_score < self.min_accepted {
                break;
            }
            let top = self.candidates.pop().unwrap();
            let neighbors = self.view.neighbors(top);

            let mut limit_hit = false;
            for (m, _edge_score) in neighbors {
                if self.visited.get(m as usize) {
                    continue;
                }
                if self.visited_count >= self.visit_limit {
                    self.results.mark_incomplete();
                    limit_hit = true;
                    break;
                }
                let score = score_fn(m);
                self.visited.set(m as usize);
                self.visited_count += 1;

                if score >= self.min_accepted {
                    self.candidates.push(m, score);
                    if accept.map_or(true, |f| f(m)) {
                        self.results.push(m, score);
                        self.update_min_accepted();
                    }
                }
            }
            if limit_hit {
                break;
            }
        }
    }

    /// Widens the result capacity by `additional` and raises the visit
    /// limit to `new_visit_limit`, then continues the same search without
    /// reseeding the candidate frontier or visited set. No-op on the
    /// visited/candidate state; callers must call [`Self::run`] again (or
    /// use [`Self::resume`], which does both).
    pub fn widen_results(&mut self, additional: usize, new_visit_limit: usize) {
        let new_capacity = self.top_k + additional;
        if new_capacity > self.top_k {
            let mut wider = NodeQueue::new_min_bounded(new_capacity);
            for (n, s) in self.results.snapshot_sorted_vec_desc() {
                wider.push(n, s);
            }
            self.results = wider;
            self.top_k = new_capacity;
        }
        self.visit_limit = new_visit_limit;
        self.results.reset_incomplete();
        self.update_min_accepted();
    }

    /// Widens the result set and continues the search in one call.
    pub fn resume(
        &mut self,
        additional: usize,
        new_visit_limit: usize,
        score_fn: &dyn Fn(u32) -> f32,
        accept: Option<&dyn Fn(u32) -> bool>,
    ) {
        self.widen_results(additional, new_visit_limit);
        self.run(score_fn, accept);
    }

    pub fn visited_count(&self) -> usize {
        self.visited_count
    }

    /// Truncates the result set to `topK` (already enforced by the
    /// bounded queue's capacity) and returns it in descending-score order.
    pub fn finish(self) -> SearchResult {
        SearchResult {
            incomplete: self.results.incomplete(),
            visited_count: self.visited_count,
            nodes: self.results.into_sorted_vec_desc(),
        }
    }

    /// Like [`Self::finish`], but also hands back the visited bit set so
    /// a caller holding per-thread scratch can clear and reuse it on the
    /// next search instead of dropping the allocation.
    pub fn finish_reclaiming_visited(self) -> (SearchResult, GrowableBitSet) {
        let result = SearchResult {
            incomplete: self.results.incomplete(),
            visited_count: self.visited_count,
            nodes: self.results.into_sorted_vec_desc(),
        };
        (result, self.visited)
    }
}

/// Runs a search exactly like [`search`], but reuses the caller-supplied
/// `visited` scratch bit set (which must already be cleared) instead of
/// allocating a fresh one, handing it back afterwards for the next call.
pub fn search_with_scratch(
    view: &GraphView<'_>,
    score_fn: &dyn Fn(u32) -> f32,
    top_k: usize,
    accept: Option<&dyn Fn(u32) -> bool>,
    visit_limit: usize,
    visited: GrowableBitSet,
) -> (SearchResult, GrowableBitSet) {
    match GraphSearcher::new_with_visited(view, top_k, visit_limit, score_fn, accept, visited) {
        Some(mut s) => {
            s.run(score_fn, accept);
            s.finish_reclaiming_visited()
        }
        None => (
            SearchResult {
                nodes: Vec::new(),
                visited_count: 0,
                incomplete: false,
            },
            GrowableBitSet::new(),
        ),
    }
}
