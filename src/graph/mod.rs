//! Graph index: the on-heap node map, entry node, and
//! completion tracker, plus the snapshot-isolated [`GraphView`] searches
//! read through.
//!
//! Grounded in `chroma-core-chroma/rust/index`'s use of `dashmap` for its
//! HNSW/SPANN node maps — graph building dominates contention, so a
//! concurrent hash map is the right tool here too. The entry ordinal is
//! a single `AtomicU32` with a sentinel "unset" value, set exactly once
//! via `compare_exchange` the first time any node completes: the entry
//! is fixed for the graph's lifetime once chosen.

pub mod builder;
pub mod completion;
pub mod searcher;

use crate::neighbors::NeighborSet;
use completion::CompletionTracker;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Sentinel `entry` value meaning "no node has completed yet".
pub const NO_ENTRY: u32 = u32::MAX;

pub struct Graph {
    nodes: DashMap<u32, Arc<NeighborSet>>,
    entry: AtomicU32,
    completion: CompletionTracker,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    pub fn new() -> Self {
        Self {
            nodes: DashMap::new(),
            entry: AtomicU32::new(NO_ENTRY),
            completion: CompletionTracker::new(),
        }
    }

    pub fn with_capacity(n: usize) -> Self {
        Self {
            nodes: DashMap::with_capacity(n),
            entry: AtomicU32::new(NO_ENTRY),
            completion: CompletionTracker::with_capacity(n),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, ord: u32) -> bool {
        self.nodes.contains_key(&ord)
    }

    /// Inserts an empty neighbor set for `ord`. Caller-responsible
    /// idempotency: calling this twice for the same ordinal is a logic
    /// error (debug-asserted)
    pub fn add_node(&self, ord: u32) {
        let prev = self.nodes.insert(ord, Arc::new(NeighborSet::new()));
        debug_assert!(prev.is_none(), "addNode called twice for ordinal {ord}");
    }

    pub fn neighbor_set(&self, ord: u32) -> Option<Arc<NeighborSet>> {
        self.nodes.get(&ord).map(|e| Arc::clone(e.value()))
    }

    /// Raw entry ordinal, ignoring view visibility — used internally by
    /// [`GraphView`] and by callers that do not need snapshot isolation.
    pub fn entry_node(&self) -> Option<u32> {
        let e = self.entry.load(Ordering::Acquire);
        if e == NO_ENTRY {
            None
        } else {
            Some(e)
        }
    }

    /// Records `ord`'s completion timestamp and, if no entry point is
    /// set yet, atomically claims `ord` as the entry (first completer
    /// wins; the entry never changes afterward).
    pub fn mark_complete(&self, ord: u32) {
        self.completion.mark_complete(ord);
        let _ = self
            .entry
            .compare_exchange(NO_ENTRY, ord, Ordering::AcqRel, Ordering::Acquire);
    }

    pub fn is_complete(&self, ord: u32) -> bool {
        self.completion.is_complete(ord)
    }

    /// A snapshot-isolated view bound to the current logical clock.
    pub fn view(&self) -> GraphView<'_> {
        GraphView {
            graph: self,
            clock: self.completion.clock(),
        }
    }
}

/// A search-time snapshot of the graph. Neighbor lookups filter out any
/// ordinal whose completion timestamp is not strictly less than this
/// view's captured clock — incomplete or later-completed neighbors are
/// invisible, giving concurrent searches snapshot isolation against the
/// build in progress.
pub struct GraphView<'a> {
    graph: &'a Graph,
    clock: u64,
}

impl<'a> GraphView<'a> {
    pub fn clock(&self) -> u64 {
        self.clock
    }

    pub fn graph(&self) -> &'a Graph {
        self.graph
    }

    /// The entry ordinal, or `None` if unset or not yet visible to this
    /// view's clock.
    pub fn entry_node(&self) -> Option<u32> {
        match self.graph.entry_node() {
            Some(ord) if self.graph.completion.visible_at(ord, self.clock) => Some(ord),
            _ => None,
        }
    }

    /// Neighbors of `n` visible to this view — i.e. those whose
    /// completion timestamp is strictly less than this view's clock. The
    /// returned scores are the ones recorded when `n`'s neighbor set was
    /// last mutated (the *graph edge* weight), not a fresh query score.
    pub fn neighbors(&self, n: u32) -> Vec<(u32, f32)> {
        match self.graph.neighbor_set(n) {
            Some(ns) => ns
                .iterator()
                .into_iter()
                .filter(|&(m, _)| self.graph.completion.visible_at(m, self.clock))
                .collect(),
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_is_set_once_to_first_completer() {
        let g = Graph::new();
        g.add_node(0);
        g.add_node(1);
        g.mark_complete(1);
        g.mark_complete(0);
        assert_eq!(g.entry_node(), Some(1));
    }

    #[test]
    fn view_hides_incomplete_and_later_completed_neighbors() {
        let g = Graph::new();
        g.add_node(0);
        g.add_node(1);
        g.add_node(2);
        g.neighbor_set(0).unwrap().insert(
            1,
            0.9,
            &crate::neighbors::DiversityParams::default(),
            &|_, _| 0.0,
        );
        g.mark_complete(1);

        let view_before = g.view();

        g.neighbor_set(0).unwrap().insert(
            2,
            0.5,
            &crate::neighbors::DiversityParams::default(),
            &|_, _| 0.0,
        );
        g.mark_complete(2);

        // view_before's clock predates node 2's completion, so node 2
        // must stay invisible to it even though it's now in node 0's list.
        let visible = view_before.neighbors(0);
        assert!(visible.iter().any(|&(n, _)| n == 1));
        assert!(!visible.iter().any(|&(n, _)| n == 2));

        let view_after = g.view();
        let visible_after = view_after.neighbors(0);
        assert!(visible_after.iter().any(|&(n, _)| n == 2));
    }

    #[test]
    fn empty_graph_has_no_entry() {
        let g = Graph::new();
        assert_eq!(g.entry_node(), None);
        assert_eq!(g.view().entry_node(), None);
    }

    /// Scenario 5 from the testable-properties list, run across real
    /// threads: a view captured before a concurrently-inserted node
    /// completes must never observe it, no matter how long thread B
    /// takes to finish.
    #[test]
    fn snapshot_isolation_holds_across_threads() {
        use std::sync::{Arc as StdArc, Barrier};

        let g = StdArc::new(Graph::new());
        g.add_node(0);
        g.mark_complete(0);

        let view = g.view();
        let view_clock = view.clock();

        let barrier = StdArc::new(Barrier::new(2));
        let g_writer = StdArc::clone(&g);
        let barrier_writer = StdArc::clone(&barrier);
        let writer = std::thread::spawn(move || {
            barrier_writer.wait();
            g_writer.add_node(1);
            g_writer.neighbor_set(0).unwrap().insert(
                1,
                0.7,
                &crate::neighbors::DiversityParams::default(),
                &|_, _| 0.0,
            );
            g_writer.mark_complete(1);
        });

        barrier.wait();
        writer.join().unwrap();

        // Node 1 is now complete at a clock >= view_clock; the snapshot
        // taken before that must still report it as invisible.
        assert!(!g.completion.visible_at(1, view_clock));
        let neighbors = view.neighbors(0);
        assert!(!neighbors.iter().any(|&(n, _)| n == 1));

        let fresh = g.view();
        let neighbors_fresh = fresh.neighbors(0);
        assert!(neighbors_fresh.iter().any(|&(n, _)| n == 1));
    }
}
