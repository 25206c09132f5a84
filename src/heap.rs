//! Priority queues over packed `(score, node)` keys.
//!
//! Pairs are packed as a single `u64`: the score occupies the high 32
//! bits, the node ordinal the low 32 bits, so ordering on the packed key
//! orders by score first and breaks ties by node. `f32` scores are mapped
//! to an order-preserving `u32` via
//! the standard IEEE-754 "flip sign bit, or flip everything if negative"
//! transform, so unsigned integer comparison of the packed key agrees
//! with floating-point comparison of the score.
//!
//! Grounded in a general preference for flat, packed buffers over
//! pointer-chasing structures (an SoA vector layout, packed `ids`/`data`
//! parallel arrays) generalized here to a packed heap key instead of a
//! `(f32, u32)` tuple, which would cost an extra 4 bytes of padding per
//! entry and a non-atomic multi-word compare.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Maps an `f32` to a `u32` such that unsigned comparison of the result
/// agrees with `f32` comparison (for non-NaN inputs).
#[inline]
fn order_preserving_bits(score: f32) -> u32 {
    let bits = score.to_bits();
    if bits & 0x8000_0000 != 0 {
        !bits
    } else {
        bits | 0x8000_0000
    }
}

#[inline]
fn bits_to_score(bits: u32) -> f32 {
    let raw = if bits & 0x8000_0000 != 0 {
        bits & !0x8000_0000
    } else {
        !bits
    };
    f32::from_bits(raw)
}

/// Packs `(score, node)` into a single ordered `u64` key.
#[inline]
pub fn pack(score: f32, node: u32) -> u64 {
    ((order_preserving_bits(score) as u64) << 32) | (node as u64)
}

/// Unpacks a key produced by [`pack`] back into `(score, node)`.
#[inline]
pub fn unpack(key: u64) -> (f32, u32) {
    let node = (key & 0xFFFF_FFFF) as u32;
    let bits = (key >> 32) as u32;
    (bits_to_score(bits), node)
}

/// Unbounded max-heap over packed keys. Backed by `std::collections::
/// BinaryHeap`, which already doubles its backing `Vec` on overflow, so
/// growth needs no extra bookkeeping here.
#[derive(Debug, Clone, Default)]
pub struct GrowableLongHeap {
    heap: BinaryHeap<u64>,
}

impl GrowableLongHeap {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
        }
    }

    pub fn push(&mut self, key: u64) {
        self.heap.push(key);
    }

    pub fn pop(&mut self) -> Option<u64> {
        self.heap.pop()
    }

    pub fn peek(&self) -> Option<u64> {
        self.heap.peek().copied()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }
}

/// Min-heap over packed keys capped at `capacity`. The root is always
/// the *smallest* kept key — i.e. the weakest of the top-`capacity`
/// largest keys seen so far. Pushing beyond capacity either replaces the
/// root (when the new key beats it) or is discarded.
#[derive(Debug, Clone)]
pub struct BoundedLongHeap {
    heap: BinaryHeap<Reverse<u64>>,
    capacity: usize,
}

impl BoundedLongHeap {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "bounded heap capacity must be > 0");
        Self {
            heap: BinaryHeap::with_capacity(capacity),
            capacity,
        }
    }

    /// Returns `true` if the key was kept (inserted, or replaced the
    /// current root), `false` if it was discarded as worse than every
    /// kept element at full capacity.
    pub fn push(&mut self, key: u64) -> bool {
        if self.heap.len() < self.capacity {
            self.heap.push(Reverse(key));
            return true;
        }
        // SAFETY net: capacity > 0 so peek_mut is always Some once full.
        let mut root = self.heap.peek_mut().expect("bounded heap is non-empty");
        if key > root.0 {
            *root = Reverse(key);
            true
        } else {
            false
        }
    }

    pub fn pop(&mut self) -> Option<u64> {
        self.heap.pop().map(|Reverse(k)| k)
    }

    pub fn peek(&self) -> Option<u64> {
        self.heap.peek().map(|Reverse(k)| *k)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.heap.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }

    /// Drains all kept entries in descending-score order.
    pub fn into_sorted_vec_desc(self) -> Vec<u64> {
        let mut v: Vec<u64> = self.heap.into_iter().map(|Reverse(k)| k).collect();
        v.sort_unstable_by(|a, b| b.cmp(a));
        v
    }

    /// Non-consuming snapshot of kept entries in descending-score order,
    /// used by the searcher's `resume` to seed a wider result queue
    /// without losing the narrower one's contents.
    pub fn snapshot_sorted_vec_desc(&self) -> Vec<u64> {
        let mut v: Vec<u64> = self.heap.iter().map(|Reverse(k)| *k).collect();
        v.sort_unstable_by(|a, b| b.cmp(a));
        v
    }
}

/// Heap orientation requested by a [`NodeQueue`] caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    /// Root is the smallest key. Used, optionally bounded, to retain the
    /// top-K largest scores seen (the "results" queue).
    MinHeap,
    /// Root is the largest key. Used unbounded as the best-first search
    /// frontier (the "candidates" queue).
    MaxHeap,
}

enum Store {
    Max(GrowableLongHeap),
    Min(BoundedLongHeap),
}

/// Wraps a packed-key heap with an [`Order`] and exposes the
/// node/score-level operations the graph searcher and builder need.
pub struct NodeQueue {
    store: Store,
    incomplete: bool,
}

impl NodeQueue {
    /// Unbounded max-heap: `pop` always returns the currently-highest
    /// score. This is the search frontier ("candidates").
    pub fn new_max_unbounded() -> Self {
        Self {
            store: Store::Max(GrowableLongHeap::new()),
            incomplete: false,
        }
    }

    /// Min-heap bounded at `capacity`: keeps the `capacity` highest
    /// scores seen, root is the weakest of those. This is the result set.
    pub fn new_min_bounded(capacity: usize) -> Self {
        Self {
            store: Store::Min(BoundedLongHeap::new(capacity)),
            incomplete: false,
        }
    }

    pub fn order(&self) -> Order {
        match self.store {
            Store::Max(_) => Order::MaxHeap,
            Store::Min(_) => Order::MinHeap,
        }
    }

    /// Pushes `(node, score)`. Returns `true` if it was kept (always true
    /// for the unbounded max-heap; for the bounded min-heap, `false` if
    /// discarded as weaker than every currently-kept entry).
    pub fn push(&mut self, node: u32, score: f32) -> bool {
        let key = pack(score, node);
        match &mut self.store {
            Store::Max(h) => {
                h.push(key);
                true
            }
            Store::Min(h) => h.push(key),
        }
    }

    pub fn pop(&mut self) -> Option<u32> {
        let key = match &mut self.store {
            Store::Max(h) => h.pop(),
            Store::Min(h) => h.pop(),
        };
        key.map(|k| unpack(k).1)
    }

    pub fn pop_with_score(&mut self) -> Option<(u32, f32)> {
        let key = match &mut self.store {
            Store::Max(h) => h.pop(),
            Store::Min(h) => h.pop(),
        };
        key.map(|k| {
            let (score, node) = unpack(k);
            (node, score)
        })
    }

    pub fn top_node(&self) -> Option<u32> {
        self.peek_key().map(|k| unpack(k).1)
    }

    pub fn top_score(&self) -> Option<f32> {
        self.peek_key().map(|k| unpack(k).0)
    }

    fn peek_key(&self) -> Option<u64> {
        match &self.store {
            Store::Max(h) => h.peek(),
            Store::Min(h) => h.peek(),
        }
    }

    pub fn size(&self) -> usize {
        match &self.store {
            Store::Max(h) => h.len(),
            Store::Min(h) => h.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// `true` once a bounded min-heap has reached its capacity.
    pub fn is_full(&self) -> bool {
        match &self.store {
            Store::Max(_) => false,
            Store::Min(h) => h.is_full(),
        }
    }

    pub fn clear(&mut self) {
        match &mut self.store {
            Store::Max(h) => h.clear(),
            Store::Min(h) => h.clear(),
        }
        self.incomplete = false;
    }

    pub fn mark_incomplete(&mut self) {
        self.incomplete = true;
    }

    pub fn incomplete(&self) -> bool {
        self.incomplete
    }

    /// Clears the `incomplete` flag without discarding any kept entries —
    /// used by the searcher's `resume` to continue a cooperative-cancel
    /// search under a raised visit limit.
    pub fn reset_incomplete(&mut self) {
        self.incomplete = false;
    }

    /// Drains a min-heap's kept entries in descending-score order. Panics
    /// if called on a max-heap queue (the searcher only ever calls this
    /// on the bounded results queue).
    pub fn into_sorted_vec_desc(self) -> Vec<(u32, f32)> {
        match self.store {
            Store::Min(h) => h
                .into_sorted_vec_desc()
                .into_iter()
                .map(|k| {
                    let (score, node) = unpack(k);
                    (node, score)
                })
                .collect(),
            Store::Max(_) => panic!("into_sorted_vec_desc is only meaningful for a results queue"),
        }
    }

    /// Non-consuming counterpart of [`Self::into_sorted_vec_desc`], used
    /// to re-seed a larger bounded queue during `resume`.
    pub fn snapshot_sorted_vec_desc(&self) -> Vec<(u32, f32)> {
        match &self.store {
            Store::Min(h) => h
                .snapshot_sorted_vec_desc()
                .into_iter()
                .map(|k| {
                    let (score, node) = unpack(k);
                    (node, score)
                })
                .collect(),
            Store::Max(_) => panic!("snapshot_sorted_vec_desc is only meaningful for a results queue"),
        }
    }
}
