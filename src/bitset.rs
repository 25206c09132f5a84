//! Dense bit sets: fixed, growable, and atomic-fixed
//! variants sharing a common read contract.
//!
//! Grounded in `vigna-webgraph-rs/algo`'s word-packed visited-set idiom
//! used by its breadth-first traversals (fixed-length, `⌈n/64⌉` words,
//! scan-forward next-set-bit). The atomic variant is a direct translation
//! of the same word-packed layout to `AtomicU64` words with OR/AND
//! accumulation, since the searcher and builder here share visited bits
//! across threads and need `get`/`set`/`clear` to be lock-free and
//! linearisable per bit.
//!
//! `roaring` appears elsewhere in the retrieved corpus, but it targets
//! large, sparse, highly-compressible sets; these bit sets are dense and
//! sized to the graph/candidate pool, so a flat word array is the right
//! fit and needs no extra dependency.

use std::sync::atomic::{AtomicU64, Ordering};

/// Sentinel returned by `next_set_bit`/`prev_set_bit` when no further set
/// bit exists. Distinct from any valid index.
pub const NO_MORE: usize = usize::MAX;

const WORD_BITS: usize = 64;

fn words_for(n: usize) -> usize {
    n.div_ceil(WORD_BITS)
}

/// Single-threaded, fixed-length bit set.
#[derive(Debug, Clone)]
pub struct FixedBitSet {
    words: Vec<u64>,
    len: usize,
}

impl FixedBitSet {
    pub fn new(len: usize) -> Self {
        Self {
            words: vec![0u64; words_for(len)],
            len,
        }
    }

    pub fn length(&self) -> usize {
        self.len
    }

    pub fn get(&self, i: usize) -> bool {
        assert!(i < self.len, "index {i} out of bounds (len {})", self.len);
        (self.words[i / WORD_BITS] >> (i % WORD_BITS)) & 1 != 0
    }

    pub fn set(&mut self, i: usize) {
        assert!(i < self.len, "index {i} out of bounds (len {})", self.len);
        self.words[i / WORD_BITS] |= 1u64 << (i % WORD_BITS);
    }

    pub fn clear_bit(&mut self, i: usize) {
        assert!(i < self.len, "index {i} out of bounds (len {})", self.len);
        self.words[i / WORD_BITS] &= !(1u64 << (i % WORD_BITS));
    }

    pub fn cardinality(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn next_set_bit(&self, from: usize) -> usize {
        next_set_bit_in(&self.words, self.len, from)
    }

    pub fn prev_set_bit(&self, from: usize) -> usize {
        prev_set_bit_in(&self.words, self.len, from)
    }
}

/// Single-threaded bit set that resizes on `set`.
#[derive(Debug, Clone, Default)]
pub struct GrowableBitSet {
    words: Vec<u64>,
    len: usize,
}

impl GrowableBitSet {
    pub fn new() -> Self {
        Self {
            words: Vec::new(),
            len: 0,
        }
    }

    pub fn with_capacity(len: usize) -> Self {
        Self {
            words: vec![0u64; words_for(len)],
            len,
        }
    }

    pub fn length(&self) -> usize {
        self.len
    }

    pub fn get(&self, i: usize) -> bool {
        if i >= self.len {
            return false;
        }
        (self.words[i / WORD_BITS] >> (i % WORD_BITS)) & 1 != 0
    }

    /// Sets bit `i`, growing the backing storage if needed.
    pub fn set(&mut self, i: usize) {
        if i >= self.len {
            self.len = i + 1;
            let needed = words_for(self.len);
            if needed > self.words.len() {
                self.words.resize(needed, 0);
            }
        }
        self.words[i / WORD_BITS] |= 1u64 << (i % WORD_BITS);
    }

    pub fn clear_bit(&mut self, i: usize) {
        if i < self.len {
            self.words[i / WORD_BITS] &= !(1u64 << (i % WORD_BITS));
        }
    }

    pub fn cardinality(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn next_set_bit(&self, from: usize) -> usize {
        next_set_bit_in(&self.words, self.len, from)
    }

    pub fn prev_set_bit(&self, from: usize) -> usize {
        prev_set_bit_in(&self.words, self.len, from)
    }

    /// Resets every bit to unset without releasing the backing word
    /// storage, so a caller can reuse the same allocation across repeated
    /// searches instead of paying for a fresh allocation every call.
    pub fn clear_all(&mut self) {
        self.words.iter_mut().for_each(|w| *w = 0);
        self.len = 0;
    }
}

/// Concurrent-safe, fixed-length bit set. `get`/`set`/`clear` are
/// lock-free and linearisable per bit via `AtomicU64` OR/AND.
#[derive(Debug)]
pub struct AtomicBitSet {
    words: Vec<AtomicU64>,
    len: usize,
}

impl AtomicBitSet {
    pub fn new(len: usize) -> Self {
        let n = words_for(len);
        let mut words = Vec::with_capacity(n);
        words.resize_with(n, || AtomicU64::new(0));
        Self { words, len }
    }

    pub fn length(&self) -> usize {
        self.len
    }

    pub fn get(&self, i: usize) -> bool {
        assert!(i < self.len, "index {i} out of bounds (len {})", self.len);
        (self.words[i / WORD_BITS].load(Ordering::Acquire) >> (i % WORD_BITS)) & 1 != 0
    }

    /// Sets bit `i` and returns whether it was already set (the previous
    /// value), useful for "first thread to claim this node" races.
    pub fn set(&self, i: usize) -> bool {
        assert!(i < self.len, "index {i} out of bounds (len {})", self.len);
        let mask = 1u64 << (i % WORD_BITS);
        let prev = self.words[i / WORD_BITS].fetch_or(mask, Ordering::AcqRel);
        prev & mask != 0
    }

    pub fn clear_bit(&self, i: usize) {
        assert!(i < self.len, "index {i} out of bounds (len {})", self.len);
        let mask = !(1u64 << (i % WORD_BITS));
        self.words[i / WORD_BITS].fetch_and(mask, Ordering::AcqRel);
    }

    pub fn cardinality(&self) -> usize {
        self.words
            .iter()
            .map(|w| w.load(Ordering::Acquire).count_ones() as usize)
            .sum()
    }

    pub fn next_set_bit(&self, from: usize) -> usize {
        let snapshot: Vec<u64> = self.words.iter().map(|w| w.load(Ordering::Acquire)).collect();
        next_set_bit_in(&snapshot, self.len, from)
    }

    pub fn prev_set_bit(&self, from: usize) -> usize {
        let snapshot: Vec<u64> = self.words.iter().map(|w| w.load(Ordering::Acquire)).collect();
        prev_set_bit_in(&snapshot, self.len, from)
    }
}

fn next_set_bit_in(words: &[u64], len: usize, from: usize) -> usize {
    if from >= len {
        return NO_MORE;
    }
    let mut word_idx = from / WORD_BITS;
    let bit_off = from % WORD_BITS;
    let mut word = words[word_idx] & (!0u64 << bit_off);
    loop {
        if word != 0 {
            let idx = word_idx * WORD_BITS + word.trailing_zeros() as usize;
            return if idx < len { idx } else { NO_MORE };
        }
        word_idx += 1;
        if word_idx >= words.len() {
            return NO_MORE;
        }
        word = words[word_idx];
    }
}

fn prev_set_bit_in(words: &[u64], len: usize, from: usize) -> usize {
    if len == 0 {
        return NO_MORE;
    }
    let from = from.min(len - 1);
    let mut word_idx = from / WORD_BITS;
    let bit_off = from % WORD_BITS;
    let mut word = words[word_idx] & (!0u64 >> (WORD_BITS - 1 - bit_off));
    loop {
        if word != 0 {
            let idx = word_idx * WORD_BITS + (63 - word.leading_zeros() as usize);
            return idx;
        }
        if word_idx == 0 {
            return NO_MORE;
        }
        word_idx -= 1;
        word = words[word_idx];
    }
}
