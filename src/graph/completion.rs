//! Completion tracker: a monotonically advancing logical
//! clock plus a per-ordinal completion timestamp, used to give concurrent
//! searches snapshot isolation against an in-progress graph build.
//!
//! A single growable array of atomic counters, guarded by a
//! reader-writer lock around growth only, stands in for a fixed atomic
//! array that would need to be sized up front: implemented here with
//! `parking_lot::RwLock` guarding a `Vec<AtomicU64>` that doubles when an
//! ordinal outgrows it. Per-slot reads/writes only need the read lock;
//! only growth takes the write lock, so the hot path (`completed_at`,
//! `mark_complete` once capacity already covers `ord`) never blocks on
//! writers.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

/// Sentinel completion timestamp meaning "not yet complete" — larger than
/// any timestamp the clock can produce in practice, so `ts < view_clock`
/// is false for it regardless of `view_clock`.
pub const INCOMPLETE: u64 = u64::MAX;

pub struct CompletionTracker {
    clock: AtomicU64,
    slots: RwLock<Vec<AtomicU64>>,
}

impl Default for CompletionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl CompletionTracker {
    pub fn new() -> Self {
        Self {
            clock: AtomicU64::new(0),
            slots: RwLock::new(Vec::new()),
        }
    }

    /// Preallocates `n` slots, useful when the final node count is known
    /// up front.
    pub fn with_capacity(n: usize) -> Self {
        let mut v = Vec::with_capacity(n);
        v.resize_with(n, || AtomicU64::new(INCOMPLETE));
        Self {
            clock: AtomicU64::new(0),
            slots: RwLock::new(v),
        }
    }

    fn ensure_capacity(&self, ord: usize) {
        {
            let guard = self.slots.read();
            if ord < guard.len() {
                return;
            }
        }
        let mut guard = self.slots.write();
        if ord >= guard.len() {
            let new_len = (guard.len().max(1) * 2).max(ord + 1);
            guard.resize_with(new_len, || AtomicU64::new(INCOMPLETE));
        }
    }

    /// The current logical clock value. Readers capture this at view
    /// creation.
    pub fn clock(&self) -> u64 {
        self.clock.load(Ordering::Acquire)
    }

    /// Marks `ord` complete: reads-then-increments the clock and stores
    /// the prior value as `ord`'s completion timestamp. Returns that
    /// timestamp.
    pub fn mark_complete(&self, ord: u32) -> u64 {
        self.ensure_capacity(ord as usize);
        let ts = self.clock.fetch_add(1, Ordering::AcqRel);
        let guard = self.slots.read();
        guard[ord as usize].store(ts, Ordering::Release);
        ts
    }

    pub fn completed_at(&self, ord: u32) -> u64 {
        let guard = self.slots.read();
        match guard.get(ord as usize) {
            Some(slot) => slot.load(Ordering::Acquire),
            None => INCOMPLETE,
        }
    }

    pub fn is_complete(&self, ord: u32) -> bool {
        self.completed_at(ord) != INCOMPLETE
    }

    /// Whether `ord` is visible to a view captured at `view_clock`: it
    /// must have completed strictly before that clock value.
    pub fn visible_at(&self, ord: u32, view_clock: u64) -> bool {
        self.completed_at(ord) < view_clock
    }
}
