//! Runtime interface the core consumes from callers: a
//! random-access vector source the graph builder and searcher score
//! against, plus the one concrete implementation this crate ships.
//!
//! Grounded in a flat, contiguous `Vec<f32>` SoA store
//! (`data[i*dim..(i+1)*dim]` is vector `i`) generalized from a single
//! internal consumer into the public `RandomAccessVectors` trait's
//! reference implementation, `FlatVectorStore`. A "thread-local supplier"
//! pattern is needed because the core never assumes a caller's backing
//! store is safely shareable across worker threads during concurrent
//! construction; `FlatVectorStore` happens to be plain data with no
//! interior mutability, so its `copy`/`thread_local_supplier` are cheap
//! clones, but the trait itself makes no such assumption.

use std::sync::Arc;

/// A caller-owned, randomly addressable collection of `D`-dimensional
/// vectors. The core never mutates vectors through this trait and never
/// reassigns ordinals — ordinals are dense and assigned by the caller.
pub trait RandomAccessVectors: Send + Sync {
    /// Number of vectors currently addressable.
    fn size(&self) -> usize;

    /// Dimensionality shared by every vector. Fixed for the lifetime of
    /// the source.
    fn dimension(&self) -> usize;

    /// Borrow vector `ord`. Panics if `ord >= size()`.
    fn get(&self, ord: u32) -> &[f32];

    /// Whether `get` may return a buffer that is mutated out from under
    /// the caller between calls (e.g. a shared scratch row). When `true`,
    /// callers must copy the slice out before yielding control.
    fn is_value_shared(&self) -> bool;

    /// Produces an independent view over the same logical data, suitable
    /// for handing to one worker thread.
    fn copy(&self) -> Self
    where
        Self: Sized;

    /// Produces a `Fn() -> Self` that each worker thread calls once to
    /// obtain its own thread-local view — the core never assumes the
    /// source itself is safely `Sync` for concurrent `get` calls.
    fn thread_local_supplier(&self) -> Box<dyn Fn() -> Self + Send + Sync>
    where
        Self: Sized + Clone + 'static,
    {
        let this = self.copy();
        Box::new(move || this.clone())
    }
}

/// A flat SoA layout (`data[i*dim..(i+1)*dim]`), the crate's one
/// concrete `RandomAccessVectors` implementation. Backed
/// by an `Arc<[f32]>` so `copy()` is a cheap refcount bump rather than a
/// full data clone — each worker thread's "thread-local view" shares the
/// same underlying buffer, which is safe precisely because the core only
/// ever reads through this trait.
#[derive(Clone)]
pub struct FlatVectorStore {
    data: Arc<[f32]>,
    dim: usize,
}

impl FlatVectorStore {
    /// Wraps a pre-populated, row-major buffer. `data.len()` must be a
    /// multiple of `dim`.
    pub fn new(data: Vec<f32>, dim: usize) -> Self {
        assert!(dim > 0, "dimension must be > 0");
        assert_eq!(
            data.len() % dim,
            0,
            "flat buffer length {} is not a multiple of dim {}",
            data.len(),
            dim
        );
        Self {
            data: Arc::from(data.into_boxed_slice()),
            dim,
        }
    }

    /// Builds a store from individual row vectors, all sharing `dim`.
    pub fn from_rows(rows: &[&[f32]], dim: usize) -> Self {
        let mut data = Vec::with_capacity(rows.len() * dim);
        for row in rows {
            assert_eq!(row.len(), dim, "row dimension mismatch");
            data.extend_from_slice(row);
        }
        Self::new(data, dim)
    }
}

impl RandomAccessVectors for FlatVectorStore {
    fn size(&self) -> usize {
        self.data.len() / self.dim
    }

    fn dimension(&self) -> usize {
        self.dim
    }

    fn get(&self, ord: u32) -> &[f32] {
        let base = ord as usize * self.dim;
        &self.data[base..base + self.dim]
    }

    fn is_value_shared(&self) -> bool {
        false
    }

    fn copy(&self) -> Self {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_store_rows_are_addressable() {
        let rows: Vec<Vec<f32>> = (0..5).map(|i| vec![i as f32; 3]).collect();
        let refs: Vec<&[f32]> = rows.iter().map(|r| r.as_slice()).collect();
        let store = FlatVectorStore::from_rows(&refs, 3);
        assert_eq!(store.size(), 5);
        assert_eq!(store.dimension(), 3);
        assert_eq!(store.get(4), &[4.0f32, 4.0, 4.0]);
    }

    #[test]
    fn copy_shares_the_same_backing_buffer() {
        let store = FlatVectorStore::new(vec![1.0, 2.0, 3.0, 4.0], 2);
        let copy = store.copy();
        assert_eq!(copy.get(1), &[3.0f32, 4.0]);
        assert!(Arc::ptr_eq(&store.data, &copy.data));
    }

    #[test]
    fn thread_local_supplier_yields_independent_clones() {
        let store = FlatVectorStore::new(vec![1.0, 2.0], 2);
        let supplier = store.thread_local_supplier();
        let a = supplier();
        let b = supplier();
        assert_eq!(a.get(0), b.get(0));
    }
}
