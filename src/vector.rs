//! Vector primitives.
//!
//! ## Why a `Kernel` trait instead of one free function per operation
//!
//! `dot_product_unrolled` hand-unrolls the accumulation loop: bounds
//! checks in the hot loop cost real cycles at the scale of a full index
//! scan, and 8 independent accumulators let the CPU's out-of-order
//! engine overlap multiple FMA pipes instead of serializing on one
//! dependency chain. The `Kernel` trait lets that unrolled
//! implementation stand in for whatever kernel the active similarity
//! family needs, selected once at process start.
//!
//! Every kernel implementation must be bit-identical up to
//! associativity-of-add rounding for the same inputs.

use crate::error::{CoreError, CoreResult};
use std::sync::OnceLock;

/// Similarity family. Wire-stable order: `DotProduct=0,
/// Euclidean=1, Cosine=2`. "Higher is better" for all three — a kernel
/// that computes squared distance (as `Euclidean` does internally) must
/// be composed into a similarity by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[repr(u8)]
pub enum Similarity {
    DotProduct = 0,
    Euclidean = 1,
    Cosine = 2,
}

impl Similarity {
    /// Score two full vectors under this similarity family.
    pub fn score(&self, a: &[f32], b: &[f32]) -> CoreResult<f32> {
        if a.len() != b.len() {
            return Err(CoreError::invalid_argument(format!(
                "dimension mismatch: {} vs {}",
                a.len(),
                b.len()
            )));
        }
        match self {
            Similarity::DotProduct => Ok(active_kernel().dot(a, b)),
            Similarity::Euclidean => {
                let d2 = active_kernel().squared_l2(a, b);
                Ok(1.0 / (1.0 + d2))
            }
            Similarity::Cosine => {
                let na = active_kernel().dot(a, a).sqrt();
                let nb = active_kernel().dot(b, b).sqrt();
                if na <= 1e-10 || nb <= 1e-10 {
                    return Err(CoreError::invalid_argument(
                        "cosine similarity of a zero vector is undefined",
                    ));
                }
                Ok(active_kernel().dot(a, b) / (na * nb))
            }
        }
    }
}

/// A vectorizable kernel implementation. Implementations may dispatch to
/// SIMD-specific code; only the mathematical contract is fixed (results
/// finite for finite inputs, bit-identical up to associativity-of-add
/// rounding).
pub trait Kernel: Send + Sync {
    fn dot(&self, a: &[f32], b: &[f32]) -> f32;
    fn squared_l2(&self, a: &[f32], b: &[f32]) -> f32;
}

/// Reference scalar implementation: no unrolling, no unsafe. Used as the
/// correctness baseline for a single dot product.
pub struct ScalarKernel;

impl Kernel for ScalarKernel {
    fn dot(&self, a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
    }

    fn squared_l2(&self, a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum()
    }
}

/// Default active kernel: an 8-wide unrolled accumulator over
/// `get_unchecked` slices.
pub struct UnrolledKernel;

impl Kernel for UnrolledKernel {
    fn dot(&self, a: &[f32], b: &[f32]) -> f32 {
        dot_product_unrolled(a, b)
    }

    fn squared_l2(&self, a: &[f32], b: &[f32]) -> f32 {
        squared_l2_unrolled(a, b)
    }
}

static ACTIVE_KERNEL: OnceLock<Box<dyn Kernel>> = OnceLock::new();

/// Returns the process-wide kernel, initializing it to [`UnrolledKernel`]
/// on first use. There is exactly one selection point: no other global
/// process state beyond this one-time, process-wide kernel choice.
pub fn active_kernel() -> &'static dyn Kernel {
    ACTIVE_KERNEL
        .get_or_init(|| Box::new(UnrolledKernel))
        .as_ref()
}

/// Hand-Unrolled Dot Product — the core hot path.
///
/// ## Why 8×f32 per iteration
///
/// AVX2 operates on 256-bit registers = 8×32-bit floats. With 8
/// independent partial sums (`acc0..acc7`) the CPU can execute several
/// iterations' worth of multiply-adds in parallel via out-of-order
/// execution instead of serializing on one accumulator.
///
/// ## Safety
///
/// `chunks = len / 8`; every index touched inside the unsafe loop is
/// `< chunks * 8 <= len`, and `a.len() == b.len()` is checked by the
/// caller (`debug_assert` here as a last line of defense). The remainder
/// (`len % 8` elements) is handled by ordinary bounds-checked indexing.
#[inline(always)]
fn dot_product_unrolled(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());

    let len = a.len();
    let chunks = len / 8;

    let mut acc0 = 0.0f32;
    let mut acc1 = 0.0f32;
    let mut acc2 = 0.0f32;
    let mut acc3 = 0.0f32;
    let mut acc4 = 0.0f32;
    let mut acc5 = 0.0f32;
    let mut acc6 = 0.0f32;
    let mut acc7 = 0.0f32;

    // SAFETY: i*8+7 < chunks*8 <= len for i in 0..chunks, for both a and b
    // (lengths checked equal above).
    unsafe {
        for i in 0..chunks {
            let base = i * 8;
            acc0 += a.get_unchecked(base) * b.get_unchecked(base);
            acc1 += a.get_unchecked(base + 1) * b.get_unchecked(base + 1);
            acc2 += a.get_unchecked(base + 2) * b.get_unchecked(base + 2);
            acc3 += a.get_unchecked(base + 3) * b.get_unchecked(base + 3);
            acc4 += a.get_unchecked(base + 4) * b.get_unchecked(base + 4);
            acc5 += a.get_unchecked(base + 5) * b.get_unchecked(base + 5);
            acc6 += a.get_unchecked(base + 6) * b.get_unchecked(base + 6);
            acc7 += a.get_unchecked(base + 7) * b.get_unchecked(base + 7);
        }
    }

    let mut result = acc0 + acc1 + acc2 + acc3 + acc4 + acc5 + acc6 + acc7;

    let remainder_start = chunks * 8;
    for i in remainder_start..len {
        result += a[i] * b[i];
    }

    result
}

/// Squared-L2 counterpart of [`dot_product_unrolled`], same unrolling
/// strategy applied to `(a_i - b_i)^2`.
#[inline(always)]
fn squared_l2_unrolled(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());

    let len = a.len();
    let chunks = len / 8;

    let mut acc0 = 0.0f32;
    let mut acc1 = 0.0f32;
    let mut acc2 = 0.0f32;
    let mut acc3 = 0.0f32;
    let mut acc4 = 0.0f32;
    let mut acc5 = 0.0f32;
    let mut acc6 = 0.0f32;
    let mut acc7 = 0.0f32;

    unsafe {
        for i in 0..chunks {
            let base = i * 8;
            let d0 = a.get_unchecked(base) - b.get_unchecked(base);
            let d1 = a.get_unchecked(base + 1) - b.get_unchecked(base + 1);
            let d2 = a.get_unchecked(base + 2) - b.get_unchecked(base + 2);
            let d3 = a.get_unchecked(base + 3) - b.get_unchecked(base + 3);
            let d4 = a.get_unchecked(base + 4) - b.get_unchecked(base + 4);
            let d5 = a.get_unchecked(base + 5) - b.get_unchecked(base + 5);
            let d6 = a.get_unchecked(base + 6) - b.get_unchecked(base + 6);
            let d7 = a.get_unchecked(base + 7) - b.get_unchecked(base + 7);
            acc0 += d0 * d0;
            acc1 += d1 * d1;
            acc2 += d2 * d2;
            acc3 += d3 * d3;
            acc4 += d4 * d4;
            acc5 += d5 * d5;
            acc6 += d6 * d6;
            acc7 += d7 * d7;
        }
    }

    let mut result = acc0 + acc1 + acc2 + acc3 + acc4 + acc5 + acc6 + acc7;

    let remainder_start = chunks * 8;
    for i in remainder_start..len {
        let d = a[i] - b[i];
        result += d * d;
    }

    result
}

/// L2 norm of a slice.
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Returns a new `Vec<f32>` normalized to unit L2 norm. Errors on a zero
/// (or near-zero) vector ("cosine on zero vectors fails
/// with `InvalidArgument`" generalizes to any explicit normalize call).
pub fn normalize(v: &[f32]) -> CoreResult<Vec<f32>> {
    let norm = l2_norm(v);
    if norm <= 1e-10 {
        return Err(CoreError::invalid_argument(
            "cannot normalize a zero vector",
        ));
    }
    let inv = 1.0 / norm;
    Ok(v.iter().map(|x| x * inv).collect())
}

/// Element-wise `a + b`.
pub fn add(a: &[f32], b: &[f32]) -> Vec<f32> {
    a.iter().zip(b.iter()).map(|(x, y)| x + y).collect()
}

/// Element-wise `a - b`.
pub fn sub(a: &[f32], b: &[f32]) -> Vec<f32> {
    a.iter().zip(b.iter()).map(|(x, y)| x - y).collect()
}

/// Element-wise `a * scalar`.
pub fn scale(a: &[f32], scalar: f32) -> Vec<f32> {
    a.iter().map(|x| x * scalar).collect()
}

/// Element-wise `a.powf(exp)`.
pub fn pow(a: &[f32], exp: f32) -> Vec<f32> {
    a.iter().map(|x| x.powf(exp)).collect()
}

/// Sum of all elements.
pub fn sum(a: &[f32]) -> f32 {
    a.iter().sum()
}

/// Minimum element. `None` for an empty slice.
pub fn min(a: &[f32]) -> Option<f32> {
    a.iter().copied().fold(None, |acc, x| match acc {
        None => Some(x),
        Some(m) => Some(m.min(x)),
    })
}

/// Maximum element. `None` for an empty slice.
pub fn max(a: &[f32]) -> Option<f32> {
    a.iter().copied().fold(None, |acc, x| match acc {
        None => Some(x),
        Some(m) => Some(m.max(x)),
    })
}

/// Squared-L2 distance using the active kernel; convenience wrapper used
/// by k-means (component D), which always wants squared distance, never
/// a similarity score.
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    active_kernel().squared_l2(a, b)
}

/// Dot product using the active kernel.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    active_kernel().dot(a, b)
}
