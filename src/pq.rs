//! Product Quantization.
//!
//! ## Notation
//!
//! | Symbol | Meaning |
//! |---|---|
//! | `D` | full vector dimension |
//! | `M` | number of subspaces |
//! | `K` | centroids per subspace (typically 256, one per `u8` code) |
//! | `subSizes[m]` | dimension of subspace `m`; `sum(subSizes) == D` |
//!
//! A vector is split into `M` contiguous slices (remainder distributed to
//! the first `D mod M` subspaces), each slice quantized independently
//! against its own codebook of `K` centroids, and stored as one byte per
//! subspace. Decoding concatenates the chosen centroids (plus the global
//! centroid, if training centered the data).
//!
//! Doc density here follows `chroma-core-chroma/rust/index/src/
//! quantization/mod.rs`'s module-level table style for a quantization
//! scheme; the wire format itself is an interoperability contract and is
//! written by hand with `byteorder`, not derived via `bincode` the way
//! the crate-internal whole-struct snapshot is (see `src/lib.rs`).

use crate::error::{CoreError, CoreResult};
use crate::kmeans::{self, UNWEIGHTED};
use crate::vector::{self, sub, Similarity};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use rand::{rngs::StdRng, Rng, SeedableRng};
use rayon::prelude::*;
use std::io::{Read, Write};

const MAGIC: i32 = 0x75EC4012;
const CURRENT_VERSION: i32 = 3;
const TRAINING_ITERATIONS: usize = 6;
const MAX_TRAINING_VECTORS: usize = 128_000;

/// Parameters controlling a training run.
#[derive(Debug, Clone)]
pub struct PqTrainParams {
    pub m: usize,
    pub k: usize,
    pub global_centering: bool,
    /// `Some(threshold)` with `threshold > UNWEIGHTED` enables anisotropic
    /// clustering/encoding; `None` (or `UNWEIGHTED`) is plain, unweighted
    /// PQ.
    pub anisotropic_threshold: Option<f32>,
}

impl Default for PqTrainParams {
    fn default() -> Self {
        Self {
            m: 8,
            k: 256,
            global_centering: false,
            anisotropic_threshold: None,
        }
    }
}

/// A trained product quantizer: `M` per-subspace codebooks of `K`
/// centroids each, plus an optional global centroid subtracted before
/// encoding.
#[derive(Debug, Clone)]
pub struct ProductQuantizer {
    pub m: usize,
    pub k: usize,
    pub subvector_sizes: Vec<usize>,
    pub subvector_offsets: Vec<usize>,
    pub global_centroid: Option<Vec<f32>>,
    /// `codebooks[m][code]` is the `subvector_sizes[m]`-length centroid.
    pub codebooks: Vec<Vec<Vec<f32>>>,
    pub anisotropic_threshold: Option<f32>,
}

/// Divides `d` into `m` subspace sizes, distributing the remainder to the
/// first `d mod m` subspaces.
pub fn subspace_sizes(d: usize, m: usize) -> Vec<usize> {
    let base = d / m;
    let remainder = d % m;
    (0..m)
        .map(|i| if i < remainder { base + 1 } else { base })
        .collect()
}

fn offsets_from_sizes(sizes: &[usize]) -> Vec<usize> {
    let mut offsets = Vec::with_capacity(sizes.len());
    let mut acc = 0;
    for &s in sizes {
        offsets.push(acc);
        acc += s;
    }
    offsets
}

impl ProductQuantizer {
    /// Trains a quantizer from `vectors`.
    ///
    /// Fails with `InvalidArgument` if `M > D` or `K` exceeds the
    /// training set size.
    pub fn train(vectors: &[&[f32]], params: &PqTrainParams, seed: u64) -> CoreResult<Self> {
        if vectors.is_empty() {
            return Err(CoreError::invalid_argument("cannot train PQ on zero vectors"));
        }
        let d = vectors[0].len();
        if params.m == 0 || params.m > d {
            return Err(CoreError::invalid_argument(format!(
                "M ({}) must be in 1..=D ({})",
                params.m, d
            )));
        }
        if params.k == 0 || params.k > vectors.len() {
            return Err(CoreError::invalid_argument(format!(
                "K ({}) must be <= training set size ({})",
                params.k,
                vectors.len()
            )));
        }
        for v in vectors {
            if v.len() != d {
                return Err(CoreError::invalid_argument("all training vectors must share one dimension"));
            }
        }

        let mut rng = StdRng::seed_from_u64(seed);

        // Step 2: Bernoulli subsample to at most 128_000 vectors.
        let keep_prob = (MAX_TRAINING_VECTORS as f64 / vectors.len() as f64).min(1.0);
        let mut sample: Vec<Vec<f32>> = vectors
            .iter()
            .filter(|_| rng.gen_bool(keep_prob))
            .map(|v| v.to_vec())
            .collect();
        if sample.len() < params.k {
            // Degenerate subsampling (tiny inputs, unlucky draws): fall
            // back to the full set so K remains satisfiable.
            sample = vectors.iter().map(|v| v.to_vec()).collect();
        }

        // Step 3: optional global centering.
        let global_centroid = if params.global_centering {
            let mut mean = vec![0.0f32; d];
            for v in &sample {
                for (m, x) in mean.iter_mut().zip(v.iter()) {
                    *m += x;
                }
            }
            let n = sample.len() as f32;
            for m in mean.iter_mut() {
                *m /= n;
            }
            for v in sample.iter_mut() {
                *v = sub(v, &mean);
            }
            Some(mean)
        } else {
            None
        };

        let sizes = subspace_sizes(d, params.m);
        let offsets = offsets_from_sizes(&sizes);

        // Step 4: per-subspace clustering, in parallel, each with its own
        // deterministic sub-seed derived sequentially (so results are
        // reproducible regardless of thread scheduling).
        let sub_seeds: Vec<u64> = (0..params.m).map(|_| rng.gen()).collect();
        let anisotropic = params.anisotropic_threshold.filter(|&t| t > UNWEIGHTED);

        let codebooks: Vec<Vec<Vec<f32>>> = (0..params.m)
            .into_par_iter()
            .map(|m_idx| {
                let offset = offsets[m_idx];
                let size = sizes[m_idx];
                let mut sub_rng = StdRng::seed_from_u64(sub_seeds[m_idx]);

                let slices: Vec<Vec<f32>> = sample
                    .iter()
                    .map(|v| v[offset..offset + size].to_vec())
                    .collect();

                let result = if let Some(threshold) = anisotropic {
                    let normalized: Vec<Vec<f32>> = slices
                        .iter()
                        .map(|s| vector::normalize(s).unwrap_or_else(|_| s.clone()))
                        .collect();
                    let refs: Vec<&[f32]> = normalized.iter().map(|v| v.as_slice()).collect();
                    kmeans::cluster_anisotropic(&refs, params.k, TRAINING_ITERATIONS, threshold, size, &mut sub_rng)
                } else {
                    let refs: Vec<&[f32]> = slices.iter().map(|v| v.as_slice()).collect();
                    kmeans::cluster(&refs, params.k, TRAINING_ITERATIONS, &mut sub_rng)
                };
                result.centroids
            })
            .collect();

        Ok(ProductQuantizer {
            m: params.m,
            k: params.k,
            subvector_sizes: sizes,
            subvector_offsets: offsets,
            global_centroid,
            codebooks,
            anisotropic_threshold: anisotropic,
        })
    }

    fn center<'a>(&self, v: &'a [f32]) -> CoreResult<Vec<f32>> {
        if v.len() != self.dimension() {
            return Err(CoreError::invalid_argument(format!(
                "vector dimension {} does not match quantizer dimension {}",
                v.len(),
                self.dimension()
            )));
        }
        Ok(match &self.global_centroid {
            Some(g) => sub(v, g),
            None => v.to_vec(),
        })
    }

    pub fn dimension(&self) -> usize {
        self.subvector_sizes.iter().sum()
    }

    /// Unweighted encoding: each byte is the argmin-L2
    /// centroid within its subspace.
    pub fn encode(&self, v: &[f32]) -> CoreResult<Vec<u8>> {
        let centered = self.center(v)?;
        let mut code = vec![0u8; self.m];
        for m in 0..self.m {
            let offset = self.subvector_offsets[m];
            let size = self.subvector_sizes[m];
            let slice = &centered[offset..offset + size];
            code[m] = self.nearest_centroid(m, slice) as u8;
        }
        Ok(code)
    }

    fn nearest_centroid(&self, m: usize, slice: &[f32]) -> usize {
        let mut best = 0usize;
        let mut best_d2 = f32::INFINITY;
        for (k, centroid) in self.codebooks[m].iter().enumerate() {
            let d2 = vector::squared_l2(slice, centroid);
            if d2 < best_d2 {
                best_d2 = d2;
                best = k;
            }
        }
        best
    }

    /// Anisotropic encoding: initialize to the
    /// minimum-residual-norm centroid per subspace, then run up to 10
    /// rounds of coordinate descent swapping one subspace's code at a
    /// time for the best-improving alternative, stopping when a full
    /// round makes no change.
    ///
    /// `parallelResidualSum` is a single scalar shared across all `M`
    /// subspaces (the full-vector residual's projection onto the query
    /// direction decomposes additively over the disjoint subspace
    /// slices), so a candidate swap in subspace `m` changes the *global*
    /// sum, not just that subspace's own parallel component. `cost_delta`
    /// is evaluated against the updated global sum
    /// `(parallel_sum − old_m + candidate_m)²`, per spec §4.E, while the
    /// perpendicular-error term is tracked per subspace since it doesn't
    /// interact across subspaces.
    pub fn encode_anisotropic(&self, v: &[f32]) -> CoreResult<Vec<u8>> {
        let threshold = self
            .anisotropic_threshold
            .ok_or_else(|| CoreError::invalid_argument("quantizer was not trained with anisotropic weighting"))?;
        let centered = self.center(v)?;
        let dim = centered.len();
        let h = anisotropic_h_full(dim, threshold);
        let unit_dir = vector::normalize(&centered).unwrap_or_else(|_| vec![0.0; dim]);

        let mut code = vec![0u8; self.m];
        let mut parallel_m = vec![0.0f32; self.m];
        let mut residual_sq_m = vec![0.0f32; self.m];

        for m in 0..self.m {
            let offset = self.subvector_offsets[m];
            let size = self.subvector_sizes[m];
            let v_slice = &centered[offset..offset + size];
            let mut best = 0usize;
            let mut best_norm = f32::INFINITY;
            for (k, centroid) in self.codebooks[m].iter().enumerate() {
                let n = vector::squared_l2(v_slice, centroid);
                if n < best_norm {
                    best_norm = n;
                    best = k;
                }
            }
            code[m] = best as u8;
            let residual = vector::sub(v_slice, &self.codebooks[m][best]);
            let dir_slice = &unit_dir[offset..offset + size];
            parallel_m[m] = vector::dot(&residual, dir_slice);
            residual_sq_m[m] = vector::dot(&residual, &residual);
        }

        let mut parallel_sum: f32 = parallel_m.iter().sum();

        for _round in 0..10 {
            let mut changed = false;
            for m in 0..self.m {
                let offset = self.subvector_offsets[m];
                let size = self.subvector_sizes[m];
                let v_slice = &centered[offset..offset + size];
                let dir_slice = &unit_dir[offset..offset + size];

                let old_parallel = parallel_m[m];
                let old_residual_sq = residual_sq_m[m];
                let old_sum = parallel_sum;

                let mut best_k = code[m];
                let mut best_cost_delta = 0.0f32;
                let mut best_parallel = old_parallel;
                let mut best_residual_sq = old_residual_sq;

                for (k, centroid) in self.codebooks[m].iter().enumerate() {
                    if k as u8 == code[m] {
                        continue;
                    }
                    let residual = vector::sub(v_slice, centroid);
                    let cand_parallel = vector::dot(&residual, dir_slice);
                    let cand_residual_sq = vector::dot(&residual, &residual);

                    let new_sum = old_sum - old_parallel + cand_parallel;
                    let parallel_delta = cand_parallel * cand_parallel - old_parallel * old_parallel;
                    let residual_delta = cand_residual_sq - old_residual_sq;
                    let cost_delta = h * (new_sum * new_sum - old_sum * old_sum) + (residual_delta - parallel_delta);

                    if cost_delta < best_cost_delta - 1e-9 {
                        best_cost_delta = cost_delta;
                        best_k = k as u8;
                        best_parallel = cand_parallel;
                        best_residual_sq = cand_residual_sq;
                    }
                }
                if best_k != code[m] {
                    code[m] = best_k;
                    parallel_sum = old_sum - old_parallel + best_parallel;
                    parallel_m[m] = best_parallel;
                    residual_sq_m[m] = best_residual_sq;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        Ok(code)
    }

    /// Decodes a code back to an approximate full vector.
    pub fn decode(&self, code: &[u8]) -> CoreResult<Vec<f32>> {
        if code.len() != self.m {
            return Err(CoreError::invalid_argument(format!(
                "code length {} does not match M ({})",
                code.len(),
                self.m
            )));
        }
        let mut out = Vec::with_capacity(self.dimension());
        for m in 0..self.m {
            let c = code[m] as usize;
            if c >= self.k {
                return Err(CoreError::corruption(format!("code {c} out of range for K={}", self.k)));
            }
            out.extend_from_slice(&self.codebooks[m][c]);
        }
        if let Some(g) = &self.global_centroid {
            out = out.iter().zip(g.iter()).map(|(a, b)| a + b).collect();
        }
        Ok(out)
    }

    /// Builds a raw (`f32`) ADC table for `query` under `similarity`
    ///. `similarity == Cosine` assumes the caller has already
    /// L2-normalized both the query and the training vectors — the same
    /// normalize-at-insert convention that turns cosine similarity into a
    /// plain dot product at insertion time elsewhere in the crate.
    pub fn build_adc_table(&self, query: &[f32], similarity: Similarity) -> CoreResult<AdcTable> {
        let centered = self.center(query)?;
        let mut data = vec![0.0f32; self.m * self.k];
        for m in 0..self.m {
            let offset = self.subvector_offsets[m];
            let size = self.subvector_sizes[m];
            let slice = &centered[offset..offset + size];
            for (k, centroid) in self.codebooks[m].iter().enumerate() {
                let partial = match similarity {
                    Similarity::DotProduct | Similarity::Cosine => vector::dot(slice, centroid),
                    Similarity::Euclidean => vector::squared_l2(slice, centroid),
                };
                data[m * self.k + k] = partial;
            }
        }
        Ok(AdcTable {
            m: self.m,
            k: self.k,
            data,
            similarity,
        })
    }
}

fn anisotropic_h_full(dim: usize, threshold: f32) -> f32 {
    if threshold <= UNWEIGHTED {
        return 1.0;
    }
    let d = dim as f32;
    let t2 = threshold * threshold;
    (d - 1.0) * t2 / (1.0 - t2)
}

/// A precomputed `M x K` table of raw partial scores for asymmetric
/// distance computation (ADC). `score` sums the `M` relevant lookups and
/// composes them into the requested similarity's "higher is better"
/// convention.
#[derive(Debug, Clone)]
pub struct AdcTable {
    pub m: usize,
    pub k: usize,
    data: Vec<f32>,
    similarity: Similarity,
}

impl AdcTable {
    pub fn score(&self, code: &[u8]) -> f32 {
        let raw: f32 = code
            .iter()
            .enumerate()
            .map(|(m, &c)| self.data[m * self.k + c as usize])
            .sum();
        match self.similarity {
            Similarity::DotProduct | Similarity::Cosine => raw,
            Similarity::Euclidean => 1.0 / (1.0 + raw),
        }
    }

    /// Quantizes this table to 16-bit fixed point: per-subspace base
    /// (the best — i.e. most-similar — raw value in that row) and one
    /// delta shared across all subspaces
    pub fn quantize_16bit(&self) -> QuantizedAdcTable {
        let better = |a: f32, b: f32| match self.similarity {
            Similarity::Euclidean => a < b, // lower raw squared-L2 is better
            _ => a > b,                     // higher raw dot product is better
        };

        let mut bases = vec![0.0f32; self.m];
        for m in 0..self.m {
            let row = &self.data[m * self.k..(m + 1) * self.k];
            let mut best = row[0];
            for &v in &row[1..] {
                if better(v, best) {
                    best = v;
                }
            }
            bases[m] = best;
        }

        let mut max_gap = 0.0f32;
        for m in 0..self.m {
            let row = &self.data[m * self.k..(m + 1) * self.k];
            for &v in row {
                max_gap = max_gap.max((v - bases[m]).abs());
            }
        }
        let delta = if max_gap <= 0.0 { 1.0 } else { max_gap / u16::MAX as f32 };

        let codes: Vec<u16> = (0..self.m * self.k)
            .map(|i| {
                let m = i / self.k;
                let diff = (self.data[i] - bases[m]).abs();
                (diff / delta).round().clamp(0.0, u16::MAX as f32) as u16
            })
            .collect();

        QuantizedAdcTable {
            m: self.m,
            k: self.k,
            bases,
            delta,
            codes,
            similarity: self.similarity,
        }
    }
}

/// 16-bit fixed-point ADC table. Stored as little-endian
/// `u16` codes per §6's wire-interop convention for table payloads.
#[derive(Debug, Clone)]
pub struct QuantizedAdcTable {
    pub m: usize,
    pub k: usize,
    pub bases: Vec<f32>,
    pub delta: f32,
    pub codes: Vec<u16>,
    similarity: Similarity,
}

impl QuantizedAdcTable {
    pub fn score(&self, code: &[u8]) -> f32 {
        let raw: f32 = code
            .iter()
            .enumerate()
            .map(|(m, &c)| {
                let diff = self.codes[m * self.k + c as usize] as f32 * self.delta;
                self.bases[m] + if self.better_is_higher() { -diff } else { diff }
            })
            .sum();
        match self.similarity {
            Similarity::DotProduct | Similarity::Cosine => raw,
            Similarity::Euclidean => 1.0 / (1.0 + raw),
        }
    }

    fn better_is_higher(&self) -> bool {
        !matches!(self.similarity, Similarity::Euclidean)
    }
}

// ---- Serialization ----

impl ProductQuantizer {
    /// Writes the current (version-3) wire format.
    pub fn write_to<W: Write>(&self, w: &mut W) -> CoreResult<()> {
        w.write_i32::<BigEndian>(MAGIC)?;
        w.write_i32::<BigEndian>(CURRENT_VERSION)?;

        let gc_len = self.global_centroid.as_ref().map_or(0, |g| g.len());
        w.write_i32::<BigEndian>(gc_len as i32)?;
        if let Some(g) = &self.global_centroid {
            for &x in g {
                w.write_f32::<BigEndian>(x)?;
            }
        }

        w.write_i32::<BigEndian>(self.m as i32)?;
        for &s in &self.subvector_sizes {
            w.write_i32::<BigEndian>(s as i32)?;
        }

        w.write_f32::<BigEndian>(self.anisotropic_threshold.unwrap_or(UNWEIGHTED))?;

        w.write_i32::<BigEndian>(self.k as i32)?;
        for m in 0..self.m {
            for c in 0..self.k {
                for &x in &self.codebooks[m][c] {
                    w.write_f32::<BigEndian>(x)?;
                }
            }
        }
        Ok(())
    }

    /// Reads either the version-3 layout (magic-prefixed) or the legacy
    /// version-0 layout (no magic, no version, no anisotropic
    /// threshold), probing the first word
    pub fn read_from<R: Read>(r: &mut R) -> CoreResult<Self> {
        let first = r.read_i32::<BigEndian>()?;

        let (version, gc_len) = if first == MAGIC {
            let version = r.read_i32::<BigEndian>()?;
            if version != CURRENT_VERSION && version != 0 {
                return Err(CoreError::unsupported_format(format!("unknown PQ version {version}")));
            }
            let gc_len = r.read_i32::<BigEndian>()?;
            (version, gc_len)
        } else {
            (0, first)
        };

        if gc_len < 0 {
            return Err(CoreError::corruption("negative globalCentroidLen"));
        }
        let mut global_centroid = None;
        if gc_len > 0 {
            let mut g = Vec::with_capacity(gc_len as usize);
            for _ in 0..gc_len {
                g.push(r.read_f32::<BigEndian>()?);
            }
            global_centroid = Some(g);
        }

        let m = r.read_i32::<BigEndian>()?;
        if m <= 0 {
            return Err(CoreError::corruption("non-positive M"));
        }
        let m = m as usize;
        let mut subvector_sizes = Vec::with_capacity(m);
        for _ in 0..m {
            let s = r.read_i32::<BigEndian>()?;
            if s <= 0 {
                return Err(CoreError::corruption("non-positive subspace size"));
            }
            subvector_sizes.push(s as usize);
        }

        let anisotropic_threshold = if version >= 3 {
            let t = r.read_f32::<BigEndian>()?;
            if t > UNWEIGHTED { Some(t) } else { None }
        } else {
            None
        };

        let k = r.read_i32::<BigEndian>()?;
        if k <= 0 {
            return Err(CoreError::corruption("non-positive K"));
        }
        let k = k as usize;

        let mut codebooks = Vec::with_capacity(m);
        for &size in &subvector_sizes {
            let mut book = Vec::with_capacity(k);
            for _ in 0..k {
                let mut centroid = Vec::with_capacity(size);
                for _ in 0..size {
                    centroid.push(r.read_f32::<BigEndian>()?);
                }
                book.push(centroid);
            }
            codebooks.push(book);
        }

        if let Some(g) = &global_centroid {
            let d: usize = subvector_sizes.iter().sum();
            if g.len() != d {
                return Err(CoreError::corruption("global centroid length does not match sum(subSizes)"));
            }
        }

        let subvector_offsets = offsets_from_sizes(&subvector_sizes);
        Ok(ProductQuantizer {
            m,
            k,
            subvector_sizes,
            subvector_offsets,
            global_centroid,
            codebooks,
            anisotropic_threshold,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_training_set() -> Vec<Vec<f32>> {
        // 256 distinct vectors of dimension 3, clustered tightly around
        // 4 well-separated points so K=256, M=2 can reconstruct exactly.
        let mut out = Vec::with_capacity(256);
        for i in 0..256u32 {
            let base = (i % 4) as f32 * 100.0;
            out.push(vec![base, base + (i as f32) * 0.001, base - (i as f32) * 0.001]);
        }
        out
    }

    #[test]
    fn subspace_sizes_distribute_remainder_to_first_subspaces() {
        assert_eq!(subspace_sizes(10, 3), vec![4, 3, 3]);
        assert_eq!(subspace_sizes(9, 3), vec![3, 3, 3]);
        assert_eq!(subspace_sizes(7, 2), vec![4, 3]);
    }

    #[test]
    fn perfect_reconstruction_when_vectors_are_centroids() {
        let data = tiny_training_set();
        let refs: Vec<&[f32]> = data.iter().map(|v| v.as_slice()).collect();
        let params = PqTrainParams {
            m: 2,
            k: 256,
            global_centering: false,
            anisotropic_threshold: None,
        };
        let pq = ProductQuantizer::train(&refs, &params, 1).unwrap();
        for v in &refs {
            let code = pq.encode(v).unwrap();
            let decoded = pq.decode(&code).unwrap();
            for (a, b) in decoded.iter().zip(v.iter()) {
                assert!((a - b).abs() < 1e-3, "{a} vs {b}");
            }
        }
    }

    #[test]
    fn m_greater_than_d_is_invalid_argument() {
        let data = tiny_training_set();
        let refs: Vec<&[f32]> = data.iter().map(|v| v.as_slice()).collect();
        let params = PqTrainParams {
            m: 10, // > D=3
            k: 4,
            global_centering: false,
            anisotropic_threshold: None,
        };
        let err = ProductQuantizer::train(&refs, &params, 1).unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument(_)));
    }

    #[test]
    fn k_greater_than_training_size_is_invalid_argument() {
        let data: Vec<Vec<f32>> = (0..10).map(|i| vec![i as f32, 0.0, 0.0]).collect();
        let refs: Vec<&[f32]> = data.iter().map(|v| v.as_slice()).collect();
        let params = PqTrainParams {
            m: 1,
            k: 20, // > 10 training vectors
            global_centering: false,
            anisotropic_threshold: None,
        };
        let err = ProductQuantizer::train(&refs, &params, 1).unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument(_)));
    }

    #[test]
    fn adc_consistent_with_direct_scoring_within_quantization_error() {
        let data = tiny_training_set();
        let refs: Vec<&[f32]> = data.iter().map(|v| v.as_slice()).collect();
        let params = PqTrainParams {
            m: 2,
            k: 256,
            global_centering: true,
            anisotropic_threshold: None,
        };
        let pq = ProductQuantizer::train(&refs, &params, 2).unwrap();

        let query = vec![50.0f32, 51.0, 49.0];
        let table = pq.build_adc_table(&query, Similarity::DotProduct).unwrap();
        for v in refs.iter().take(20) {
            let code = pq.encode(v).unwrap();
            let decoded = pq.decode(&code).unwrap();
            let direct = Similarity::DotProduct.score(&query, &decoded).unwrap();
            let adc = table.score(&code);
            assert!((direct - adc).abs() < 1e-1, "direct={direct} adc={adc}");
        }
    }

    #[test]
    fn quantized_16bit_table_tracks_raw_table_closely() {
        let data = tiny_training_set();
        let refs: Vec<&[f32]> = data.iter().map(|v| v.as_slice()).collect();
        let params = PqTrainParams {
            m: 2,
            k: 256,
            global_centering: false,
            anisotropic_threshold: None,
        };
        let pq = ProductQuantizer::train(&refs, &params, 3).unwrap();
        let query = vec![10.0f32, 10.0, 10.0];
        let table = pq.build_adc_table(&query, Similarity::DotProduct).unwrap();
        let q16 = table.quantize_16bit();

        for v in refs.iter().take(20) {
            let code = pq.encode(v).unwrap();
            let raw = table.score(&code);
            let quantized = q16.score(&code);
            assert!((raw - quantized).abs() < 1.0, "raw={raw} q16={quantized}");
        }
    }

    #[test]
    fn anisotropic_encoding_produces_valid_codes_and_adc_scores() {
        let data = tiny_training_set();
        let refs: Vec<&[f32]> = data.iter().map(|v| v.as_slice()).collect();
        let params = PqTrainParams {
            m: 2,
            k: 256,
            global_centering: false,
            anisotropic_threshold: Some(0.3),
        };
        let pq = ProductQuantizer::train(&refs, &params, 5).unwrap();
        assert!(pq.anisotropic_threshold.is_some());

        let query = vec![50.0f32, 51.0, 49.0];
        let table = pq.build_adc_table(&query, Similarity::DotProduct).unwrap();

        for v in refs.iter().take(20) {
            let code = pq.encode_anisotropic(v).unwrap();
            assert_eq!(code.len(), pq.m);
            for &c in &code {
                assert!((c as usize) < pq.k);
            }
            // The anisotropic code must stay a finite, scoreable code.
            let adc = table.score(&code);
            assert!(adc.is_finite());
        }

        // Exact centroids: the anisotropic search's initial min-residual-norm
        // seed is already optimal, so the coordinate descent leaves it alone
        // and anisotropic encoding still reconstructs exactly.
        for v in refs.iter() {
            let code = pq.encode_anisotropic(v).unwrap();
            let decoded = pq.decode(&code).unwrap();
            for (a, b) in decoded.iter().zip(v.iter()) {
                assert!((a - b).abs() < 1e-3, "{a} vs {b}");
            }
        }
    }

    #[test]
    fn encode_anisotropic_without_training_flag_is_invalid_argument() {
        let data = tiny_training_set();
        let refs: Vec<&[f32]> = data.iter().map(|v| v.as_slice()).collect();
        let params = PqTrainParams {
            m: 2,
            k: 256,
            global_centering: false,
            anisotropic_threshold: None,
        };
        let pq = ProductQuantizer::train(&refs, &params, 6).unwrap();
        let err = pq.encode_anisotropic(&refs[0]).unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument(_)));
    }

    #[test]
    fn roundtrip_version3_serialization() {
        let data = tiny_training_set();
        let refs: Vec<&[f32]> = data.iter().map(|v| v.as_slice()).collect();
        let params = PqTrainParams {
            m: 2,
            k: 256,
            global_centering: true,
            anisotropic_threshold: Some(0.3),
        };
        let pq = ProductQuantizer::train(&refs, &params, 4).unwrap();

        let mut buf = Vec::new();
        pq.write_to(&mut buf).unwrap();
        let loaded = ProductQuantizer::read_from(&mut buf.as_slice()).unwrap();

        assert_eq!(loaded.m, pq.m);
        assert_eq!(loaded.k, pq.k);
        assert_eq!(loaded.subvector_sizes, pq.subvector_sizes);
        assert!((loaded.anisotropic_threshold.unwrap() - 0.3).abs() < 1e-6);
        for v in refs.iter().take(5) {
            assert_eq!(pq.encode(v).unwrap(), loaded.encode(v).unwrap());
        }
    }

    #[test]
    fn reads_legacy_version0_layout() {
        // Hand-roll a version-0 buffer: globalCentroidLen, M, subSizes, K, codebooks.
        // No magic, no version, no anisoThreshold.
        let mut buf = Vec::new();
        buf.write_i32::<BigEndian>(0).unwrap(); // globalCentroidLen = 0
        buf.write_i32::<BigEndian>(1).unwrap(); // M = 1
        buf.write_i32::<BigEndian>(2).unwrap(); // subSizes[0] = 2
        buf.write_i32::<BigEndian>(2).unwrap(); // K = 2
        // codebook[0]: 2 centroids of length 2
        for v in [[1.0f32, 2.0], [3.0, 4.0]] {
            for x in v {
                buf.write_f32::<BigEndian>(x).unwrap();
            }
        }

        let pq = ProductQuantizer::read_from(&mut buf.as_slice()).unwrap();
        assert_eq!(pq.m, 1);
        assert_eq!(pq.k, 2);
        assert!(pq.anisotropic_threshold.is_none());
        assert_eq!(pq.codebooks[0][1], vec![3.0, 4.0]);
    }
}
