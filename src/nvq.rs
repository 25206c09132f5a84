//! Non-uniform Vector Quantization.
//!
//! Unlike PQ's codebook lookup, NVQ is a per-subvector *scalar* quantizer:
//! each subvector's elements are warped through a fitted logistic curve
//! before being rounded to `bits`-wide bins. The warp lets a small number
//! of bins spend most of their resolution where values actually cluster,
//! the same bet a plain `normalize_vec` makes when it assumes inputs live
//! near the unit sphere — here the assumption is relaxed to "near some
//! per-subvector [min, max] range" and the curve's shape is fit rather
//! than assumed.

use crate::error::{CoreError, CoreResult};
use crate::pq::subspace_sizes;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// NVQ's midpoint parameter is fixed at 0 as a normative invariant: some
/// implementations learn a midpoint internally but always serialize it
/// as 0, so this one skips learning it in the first place.
pub const MIDPOINT: f32 = 0.0;

const CURRENT_VERSION: i32 = 1;

/// `1 / (1 + e^{-r(x - midpoint)})`, rescaled to `[0, 1]` by construction
/// since the caller always feeds normalized `x`.
fn logistic(x: f32, r: f32, midpoint: f32) -> f32 {
    1.0 / (1.0 + (-r * (x - midpoint)).exp())
}

/// Inverse of [`logistic`]: `midpoint - ln(1/p - 1) / r`.
fn logit(p: f32, r: f32, midpoint: f32) -> f32 {
    let p = p.clamp(1e-6, 1.0 - 1e-6);
    midpoint - (1.0 / p - 1.0).ln() / r
}

/// One fitted, packed subvector.
#[derive(Debug, Clone)]
pub struct NvqSubvector {
    pub bits_per_dim: u8,
    pub min_value: f32,
    pub max_value: f32,
    pub growth_rate: f32,
    pub midpoint: f32,
    pub original_dim: usize,
    pub packed: Vec<u8>,
}

impl NvqSubvector {
    fn levels(&self) -> f32 {
        (1u32 << self.bits_per_dim) as f32 - 1.0
    }

    fn range(&self) -> f32 {
        (self.max_value - self.min_value).max(1e-10)
    }

    /// Reads the `i`-th packed code (0-indexed within this subvector).
    fn read_code(&self, i: usize) -> u32 {
        match self.bits_per_dim {
            8 => self.packed[i] as u32,
            4 => {
                let byte = self.packed[i / 2];
                if i % 2 == 0 {
                    (byte & 0x0F) as u32
                } else {
                    (byte >> 4) as u32
                }
            }
            other => unreachable!("unsupported bits_per_dim {other}"),
        }
    }

    pub fn decode(&self) -> Vec<f32> {
        let levels = self.levels();
        (0..self.original_dim)
            .map(|i| {
                let code = self.read_code(i);
                let p = code as f32 / levels;
                let normalized = logit(p, self.growth_rate, self.midpoint);
                normalized * self.range() + self.min_value
            })
            .collect()
    }
}

/// A full NVQ-compressed vector: the global mean (if subtracted during
/// training) plus one [`NvqSubvector`] per subspace.
#[derive(Debug, Clone)]
pub struct NvqVector {
    pub subvectors: Vec<NvqSubvector>,
}

/// Shared quantizer configuration used to encode every vector —
/// subspace layout and whether growth-rate learning runs per vector.
#[derive(Debug, Clone)]
pub struct NvqParams {
    pub m: usize,
    pub bits_per_dim: u8,
    pub learn_growth_rate: bool,
    pub global_mean: Option<Vec<f32>>,
}

impl Default for NvqParams {
    fn default() -> Self {
        Self {
            m: 8,
            bits_per_dim: 8,
            learn_growth_rate: true,
            global_mean: None,
        }
    }
}

/// Computes the mean of `vectors`, for use as `NvqParams::global_mean`.
pub fn compute_global_mean(vectors: &[&[f32]]) -> CoreResult<Vec<f32>> {
    if vectors.is_empty() {
        return Err(CoreError::invalid_argument("cannot compute mean of zero vectors"));
    }
    let d = vectors[0].len();
    let mut mean = vec![0.0f32; d];
    for v in vectors {
        if v.len() != d {
            return Err(CoreError::invalid_argument("all vectors must share one dimension"));
        }
        for (m, x) in mean.iter_mut().zip(v.iter()) {
            *m += x;
        }
    }
    let n = vectors.len() as f32;
    for m in mean.iter_mut() {
        *m /= n;
    }
    Ok(mean)
}

/// Uniform (unwarped, `bits`-bit linear) quantization loss, the baseline
/// the growth-rate search tries to beat.
fn uniform_loss(v: &[f32], min_value: f32, max_value: f32, bits: u8) -> f64 {
    let levels = (1u32 << bits) as f32 - 1.0;
    let range = (max_value - min_value).max(1e-10);
    v.iter()
        .map(|&x| {
            let normalized = ((x - min_value) / range).clamp(0.0, 1.0);
            let code = (normalized * levels).round();
            let decoded = code / levels * range + min_value;
            ((x - decoded) as f64).powi(2)
        })
        .sum()
}

fn nvq_loss(v: &[f32], min_value: f32, max_value: f32, bits: u8, r: f32, midpoint: f32) -> f64 {
    let levels = (1u32 << bits) as f32 - 1.0;
    let range = (max_value - min_value).max(1e-10);
    v.iter()
        .map(|&x| {
            let normalized = ((x - min_value) / range).clamp(0.0, 1.0);
            let warped = logistic(normalized, r, midpoint);
            let code = (warped * levels).round().clamp(0.0, levels);
            let p = code / levels;
            let unwarped = logit(p, r, midpoint);
            let decoded = unwarped * range + min_value;
            ((x - decoded) as f64).powi(2)
        })
        .sum()
}

/// Coarse-then-fine growth-rate search maximizing
/// `uniformLoss / nvqLoss`.
fn search_growth_rate(v: &[f32], min_value: f32, max_value: f32, bits: u8) -> f32 {
    let uloss = uniform_loss(v, min_value, max_value, bits).max(1e-12);

    let ratio = |r: f32| -> f64 {
        let nloss = nvq_loss(v, min_value, max_value, bits, r, MIDPOINT).max(1e-12);
        uloss / nloss
    };

    let mut best_r = 1e-6f32;
    let mut best_ratio = ratio(best_r);
    let mut r = 1e-6f32;
    while r <= 20.0 {
        let cand = ratio(r);
        if cand > best_ratio {
            best_ratio = cand;
            best_r = r;
        }
        r += 1.0;
    }

    let fine_lo = (best_r - 1.0).max(1e-6);
    let fine_hi = best_r + 1.0;
    let mut r = fine_lo;
    while r <= fine_hi {
        let cand = ratio(r);
        if cand > best_ratio {
            best_ratio = cand;
            best_r = r;
        }
        r += 0.1;
    }

    best_r
}

fn pack(codes: &[u32], bits: u8) -> Vec<u8> {
    match bits {
        8 => codes.iter().map(|&c| c as u8).collect(),
        4 => {
            let mut out = vec![0u8; codes.len().div_ceil(2)];
            for (i, &c) in codes.iter().enumerate() {
                let nibble = (c & 0x0F) as u8;
                if i % 2 == 0 {
                    out[i / 2] |= nibble;
                } else {
                    out[i / 2] |= nibble << 4;
                }
            }
            out
        }
        other => panic!("unsupported bits_per_dim {other}"),
    }
}

/// Encodes `v` against `params`. `v` must already be full
/// dimension; the global mean, if configured, is subtracted internally.
pub fn encode(v: &[f32], params: &NvqParams) -> CoreResult<NvqVector> {
    if let Some(g) = &params.global_mean {
        if g.len() != v.len() {
            return Err(CoreError::invalid_argument("global mean dimension mismatch"));
        }
    }
    if params.bits_per_dim != 4 && params.bits_per_dim != 8 {
        return Err(CoreError::invalid_argument("bits_per_dim must be 4 or 8"));
    }
    if params.m == 0 || params.m > v.len() {
        return Err(CoreError::invalid_argument("M must be in 1..=D"));
    }

    let centered: Vec<f32> = match &params.global_mean {
        Some(g) => v.iter().zip(g.iter()).map(|(a, b)| a - b).collect(),
        None => v.to_vec(),
    };

    let sizes = subspace_sizes(centered.len(), params.m);
    let mut offset = 0;
    let mut subvectors = Vec::with_capacity(params.m);

    for &size in &sizes {
        let slice = &centered[offset..offset + size];
        offset += size;

        let min_value = slice.iter().copied().fold(f32::INFINITY, f32::min);
        let max_value = slice.iter().copied().fold(f32::NEG_INFINITY, f32::max);

        let growth_rate = if params.learn_growth_rate {
            search_growth_rate(slice, min_value, max_value, params.bits_per_dim)
        } else {
            1.0
        };

        let range = (max_value - min_value).max(1e-10);
        let levels = (1u32 << params.bits_per_dim) as f32 - 1.0;
        let codes: Vec<u32> = slice
            .iter()
            .map(|&x| {
                let normalized = ((x - min_value) / range).clamp(0.0, 1.0);
                let warped = logistic(normalized, growth_rate, MIDPOINT);
                (warped * levels).round().clamp(0.0, levels) as u32
            })
            .collect();

        subvectors.push(NvqSubvector {
            bits_per_dim: params.bits_per_dim,
            min_value,
            max_value,
            growth_rate,
            midpoint: MIDPOINT,
            original_dim: size,
            packed: pack(&codes, params.bits_per_dim),
        });
    }

    Ok(NvqVector { subvectors })
}

impl NvqVector {
    /// Decodes back to a full-dimension vector, re-adding `global_mean`
    /// if one was supplied at encode time.
    pub fn decode(&self, global_mean: Option<&[f32]>) -> Vec<f32> {
        let mut out = Vec::new();
        for sub in &self.subvectors {
            out.extend(sub.decode());
        }
        if let Some(g) = global_mean {
            for (o, m) in out.iter_mut().zip(g.iter()) {
                *o += m;
            }
        }
        out
    }

    /// Dot product between this packed code and a plain query vector,
    /// decoding each subvector's bytes on the fly rather than
    /// materializing the full decoded vector.
    pub fn dot(&self, query: &[f32], global_mean: Option<&[f32]>) -> f32 {
        let mut total = 0.0f32;
        let mut offset = 0;
        for sub in &self.subvectors {
            let decoded = sub.decode();
            let q_slice = &query[offset..offset + sub.original_dim];
            let mean_slice = global_mean.map(|g| &g[offset..offset + sub.original_dim]);
            for (i, &d) in decoded.iter().enumerate() {
                let recon = d + mean_slice.map_or(0.0, |m| m[i]);
                total += recon * q_slice[i];
            }
            offset += sub.original_dim;
        }
        total
    }

    pub fn squared_l2(&self, query: &[f32], global_mean: Option<&[f32]>) -> f32 {
        let decoded = self.decode(global_mean);
        decoded.iter().zip(query.iter()).map(|(a, b)| (a - b).powi(2)).sum()
    }

    pub fn cosine(&self, query: &[f32], global_mean: Option<&[f32]>) -> CoreResult<f32> {
        let decoded = self.decode(global_mean);
        crate::vector::Similarity::Cosine.score(query, &decoded)
    }
}

// ---- Serialization ----

impl NvqVector {
    pub fn write_to<W: Write>(&self, w: &mut W, global_mean: Option<&[f32]>) -> CoreResult<()> {
        w.write_i32::<BigEndian>(CURRENT_VERSION)?;
        let gm_len = global_mean.map_or(0, |g| g.len());
        w.write_i32::<BigEndian>(gm_len as i32)?;
        if let Some(g) = global_mean {
            for &x in g {
                w.write_f32::<BigEndian>(x)?;
            }
        }
        let bits = self.subvectors.first().map_or(8, |s| s.bits_per_dim);
        w.write_i32::<BigEndian>(bits as i32)?;
        w.write_i32::<BigEndian>(self.subvectors.len() as i32)?;
        for sub in &self.subvectors {
            w.write_i32::<BigEndian>(sub.original_dim as i32)?;
        }

        w.write_i32::<BigEndian>(self.subvectors.len() as i32)?;
        for sub in &self.subvectors {
            w.write_i32::<BigEndian>(sub.bits_per_dim as i32)?;
            w.write_f32::<BigEndian>(sub.min_value)?;
            w.write_f32::<BigEndian>(sub.max_value)?;
            w.write_f32::<BigEndian>(sub.growth_rate)?;
            w.write_f32::<BigEndian>(sub.midpoint)?;
            w.write_i32::<BigEndian>(sub.original_dim as i32)?;
            w.write_i32::<BigEndian>(sub.packed.len() as i32)?;
            w.write_all(&sub.packed)?;
        }
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> CoreResult<(Self, Option<Vec<f32>>)> {
        let version = r.read_i32::<BigEndian>()?;
        if version != CURRENT_VERSION {
            return Err(CoreError::unsupported_format(format!("unknown NVQ version {version}")));
        }
        let gm_len = r.read_i32::<BigEndian>()?;
        if gm_len < 0 {
            return Err(CoreError::corruption("negative globalMeanLen"));
        }
        let global_mean = if gm_len > 0 {
            let mut g = Vec::with_capacity(gm_len as usize);
            for _ in 0..gm_len {
                g.push(r.read_f32::<BigEndian>()?);
            }
            Some(g)
        } else {
            None
        };

        let _bits_per_dim = r.read_i32::<BigEndian>()?;
        let m = r.read_i32::<BigEndian>()?;
        if m <= 0 {
            return Err(CoreError::corruption("non-positive M"));
        }
        let m = m as usize;
        for _ in 0..m {
            let _size = r.read_i32::<BigEndian>()?;
        }

        let num_subvectors = r.read_i32::<BigEndian>()?;
        if num_subvectors as usize != m {
            return Err(CoreError::corruption("numSubvectors does not match M"));
        }

        let mut subvectors = Vec::with_capacity(m);
        for _ in 0..m {
            let bits_per_dim = r.read_i32::<BigEndian>()?;
            if bits_per_dim != 4 && bits_per_dim != 8 {
                return Err(CoreError::corruption("bitsPerDim must be 4 or 8"));
            }
            let min_value = r.read_f32::<BigEndian>()?;
            let max_value = r.read_f32::<BigEndian>()?;
            let growth_rate = r.read_f32::<BigEndian>()?;
            let midpoint = r.read_f32::<BigEndian>()?;
            let original_dim = r.read_i32::<BigEndian>()?;
            if original_dim <= 0 {
                return Err(CoreError::corruption("non-positive originalDim"));
            }
            let packed_len = r.read_i32::<BigEndian>()?;
            if packed_len < 0 {
                return Err(CoreError::corruption("negative packedLen"));
            }
            let expected_len = (original_dim as usize * bits_per_dim as usize).div_ceil(8);
            if packed_len as usize != expected_len {
                return Err(CoreError::corruption("packedLen does not match ceil(subDim*bitsPerDim/8)"));
            }
            let mut packed = vec![0u8; packed_len as usize];
            r.read_exact(&mut packed)?;

            subvectors.push(NvqSubvector {
                bits_per_dim: bits_per_dim as u8,
                min_value,
                max_value,
                growth_rate,
                midpoint,
                original_dim: original_dim as usize,
                packed,
            });
        }

        Ok((NvqVector { subvectors }, global_mean))
    }
}
