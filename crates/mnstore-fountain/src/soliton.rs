//! Robust Soliton degree distribution and the Park-Miller PRNG.
//!
//! The PRNG is the minimal-standard multiplicative LCG
//! (`state = 16807 * state mod 2^31 - 1`). A block's seed is the PRNG state
//! before its degree is sampled, so the decoder can replay the exact draw.

use std::collections::HashSet;

use crate::{FountainError, Result};

/// LCG multiplier.
pub const PRNG_A: u64 = 16807;

/// LCG modulus, `2^31 - 1`.
pub const PRNG_M: u64 = (1 << 31) - 1;

const PRNG_MAX_RAND: f64 = (PRNG_M - 1) as f64;

/// RSD tuning constant `c`.
const RSD_C: f64 = 0.1;

/// RSD failure probability bound `delta`.
const RSD_DELTA: f64 = 0.5;

/// True when `seed` can drive the PRNG. Multiples of the modulus collapse
/// the state to zero forever.
pub fn is_valid_seed(seed: u32) -> bool {
    u64::from(seed) % PRNG_M != 0
}

/// Cumulative Robust Soliton distribution over degrees `1..=k`.
fn robust_soliton_cdf(k: usize) -> Vec<f64> {
    let kf = k as f64;
    let s = RSD_C * (kf / RSD_DELTA).ln() * kf.sqrt();
    let pivot = (kf / s).floor() as usize;

    // Robust part: 1/d up to the pivot, the spike, then zeros out to k.
    let mut tau: Vec<f64> = (1..pivot).map(|d| s / kf / d as f64).collect();
    tau.push(s / kf * (s / RSD_DELTA).ln());
    tau.extend(std::iter::repeat(0.0).take(k.saturating_sub(pivot)));

    // Ideal soliton.
    let mut rho = Vec::with_capacity(k);
    rho.push(1.0 / kf);
    rho.extend((2..=k).map(|d| 1.0 / (d as f64 * (d as f64 - 1.0))));

    let normalizer: f64 = rho.iter().sum::<f64>() + tau.iter().sum::<f64>();

    let mut cdf = Vec::with_capacity(k);
    let mut acc = 0.0;
    for d in 0..k {
        acc += (rho[d] + tau.get(d).copied().unwrap_or(0.0)) / normalizer;
        cdf.push(acc);
    }
    cdf
}

/// Source-block sampler for a block set with `k` source blocks.
#[derive(Clone, Debug)]
pub struct Prng {
    k: usize,
    cdf: Vec<f64>,
    state: u64,
}

impl Prng {
    /// Build a sampler for `k >= 1` source blocks. The state starts at 1.
    pub fn new(k: usize) -> Result<Self> {
        if k == 0 {
            return Err(FountainError::InvalidParameters(
                "at least one source block is required".into(),
            ));
        }
        Ok(Self {
            k,
            cdf: robust_soliton_cdf(k),
            state: 1,
        })
    }

    pub fn set_seed(&mut self, seed: u32) -> Result<()> {
        if !is_valid_seed(seed) {
            return Err(FountainError::InvalidParameters(format!(
                "seed {seed} is a fixed point of the PRNG"
            )));
        }
        self.state = u64::from(seed);
        Ok(())
    }

    pub fn state(&self) -> u64 {
        self.state
    }

    fn next(&mut self) -> u64 {
        self.state = PRNG_A * self.state % PRNG_M;
        self.state
    }

    fn sample_degree(&mut self) -> usize {
        let p = self.next() as f64 / PRNG_MAX_RAND;
        self.cdf
            .iter()
            .position(|&v| v > p)
            .map_or(self.k, |ix| ix + 1)
    }

    /// Draw the source indices of the next block.
    ///
    /// With `Some(seed)` the state is reset first; with `None` the stream
    /// continues. Returns the seed that reproduces this draw and the
    /// distinct indices in draw order.
    pub fn source_blocks(&mut self, seed: Option<u32>) -> Result<(u32, Vec<usize>)> {
        if let Some(seed) = seed {
            self.set_seed(seed)?;
        }
        // State is always below PRNG_M < 2^31.
        let block_seed = self.state as u32;
        let degree = self.sample_degree();

        let mut seen = HashSet::with_capacity(degree);
        let mut indices = Vec::with_capacity(degree);
        while indices.len() < degree {
            let ix = (self.next() % self.k as u64) as usize;
            if seen.insert(ix) {
                indices.push(ix);
            }
        }
        Ok((block_seed, indices))
    }
}
