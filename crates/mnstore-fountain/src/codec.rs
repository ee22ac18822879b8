//! Encoding and decoding of whole artifacts.

use std::collections::HashSet;

use rand::Rng;
use tracing::{debug, warn};

use crate::block::{EncodedBlock, HEADER_LEN};
use crate::graph::BlockGraph;
use crate::soliton::{is_valid_seed, Prng};
use crate::{FountainError, Result};

/// Largest random initial seed.
const MAX_RANDOM_SEED: u32 = 1 << 30;

/// Encoder settings used by the chunk manager.
#[derive(Clone, Copy, Debug)]
pub struct FountainCodec {
    pub redundancy_factor: u32,
    /// Total encoded block size, header included.
    pub block_size: usize,
}

impl FountainCodec {
    pub fn new(redundancy_factor: u32, block_size: usize) -> Self {
        Self {
            redundancy_factor,
            block_size,
        }
    }

    pub fn encode(&self, data: &[u8], seeds: Option<&[u32]>) -> Result<Vec<Vec<u8>>> {
        encode(self.redundancy_factor, self.block_size, data, seeds)
    }

    pub fn decode<I, B>(&self, blocks: I) -> Result<Vec<u8>>
    where
        I: IntoIterator<Item = B>,
        B: AsRef<[u8]>,
    {
        decode(blocks)
    }
}

/// Encode `data` into `ceil(redundancy_factor * len / body_size)` blocks of
/// `block_size` bytes each, where `body_size = block_size - HEADER_LEN`.
///
/// With `seeds`, block `i` uses `seeds[i]` and the output is reproducible.
/// Without, one random seed starts a PRNG stream shared by all blocks.
pub fn encode(
    redundancy_factor: u32,
    block_size: usize,
    data: &[u8],
    seeds: Option<&[u32]>,
) -> Result<Vec<Vec<u8>>> {
    if data.is_empty() {
        return Err(FountainError::InvalidParameters("empty payload".into()));
    }
    if redundancy_factor == 0 {
        return Err(FountainError::InvalidParameters(
            "redundancy factor must be positive".into(),
        ));
    }
    if block_size <= HEADER_LEN {
        return Err(FountainError::InvalidParameters(format!(
            "block size {block_size} leaves no room after the {HEADER_LEN}-byte header"
        )));
    }
    let data_length = u32::try_from(data.len()).map_err(|_| {
        FountainError::InvalidParameters(format!("payload of {} bytes is too large", data.len()))
    })?;
    let body_size = block_size - HEADER_LEN;
    let total_blocks = (redundancy_factor as usize * data.len()).div_ceil(body_size);

    if let Some(seeds) = seeds {
        if seeds.len() < total_blocks {
            return Err(FountainError::InvalidParameters(format!(
                "{} seeds supplied, {total_blocks} blocks required",
                seeds.len()
            )));
        }
        if let Some(bad) = seeds.iter().find(|s| !is_valid_seed(**s)) {
            return Err(FountainError::InvalidParameters(format!("invalid seed {bad}")));
        }
    }

    let sources: Vec<Vec<u8>> = data
        .chunks(body_size)
        .map(|c| {
            let mut block = c.to_vec();
            block.resize(body_size, 0);
            block
        })
        .collect();

    let mut prng = Prng::new(sources.len())?;
    if seeds.is_none() {
        prng.set_seed(rand::thread_rng().gen_range(1..=MAX_RANDOM_SEED))?;
    }

    let mut blocks = Vec::with_capacity(total_blocks);
    for i in 0..total_blocks {
        let (seed, indices) = prng.source_blocks(seeds.map(|s| s[i]))?;
        let mut body = vec![0u8; body_size];
        for ix in indices {
            for (b, s) in body.iter_mut().zip(&sources[ix]) {
                *b ^= s;
            }
        }
        blocks.push(EncodedBlock::new(data_length, seed, body).to_bytes());
    }

    debug!(
        data_length,
        source_blocks = sources.len(),
        encoded_blocks = blocks.len(),
        "fountain encode complete"
    );
    Ok(blocks)
}

/// Reconstruct an artifact from encoded blocks.
///
/// Blocks that fail to parse, disagree with the first block's geometry or
/// fail their body hash are skipped with a warning. Decoding stops as soon
/// as every source block is resolved.
pub fn decode<I, B>(blocks: I) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = B>,
    B: AsRef<[u8]>,
{
    let mut state: Option<(EncodedBlock, Prng, BlockGraph)> = None;
    let mut required = 0;

    for (n, raw) in blocks.into_iter().enumerate() {
        let block = match EncodedBlock::parse(raw.as_ref()) {
            Ok(block) => block,
            Err(e) => {
                warn!(block = n, error = %e, "skipping unparseable block");
                continue;
            }
        };

        if !block.is_intact() {
            warn!(block = n, seed = block.seed, "skipping block with corrupted body");
            continue;
        }

        // The first intact block fixes the geometry.
        if state.is_none() {
            required = block.source_count();
            let prng = Prng::new(required)?;
            state = Some((block.clone(), prng, BlockGraph::new(required)));
        }
        let Some((geometry, prng, graph)) = state.as_mut() else {
            continue;
        };

        if !block.same_geometry(geometry) {
            warn!(block = n, "skipping block with mismatched geometry");
            continue;
        }

        let (_, sources) = prng.source_blocks(Some(block.seed))?;
        if graph.add_block(&sources, block.body) {
            break;
        }
    }

    let Some((geometry, _, graph)) = state else {
        return Err(FountainError::NotEnoughChunks {
            resolved: 0,
            required: 0,
        });
    };
    let resolved = graph.resolved_count();
    let sources = graph.into_sources().ok_or(FountainError::NotEnoughChunks {
        resolved,
        required,
    })?;

    let mut out = sources.concat();
    out.truncate(geometry.data_length as usize);
    Ok(out)
}

/// Seeds of every block, in order.
pub fn seeds<B: AsRef<[u8]>>(blocks: &[B]) -> Result<Vec<u32>> {
    blocks
        .iter()
        .map(|b| EncodedBlock::parse(b.as_ref()).map(|block| block.seed))
        .collect()
}

/// Check that every block parses, seeds are unique and all blocks share one
/// geometry.
pub fn verify_blocks<B: AsRef<[u8]>>(blocks: &[B]) -> Result<()> {
    let mut seeds = HashSet::new();
    let mut lengths = HashSet::new();
    let mut sizes = HashSet::new();
    for raw in blocks {
        let block = EncodedBlock::parse(raw.as_ref())?;
        seeds.insert(block.seed);
        lengths.insert(block.data_length);
        sizes.insert(block.block_size);
    }
    if seeds.len() != blocks.len() {
        return Err(FountainError::InconsistentBlocks(
            "number of seeds does not match number of blocks".into(),
        ));
    }
    if lengths.len() != 1 {
        return Err(FountainError::InconsistentBlocks(
            "data length is not the same across blocks".into(),
        ));
    }
    if sizes.len() != 1 {
        return Err(FountainError::InconsistentBlocks(
            "block size is not the same across blocks".into(),
        ));
    }
    Ok(())
}
