//! # mnstore-fountain
//!
//! Luby Transform fountain coding for artifacts.
//!
//! An artifact is split into `K` source blocks. `encode` emits a stream of
//! encoded blocks, each the XOR of a pseudo-randomly chosen subset of source
//! blocks; the subset is fully determined by the block's seed. Any large
//! enough subset of the encoded blocks reconstructs the artifact.
//!
//! ## Modules
//!
//! - [`soliton`]: Robust Soliton degree distribution and the seeded PRNG
//! - [`block`]: encoded block header layout
//! - [`codec`]: `encode`, `decode` and block-set inspection
//! - [`graph`]: belief-propagation peeling decoder

pub mod block;
pub mod codec;
pub mod graph;
pub mod soliton;

pub use block::{EncodedBlock, HEADER_LEN};
pub use codec::{decode, encode, seeds, verify_blocks, FountainCodec};

/// Upper bound on source blocks accepted from a block header.
///
/// Headers come from untrusted peers; this stops a forged geometry from
/// allocating an unbounded degree table.
pub const MAX_SOURCE_BLOCKS: usize = 1 << 20;

/// Error types for fountain coding.
#[derive(Debug, thiserror::Error)]
pub enum FountainError {
    /// The blocks supplied do not resolve every source block.
    #[error("not enough blocks to reconstruct: resolved {resolved} of {required}")]
    NotEnoughChunks { resolved: usize, required: usize },

    /// A block is shorter than its header says, or the header is invalid.
    #[error("block parse error: {0}")]
    BlockParse(String),

    /// Encoder arguments cannot produce a valid block set.
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    /// A block set mixes geometries or repeats seeds.
    #[error("inconsistent blocks: {0}")]
    InconsistentBlocks(String),
}

pub type Result<T> = std::result::Result<T, FountainError>;
