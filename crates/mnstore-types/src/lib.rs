//! # mnstore-types
//!
//! Identifiers and records shared by every mnstore crate.

pub mod ids;
pub mod records;

pub use ids::{ArtworkHash, ChunkId, Distance, PeerId};
pub use records::{ChunkRecord, OwnershipRank, Peer};

/// Maximum size of a stored chunk (1 MiB).
pub const CHUNK_SIZE: usize = 1024 * 1024;

/// Number of peers expected to hold each chunk.
pub const DEFAULT_REPLICATION_FACTOR: usize = 15;

/// Number of missing chunks fetched per PeerFetcher round.
pub const DEFAULT_CHUNK_FETCH_PARALLELISM: usize = 15;

/// Fountain redundancy used when ingesting an artifact.
pub const DEFAULT_REDUNDANCY_FACTOR: u32 = 10;

/// Seconds a chunk is skipped after every owner failed to serve it.
pub const DEFAULT_REFETCH_COOLDOWN_SECS: u64 = 60;

/// Failed fetches after which a chunk is no longer scheduled.
pub const DEFAULT_MAX_FETCH_ATTEMPTS: u32 = 1000;

/// Length of the byte range checked by the spot-check auditor.
pub const AUDIT_RANGE_LEN: usize = 1024;

/// Errors parsing identifiers.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TypesError {
    /// Not a hexadecimal string.
    #[error("invalid hex: {0}")]
    InvalidHex(String),

    /// Decoded to the wrong number of bytes.
    #[error("invalid length: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

pub type Result<T> = std::result::Result<T, TypesError>;
