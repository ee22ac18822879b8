//! # mnstore-storage
//!
//! On-disk content-addressed chunk store.
//!
//! ## Layout
//!
//! ```text
//! <base>/
//! └── abc/
//!     └── def/
//!         └── abcdef0123...   # full hex chunk id
//! ```
//!
//! A node keeps two independent stores with this layout: a temporary one
//! for chunks whose ticket is not confirmed yet and a persistent one.

pub mod store;

pub use store::{ChunkIndex, ChunkStore};

use mnstore_types::ChunkId;

/// Default permission bits for store directories.
pub const DEFAULT_DIR_MODE: u32 = 0o700;

/// Error types for chunk storage.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// No chunk is stored under this id.
    #[error("chunk not found: {0}")]
    NotFound(ChunkId),

    /// Filesystem failure.
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The tree contains something that is not a shard directory or chunk file.
    #[error("invalid entry in chunk store: {0}")]
    InvalidEntry(String),

    /// Stored bytes do not hash to their id.
    #[error("hash mismatch for chunk {0}")]
    HashMismatch(ChunkId),
}

pub type Result<T> = std::result::Result<T, StorageError>;
