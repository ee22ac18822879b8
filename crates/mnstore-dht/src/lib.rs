//! # mnstore-dht
//!
//! XOR-distance chunk ownership.
//!
//! Every peer has a position on a 512-bit ring (`SHA-512` of its
//! identifier). The owners of a chunk are the `replication_factor` peers
//! whose ring position is closest to the chunk id under the XOR metric.
//!
//! ## Key Parameters
//!
//! | Parameter | Value |
//! |---|---|
//! | Key space | 512 bits |
//! | Replication factor | 15 |
//! | Peer ring position | `SHA-512(identifier)` |
//! | Equal-distance order | ascending peer identifier |

pub mod ownership;

pub use ownership::{OwnershipIndex, SharedOwnershipIndex};

pub use mnstore_types::DEFAULT_REPLICATION_FACTOR as REPLICATION_FACTOR;

/// Error types for ownership ranking.
#[derive(Debug, thiserror::Error)]
pub enum DhtError {
    /// A replication factor of zero ranks nobody.
    #[error("invalid replication factor: {0}")]
    InvalidReplicationFactor(usize),
}

pub type Result<T> = std::result::Result<T, DhtError>;
