//! # mnstore-node
//!
//! Chunk replication for one masternode.
//!
//! - **Manager** ([`manager`]): chunk lifecycle from temporary storage to
//!   persistent storage, missing-chunk bookkeeping, ownership index upkeep
//! - **Service** ([`service`]): answers `FETCHCHUNK` and `SPOTCHECK` requests
//! - **Fetcher** ([`fetcher`]): pulls missing chunks from their ranked owners
//! - **Auditor** ([`auditor`]): spot-checks other owners of local chunks
//! - **Ledger** ([`ledger`]): peer list and confirmed tickets from the chain
//! - **Tasks** ([`tasks`]): periodic background loops
//!
//! ## Lifecycle of a chunk
//!
//! ```text
//! ingest ──> temp store ──(ticket confirmed)──> persistent store
//!                                                    ^
//! ticket intake ──> record ──> index ──> fetcher ────┘
//! ```

pub mod auditor;
pub mod fetcher;
pub mod ledger;
pub mod manager;
pub mod node;
pub mod params;
pub mod service;
pub mod tasks;

#[cfg(test)]
mod testing;

pub use auditor::{AuditReport, Discrepancy, SpotCheckAuditor};
pub use fetcher::{FetchRound, PeerFetcher};
pub use ledger::{ConfirmedTicket, LedgerClient, PeerListing, StaticLedger};
pub use manager::{ChunkManager, IngestedArtifact, PeerDiff, ReconcileSummary};
pub use node::MasterNode;
pub use params::{ReplicationParams, TaskIntervals};
pub use service::ReplicationService;

use mnstore_types::ChunkId;

/// Error types for node operations.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error(transparent)]
    Storage(#[from] mnstore_storage::StorageError),

    #[error(transparent)]
    Db(#[from] mnstore_db::DbError),

    #[error(transparent)]
    Dht(#[from] mnstore_dht::DhtError),

    #[error(transparent)]
    Fountain(#[from] mnstore_fountain::FountainError),

    #[error(transparent)]
    Transport(#[from] mnstore_transport::TransportError),

    /// Bytes do not hash to the chunk id they were offered under.
    #[error("hash mismatch for chunk {}", .0.short())]
    HashMismatch(ChunkId),

    /// The chunk's ticket is not confirmed yet.
    #[error("chunk {} is not confirmed", .0.short())]
    NotConfirmed(ChunkId),

    /// No record exists for the chunk.
    #[error("unknown chunk {}", .0.short())]
    UnknownChunk(ChunkId),

    #[error("ledger error: {0}")]
    Ledger(String),

    /// A blocking worker panicked or was cancelled.
    #[error("worker task failed: {0}")]
    Task(String),
}

pub type Result<T> = std::result::Result<T, NodeError>;

/// Current Unix time in seconds.
pub(crate) fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Run blocking work (hashing, disk I/O, fountain coding) off the runtime.
pub(crate) async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| NodeError::Task(e.to_string()))?
}
