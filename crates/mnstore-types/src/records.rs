//! Chunk, peer and ranking records.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::ids::{ArtworkHash, ChunkId, PeerId};

/// A masternode known from the ledger's peer list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    pub identifier: PeerId,
    pub address: SocketAddr,
    pub active: bool,
}

impl Peer {
    pub fn new(identifier: PeerId, address: SocketAddr) -> Self {
        Self {
            identifier,
            address,
            active: true,
        }
    }
}

/// Lifecycle state of one chunk.
///
/// `confirmed` is set once the activation ticket that references the chunk
/// is committed; `indexed` once its distances to the known peers exist;
/// `stored` once the bytes are in persistent storage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub chunk_id: ChunkId,
    pub artwork_hash: ArtworkHash,
    pub indexed: bool,
    pub confirmed: bool,
    pub stored: bool,
    pub fetch_attempts: u32,
    /// Unix seconds of the last round in which no owner served the chunk.
    pub last_fetch_failure_at: Option<u64>,
}

impl ChunkRecord {
    pub fn new(chunk_id: ChunkId, artwork_hash: ArtworkHash, confirmed: bool) -> Self {
        Self {
            chunk_id,
            artwork_hash,
            indexed: false,
            confirmed,
            stored: false,
            fetch_attempts: 0,
            last_fetch_failure_at: None,
        }
    }
}

/// One row of the ranked ownership table. Ranks start at 1.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipRank {
    pub chunk_id: ChunkId,
    pub peer: PeerId,
    pub rank: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_record_defaults() {
        let rec = ChunkRecord::new(ChunkId::of(b"a"), ArtworkHash::of(b"art"), false);
        assert!(!rec.indexed);
        assert!(!rec.confirmed);
        assert!(!rec.stored);
        assert_eq!(rec.fetch_attempts, 0);
        assert!(rec.last_fetch_failure_at.is_none());
    }

    #[test]
    fn test_new_peer_is_active() {
        let addr: SocketAddr = "127.0.0.1:4444".parse().expect("addr");
        let peer = Peer::new(PeerId::from_bytes([1; 32]), addr);
        assert!(peer.active);
        assert_eq!(peer.address.port(), 4444);
    }
}
