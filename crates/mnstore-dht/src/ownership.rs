//! Ownership index: raw distance table plus the materialized ranking.
//!
//! Distances are maintained incrementally. A new peer gets a distance to
//! every known chunk, a new chunk gets a distance to every known peer.
//! `rerank` sorts each chunk's distances and swaps in a fresh ranked table
//! in one step, so readers holding the lock never see a partial rebuild.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use mnstore_types::{ChunkId, Distance, OwnershipRank, PeerId};
use tokio::sync::RwLock;
use tracing::debug;

use crate::{DhtError, Result};

/// Index shared between the chunk manager, the fetcher and the RPC server.
pub type SharedOwnershipIndex = Arc<RwLock<OwnershipIndex>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct Entry {
    distance: Distance,
    peer: PeerId,
}

#[derive(Debug, Default)]
struct RankTable {
    /// Owners per chunk, closest first. Rank is position + 1.
    by_chunk: HashMap<ChunkId, Vec<PeerId>>,
    by_peer: HashMap<PeerId, BTreeSet<ChunkId>>,
}

/// Who must store what.
#[derive(Debug)]
pub struct OwnershipIndex {
    replication_factor: usize,
    peers: BTreeSet<PeerId>,
    distances: HashMap<ChunkId, Vec<Entry>>,
    ranked: RankTable,
}

impl OwnershipIndex {
    pub fn new(replication_factor: usize) -> Result<Self> {
        if replication_factor == 0 {
            return Err(DhtError::InvalidReplicationFactor(replication_factor));
        }
        Ok(Self {
            replication_factor,
            peers: BTreeSet::new(),
            distances: HashMap::new(),
            ranked: RankTable::default(),
        })
    }

    /// Wrap in the lock used by the node.
    pub fn shared(self) -> SharedOwnershipIndex {
        Arc::new(RwLock::new(self))
    }

    pub fn replication_factor(&self) -> usize {
        self.replication_factor
    }

    /// `SHA-512(peer) XOR chunk`.
    pub fn distance(peer: &PeerId, chunk: &ChunkId) -> Distance {
        Distance::between(peer, chunk)
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn chunk_count(&self) -> usize {
        self.distances.len()
    }

    pub fn contains_peer(&self, peer: &PeerId) -> bool {
        self.peers.contains(peer)
    }

    pub fn contains_chunk(&self, chunk: &ChunkId) -> bool {
        self.distances.contains_key(chunk)
    }

    /// Add an active peer and compute its distance to every known chunk.
    /// Returns false if the peer was already present.
    pub fn add_peer(&mut self, peer: PeerId) -> bool {
        if !self.peers.insert(peer) {
            return false;
        }
        for (chunk, entries) in self.distances.iter_mut() {
            entries.push(Entry {
                distance: Distance::between(&peer, chunk),
                peer,
            });
        }
        debug!(peer = %peer.short(), chunks = self.distances.len(), "peer added to ownership index");
        true
    }

    /// Drop a peer and all its distances. Returns false if it was unknown.
    pub fn remove_peer(&mut self, peer: &PeerId) -> bool {
        if !self.peers.remove(peer) {
            return false;
        }
        for entries in self.distances.values_mut() {
            entries.retain(|e| e.peer != *peer);
        }
        debug!(peer = %peer.short(), "peer removed from ownership index");
        true
    }

    /// Add a chunk and compute its distance to every known peer.
    /// Returns false if the chunk was already present.
    pub fn add_chunk(&mut self, chunk: ChunkId) -> bool {
        if self.distances.contains_key(&chunk) {
            return false;
        }
        let entries = self
            .peers
            .iter()
            .map(|peer| Entry {
                distance: Distance::between(peer, &chunk),
                peer: *peer,
            })
            .collect();
        self.distances.insert(chunk, entries);
        true
    }

    /// Rebuild the ranked table from the distance table.
    pub fn rerank(&mut self) {
        let mut table = RankTable::default();
        for (chunk, entries) in &self.distances {
            let mut sorted = entries.clone();
            sorted.sort_unstable();
            sorted.truncate(self.replication_factor);

            let owners: Vec<PeerId> = sorted.into_iter().map(|e| e.peer).collect();
            for peer in &owners {
                table.by_peer.entry(*peer).or_default().insert(*chunk);
            }
            table.by_chunk.insert(*chunk, owners);
        }
        self.ranked = table;
        debug!(
            chunks = self.ranked.by_chunk.len(),
            peers = self.peers.len(),
            "ownership ranking rebuilt"
        );
    }

    /// Ranked owners of `chunk`, closest first.
    pub fn owners_of(&self, chunk: &ChunkId) -> Vec<PeerId> {
        self.ranked.by_chunk.get(chunk).cloned().unwrap_or_default()
    }

    /// Ranked owners of `chunk` as rank rows.
    pub fn ranks_of(&self, chunk: &ChunkId) -> Vec<OwnershipRank> {
        self.ranked
            .by_chunk
            .get(chunk)
            .map(|owners| {
                owners
                    .iter()
                    .zip(1u32..)
                    .map(|(peer, rank)| OwnershipRank {
                        chunk_id: *chunk,
                        peer: *peer,
                        rank,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Rank of `peer` for `chunk`, starting at 1.
    pub fn rank_of(&self, peer: &PeerId, chunk: &ChunkId) -> Option<u32> {
        let owners = self.ranked.by_chunk.get(chunk)?;
        let pos = owners.iter().position(|p| p == peer)?;
        u32::try_from(pos + 1).ok()
    }

    /// Chunks `peer` is a ranked owner of, in id order.
    pub fn chunks_owned_by(&self, peer: &PeerId) -> Vec<ChunkId> {
        self.ranked
            .by_peer
            .get(peer)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Chunks `peer` owns for which `is_stored` is false.
    pub fn missing_chunk_ids<F>(&self, peer: &PeerId, is_stored: F) -> Vec<ChunkId>
    where
        F: Fn(&ChunkId) -> bool,
    {
        self.ranked
            .by_peer
            .get(peer)
            .map(|set| set.iter().filter(|c| !is_stored(c)).copied().collect())
            .unwrap_or_default()
    }
}
