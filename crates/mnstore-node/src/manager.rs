//! Chunk lifecycle and missing-chunk bookkeeping.
//!
//! The manager owns both chunk stores, the record database and the
//! ownership index. Disk and hashing work runs on blocking threads; the
//! database is reached through the shared connection mutex and the guard is
//! never held across an await.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use mnstore_db::queries::{chunks, peers, tickets};
use mnstore_dht::{OwnershipIndex, SharedOwnershipIndex};
use mnstore_fountain::FountainCodec;
use mnstore_storage::{ChunkStore, StorageError};
use mnstore_types::{ArtworkHash, ChunkId, ChunkRecord, Peer, PeerId};
use rand::seq::SliceRandom;
use rusqlite::Connection;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};

use crate::ledger::ConfirmedTicket;
use crate::params::ReplicationParams;
use crate::{blocking, unix_now, NodeError, Result};

pub use mnstore_db::queries::chunks::Upsert;

/// Counts from one temp-storage reconciliation pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    /// Confirmed and moved to persistent storage.
    pub valid: usize,
    /// Known but not confirmed yet; left in place.
    pub pending: usize,
    /// No record; deleted.
    pub orphaned: usize,
    /// Bytes do not hash to the id; deleted.
    pub corrupt: usize,
    /// Move attempted and failed; retried next pass.
    pub failed: usize,
}

/// Peers added and removed by a peer-list update.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PeerDiff {
    pub added: Vec<PeerId>,
    pub removed: Vec<PeerId>,
}

impl PeerDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Result of placing an artifact into temporary storage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IngestedArtifact {
    pub artwork_hash: ArtworkHash,
    /// One id per encoded block, in block order.
    pub chunk_ids: Vec<ChunkId>,
    /// Seeds that re-create the same blocks.
    pub seeds: Vec<u32>,
}

enum PersistentRead {
    Found(Vec<u8>),
    Absent,
    Corrupt,
}

/// Per-process owner of chunk state.
pub struct ChunkManager {
    local_id: PeerId,
    temp: ChunkStore,
    persistent: ChunkStore,
    db: Arc<Mutex<Connection>>,
    index: SharedOwnershipIndex,
    peers: RwLock<HashMap<PeerId, Peer>>,
    params: ReplicationParams,
}

impl ChunkManager {
    /// Build a manager and load the ownership index from the database.
    pub async fn open(
        local_id: PeerId,
        temp: ChunkStore,
        persistent: ChunkStore,
        db: Arc<Mutex<Connection>>,
        params: ReplicationParams,
    ) -> Result<Self> {
        let index = OwnershipIndex::new(params.replication_factor)?.shared();
        let manager = Self {
            local_id,
            temp,
            persistent,
            db,
            index,
            peers: RwLock::new(HashMap::new()),
            params,
        };
        manager.rebuild_index().await?;
        Ok(manager)
    }

    pub fn local_id(&self) -> PeerId {
        self.local_id
    }

    pub fn params(&self) -> &ReplicationParams {
        &self.params
    }

    pub fn index(&self) -> SharedOwnershipIndex {
        self.index.clone()
    }

    pub fn temp_store(&self) -> &ChunkStore {
        &self.temp
    }

    pub fn persistent_store(&self) -> &ChunkStore {
        &self.persistent
    }

    /// Address book entry for an active peer.
    pub async fn peer(&self, id: &PeerId) -> Option<Peer> {
        self.peers.read().await.get(id).cloned()
    }

    /// Replace the in-memory index with one built from active peers and
    /// indexed chunks in the database.
    pub async fn rebuild_index(&self) -> Result<()> {
        let (active, records) = {
            let db = self.db.lock().await;
            (peers::list_active(&db)?, chunks::list_all(&db)?)
        };

        let mut fresh = OwnershipIndex::new(self.params.replication_factor)?;
        for peer in &active {
            fresh.add_peer(peer.identifier);
        }
        for record in records.iter().filter(|r| r.indexed) {
            fresh.add_chunk(record.chunk_id);
        }
        fresh.rerank();

        info!(
            peers = fresh.peer_count(),
            chunks = fresh.chunk_count(),
            "ownership index loaded"
        );
        *self.index.write().await = fresh;
        *self.peers.write().await = active.into_iter().map(|p| (p.identifier, p)).collect();
        Ok(())
    }

    pub async fn record(&self, id: &ChunkId) -> Result<Option<ChunkRecord>> {
        let db = self.db.lock().await;
        Ok(chunks::get(&db, id)?)
    }

    pub async fn create_chunk(
        &self,
        id: ChunkId,
        artwork_hash: ArtworkHash,
        confirmed: bool,
    ) -> Result<Upsert> {
        let db = self.db.lock().await;
        Ok(chunks::create_or_confirm(&db, &id, &artwork_hash, confirmed)?)
    }

    /// Create or confirm the records of one artwork's chunks. Returns how
    /// many records changed.
    pub async fn confirm_ticket_chunks(
        &self,
        artwork_hash: ArtworkHash,
        ids: &[ChunkId],
    ) -> Result<usize> {
        let db = self.db.lock().await;
        let tx = db.unchecked_transaction().map_err(mnstore_db::DbError::from)?;
        let mut changed = 0;
        for id in ids {
            if chunks::create_or_confirm(&tx, id, &artwork_hash, true)? != Upsert::Unchanged {
                changed += 1;
            }
        }
        tx.commit().map_err(mnstore_db::DbError::from)?;
        Ok(changed)
    }

    /// Apply a confirmed ticket once. Returns false if it was seen before.
    pub async fn apply_ticket(&self, ticket: &ConfirmedTicket) -> Result<bool> {
        let db = self.db.lock().await;
        if tickets::is_processed(&db, &ticket.txid)? {
            return Ok(false);
        }
        let tx = db.unchecked_transaction().map_err(mnstore_db::DbError::from)?;
        for id in ticket.all_chunk_ids() {
            chunks::create_or_confirm(&tx, &id, &ticket.artwork_hash, true)?;
        }
        tickets::record_processed(&tx, &ticket.txid, ticket.height)?;
        tx.commit().map_err(mnstore_db::DbError::from)?;
        debug!(txid = %ticket.txid, chunks = ticket.chunk_ids.len(), "ticket applied");
        Ok(true)
    }

    pub async fn last_ticket_height(&self) -> Result<Option<u64>> {
        let db = self.db.lock().await;
        Ok(tickets::max_height(&db)?)
    }

    /// Write bytes to temporary storage after checking they hash to `id`.
    pub async fn store_in_temp(&self, id: ChunkId, data: Vec<u8>) -> Result<()> {
        let temp = self.temp.clone();
        blocking(move || {
            if !id.matches(&data) {
                return Err(NodeError::HashMismatch(id));
            }
            temp.put(&id, &data)?;
            Ok(())
        })
        .await
    }

    /// Move a confirmed chunk from temporary to persistent storage and mark
    /// it stored.
    #[instrument(skip(self), fields(chunk_id = %id.short()))]
    pub async fn move_to_persistent(&self, id: ChunkId) -> Result<()> {
        let record = self.record(&id).await?.ok_or(NodeError::UnknownChunk(id))?;
        if !record.confirmed {
            return Err(NodeError::NotConfirmed(id));
        }

        let temp = self.temp.clone();
        let persistent = self.persistent.clone();
        blocking(move || {
            let data = temp.get(&id)?;
            if !id.matches(&data) {
                temp.delete(&id)?;
                return Err(NodeError::HashMismatch(id));
            }
            persistent.put(&id, &data)?;
            temp.delete(&id)?;
            Ok(())
        })
        .await?;

        self.mark_stored(&id).await
    }

    /// Classify every temp entry and act on it: move confirmed chunks, keep
    /// pending ones, delete orphaned and corrupt ones.
    pub async fn reconcile_temp_storage(&self) -> Result<ReconcileSummary> {
        let temp = self.temp.clone();
        let entries: Vec<(ChunkId, bool)> = blocking(move || {
            let mut out = Vec::new();
            for item in temp.index()? {
                let id = match item {
                    Ok(id) => id,
                    Err(e) => {
                        warn!(error = %e, "skipping unreadable temp entry");
                        continue;
                    }
                };
                match temp.verify(&id) {
                    Ok(intact) => out.push((id, intact)),
                    Err(StorageError::NotFound(_)) => {}
                    Err(e) => return Err(e.into()),
                }
            }
            Ok(out)
        })
        .await?;

        let mut summary = ReconcileSummary::default();
        for (id, intact) in entries {
            if !intact {
                warn!(chunk_id = %id.short(), "deleting corrupt temp chunk");
                self.delete_temp(id).await?;
                summary.corrupt += 1;
                continue;
            }
            match self.record(&id).await? {
                None => {
                    warn!(chunk_id = %id.short(), "deleting orphaned temp chunk");
                    self.delete_temp(id).await?;
                    summary.orphaned += 1;
                }
                Some(record) if record.confirmed => match self.move_to_persistent(id).await {
                    Ok(()) => summary.valid += 1,
                    Err(e) => {
                        warn!(chunk_id = %id.short(), error = %e, "move to persistent storage failed");
                        summary.failed += 1;
                    }
                },
                Some(_) => summary.pending += 1,
            }
        }

        if summary != ReconcileSummary::default() {
            info!(
                valid = summary.valid,
                pending = summary.pending,
                orphaned = summary.orphaned,
                corrupt = summary.corrupt,
                failed = summary.failed,
                "temp storage reconciled"
            );
        }
        Ok(summary)
    }

    async fn delete_temp(&self, id: ChunkId) -> Result<()> {
        let temp = self.temp.clone();
        blocking(move || Ok(temp.delete(&id)?)).await
    }

    /// Up to `limit` chunks this node owns but does not store, skipping
    /// chunks in their refetch cooldown or past the attempt limit. Chunks
    /// still held in temp storage are left to [`Self::reconcile_temp_storage`].
    pub async fn missing_chunks(&self, limit: usize) -> Result<Vec<ChunkId>> {
        let records: HashMap<ChunkId, ChunkRecord> = {
            let db = self.db.lock().await;
            chunks::list_all(&db)?
                .into_iter()
                .map(|r| (r.chunk_id, r))
                .collect()
        };
        let candidates = self
            .index
            .read()
            .await
            .missing_chunk_ids(&self.local_id, |id| {
                records.get(id).is_some_and(|r| r.stored)
            });

        let now = unix_now();
        let fetchable: Vec<ChunkId> = candidates
            .into_iter()
            .filter(|id| records.get(id).is_some_and(|r| self.is_fetchable(r, now)))
            .collect();
        if fetchable.is_empty() {
            return Ok(fetchable);
        }

        let temp = self.temp.clone();
        blocking(move || {
            Ok(fetchable
                .into_iter()
                .filter(|id| !temp.exists(id))
                .take(limit)
                .collect())
        })
        .await
    }

    fn is_fetchable(&self, record: &ChunkRecord, now: u64) -> bool {
        let cooled_down = record
            .last_fetch_failure_at
            .map_or(true, |at| now.saturating_sub(at) >= self.params.refetch_cooldown.as_secs());
        record.confirmed
            && !record.stored
            && record.fetch_attempts < self.params.max_fetch_attempts
            && cooled_down
    }

    /// Start the refetch cooldown. Returns the attempt count so far.
    pub async fn on_fetch_failure(&self, id: &ChunkId) -> Result<u32> {
        let db = self.db.lock().await;
        Ok(chunks::record_fetch_failure(&db, id, unix_now())?)
    }

    /// Persist fetched bytes after checking they hash to `id`.
    pub async fn on_fetch_success(&self, id: ChunkId, data: Vec<u8>) -> Result<()> {
        if self.record(&id).await?.is_none() {
            return Err(NodeError::UnknownChunk(id));
        }
        let persistent = self.persistent.clone();
        blocking(move || {
            if !id.matches(&data) {
                return Err(NodeError::HashMismatch(id));
            }
            persistent.put(&id, &data)?;
            Ok(())
        })
        .await?;
        self.mark_stored(&id).await
    }

    async fn mark_stored(&self, id: &ChunkId) -> Result<()> {
        let db = self.db.lock().await;
        chunks::mark_stored(&db, id)?;
        Ok(())
    }

    /// Bytes of a confirmed, stored chunk whose persistent copy verifies.
    /// A corrupt copy is deleted and the chunk scheduled for refetching.
    pub async fn get_chunk_if_stored(&self, id: &ChunkId) -> Result<Option<Vec<u8>>> {
        match self.record(id).await? {
            Some(r) if r.confirmed && r.stored => {}
            _ => return Ok(None),
        }

        let id = *id;
        let persistent = self.persistent.clone();
        let read = blocking(move || match persistent.get(&id) {
            Ok(data) if id.matches(&data) => Ok(PersistentRead::Found(data)),
            Ok(_) => {
                persistent.delete(&id)?;
                Ok(PersistentRead::Corrupt)
            }
            Err(StorageError::NotFound(_)) => Ok(PersistentRead::Absent),
            Err(e) => Err(e.into()),
        })
        .await?;

        match read {
            PersistentRead::Found(data) => Ok(Some(data)),
            PersistentRead::Absent | PersistentRead::Corrupt => {
                warn!(chunk_id = %id.short(), "persistent copy lost or corrupt, scheduling refetch");
                let db = self.db.lock().await;
                chunks::mark_missing(&db, &id)?;
                Ok(None)
            }
        }
    }

    /// Random sample of stored chunks this node owns.
    pub async fn random_owned_stored_chunks(&self, n: usize) -> Result<Vec<ChunkId>> {
        let owned: HashSet<ChunkId> = self
            .index
            .read()
            .await
            .chunks_owned_by(&self.local_id)
            .into_iter()
            .collect();
        let stored: Vec<ChunkId> = {
            let db = self.db.lock().await;
            chunks::list_all(&db)?
                .into_iter()
                .filter(|r| r.stored && owned.contains(&r.chunk_id))
                .map(|r| r.chunk_id)
                .collect()
        };
        Ok(stored
            .choose_multiple(&mut rand::thread_rng(), n)
            .copied()
            .collect())
    }

    /// Add every unindexed chunk to the ownership index and re-rank once.
    pub async fn index_new_chunks(&self) -> Result<usize> {
        let ids: Vec<ChunkId> = {
            let db = self.db.lock().await;
            chunks::list_unindexed(&db)?
                .into_iter()
                .map(|r| r.chunk_id)
                .collect()
        };
        if ids.is_empty() {
            return Ok(0);
        }

        {
            let mut index = self.index.write().await;
            for id in &ids {
                index.add_chunk(*id);
            }
            index.rerank();
        }

        let db = self.db.lock().await;
        chunks::mark_indexed(&db, &ids)?;
        info!(count = ids.len(), "chunks indexed");
        Ok(ids.len())
    }

    /// Bring the peer table and index in line with `listed`. Unlisted peers
    /// are deactivated; addresses of listed peers are refreshed.
    pub async fn apply_peer_list(&self, listed: &[Peer]) -> Result<PeerDiff> {
        let listed: HashMap<PeerId, Peer> = listed
            .iter()
            .map(|p| (p.identifier, p.clone()))
            .collect();

        let mut diff = PeerDiff::default();
        {
            let known = self.peers.read().await;
            diff.added = listed
                .keys()
                .filter(|id| !known.contains_key(id))
                .copied()
                .collect();
            diff.removed = known
                .keys()
                .filter(|id| !listed.contains_key(id))
                .copied()
                .collect();
        }
        diff.added.sort();
        diff.removed.sort();

        {
            let db = self.db.lock().await;
            for peer in listed.values() {
                peers::upsert(&db, peer)?;
            }
            for id in &diff.removed {
                peers::deactivate(&db, id)?;
            }
        }
        *self.peers.write().await = listed;

        if !diff.is_empty() {
            let mut index = self.index.write().await;
            for id in &diff.added {
                index.add_peer(*id);
            }
            for id in &diff.removed {
                index.remove_peer(id);
            }
            index.rerank();
            info!(
                added = diff.added.len(),
                removed = diff.removed.len(),
                "peer list applied"
            );
        }
        Ok(diff)
    }

    /// Fountain-encode an artifact into chunks, place them in temporary
    /// storage and create unconfirmed records for them.
    pub async fn ingest_artifact(
        &self,
        data: Vec<u8>,
        artwork_hash: ArtworkHash,
        seeds: Option<Vec<u32>>,
    ) -> Result<IngestedArtifact> {
        let codec = FountainCodec::new(self.params.redundancy_factor, self.params.chunk_size);
        let temp = self.temp.clone();
        let (chunk_ids, seeds) = blocking(move || {
            let blocks = codec.encode(&data, seeds.as_deref())?;
            let seeds = mnstore_fountain::seeds(&blocks)?;
            let mut ids = Vec::with_capacity(blocks.len());
            for block in &blocks {
                let id = ChunkId::of(block);
                temp.put(&id, block)?;
                ids.push(id);
            }
            Ok((ids, seeds))
        })
        .await?;

        {
            let db = self.db.lock().await;
            let tx = db.unchecked_transaction().map_err(mnstore_db::DbError::from)?;
            for id in &chunk_ids {
                chunks::create_or_confirm(&tx, id, &artwork_hash, false)?;
            }
            tx.commit().map_err(mnstore_db::DbError::from)?;
        }

        info!(artwork = %artwork_hash.short(), chunks = chunk_ids.len(), "artifact ingested");
        Ok(IngestedArtifact {
            artwork_hash,
            chunk_ids,
            seeds,
        })
    }

    /// Decode an artifact from the stored chunks of `artwork_hash`.
    pub async fn reconstruct_artifact(&self, artwork_hash: &ArtworkHash) -> Result<Vec<u8>> {
        let ids: Vec<ChunkId> = {
            let db = self.db.lock().await;
            chunks::list_by_artwork(&db, artwork_hash)?
                .into_iter()
                .filter(|r| r.stored)
                .map(|r| r.chunk_id)
                .collect()
        };
        let persistent = self.persistent.clone();
        blocking(move || {
            let blocks = ids.iter().filter_map(|id| match persistent.get(id) {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    warn!(chunk_id = %id.short(), error = %e, "chunk unreadable during reconstruction");
                    None
                }
            });
            Ok(mnstore_fountain::decode(blocks)?)
        })
        .await
    }
}
