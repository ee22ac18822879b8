//! PeerFetcher: pulls chunks this node owns but does not hold.
//!
//! Each round takes up to `chunk_fetch_parallelism` missing chunks and
//! fetches them concurrently, one task per chunk. A task asks the chunk's
//! ranked owners in rank order and keeps the first response that hashes to
//! the chunk id. The round ends when every task has finished.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use mnstore_transport::RpcClient;
use mnstore_types::{ChunkId, PeerId};
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::manager::ChunkManager;
use crate::{NodeError, Result};

/// Outcome counts of one round.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FetchRound {
    pub attempted: usize,
    pub fetched: usize,
    pub failed: usize,
}

pub struct PeerFetcher {
    manager: Arc<ChunkManager>,
    client: Arc<RpcClient>,
}

impl PeerFetcher {
    pub fn new(manager: Arc<ChunkManager>, client: Arc<RpcClient>) -> Self {
        Self { manager, client }
    }

    /// Fetch one batch of missing chunks and wait for all of them.
    pub async fn run_round(&self) -> Result<FetchRound> {
        let limit = self.manager.params().chunk_fetch_parallelism;
        let ids = self.manager.missing_chunks(limit).await?;
        let mut round = FetchRound {
            attempted: ids.len(),
            ..FetchRound::default()
        };
        if ids.is_empty() {
            return Ok(round);
        }

        let mut tasks = JoinSet::new();
        let mut task_chunks = HashMap::new();
        for id in ids {
            let manager = self.manager.clone();
            let client = self.client.clone();
            let handle = tasks.spawn(async move { fetch_one(&manager, &client, id).await });
            task_chunks.insert(handle.id(), id);
        }

        while let Some(joined) = tasks.join_next_with_id().await {
            let (id, outcome) = match joined {
                Ok((task, outcome)) => (task_chunks.get(&task).copied(), outcome),
                Err(e) => (
                    task_chunks.get(&e.id()).copied(),
                    Err(NodeError::Task(e.to_string())),
                ),
            };
            let Some(id) = id else {
                warn!("fetch task finished without a chunk id");
                continue;
            };
            match outcome {
                Ok(true) => {
                    round.fetched += 1;
                    continue;
                }
                Ok(false) => {}
                Err(e) => warn!(chunk_id = %id.short(), error = %e, "fetch failed"),
            }
            round.failed += 1;
            self.record_failure(&id).await;
        }

        info!(
            attempted = round.attempted,
            fetched = round.fetched,
            failed = round.failed,
            "fetch round complete"
        );
        Ok(round)
    }

    async fn record_failure(&self, id: &ChunkId) {
        match self.manager.on_fetch_failure(id).await {
            Ok(attempts) => error!(
                chunk_id = %id.short(),
                attempts,
                "no ranked owner could serve chunk; fountain reconstruction is not implemented"
            ),
            Err(e) => warn!(chunk_id = %id.short(), error = %e, "could not record fetch failure"),
        }
    }

    /// Run rounds back to back, pausing for `idle` when nothing is missing,
    /// until `shutdown` fires.
    pub async fn run(self: Arc<Self>, idle: Duration, mut shutdown: broadcast::Receiver<()>) {
        loop {
            let pause = match self.run_round().await {
                Ok(round) if round.attempted > 0 => Duration::ZERO,
                Ok(_) => idle,
                Err(e) => {
                    warn!(error = %e, "fetch round failed");
                    idle
                }
            };
            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = shutdown.recv() => break,
            }
        }
        debug!("peer fetcher stopped");
    }
}

/// Try each ranked owner of `id` in order. `Ok(false)` when none served it.
/// Failures are recorded by the caller.
async fn fetch_one(manager: &ChunkManager, client: &RpcClient, id: ChunkId) -> Result<bool> {
    let local = manager.local_id();
    let owners: Vec<PeerId> = manager
        .index()
        .read()
        .await
        .owners_of(&id)
        .into_iter()
        .filter(|p| *p != local)
        .collect();

    for owner in owners {
        let Some(peer) = manager.peer(&owner).await else {
            debug!(peer = %owner.short(), "owner has no known address");
            continue;
        };
        match client.fetch_chunk(&peer, &id).await {
            Ok(Some(bytes)) => match manager.on_fetch_success(id, bytes).await {
                Ok(()) => {
                    debug!(chunk_id = %id.short(), peer = %owner.short(), "chunk fetched");
                    return Ok(true);
                }
                Err(NodeError::HashMismatch(_)) => {
                    warn!(chunk_id = %id.short(), peer = %owner.short(), "peer served bytes that do not match the chunk id");
                }
                Err(e) => return Err(e),
            },
            Ok(None) => {
                debug!(chunk_id = %id.short(), peer = %owner.short(), "peer does not have chunk");
            }
            Err(e) => {
                warn!(chunk_id = %id.short(), peer = %owner.short(), error = %e, "fetch from peer failed");
            }
        }
    }

    Ok(false)
}
