//! Ledger collaborator.
//!
//! The chain supplies the masternode list and the activation tickets whose
//! chunks must be replicated. [`StaticLedger`] is an in-memory stand-in
//! used by tests and by a daemon configured with a fixed peer list.

use std::collections::BTreeMap;
use std::net::SocketAddr;

use async_trait::async_trait;
use mnstore_types::{ArtworkHash, ChunkId, Peer, PeerId};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::manager::{ChunkManager, PeerDiff};
use crate::Result;

/// One entry of the ledger's masternode list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerListing {
    pub identifier: PeerId,
    pub address: SocketAddr,
}

impl From<&PeerListing> for Peer {
    fn from(listing: &PeerListing) -> Self {
        Peer::new(listing.identifier, listing.address)
    }
}

/// A committed activation ticket and the chunks it references.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfirmedTicket {
    pub txid: String,
    pub height: u64,
    pub artwork_hash: ArtworkHash,
    pub chunk_ids: Vec<ChunkId>,
    pub thumbnail_id: Option<ChunkId>,
}

impl ConfirmedTicket {
    /// Artwork chunks followed by the thumbnail chunk.
    pub fn all_chunk_ids(&self) -> Vec<ChunkId> {
        let mut ids = self.chunk_ids.clone();
        ids.extend(self.thumbnail_id);
        ids
    }
}

#[async_trait]
pub trait LedgerClient: Send + Sync {
    async fn masternode_list(&self) -> Result<Vec<PeerListing>>;

    async fn block_height(&self) -> Result<u64>;

    /// Confirmed tickets at `from_height` or above.
    async fn activation_tickets(&self, from_height: u64) -> Result<Vec<ConfirmedTicket>>;
}

#[derive(Default)]
struct LedgerState {
    peers: BTreeMap<PeerId, PeerListing>,
    tickets: Vec<ConfirmedTicket>,
    height: u64,
}

/// In-memory ledger.
#[derive(Default)]
pub struct StaticLedger {
    state: RwLock<LedgerState>,
}

impl StaticLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_peers(peers: impl IntoIterator<Item = PeerListing>) -> Self {
        let peers = peers.into_iter().map(|p| (p.identifier, p)).collect();
        Self {
            state: RwLock::new(LedgerState {
                peers,
                ..LedgerState::default()
            }),
        }
    }

    pub async fn add_peer(&self, listing: PeerListing) {
        self.state
            .write()
            .await
            .peers
            .insert(listing.identifier, listing);
    }

    pub async fn remove_peer(&self, identifier: &PeerId) {
        self.state.write().await.peers.remove(identifier);
    }

    /// Append a ticket; the block height follows the highest ticket.
    pub async fn add_ticket(&self, ticket: ConfirmedTicket) {
        let mut state = self.state.write().await;
        state.height = state.height.max(ticket.height);
        state.tickets.push(ticket);
    }

    pub async fn set_block_height(&self, height: u64) {
        self.state.write().await.height = height;
    }
}

#[async_trait]
impl LedgerClient for StaticLedger {
    async fn masternode_list(&self) -> Result<Vec<PeerListing>> {
        Ok(self.state.read().await.peers.values().cloned().collect())
    }

    async fn block_height(&self) -> Result<u64> {
        Ok(self.state.read().await.height)
    }

    async fn activation_tickets(&self, from_height: u64) -> Result<Vec<ConfirmedTicket>> {
        Ok(self
            .state
            .read()
            .await
            .tickets
            .iter()
            .filter(|t| t.height >= from_height)
            .cloned()
            .collect())
    }
}

/// Apply the ledger's current masternode list.
pub async fn refresh_peers(manager: &ChunkManager, ledger: &dyn LedgerClient) -> Result<PeerDiff> {
    let listed: Vec<Peer> = ledger
        .masternode_list()
        .await?
        .iter()
        .map(Peer::from)
        .collect();
    manager.apply_peer_list(&listed).await
}

/// Create or confirm the chunk records of every ticket not seen before.
/// Returns the number of tickets applied.
pub async fn intake_tickets(manager: &ChunkManager, ledger: &dyn LedgerClient) -> Result<usize> {
    let from = manager.last_ticket_height().await?.unwrap_or(0);
    let tickets = ledger.activation_tickets(from).await?;
    let mut applied = 0;
    for ticket in &tickets {
        if manager.apply_ticket(ticket).await? {
            applied += 1;
        } else {
            debug!(txid = %ticket.txid, "ticket already processed");
        }
    }
    if applied > 0 {
        let height = ledger.block_height().await?;
        info!(applied, height, "activation tickets applied");
    }
    Ok(applied)
}
