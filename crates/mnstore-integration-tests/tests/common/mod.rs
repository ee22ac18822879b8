//! Shared helpers: masternodes on temporary directories.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use mnstore_crypto::ed25519::KeyPair;
use mnstore_node::{ChunkManager, MasterNode, PeerListing, ReplicationParams, StaticLedger};
use mnstore_storage::ChunkStore;
use mnstore_transport::{Exchange, RpcLimits};
use mnstore_types::{ChunkId, PeerId};
use tempfile::TempDir;

pub struct Node {
    pub _dir: TempDir,
    pub node: MasterNode,
    pub listing: PeerListing,
}

impl Node {
    pub fn id(&self) -> PeerId {
        self.listing.identifier
    }

    pub fn manager(&self) -> &Arc<ChunkManager> {
        self.node.manager()
    }

    /// Whether this node is one of the ranked owners of `id`.
    pub async fn owns(&self, id: &ChunkId) -> bool {
        self.manager()
            .index()
            .read()
            .await
            .owners_of(id)
            .contains(&self.id())
    }

    /// Run fetch rounds until nothing is left to attempt.
    pub async fn fetch_until_idle(&self) -> usize {
        let fetcher = self.node.fetcher();
        let mut fetched = 0;
        for _ in 0..100 {
            let round = fetcher.run_round().await.expect("fetch round");
            fetched += round.fetched;
            if round.attempted == 0 {
                break;
            }
        }
        fetched
    }
}

pub async fn open_manager(dir: &TempDir, id: PeerId, params: ReplicationParams) -> ChunkManager {
    let temp = ChunkStore::new(dir.path().join("tmp_chunks"), 0o700).expect("temp store");
    let persistent = ChunkStore::new(dir.path().join("chunks"), 0o700).expect("chunk store");
    let db = mnstore_db::open(&dir.path().join("mnstore.db")).expect("db");
    ChunkManager::open(
        id,
        temp,
        persistent,
        Arc::new(tokio::sync::Mutex::new(db)),
        params,
    )
    .await
    .expect("manager")
}

/// Build a node whose outgoing calls go through `exchange`. The caller
/// registers the dispatcher with its transport.
pub async fn build_node(
    keys: KeyPair,
    address: SocketAddr,
    exchange: Arc<dyn Exchange>,
    ledger: Arc<StaticLedger>,
    params: ReplicationParams,
) -> Node {
    let dir = TempDir::new().expect("tempdir");
    let id = PeerId::from_bytes(keys.identifier());
    let manager = Arc::new(open_manager(&dir, id, params).await);
    let node = MasterNode::new(keys, manager, exchange, ledger, RpcLimits::default());
    Node {
        _dir: dir,
        node,
        listing: PeerListing {
            identifier: id,
            address,
        },
    }
}
