//! Test fixtures: managers on temporary directories and small in-memory
//! networks of nodes.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use mnstore_crypto::ed25519::KeyPair;
use mnstore_storage::ChunkStore;
use mnstore_transport::memory::MemoryNetwork;
use mnstore_transport::rpc::DEFAULT_CALL_TIMEOUT;
use mnstore_transport::{Request, Response, RpcClient, RpcDispatcher, RpcHandler, RpcLimits};
use mnstore_types::{ArtworkHash, ChunkId, Peer, PeerId};
use tempfile::TempDir;
use tokio::sync::Mutex;

use crate::manager::ChunkManager;
use crate::params::ReplicationParams;
use crate::service::ReplicationService;

pub struct Fixture {
    pub _dir: TempDir,
    pub manager: ChunkManager,
}

pub fn local() -> Peer {
    Peer::new(
        PeerId::from_bytes([9; 32]),
        "127.0.0.1:4444".parse().expect("addr"),
    )
}

pub fn art() -> ArtworkHash {
    ArtworkHash::of(b"artwork")
}

pub async fn open_manager(dir: &TempDir, id: PeerId, params: ReplicationParams) -> ChunkManager {
    let temp = ChunkStore::new(dir.path().join("tmp"), 0o700).expect("temp store");
    let persistent = ChunkStore::new(dir.path().join("chunks"), 0o700).expect("store");
    let db = Arc::new(Mutex::new(mnstore_db::open_memory().expect("db")));
    ChunkManager::open(id, temp, persistent, db, params)
        .await
        .expect("manager")
}

pub async fn fixture_with(params: ReplicationParams) -> Fixture {
    let dir = TempDir::new().expect("tempdir");
    let manager = open_manager(&dir, local().identifier, params).await;
    Fixture { _dir: dir, manager }
}

pub async fn fixture() -> Fixture {
    fixture_with(ReplicationParams::default()).await
}

/// Confirmed chunk owned by the local node and present in the index.
pub async fn owned_chunk(m: &ChunkManager, data: &[u8]) -> ChunkId {
    let id = ChunkId::of(data);
    m.create_chunk(id, art(), true).await.expect("create");
    m.apply_peer_list(&[local()]).await.expect("peers");
    m.index_new_chunks().await.expect("index");
    id
}

/// Counts requests before passing them on.
pub struct CountingHandler {
    inner: Arc<dyn RpcHandler>,
    pub calls: AtomicUsize,
}

impl CountingHandler {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RpcHandler for CountingHandler {
    async fn handle(&self, sender: PeerId, request: Request) -> mnstore_transport::Result<Response> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.handle(sender, request).await
    }
}

/// One node on a [`MemoryNetwork`].
pub struct TestNode {
    pub _dir: TempDir,
    pub keys: KeyPair,
    pub peer: Peer,
    pub manager: Arc<ChunkManager>,
    pub handler: Arc<CountingHandler>,
}

impl TestNode {
    pub fn client(&self, net: &Arc<MemoryNetwork>) -> Arc<RpcClient> {
        Arc::new(RpcClient::new(
            self.keys.clone(),
            RpcLimits::default(),
            DEFAULT_CALL_TIMEOUT,
            net.clone(),
        ))
    }
}

pub async fn spawn_node(net: &Arc<MemoryNetwork>, port: u16, params: ReplicationParams) -> TestNode {
    let dir = TempDir::new().expect("tempdir");
    let keys = KeyPair::generate();
    let id = PeerId::from_bytes(keys.identifier());
    let peer = Peer::new(id, SocketAddr::from(([127, 0, 0, 1], port)));
    let manager = Arc::new(open_manager(&dir, id, params).await);
    let handler = Arc::new(CountingHandler {
        inner: Arc::new(ReplicationService::new(manager.clone())),
        calls: AtomicUsize::new(0),
    });
    net.register(Arc::new(RpcDispatcher::new(
        keys.clone(),
        RpcLimits::default(),
        handler.clone(),
    )));
    TestNode {
        _dir: dir,
        keys,
        peer,
        manager,
        handler,
    }
}

/// Make every node aware of every other node.
pub async fn connect_all(nodes: &[&TestNode]) {
    let peers: Vec<Peer> = nodes.iter().map(|n| n.peer.clone()).collect();
    for node in nodes {
        node.manager.apply_peer_list(&peers).await.expect("peers");
    }
}

/// Register a confirmed chunk on every node and index it.
pub async fn seed_record(nodes: &[&TestNode], id: ChunkId) {
    for node in nodes {
        node.manager.create_chunk(id, art(), true).await.expect("create");
        node.manager.index_new_chunks().await.expect("index");
    }
}
