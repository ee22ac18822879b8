//! In-process network.
//!
//! Routes encoded envelopes straight to registered dispatchers. Every byte
//! still goes through sealing, validation and CBOR decoding, so behaviour
//! matches the QUIC path apart from the socket.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use mnstore_types::{Peer, PeerId};

use crate::rpc::{Exchange, RpcDispatcher};
use crate::{Result, TransportError};

#[derive(Default)]
struct Routes {
    nodes: HashMap<PeerId, Arc<RpcDispatcher>>,
    offline: HashSet<PeerId>,
    delays: HashMap<PeerId, Duration>,
}

/// A set of dispatchers reachable by peer id.
#[derive(Default)]
pub struct MemoryNetwork {
    routes: RwLock<Routes>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_routes<R>(&self, f: impl FnOnce(&mut Routes) -> R) -> R {
        let mut guard = self.routes.write().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    /// Make `dispatcher` reachable under its local id.
    pub fn register(&self, dispatcher: Arc<RpcDispatcher>) {
        self.with_routes(|r| {
            r.nodes.insert(dispatcher.local_id(), dispatcher);
        });
    }

    pub fn unregister(&self, id: &PeerId) {
        self.with_routes(|r| {
            r.nodes.remove(id);
        });
    }

    /// Simulate a peer that is registered but unreachable.
    pub fn set_offline(&self, id: PeerId, offline: bool) {
        self.with_routes(|r| {
            if offline {
                r.offline.insert(id);
            } else {
                r.offline.remove(&id);
            }
        });
    }

    /// Delay every exchange with `id`.
    pub fn set_delay(&self, id: PeerId, delay: Duration) {
        self.with_routes(|r| {
            r.delays.insert(id, delay);
        });
    }
}

#[async_trait]
impl Exchange for MemoryNetwork {
    async fn exchange(&self, peer: &Peer, request: Vec<u8>) -> Result<Vec<u8>> {
        let (dispatcher, delay) = self.with_routes(|r| {
            if r.offline.contains(&peer.identifier) {
                return Err(TransportError::Connection(format!(
                    "peer {} is offline",
                    peer.identifier.short()
                )));
            }
            let dispatcher = r.nodes.get(&peer.identifier).cloned().ok_or_else(|| {
                TransportError::Connection(format!("no route to {}", peer.identifier.short()))
            })?;
            Ok((dispatcher, r.delays.get(&peer.identifier).copied()))
        })?;

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        dispatcher.process(&request).await
    }
}
