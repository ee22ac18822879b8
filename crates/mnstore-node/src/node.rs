//! One masternode's replication stack wired together.

use std::sync::Arc;

use mnstore_crypto::ed25519::KeyPair;
use mnstore_transport::{Exchange, RpcClient, RpcDispatcher, RpcLimits};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::auditor::SpotCheckAuditor;
use crate::fetcher::PeerFetcher;
use crate::ledger::{intake_tickets, refresh_peers, LedgerClient};
use crate::manager::ChunkManager;
use crate::params::TaskIntervals;
use crate::service::ReplicationService;
use crate::tasks::spawn_periodic;
use crate::Result;

pub struct MasterNode {
    manager: Arc<ChunkManager>,
    dispatcher: Arc<RpcDispatcher>,
    client: Arc<RpcClient>,
    ledger: Arc<dyn LedgerClient>,
}

impl MasterNode {
    /// `exchange` carries outgoing calls; every call is bounded by the
    /// manager's `fetch_timeout`.
    pub fn new(
        keys: KeyPair,
        manager: Arc<ChunkManager>,
        exchange: Arc<dyn Exchange>,
        ledger: Arc<dyn LedgerClient>,
        limits: RpcLimits,
    ) -> Self {
        let service = Arc::new(ReplicationService::new(manager.clone()));
        let dispatcher = Arc::new(RpcDispatcher::new(keys.clone(), limits, service));
        let client = Arc::new(RpcClient::new(
            keys,
            limits,
            manager.params().fetch_timeout,
            exchange,
        ));
        Self {
            manager,
            dispatcher,
            client,
            ledger,
        }
    }

    pub fn manager(&self) -> &Arc<ChunkManager> {
        &self.manager
    }

    /// Server side, to be registered with a transport.
    pub fn dispatcher(&self) -> Arc<RpcDispatcher> {
        self.dispatcher.clone()
    }

    pub fn client(&self) -> Arc<RpcClient> {
        self.client.clone()
    }

    pub fn fetcher(&self) -> PeerFetcher {
        PeerFetcher::new(self.manager.clone(), self.client.clone())
    }

    pub fn auditor(&self) -> SpotCheckAuditor {
        SpotCheckAuditor::new(self.manager.clone(), self.client.clone())
    }

    /// Pull peers and tickets from the ledger and index new chunks.
    pub async fn sync_ledger(&self) -> Result<()> {
        refresh_peers(&self.manager, self.ledger.as_ref()).await?;
        intake_tickets(&self.manager, self.ledger.as_ref()).await?;
        self.manager.index_new_chunks().await?;
        Ok(())
    }

    /// Start every background loop. They stop when `shutdown` fires.
    pub fn spawn_tasks(
        &self,
        intervals: &TaskIntervals,
        shutdown: &broadcast::Sender<()>,
    ) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        let (manager, ledger) = (self.manager.clone(), self.ledger.clone());
        handles.push(spawn_periodic(
            "peer-refresh",
            intervals.peer_refresh,
            shutdown.subscribe(),
            move || {
                let (manager, ledger) = (manager.clone(), ledger.clone());
                async move { refresh_peers(&manager, ledger.as_ref()).await.map(drop) }
            },
        ));

        let (manager, ledger) = (self.manager.clone(), self.ledger.clone());
        handles.push(spawn_periodic(
            "ticket-intake",
            intervals.ticket_poll,
            shutdown.subscribe(),
            move || {
                let (manager, ledger) = (manager.clone(), ledger.clone());
                async move { intake_tickets(&manager, ledger.as_ref()).await.map(drop) }
            },
        ));

        let manager = self.manager.clone();
        handles.push(spawn_periodic(
            "chunk-index",
            intervals.index,
            shutdown.subscribe(),
            move || {
                let manager = manager.clone();
                async move { manager.index_new_chunks().await.map(drop) }
            },
        ));

        let manager = self.manager.clone();
        handles.push(spawn_periodic(
            "tmp-sweep",
            intervals.tmp_sweep,
            shutdown.subscribe(),
            move || {
                let manager = manager.clone();
                async move { manager.reconcile_temp_storage().await.map(drop) }
            },
        ));

        let auditor = Arc::new(self.auditor());
        handles.push(spawn_periodic(
            "spot-check",
            intervals.audit,
            shutdown.subscribe(),
            move || {
                let auditor = auditor.clone();
                async move { auditor.run_round().await.map(drop) }
            },
        ));

        let fetcher = Arc::new(self.fetcher());
        handles.push(tokio::spawn(
            fetcher.run(intervals.fetcher_idle, shutdown.subscribe()),
        ));

        handles
    }
}
