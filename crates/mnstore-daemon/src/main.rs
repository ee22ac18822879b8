//! mnstore-daemon: one masternode's chunk replication process.
//!
//! Loads `config.toml`, opens the chunk database and both chunk trees,
//! serves the replication RPC over QUIC and runs the background loops
//! until Ctrl-C.

mod config;
mod identity;

use std::sync::Arc;

use mnstore_node::{ChunkManager, MasterNode, StaticLedger};
use mnstore_storage::ChunkStore;
use mnstore_transport::quic::{QuicExchange, QuicNode};
use mnstore_types::PeerId;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::config::DaemonConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Load config
    let config = DaemonConfig::load()?;
    init_tracing(&config)?;

    info!("mnstore daemon starting");

    let data_dir = config.data_dir();
    std::fs::create_dir_all(&data_dir)?;

    // 2. Identity
    let keys = identity::load_or_generate(&config.identity_path())?;
    let local_id = PeerId::from_bytes(keys.identifier());
    info!(peer = %local_id, "node identity loaded");

    // 3. Open database
    let conn = mnstore_db::open(&config.db_path())?;
    let db = Arc::new(tokio::sync::Mutex::new(conn));

    // 4. Chunk trees and manager
    let mode = config.storage.dir_mode;
    let temp = ChunkStore::new(config.tmp_dir(), mode)?;
    let persistent = ChunkStore::new(config.chunk_dir(), mode)?;
    let manager = Arc::new(
        ChunkManager::open(
            local_id,
            temp,
            persistent,
            db,
            config.replication_params(),
        )
        .await?,
    );

    // 5. Transport
    let quic = Arc::new(QuicNode::new(config.quic_config())?);
    let exchange = Arc::new(QuicExchange::new(quic.clone()));
    let ledger = Arc::new(StaticLedger::with_peers(
        config.ledger.static_peers.iter().cloned(),
    ));
    let node = MasterNode::new(keys, manager, exchange, ledger, config.rpc_limits());

    if let Err(e) = node.sync_ledger().await {
        warn!(error = %e, "initial ledger sync failed");
    }

    // 6. Serve and run background loops until shutdown
    let (shutdown_tx, _) = broadcast::channel(1);
    let mut handles = vec![tokio::spawn(
        quic.clone()
            .serve(node.dispatcher(), shutdown_tx.subscribe()),
    )];
    handles.extend(node.spawn_tasks(&config.task_intervals(), &shutdown_tx));

    info!(addr = %quic.local_addr(), "mnstore daemon running");

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Ctrl-C received, shutting down"),
        Err(e) => error!(error = %e, "cannot listen for Ctrl-C, shutting down"),
    }

    // Graceful shutdown
    let _ = shutdown_tx.send(());
    for handle in handles {
        if let Err(e) = handle.await {
            warn!(error = %e, "task did not stop cleanly");
        }
    }

    info!("mnstore daemon stopped");
    Ok(())
}

const LOG_TARGETS: &[&str] = &[
    "mnstore_daemon",
    "mnstore_node",
    "mnstore_transport",
    "mnstore_storage",
    "mnstore_db",
    "mnstore_dht",
    "mnstore_fountain",
];

fn default_directives(level: &str) -> String {
    LOG_TARGETS
        .iter()
        .map(|target| format!("{target}={level}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// `RUST_LOG` wins over the configured level.
fn init_tracing(config: &DaemonConfig) -> anyhow::Result<()> {
    let filter = match std::env::var("RUST_LOG") {
        Ok(_) => tracing_subscriber::EnvFilter::from_default_env(),
        Err(_) => tracing_subscriber::EnvFilter::new(default_directives(&config.logging.log_level)),
    };
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if config.logging.log_file.is_empty() {
        builder.init();
    } else {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.logging.log_file)?;
        builder
            .with_ansi(false)
            .with_writer(std::sync::Mutex::new(file))
            .init();
    }
    Ok(())
}
