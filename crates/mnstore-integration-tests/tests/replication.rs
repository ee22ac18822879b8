//! Integration test: artifact replication across a masternode network.
//!
//! 1. One node fountain-encodes an artifact into its temporary storage
//! 2. The activation ticket lands on the ledger; every node takes it in
//! 3. The ingesting node moves the confirmed chunks to persistent storage
//! 4. The other nodes fetch the chunks they own from ranked owners
//! 5. A node that fetched everything reconstructs the artifact

mod common;

use std::sync::Arc;

use common::{build_node, Node};
use mnstore_crypto::ed25519::KeyPair;
use mnstore_node::{ConfirmedTicket, ReplicationParams, StaticLedger};
use mnstore_transport::memory::MemoryNetwork;
use mnstore_types::{ArtworkHash, ChunkId};

fn params(replication_factor: usize) -> ReplicationParams {
    ReplicationParams {
        replication_factor,
        chunk_size: 1024,
        redundancy_factor: 10,
        ..ReplicationParams::default()
    }
}

fn artifact() -> Vec<u8> {
    (0..9800u32).map(|i| (i * 31 % 251) as u8).collect()
}

async fn network(
    net: &Arc<MemoryNetwork>,
    ledger: &Arc<StaticLedger>,
    count: u16,
    params: ReplicationParams,
) -> Vec<Node> {
    let mut nodes = Vec::new();
    for port in 0..count {
        let node = build_node(
            KeyPair::generate(),
            ([127, 0, 0, 1], 9000 + port).into(),
            net.clone(),
            ledger.clone(),
            params.clone(),
        )
        .await;
        net.register(node.node.dispatcher());
        ledger.add_peer(node.listing.clone()).await;
        nodes.push(node);
    }
    nodes
}

/// Ingest on `origin`, publish the ticket and let every node sync.
async fn publish(origin: &Node, nodes: &[Node], ledger: &StaticLedger) -> (ArtworkHash, Vec<ChunkId>) {
    let data = artifact();
    let art = ArtworkHash::of(&data);
    let ingested = origin
        .manager()
        .ingest_artifact(data, art, None)
        .await
        .expect("ingest");
    assert_eq!(ingested.chunk_ids.len(), 100);

    ledger
        .add_ticket(ConfirmedTicket {
            txid: "activation-1".into(),
            height: 12,
            artwork_hash: art,
            chunk_ids: ingested.chunk_ids.clone(),
            thumbnail_id: None,
        })
        .await;
    for node in nodes {
        node.node.sync_ledger().await.expect("sync");
    }

    let summary = origin
        .manager()
        .reconcile_temp_storage()
        .await
        .expect("reconcile");
    assert_eq!(summary.valid, 100);
    (art, ingested.chunk_ids)
}

#[tokio::test]
async fn test_full_replication_and_reconstruction() {
    let net = Arc::new(MemoryNetwork::new());
    let ledger = Arc::new(StaticLedger::new());
    let nodes = network(&net, &ledger, 3, params(3)).await;
    let (art, ids) = publish(&nodes[0], &nodes, &ledger).await;

    for node in &nodes[1..] {
        assert_eq!(node.fetch_until_idle().await, ids.len());
        assert!(node
            .manager()
            .missing_chunks(1000)
            .await
            .expect("missing")
            .is_empty());
    }

    let original = artifact();
    for node in &nodes {
        let rebuilt = node
            .manager()
            .reconstruct_artifact(&art)
            .await
            .expect("reconstruct");
        assert_eq!(rebuilt, original);
    }
}

#[tokio::test]
async fn test_chunks_only_land_on_ranked_owners() {
    let net = Arc::new(MemoryNetwork::new());
    let ledger = Arc::new(StaticLedger::new());
    let nodes = network(&net, &ledger, 5, params(2)).await;
    let origin = &nodes[0];
    let (_, ids) = publish(origin, &nodes, &ledger).await;

    for node in &nodes[1..] {
        node.fetch_until_idle().await;
    }

    for id in &ids {
        let served_by_origin = origin.owns(id).await;
        for node in &nodes[1..] {
            let stored = node
                .manager()
                .get_chunk_if_stored(id)
                .await
                .expect("get")
                .is_some();
            // Only the origin holds the bytes, so an owner can replicate a
            // chunk only when the origin is a ranked owner too.
            let expected = node.owns(id).await && served_by_origin;
            assert_eq!(stored, expected, "chunk {} on {}", id.short(), node.id().short());
        }
    }
}

#[tokio::test]
async fn test_departed_peer_is_dropped_from_rankings() {
    let net = Arc::new(MemoryNetwork::new());
    let ledger = Arc::new(StaticLedger::new());
    let nodes = network(&net, &ledger, 3, params(3)).await;
    let (_, ids) = publish(&nodes[0], &nodes, &ledger).await;

    let gone = nodes[2].id();
    ledger.remove_peer(&gone).await;
    nodes[1].node.sync_ledger().await.expect("sync");

    let index = nodes[1].manager().index();
    let index = index.read().await;
    for id in &ids {
        let owners = index.owners_of(id);
        assert_eq!(owners.len(), 2);
        assert!(!owners.contains(&gone));
    }
}
