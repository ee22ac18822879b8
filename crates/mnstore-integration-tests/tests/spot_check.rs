//! Integration test: spot-check audits between owners.
//!
//! The auditing node digests a random window of a chunk it holds and asks
//! every other owner for the digest of the same window. An owner without
//! the chunk answers with the not-found sentinel until it fetches it.

mod common;

use std::sync::Arc;

use common::build_node;
use mnstore_crypto::ed25519::KeyPair;
use mnstore_node::{ConfirmedTicket, Discrepancy, ReplicationParams, StaticLedger};
use mnstore_transport::memory::MemoryNetwork;
use mnstore_types::{ArtworkHash, ChunkId};

#[tokio::test]
async fn test_audit_flags_owner_until_it_replicates() {
    let net = Arc::new(MemoryNetwork::new());
    let ledger = Arc::new(StaticLedger::new());
    let params = ReplicationParams {
        replication_factor: 3,
        ..ReplicationParams::default()
    };

    let mut nodes = Vec::new();
    for port in 0..3u16 {
        let node = build_node(
            KeyPair::generate(),
            ([127, 0, 0, 1], 9100 + port).into(),
            net.clone(),
            ledger.clone(),
            params.clone(),
        )
        .await;
        net.register(node.node.dispatcher());
        ledger.add_peer(node.listing.clone()).await;
        nodes.push(node);
    }

    let data: Vec<u8> = (0..16_384u32).map(|i| (i % 253) as u8).collect();
    let id = ChunkId::of(&data);
    ledger
        .add_ticket(ConfirmedTicket {
            txid: "audit-1".into(),
            height: 4,
            artwork_hash: ArtworkHash::of(b"audited artwork"),
            chunk_ids: vec![id],
            thumbnail_id: None,
        })
        .await;
    for node in &nodes {
        node.node.sync_ledger().await.expect("sync");
    }
    for node in &nodes[..2] {
        node.manager()
            .on_fetch_success(id, data.clone())
            .await
            .expect("store");
    }

    let auditor = nodes[0].node.auditor();
    let report = auditor.run_round().await.expect("audit");
    assert_eq!(report.checked, 1);
    assert_eq!(report.matched, 1);
    assert_eq!(
        report.discrepancies,
        vec![Discrepancy {
            peer: nodes[2].id(),
            chunk_id: id,
            missing: true,
        }]
    );

    assert_eq!(nodes[2].fetch_until_idle().await, 1);
    let report = auditor.run_round().await.expect("audit");
    assert_eq!(report.matched, 2);
    assert!(report.discrepancies.is_empty());
}
