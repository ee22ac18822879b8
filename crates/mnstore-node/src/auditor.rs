//! Spot-check auditor.
//!
//! Picks random stored chunks this node owns, digests a random
//! `AUDIT_RANGE_LEN`-byte window of each and asks every other ranked owner
//! for the digest of the same window. Disagreements are logged and reported
//! to the caller; nothing else happens to the peer.

use std::sync::Arc;

use mnstore_crypto::hash::{audit_digest, not_found_digest};
use mnstore_transport::RpcClient;
use mnstore_types::{ChunkId, PeerId, AUDIT_RANGE_LEN};
use rand::Rng;
use tracing::{debug, info, warn};

use crate::manager::ChunkManager;
use crate::Result;

/// A peer whose answer differed from the local digest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Discrepancy {
    pub peer: PeerId,
    pub chunk_id: ChunkId,
    /// The peer answered with the not-found sentinel.
    pub missing: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AuditReport {
    /// Chunks audited.
    pub checked: usize,
    /// Chunks too small to audit.
    pub skipped: usize,
    pub matched: usize,
    pub unreachable: usize,
    /// Chunks whose local copy could not be read.
    pub errors: usize,
    pub discrepancies: Vec<Discrepancy>,
}

pub struct SpotCheckAuditor {
    manager: Arc<ChunkManager>,
    client: Arc<RpcClient>,
}

impl SpotCheckAuditor {
    pub fn new(manager: Arc<ChunkManager>, client: Arc<RpcClient>) -> Self {
        Self { manager, client }
    }

    /// Audit `audit_sample_size` random owned chunks.
    pub async fn run_round(&self) -> Result<AuditReport> {
        let n = self.manager.params().audit_sample_size;
        let sample = self.manager.random_owned_stored_chunks(n).await?;
        let mut report = AuditReport::default();
        for id in sample {
            if let Err(e) = self.audit_chunk(id, &mut report).await {
                warn!(chunk_id = %id.short(), error = %e, "could not audit chunk");
                report.errors += 1;
            }
        }
        if report.checked > 0 || report.errors > 0 {
            info!(
                checked = report.checked,
                matched = report.matched,
                discrepancies = report.discrepancies.len(),
                unreachable = report.unreachable,
                errors = report.errors,
                "spot-check round complete"
            );
        }
        Ok(report)
    }

    async fn audit_chunk(&self, id: ChunkId, report: &mut AuditReport) -> Result<()> {
        let Some(data) = self.manager.get_chunk_if_stored(&id).await? else {
            return Ok(());
        };
        if data.len() <= AUDIT_RANGE_LEN {
            debug!(chunk_id = %id.short(), len = data.len(), "chunk too small to audit");
            report.skipped += 1;
            return Ok(());
        }

        let start = rand::thread_rng().gen_range(0..=data.len() - AUDIT_RANGE_LEN);
        let end = start + AUDIT_RANGE_LEN;
        let expected = audit_digest(&data[start..end]);
        report.checked += 1;

        let local = self.manager.local_id();
        let owners: Vec<PeerId> = self
            .manager
            .index()
            .read()
            .await
            .owners_of(&id)
            .into_iter()
            .filter(|p| *p != local)
            .collect();

        for owner in owners {
            let Some(peer) = self.manager.peer(&owner).await else {
                continue;
            };
            match self
                .client
                .spot_check(&peer, &id, start as u64, end as u64)
                .await
            {
                Ok(digest) if digest == expected => report.matched += 1,
                Ok(digest) => {
                    let missing = digest == not_found_digest();
                    warn!(
                        chunk_id = %id.short(),
                        peer = %owner.short(),
                        start,
                        end,
                        missing,
                        "spot-check mismatch"
                    );
                    report.discrepancies.push(Discrepancy {
                        peer: owner,
                        chunk_id: id,
                        missing,
                    });
                }
                Err(e) => {
                    warn!(chunk_id = %id.short(), peer = %owner.short(), error = %e, "spot-check failed");
                    report.unreachable += 1;
                }
            }
        }
        Ok(())
    }
}
