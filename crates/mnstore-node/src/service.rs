//! Server side of the replication protocol.
//!
//! A miss is an answer, not an error: `FETCHCHUNK` returns a null chunk and
//! `SPOTCHECK` returns the digest of the not-found sentinel. Only malformed
//! requests and local failures produce `ERROR` responses.

use std::sync::Arc;

use async_trait::async_trait;
use mnstore_crypto::hash::{audit_digest, not_found_digest};
use mnstore_transport::messages::{
    FetchChunkRequest, FetchChunkResponse, SpotCheckRequest, SpotCheckResponse,
};
use mnstore_transport::{Request, Response, RpcHandler, TransportError};
use mnstore_types::{ChunkId, PeerId, CHUNK_SIZE};
use tracing::debug;

use crate::manager::ChunkManager;
use crate::NodeError;

type RpcResult<T> = mnstore_transport::Result<T>;

/// Answers replication requests from the local chunk stores.
pub struct ReplicationService {
    manager: Arc<ChunkManager>,
}

impl ReplicationService {
    pub fn new(manager: Arc<ChunkManager>) -> Self {
        Self { manager }
    }

    async fn fetch_chunk(&self, sender: PeerId, req: FetchChunkRequest) -> RpcResult<Response> {
        let id = parse_chunk_id(&req.chunkid)?;
        let chunk = self
            .manager
            .get_chunk_if_stored(&id)
            .await
            .map_err(internal)?;
        if chunk.is_none() {
            debug!(peer = %sender.short(), chunk_id = %id.short(), "fetch miss");
        }
        Ok(Response::FetchChunk(FetchChunkResponse { chunk }))
    }

    async fn spot_check(&self, req: SpotCheckRequest) -> RpcResult<Response> {
        let id = parse_chunk_id(&req.chunkid)?;
        if req.start >= req.end || req.end > CHUNK_SIZE as u64 {
            return Err(TransportError::ProtocolViolation(format!(
                "invalid range {}..{}",
                req.start, req.end
            )));
        }
        let chunk = self
            .manager
            .get_chunk_if_stored(&id)
            .await
            .map_err(internal)?;
        let digest = match chunk {
            Some(data) => {
                let end = (req.end as usize).min(data.len());
                let start = (req.start as usize).min(end);
                audit_digest(&data[start..end])
            }
            None => {
                debug!(chunk_id = %id.short(), "spot-check miss");
                not_found_digest()
            }
        };
        Ok(Response::SpotCheck(SpotCheckResponse { digest }))
    }
}

#[async_trait]
impl RpcHandler for ReplicationService {
    async fn handle(&self, sender: PeerId, request: Request) -> RpcResult<Response> {
        match request {
            Request::FetchChunk(req) => self.fetch_chunk(sender, req).await,
            Request::SpotCheck(req) => self.spot_check(req).await,
            Request::Ping(body) => Ok(Response::Ping(body)),
        }
    }
}

fn parse_chunk_id(hex: &str) -> RpcResult<ChunkId> {
    ChunkId::from_hex(hex)
        .map_err(|e| TransportError::ProtocolViolation(format!("bad chunkid: {e}")))
}

fn internal(e: NodeError) -> TransportError {
    TransportError::Internal(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnstore_transport::messages::PingBody;
    use tempfile::TempDir;

    use crate::params::ReplicationParams;
    use crate::testing::*;

    struct Setup {
        _dir: TempDir,
        manager: Arc<ChunkManager>,
        service: ReplicationService,
    }

    async fn setup() -> Setup {
        let dir = TempDir::new().expect("tempdir");
        let manager =
            Arc::new(open_manager(&dir, local().identifier, ReplicationParams::default()).await);
        let service = ReplicationService::new(manager.clone());
        Setup {
            _dir: dir,
            manager,
            service,
        }
    }

    fn sender() -> PeerId {
        PeerId::from_bytes([1; 32])
    }

    async fn fetch(s: &Setup, id: &ChunkId) -> Option<Vec<u8>> {
        match s
            .service
            .handle(sender(), Request::fetch_chunk(id))
            .await
            .expect("fetch")
        {
            Response::FetchChunk(FetchChunkResponse { chunk }) => chunk,
            other => unreachable!("unexpected {other:?}"),
        }
    }

    async fn spot(s: &Setup, id: &ChunkId, start: u64, end: u64) -> RpcResult<String> {
        match s
            .service
            .handle(sender(), Request::spot_check(id, start, end))
            .await?
        {
            Response::SpotCheck(SpotCheckResponse { digest }) => Ok(digest),
            other => unreachable!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_ping_echo() {
        let s = setup().await;
        let body = PingBody {
            data: b"hi".to_vec(),
        };
        let resp = s
            .service
            .handle(sender(), Request::Ping(body.clone()))
            .await
            .expect("ping");
        assert_eq!(resp, Response::Ping(body));
    }

    #[tokio::test]
    async fn test_fetch_stored_and_missing() {
        let s = setup().await;
        let data = b"replicated bytes".to_vec();
        let id = owned_chunk(&s.manager, &data).await;
        assert_eq!(fetch(&s, &id).await, None);

        s.manager.on_fetch_success(id, data.clone()).await.expect("store");
        assert_eq!(fetch(&s, &id).await, Some(data));
        assert_eq!(fetch(&s, &ChunkId::of(b"other")).await, None);
    }

    #[tokio::test]
    async fn test_fetch_unconfirmed_is_miss() {
        let s = setup().await;
        let data = b"temp only".to_vec();
        let id = ChunkId::of(&data);
        s.manager.create_chunk(id, art(), false).await.expect("create");
        s.manager.store_in_temp(id, data).await.expect("temp");
        assert_eq!(fetch(&s, &id).await, None);
    }

    #[tokio::test]
    async fn test_fetch_bad_chunkid() {
        let s = setup().await;
        let req = Request::FetchChunk(FetchChunkRequest {
            chunkid: "zz".into(),
        });
        let err = s.service.handle(sender(), req).await.expect_err("bad id");
        assert!(matches!(err, TransportError::ProtocolViolation(_)));
    }

    #[tokio::test]
    async fn test_spot_check_digest_and_sentinel() {
        let s = setup().await;
        let data: Vec<u8> = (0..4096u32).map(|i| (i % 256) as u8).collect();
        let id = owned_chunk(&s.manager, &data).await;

        let sentinel = spot(&s, &id, 0, 1024).await.expect("absent");
        assert_eq!(sentinel, not_found_digest());
        assert_eq!(spot(&s, &id, 0, 1024).await.expect("again"), sentinel);

        s.manager.on_fetch_success(id, data.clone()).await.expect("store");
        let digest = spot(&s, &id, 100, 1124).await.expect("present");
        assert_eq!(digest, audit_digest(&data[100..1124]));
        assert_ne!(digest, sentinel);
    }

    #[tokio::test]
    async fn test_spot_check_corrupt_copy_is_sentinel() {
        let s = setup().await;
        let data: Vec<u8> = (0..2048u32).map(|i| (i % 251) as u8).collect();
        let id = owned_chunk(&s.manager, &data).await;
        s.manager.on_fetch_success(id, data.clone()).await.expect("store");

        let mut rotten = data.clone();
        rotten[0] ^= 0xff;
        s.manager.persistent_store().put(&id, &rotten).expect("corrupt");

        // The untouched tail still matches on disk, but the copy as a whole
        // no longer verifies.
        let digest = spot(&s, &id, 1024, 2048).await.expect("spot");
        assert_eq!(digest, not_found_digest());
        assert!(!s.manager.persistent_store().exists(&id));
        assert_eq!(s.manager.missing_chunks(10).await.expect("missing"), vec![id]);
    }

    #[tokio::test]
    async fn test_spot_check_window_clamped_to_chunk() {
        let s = setup().await;
        let data = b"short chunk".to_vec();
        let id = owned_chunk(&s.manager, &data).await;
        s.manager.on_fetch_success(id, data.clone()).await.expect("store");

        assert_eq!(
            spot(&s, &id, 6, 1024).await.expect("tail"),
            audit_digest(&data[6..])
        );
        assert_eq!(
            spot(&s, &id, 512, 1024).await.expect("past end"),
            audit_digest(b"")
        );
    }

    #[tokio::test]
    async fn test_spot_check_range_validation() {
        let s = setup().await;
        let id = ChunkId::of(b"x");
        for (start, end) in [(10, 10), (20, 10), (0, CHUNK_SIZE as u64 + 1)] {
            let err = spot(&s, &id, start, end).await.expect_err("bad range");
            assert!(matches!(err, TransportError::ProtocolViolation(_)));
        }
        assert!(spot(&s, &id, 0, CHUNK_SIZE as u64).await.is_ok());
    }
}
