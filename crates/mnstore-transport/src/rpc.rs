//! RPC dispatch (server side) and calls (client side).
//!
//! The dispatcher never fails a well-formed, correctly signed request:
//! handler errors, unknown names and malformed bodies all become `ERROR`
//! responses so the caller's channel stays usable. An envelope that decodes
//! but fails validation is answered with an `ERROR` addressed to its claimed
//! sender. Bytes that are not an envelope at all are dropped.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mnstore_crypto::ed25519::KeyPair;
use mnstore_types::{ChunkId, Peer, PeerId};
use tracing::{debug, warn};

use crate::envelope::{Envelope, RpcLimits};
use crate::messages::{
    FetchChunkResponse, PingBody, RawRequest, RawResponse, Request, Response, SpotCheckResponse,
};
use crate::{cbor, Result, TransportError};

/// Name used in replies when the request name cannot be read.
const UNKNOWN_REQUEST: &str = "UNKNOWN_REQ";

/// Default per-call timeout.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Application side of the protocol.
#[async_trait]
pub trait RpcHandler: Send + Sync {
    /// Handle one authenticated request from `sender`. An `Err` is sent back
    /// as an `ERROR` response carrying its message.
    async fn handle(&self, sender: PeerId, request: Request) -> Result<Response>;
}

/// Moves one encoded request to a peer and returns its encoded reply.
#[async_trait]
pub trait Exchange: Send + Sync {
    async fn exchange(&self, peer: &Peer, request: Vec<u8>) -> Result<Vec<u8>>;
}

/// Server-side envelope handling around an [`RpcHandler`].
pub struct RpcDispatcher {
    keys: KeyPair,
    local_id: PeerId,
    limits: RpcLimits,
    handler: Arc<dyn RpcHandler>,
}

impl RpcDispatcher {
    pub fn new(keys: KeyPair, limits: RpcLimits, handler: Arc<dyn RpcHandler>) -> Self {
        let local_id = PeerId::from_bytes(keys.identifier());
        Self {
            keys,
            local_id,
            limits,
            handler,
        }
    }

    pub fn local_id(&self) -> PeerId {
        self.local_id
    }

    pub fn limits(&self) -> &RpcLimits {
        &self.limits
    }

    /// Process one encoded request envelope and produce the encoded reply.
    pub async fn process(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        let envelope = match Envelope::open(bytes, &self.local_id, &self.limits) {
            Ok(envelope) => envelope,
            Err(e) => return self.reject(bytes, e),
        };
        let sender = envelope.sender_id;

        let reply = match cbor::from_slice::<RawRequest>(&envelope.data) {
            Ok(raw) => self.dispatch(sender, raw).await,
            Err(e) => {
                warn!(peer = %sender.short(), error = %e, "undecodable request");
                Response::error(UNKNOWN_REQUEST, &e.to_string())
            }
        };

        let data = cbor::to_vec(&reply)?;
        Envelope::seal(&self.keys, sender, data)?.to_bytes()
    }

    /// Answer an envelope that failed validation, if it names a sender.
    fn reject(&self, bytes: &[u8], err: TransportError) -> Result<Vec<u8>> {
        if bytes.len() > self.limits.max_message_size {
            return Err(err);
        }
        let Ok(claimed) = cbor::from_slice::<Envelope>(bytes) else {
            return Err(err);
        };
        let name = cbor::from_slice::<RawRequest>(&claimed.data)
            .map(|raw| raw.0)
            .unwrap_or_else(|_| UNKNOWN_REQUEST.to_string());
        warn!(peer = %claimed.sender_id.short(), request = %name, error = %err, "rejecting envelope");

        let data = cbor::to_vec(&Response::error(&name, &err.to_string()))?;
        Envelope::seal(&self.keys, claimed.sender_id, data)?.to_bytes()
    }

    async fn dispatch(&self, sender: PeerId, raw: RawRequest) -> RawResponse {
        let name = raw.0.clone();
        let request = match Request::from_raw(&raw) {
            Ok(request) => request,
            Err(e) => {
                warn!(peer = %sender.short(), request = %name, error = %e, "rejecting request");
                return Response::error(&name, &e.to_string());
            }
        };

        debug!(peer = %sender.short(), request = %name, "handling request");
        match self.handler.handle(sender, request).await {
            Ok(response) => match response.to_raw() {
                Ok(raw) => raw,
                Err(e) => Response::error(&name, &e.to_string()),
            },
            Err(e) => {
                warn!(peer = %sender.short(), request = %name, error = %e, "request failed");
                Response::error(&name, &e.to_string())
            }
        }
    }
}

/// Client for calling other masternodes.
pub struct RpcClient {
    keys: KeyPair,
    local_id: PeerId,
    limits: RpcLimits,
    timeout: Duration,
    exchange: Arc<dyn Exchange>,
}

impl RpcClient {
    pub fn new(
        keys: KeyPair,
        limits: RpcLimits,
        timeout: Duration,
        exchange: Arc<dyn Exchange>,
    ) -> Self {
        let local_id = PeerId::from_bytes(keys.identifier());
        Self {
            keys,
            local_id,
            limits,
            timeout,
            exchange,
        }
    }

    pub fn local_id(&self) -> PeerId {
        self.local_id
    }

    /// Send `request` to `peer` and wait for its response, bounded by the
    /// client timeout.
    pub async fn call(&self, peer: &Peer, request: Request) -> Result<Response> {
        let name = request.name();
        let data = cbor::to_vec(&request.to_raw()?)?;
        let bytes = Envelope::seal(&self.keys, peer.identifier, data)?.to_bytes()?;

        let reply = tokio::time::timeout(self.timeout, self.exchange.exchange(peer, bytes))
            .await
            .map_err(|_| TransportError::Timeout(self.timeout.as_millis() as u64))??;

        let envelope = Envelope::open(&reply, &self.local_id, &self.limits)?;
        if envelope.sender_id != peer.identifier {
            return Err(TransportError::ProtocolViolation(format!(
                "reply signed by {} instead of {}",
                envelope.sender_id.short(),
                peer.identifier.short()
            )));
        }
        let raw: RawResponse = cbor::from_slice(&envelope.data)?;
        Response::from_raw(name, &raw)
    }

    /// Ask `peer` for a chunk. `Ok(None)` means the peer does not have it.
    pub async fn fetch_chunk(&self, peer: &Peer, id: &ChunkId) -> Result<Option<Vec<u8>>> {
        match self.call(peer, Request::fetch_chunk(id)).await? {
            Response::FetchChunk(FetchChunkResponse { chunk }) => Ok(chunk),
            other => Err(unexpected(other)),
        }
    }

    /// Ask `peer` for the digest of `id[start..end)`.
    pub async fn spot_check(&self, peer: &Peer, id: &ChunkId, start: u64, end: u64) -> Result<String> {
        match self.call(peer, Request::spot_check(id, start, end)).await? {
            Response::SpotCheck(SpotCheckResponse { digest }) => Ok(digest),
            other => Err(unexpected(other)),
        }
    }

    pub async fn ping(&self, peer: &Peer, data: Vec<u8>) -> Result<Vec<u8>> {
        match self.call(peer, Request::Ping(PingBody { data })).await? {
            Response::Ping(PingBody { data }) => Ok(data),
            other => Err(unexpected(other)),
        }
    }
}

fn unexpected(response: Response) -> TransportError {
    TransportError::ProtocolViolation(format!("unexpected response {}", response.name()))
}
