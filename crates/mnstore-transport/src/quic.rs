//! QUIC transport for the replication RPC.
//!
//! One [`quinn`] endpoint per node both listens and dials. Its certificate is
//! self-signed and regenerated at every start: TLS protects the link, and
//! the peer is authenticated by the envelope signature.
//!
//! Each request gets its own bidirectional stream carrying one frame each
//! way, `[len: u32 LE][envelope]`, after which the writer finishes its half.
//! ALPN is `mnstore/1`.

use std::collections::HashMap;
use std::fmt::Display;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mnstore_types::Peer;
use quinn::{Connection, Endpoint, Incoming, RecvStream, SendStream};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, WebPkiSupportedAlgorithms};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use crate::rpc::{Exchange, RpcDispatcher};
use crate::{Result, TransportError};

pub const ALPN: &[u8] = b"mnstore/1";

pub const DEFAULT_IDLE_TIMEOUT_MS: u32 = 30_000;
pub const DEFAULT_MAX_BI_STREAMS: u32 = 128;

/// Name in the self-signed certificate and in every dial.
const SERVER_NAME: &str = "mnstore-node";

#[derive(Clone, Debug)]
pub struct QuicConfig {
    pub bind_addr: SocketAddr,
    pub idle_timeout_ms: u32,
    /// Concurrent requests a peer may have open on one connection.
    pub max_bi_streams: u32,
    /// Largest frame accepted in either direction.
    pub max_message_size: usize,
}

impl Default for QuicConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 0)),
            idle_timeout_ms: DEFAULT_IDLE_TIMEOUT_MS,
            max_bi_streams: DEFAULT_MAX_BI_STREAMS,
            max_message_size: crate::envelope::DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

/// The node's endpoint. Serves with [`QuicNode::serve`] and dials through
/// [`QuicExchange`].
pub struct QuicNode {
    endpoint: Endpoint,
    local_addr: SocketAddr,
    max_message_size: usize,
}

impl QuicNode {
    /// Bind the endpoint. Must run inside a tokio runtime.
    pub fn new(config: QuicConfig) -> Result<Self> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let mut endpoint = Endpoint::server(server_config(&config, provider.clone())?, config.bind_addr)
            .map_err(io_error)?;
        endpoint.set_default_client_config(client_config(provider)?);
        let local_addr = endpoint.local_addr().map_err(io_error)?;
        info!(%local_addr, "QUIC endpoint bound");

        Ok(Self {
            endpoint,
            local_addr,
            max_message_size: config.max_message_size,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Answer requests with `dispatcher` until `shutdown` fires, then close
    /// every connection.
    pub async fn serve(
        self: Arc<Self>,
        dispatcher: Arc<RpcDispatcher>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        info!(addr = %self.local_addr, "replication RPC server listening");
        loop {
            let incoming = tokio::select! {
                incoming = self.endpoint.accept() => incoming,
                _ = shutdown.recv() => None,
            };
            let Some(incoming) = incoming else {
                break;
            };
            let dispatcher = dispatcher.clone();
            let max_size = self.max_message_size;
            tokio::spawn(async move {
                if let Err(e) = serve_connection(incoming, dispatcher, max_size).await {
                    debug!(error = %e, "connection ended");
                }
            });
        }
        self.endpoint.close(quinn::VarInt::from_u32(0), b"shutdown");
        info!("replication RPC server stopped");
    }
}

async fn serve_connection(
    incoming: Incoming,
    dispatcher: Arc<RpcDispatcher>,
    max_size: usize,
) -> Result<()> {
    let connection = incoming.await.map_err(connection_error)?;
    let remote = connection.remote_address();
    loop {
        let (mut send, mut recv) = connection.accept_bi().await.map_err(connection_error)?;
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move {
            let answered = async {
                let request = read_frame(&mut recv, max_size).await?;
                let reply = dispatcher.process(&request).await?;
                write_frame(&mut send, &reply).await
            };
            if let Err(e) = answered.await {
                warn!(%remote, error = %e, "dropping request stream");
            }
        });
    }
}

/// [`Exchange`] over QUIC, reusing one connection per peer address.
pub struct QuicExchange {
    node: Arc<QuicNode>,
    connections: Mutex<HashMap<SocketAddr, Connection>>,
}

impl QuicExchange {
    pub fn new(node: Arc<QuicNode>) -> Self {
        Self {
            node,
            connections: Mutex::new(HashMap::new()),
        }
    }

    async fn connection(&self, addr: SocketAddr) -> Result<Connection> {
        let mut cache = self.connections.lock().await;
        if let Some(open) = cache.get(&addr).filter(|c| c.close_reason().is_none()) {
            return Ok(open.clone());
        }
        let connection = self
            .node
            .endpoint
            .connect(addr, SERVER_NAME)
            .map_err(connection_error)?
            .await
            .map_err(connection_error)?;
        debug!(remote = %addr, "QUIC connection established");
        cache.insert(addr, connection.clone());
        Ok(connection)
    }
}

#[async_trait]
impl Exchange for QuicExchange {
    async fn exchange(&self, peer: &Peer, request: Vec<u8>) -> Result<Vec<u8>> {
        let connection = self.connection(peer.address).await?;
        let (mut send, mut recv) = connection.open_bi().await.map_err(connection_error)?;
        write_frame(&mut send, &request).await?;
        read_frame(&mut recv, self.node.max_message_size).await
    }
}

/// Write one frame and finish the stream.
async fn write_frame(stream: &mut SendStream, data: &[u8]) -> Result<()> {
    let len = u32::try_from(data.len()).map_err(|_| {
        TransportError::ProtocolViolation(format!(
            "frame of {} bytes does not fit the length prefix",
            data.len()
        ))
    })?;
    stream.write_all(&len.to_le_bytes()).await.map_err(io_error)?;
    stream.write_all(data).await.map_err(io_error)?;
    stream.finish().map_err(io_error)
}

async fn read_frame(stream: &mut RecvStream, max_size: usize) -> Result<Vec<u8>> {
    let mut prefix = [0u8; 4];
    stream.read_exact(&mut prefix).await.map_err(io_error)?;
    let len = u32::from_le_bytes(prefix) as usize;
    if len > max_size {
        return Err(TransportError::ProtocolViolation(format!(
            "frame of {len} bytes exceeds limit {max_size}"
        )));
    }
    let mut frame = vec![0u8; len];
    stream.read_exact(&mut frame).await.map_err(io_error)?;
    Ok(frame)
}

fn io_error(e: impl Display) -> TransportError {
    TransportError::Io(e.to_string())
}

fn connection_error(e: impl Display) -> TransportError {
    TransportError::Connection(e.to_string())
}

fn tls_error<E: Display>(context: &'static str) -> impl Fn(E) -> TransportError {
    move |e| TransportError::Tls(format!("{context}: {e}"))
}

fn self_signed_cert() -> Result<(CertificateDer<'static>, PrivateKeyDer<'static>)> {
    let key = rcgen::KeyPair::generate_for(&rcgen::PKCS_ED25519).map_err(tls_error("certificate key"))?;
    let cert = rcgen::CertificateParams::new(vec![SERVER_NAME.to_string()])
        .map_err(tls_error("certificate params"))?
        .self_signed(&key)
        .map_err(tls_error("self-signed certificate"))?;
    let key_der = PrivatePkcs8KeyDer::from(key.serialize_der());
    Ok((cert.der().clone(), PrivateKeyDer::Pkcs8(key_der)))
}

fn server_config(config: &QuicConfig, provider: Arc<CryptoProvider>) -> Result<quinn::ServerConfig> {
    let (cert, key) = self_signed_cert()?;
    let mut tls = rustls::ServerConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(tls_error("server TLS versions"))?
        .with_no_client_auth()
        .with_single_cert(vec![cert], key)
        .map_err(tls_error("server certificate"))?;
    tls.alpn_protocols = vec![ALPN.to_vec()];
    let crypto = quinn::crypto::rustls::QuicServerConfig::try_from(tls)
        .map_err(tls_error("QUIC server crypto"))?;

    let idle = quinn::IdleTimeout::try_from(Duration::from_millis(config.idle_timeout_ms.into()))
        .map_err(|e| TransportError::Internal(format!("idle timeout: {e}")))?;
    let mut transport = quinn::TransportConfig::default();
    transport
        .max_idle_timeout(Some(idle))
        .max_concurrent_bidi_streams(config.max_bi_streams.into());

    let mut server = quinn::ServerConfig::with_crypto(Arc::new(crypto));
    server.transport_config(Arc::new(transport));
    Ok(server)
}

fn client_config(provider: Arc<CryptoProvider>) -> Result<quinn::ClientConfig> {
    let verifier = Arc::new(SelfSignedPeer {
        algorithms: provider.signature_verification_algorithms,
    });
    let mut tls = rustls::ClientConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(tls_error("client TLS versions"))?
        .dangerous()
        .with_custom_certificate_verifier(verifier)
        .with_no_client_auth();
    tls.alpn_protocols = vec![ALPN.to_vec()];
    let crypto = quinn::crypto::rustls::QuicClientConfig::try_from(tls)
        .map_err(tls_error("QUIC client crypto"))?;
    Ok(quinn::ClientConfig::new(Arc::new(crypto)))
}

/// Accepts any self-signed certificate but still requires the handshake to
/// be signed by the key in it.
#[derive(Debug)]
struct SelfSignedPeer {
    algorithms: WebPkiSupportedAlgorithms,
}

impl ServerCertVerifier for SelfSignedPeer {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback() -> QuicConfig {
        QuicConfig {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            ..QuicConfig::default()
        }
    }

    #[test]
    fn test_default_config() {
        let config = QuicConfig::default();
        assert_eq!(config.idle_timeout_ms, DEFAULT_IDLE_TIMEOUT_MS);
        assert_eq!(config.max_message_size, 100 * 1024 * 1024);
    }

    #[test]
    fn test_tls_configs_build() {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        assert!(server_config(&QuicConfig::default(), provider.clone()).is_ok());
        assert!(client_config(provider).is_ok());
    }

    #[test]
    fn test_verifier_accepts_ed25519_handshakes() {
        let provider = rustls::crypto::ring::default_provider();
        let verifier = SelfSignedPeer {
            algorithms: provider.signature_verification_algorithms,
        };
        assert!(verifier
            .supported_verify_schemes()
            .contains(&SignatureScheme::ED25519));
    }

    #[tokio::test]
    #[ignore]
    async fn test_oversized_frame_rejected() {
        let server = QuicNode::new(loopback()).expect("server endpoint");
        let client = QuicNode::new(loopback()).expect("client endpoint");
        let addr = server.local_addr();

        let reader = tokio::spawn(async move {
            let incoming = server.endpoint.accept().await.expect("incoming");
            let connection = incoming.await.expect("handshake");
            let (_send, mut recv) = connection.accept_bi().await.expect("stream");
            read_frame(&mut recv, 8).await
        });

        let connection = client
            .endpoint
            .connect(addr, SERVER_NAME)
            .expect("connect")
            .await
            .expect("handshake");
        let (mut send, _recv) = connection.open_bi().await.expect("open");
        write_frame(&mut send, &[0u8; 16]).await.expect("write");

        let read = reader.await.expect("reader task");
        assert!(matches!(read, Err(TransportError::ProtocolViolation(_))));
    }
}
