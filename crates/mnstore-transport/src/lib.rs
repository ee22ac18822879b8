//! # mnstore-transport
//!
//! Signed request/response transport between masternodes.
//!
//! - **Envelope** ([`envelope`]): sender/receiver ids, nonce, timestamp and
//!   an Ed25519 signature around every message
//! - **Messages** ([`messages`]): `[name, body]` requests and
//!   `[name, status, body]` responses with typed bodies
//! - **RPC** ([`rpc`]): server-side dispatch and a client with per-call timeouts
//! - **QUIC** ([`quic`]): one bidirectional stream per request
//! - **Memory** ([`memory`]): in-process network for tests and local setups
//! - **CBOR** ([`cbor`]): serialization helpers
//!
//! ## Architecture
//!
//! ```text
//! RpcClient::call                 RpcDispatcher::process
//!     |  Request                        ^  Envelope::open
//!     v                                 |
//! Envelope::seal  --- Exchange --->  bytes (QUIC stream or memory)
//! ```

pub mod cbor;
pub mod envelope;
pub mod memory;
pub mod messages;
pub mod quic;
pub mod rpc;

pub use envelope::{Envelope, RpcLimits};
pub use messages::{Request, Response};
pub use rpc::{Exchange, RpcClient, RpcDispatcher, RpcHandler};

/// Error types for transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// CBOR serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// CBOR deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Protocol violation (version, size, timestamp, addressing, names).
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// Envelope signature did not verify against the sender id.
    #[error("signature error: {0}")]
    Signature(String),

    /// The peer answered with an `ERROR` response.
    #[error("remote error: {0}")]
    RemoteError(String),

    /// The call did not complete in time.
    #[error("timed out after {0} ms")]
    Timeout(u64),

    /// TLS/certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    /// Connection could not be established or was lost.
    #[error("connection error: {0}")]
    Connection(String),

    /// I/O error (socket, stream read/write).
    #[error("I/O error: {0}")]
    Io(String),

    /// Internal error (should not occur in normal operation).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type alias for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;
