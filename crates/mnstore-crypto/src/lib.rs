//! # mnstore-crypto
//!
//! Hashing and signing primitives used by the chunk store and the
//! replication protocol.
//!
//! ## Modules
//!
//! - [`hash`]: content identifiers (SHA-512), encoded block hashes
//!   (SHA3-256) and spot-check digests (SHA3-512)
//! - [`ed25519`]: node credentials and envelope signatures

pub mod ed25519;
pub mod hash;

/// Error types for cryptographic operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("signature verification failed")]
    SignatureVerification,

    #[error("signature must be 64 bytes, got {0}")]
    InvalidSignatureLength(usize),

    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),
}

pub type Result<T> = std::result::Result<T, CryptoError>;
