//! Ed25519 node credentials.
//!
//! A masternode is identified by its raw 32-byte public key. Envelopes are
//! signed with [`KeyPair::sign`] and checked with [`verify`] against the
//! `sender_id` they carry.

use ed25519_dalek::{Signer, Verifier};

use crate::{CryptoError, Result};

pub const PUBLIC_KEY_LEN: usize = 32;
pub const SECRET_KEY_LEN: usize = 32;
pub const SIGNATURE_LEN: usize = 64;

/// Signing credential of the local node. The secret is wiped on drop.
#[derive(Clone)]
pub struct KeyPair {
    signing: ed25519_dalek::SigningKey,
}

impl KeyPair {
    pub fn generate() -> Self {
        Self {
            signing: ed25519_dalek::SigningKey::generate(&mut rand::rngs::OsRng),
        }
    }

    pub fn from_bytes(secret: &[u8; SECRET_KEY_LEN]) -> Self {
        Self {
            signing: ed25519_dalek::SigningKey::from_bytes(secret),
        }
    }

    /// The node identifier: the raw public key.
    pub fn identifier(&self) -> [u8; PUBLIC_KEY_LEN] {
        self.signing.verifying_key().to_bytes()
    }

    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_LEN] {
        self.signing.sign(message).to_bytes()
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("identifier", &hex::encode(self.identifier()))
            .finish()
    }
}

/// Check `signature` over `message` by the holder of `public_key`.
pub fn verify(public_key: &[u8; PUBLIC_KEY_LEN], message: &[u8], signature: &[u8]) -> Result<()> {
    let key = ed25519_dalek::VerifyingKey::from_bytes(public_key)
        .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))?;
    let signature = ed25519_dalek::Signature::from_slice(signature)
        .map_err(|_| CryptoError::InvalidSignatureLength(signature.len()))?;
    key.verify(message, &signature)
        .map_err(|_| CryptoError::SignatureVerification)
}
