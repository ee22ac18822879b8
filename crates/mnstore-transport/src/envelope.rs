//! Signed message envelope.
//!
//! ## Wire format
//!
//! ```text
//! Envelope {
//!     version:     u8,        // 1
//!     sender_id:   hex,       // sender's Ed25519 public key
//!     receiver_id: hex,       // intended receiver
//!     data:        bytes,     // CBOR-encoded request or response
//!     nonce:       [u8; 32],  // random
//!     timestamp:   u64,       // Unix seconds
//!     signature:   bytes,     // Ed25519 over the envelope with empty signature
//! }
//! ```

use std::time::{SystemTime, UNIX_EPOCH};

use mnstore_crypto::ed25519::{self, KeyPair};
use mnstore_types::PeerId;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_with::serde_as;

use crate::{cbor, Result, TransportError};

/// Envelope format version.
pub const ENVELOPE_VERSION: u8 = 1;

/// Length of the random nonce.
pub const NONCE_LEN: usize = 32;

/// Default hard ceiling on an encoded envelope (100 MiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 100 * 1024 * 1024;

/// Default accepted clock skew in either direction.
pub const DEFAULT_TIMESTAMP_WINDOW_SECS: u64 = 60;

/// Acceptance limits applied to every incoming envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RpcLimits {
    pub max_message_size: usize,
    pub timestamp_window_secs: u64,
}

impl Default for RpcLimits {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            timestamp_window_secs: DEFAULT_TIMESTAMP_WINDOW_SECS,
        }
    }
}

#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub version: u8,
    pub sender_id: PeerId,
    pub receiver_id: PeerId,
    #[serde_as(as = "serde_with::Bytes")]
    pub data: Vec<u8>,
    #[serde_as(as = "serde_with::Bytes")]
    pub nonce: [u8; NONCE_LEN],
    pub timestamp: u64,
    #[serde_as(as = "serde_with::Bytes")]
    pub signature: Vec<u8>,
}

pub(crate) fn unix_now() -> Result<u64> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|e| TransportError::Internal(format!("system time error: {e}")))
}

impl Envelope {
    /// Wrap `data` for `receiver`, signed by `keys`.
    pub fn seal(keys: &KeyPair, receiver: PeerId, data: Vec<u8>) -> Result<Self> {
        Self::seal_at(keys, receiver, data, unix_now()?)
    }

    pub fn seal_at(keys: &KeyPair, receiver: PeerId, data: Vec<u8>, timestamp: u64) -> Result<Self> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);

        let mut envelope = Self {
            version: ENVELOPE_VERSION,
            sender_id: PeerId::from_bytes(keys.identifier()),
            receiver_id: receiver,
            data,
            nonce,
            timestamp,
            signature: Vec::new(),
        };
        envelope.signature = keys.sign(&envelope.signing_bytes()?).to_vec();
        Ok(envelope)
    }

    /// CBOR of this envelope with an empty signature.
    pub fn signing_bytes(&self) -> Result<Vec<u8>> {
        let unsigned = Self {
            signature: Vec::new(),
            ..self.clone()
        };
        cbor::to_vec(&unsigned)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        cbor::to_vec(self)
    }

    /// Decode and validate an envelope addressed to `local`.
    pub fn open(bytes: &[u8], local: &PeerId, limits: &RpcLimits) -> Result<Self> {
        Self::open_at(bytes, local, limits, unix_now()?)
    }

    /// [`Envelope::open`] against an explicit clock.
    pub fn open_at(bytes: &[u8], local: &PeerId, limits: &RpcLimits, now: u64) -> Result<Self> {
        if bytes.len() > limits.max_message_size {
            return Err(TransportError::ProtocolViolation(format!(
                "message of {} bytes exceeds limit {}",
                bytes.len(),
                limits.max_message_size
            )));
        }
        let envelope: Self = cbor::from_slice(bytes)?;

        if envelope.version != ENVELOPE_VERSION {
            return Err(TransportError::ProtocolViolation(format!(
                "unsupported envelope version {}",
                envelope.version
            )));
        }
        if envelope.receiver_id != *local {
            return Err(TransportError::ProtocolViolation(format!(
                "envelope addressed to {}",
                envelope.receiver_id.short()
            )));
        }
        if now.abs_diff(envelope.timestamp) > limits.timestamp_window_secs {
            return Err(TransportError::ProtocolViolation(format!(
                "timestamp {} outside the {}s window around {now}",
                envelope.timestamp, limits.timestamp_window_secs
            )));
        }

        ed25519::verify(
            envelope.sender_id.as_bytes(),
            &envelope.signing_bytes()?,
            &envelope.signature,
        )
        .map_err(|e| TransportError::Signature(e.to_string()))?;

        Ok(envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> (KeyPair, KeyPair) {
        (KeyPair::generate(), KeyPair::generate())
    }

    fn id(kp: &KeyPair) -> PeerId {
        PeerId::from_bytes(kp.identifier())
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let (alice, bob) = pair();
        let env = Envelope::seal(&alice, id(&bob), b"hello".to_vec()).expect("seal");
        let bytes = env.to_bytes().expect("encode");
        let opened = Envelope::open(&bytes, &id(&bob), &RpcLimits::default()).expect("open");
        assert_eq!(opened.data, b"hello");
        assert_eq!(opened.sender_id, id(&alice));
    }

    #[test]
    fn test_wrong_receiver_rejected() {
        let (alice, bob) = pair();
        let env = Envelope::seal(&alice, id(&bob), vec![]).expect("seal");
        let bytes = env.to_bytes().expect("encode");
        let err = Envelope::open(&bytes, &id(&alice), &RpcLimits::default()).expect_err("wrong");
        assert!(matches!(err, TransportError::ProtocolViolation(_)));
    }

    #[test]
    fn test_timestamp_window() {
        let (alice, bob) = pair();
        let limits = RpcLimits::default();
        let env = Envelope::seal_at(&alice, id(&bob), vec![1], 1_000).expect("seal");
        let bytes = env.to_bytes().expect("encode");
        assert!(Envelope::open_at(&bytes, &id(&bob), &limits, 1_060).is_ok());
        assert!(Envelope::open_at(&bytes, &id(&bob), &limits, 940).is_ok());
        assert!(Envelope::open_at(&bytes, &id(&bob), &limits, 1_061).is_err());
        assert!(Envelope::open_at(&bytes, &id(&bob), &limits, 939).is_err());
    }

    #[test]
    fn test_tampered_data_fails_signature() {
        let (alice, bob) = pair();
        let mut env = Envelope::seal(&alice, id(&bob), b"chunk".to_vec()).expect("seal");
        env.data = b"evil!".to_vec();
        let bytes = env.to_bytes().expect("encode");
        let err = Envelope::open(&bytes, &id(&bob), &RpcLimits::default()).expect_err("tampered");
        assert!(matches!(err, TransportError::Signature(_)));
    }

    #[test]
    fn test_spoofed_sender_fails_signature() {
        let (alice, bob) = pair();
        let mallory = KeyPair::generate();
        let mut env = Envelope::seal(&mallory, id(&bob), vec![]).expect("seal");
        env.sender_id = id(&alice);
        let bytes = env.to_bytes().expect("encode");
        assert!(Envelope::open(&bytes, &id(&bob), &RpcLimits::default()).is_err());
    }

    #[test]
    fn test_size_limit() {
        let (alice, bob) = pair();
        let env = Envelope::seal(&alice, id(&bob), vec![0u8; 4096]).expect("seal");
        let bytes = env.to_bytes().expect("encode");
        let limits = RpcLimits {
            max_message_size: 1024,
            ..RpcLimits::default()
        };
        let err = Envelope::open(&bytes, &id(&bob), &limits).expect_err("too big");
        assert!(matches!(err, TransportError::ProtocolViolation(_)));
    }

    #[test]
    fn test_bad_version() {
        let (alice, bob) = pair();
        let mut env = Envelope::seal(&alice, id(&bob), vec![]).expect("seal");
        env.version = 2;
        let bytes = env.to_bytes().expect("encode");
        assert!(Envelope::open(&bytes, &id(&bob), &RpcLimits::default()).is_err());
    }

    #[test]
    fn test_nonces_differ() {
        let (alice, bob) = pair();
        let a = Envelope::seal(&alice, id(&bob), vec![]).expect("seal");
        let b = Envelope::seal(&alice, id(&bob), vec![]).expect("seal");
        assert_ne!(a.nonce, b.nonce);
    }

    #[test]
    fn test_garbage_rejected() {
        let bob = KeyPair::generate();
        assert!(Envelope::open(&[1, 2, 3], &id(&bob), &RpcLimits::default()).is_err());
    }
}
