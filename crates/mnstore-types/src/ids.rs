//! Fixed-width identifiers.
//!
//! Chunk ids, artwork hashes and distances are 512-bit values compared as
//! big-endian unsigned integers, which for byte arrays is plain
//! lexicographic order. Peer identifiers are 32-byte Ed25519 public keys.

use std::fmt;
use std::str::FromStr;

use mnstore_crypto::hash::{content_hash, CONTENT_HASH_LEN};
use serde::{Deserialize, Serialize};
use serde_with::serde_as;

use crate::{Result, TypesError};

/// Number of hex characters shown by `short()`.
const SHORT_HEX_LEN: usize = 12;

fn decode_fixed<const N: usize>(s: &str) -> Result<[u8; N]> {
    let bytes = hex::decode(s).map_err(|e| TypesError::InvalidHex(e.to_string()))?;
    let actual = bytes.len();
    bytes.try_into().map_err(|_| TypesError::InvalidLength {
        expected: N,
        actual,
    })
}

macro_rules! hex_id {
    ($(#[$meta:meta])* $name:ident, $len:expr) => {
        $(#[$meta])*
        #[serde_as]
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(#[serde_as(as = "serde_with::hex::Hex")] [u8; $len]);

        impl $name {
            pub const LEN: usize = $len;

            pub const fn from_bytes(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }

            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            /// Parse from a byte slice of exactly `LEN` bytes.
            pub fn from_slice(bytes: &[u8]) -> Result<Self> {
                let arr: [u8; $len] = bytes.try_into().map_err(|_| TypesError::InvalidLength {
                    expected: $len,
                    actual: bytes.len(),
                })?;
                Ok(Self(arr))
            }

            pub fn from_hex(s: &str) -> Result<Self> {
                decode_fixed::<$len>(s).map(Self)
            }

            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            /// Abbreviated hex used in log fields.
            pub fn short(&self) -> String {
                let mut s = self.to_hex();
                s.truncate(SHORT_HEX_LEN);
                s
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.to_hex())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.short())
            }
        }

        impl FromStr for $name {
            type Err = TypesError;

            fn from_str(s: &str) -> Result<Self> {
                Self::from_hex(s)
            }
        }
    };
}

hex_id!(
    /// Content identifier of a chunk: SHA-512 of its bytes.
    ChunkId,
    CONTENT_HASH_LEN
);

hex_id!(
    /// Content hash of a whole artifact, shared by all its chunks.
    ArtworkHash,
    CONTENT_HASH_LEN
);

hex_id!(
    /// Stable masternode identifier (its Ed25519 public key).
    PeerId,
    32
);

hex_id!(
    /// XOR distance between a peer's ring position and a chunk id.
    Distance,
    CONTENT_HASH_LEN
);

impl ChunkId {
    /// The id `bytes` must be stored under.
    pub fn of(bytes: &[u8]) -> Self {
        Self(content_hash(bytes))
    }

    /// True when `bytes` hash to this id.
    pub fn matches(&self, bytes: &[u8]) -> bool {
        content_hash(bytes) == self.0
    }
}

impl ArtworkHash {
    pub fn of(bytes: &[u8]) -> Self {
        Self(content_hash(bytes))
    }
}

impl PeerId {
    /// Position of this peer on the 512-bit ring.
    pub fn ring_position(&self) -> [u8; CONTENT_HASH_LEN] {
        content_hash(&self.0)
    }
}

impl Distance {
    /// `ring_position(peer) XOR chunk_id`.
    pub fn between(peer: &PeerId, chunk: &ChunkId) -> Self {
        let mut out = peer.ring_position();
        for (o, c) in out.iter_mut().zip(chunk.0.iter()) {
            *o ^= c;
        }
        Self(out)
    }
}
