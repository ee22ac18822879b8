//! Encoded block layout.
//!
//! ```text
//! data_length:u32le | block_size:u32le | seed:u32le | block_hash:[u8;32] | body
//! ```
//!
//! `block_size` is the body length. `block_hash` is SHA3-256 of the body.

use mnstore_crypto::hash::{block_hash, BLOCK_HASH_LEN};

use crate::soliton::is_valid_seed;
use crate::{FountainError, Result, MAX_SOURCE_BLOCKS};

/// Header length in bytes.
pub const HEADER_LEN: usize = 12 + BLOCK_HASH_LEN;

/// One fountain-encoded block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedBlock {
    /// Length of the original artifact.
    pub data_length: u32,
    /// Body length, equal to the source block size.
    pub block_size: u32,
    pub seed: u32,
    pub block_hash: [u8; BLOCK_HASH_LEN],
    pub body: Vec<u8>,
}

impl EncodedBlock {
    pub fn new(data_length: u32, seed: u32, body: Vec<u8>) -> Self {
        Self {
            data_length,
            block_size: body.len() as u32,
            seed,
            block_hash: block_hash(&body),
            body,
        }
    }

    /// Parse a block. Bytes past the declared body are ignored.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(FountainError::BlockParse(format!(
                "not enough data in block: {}",
                bytes.len()
            )));
        }
        let data_length = read_u32(bytes, 0);
        let block_size = read_u32(bytes, 4);
        let seed = read_u32(bytes, 8);
        let mut hash = [0u8; BLOCK_HASH_LEN];
        hash.copy_from_slice(&bytes[12..HEADER_LEN]);

        if data_length == 0 || block_size == 0 {
            return Err(FountainError::BlockParse(format!(
                "empty geometry: data_length={data_length} block_size={block_size}"
            )));
        }
        if !is_valid_seed(seed) {
            return Err(FountainError::BlockParse(format!("invalid seed {seed}")));
        }
        let body_end = HEADER_LEN + block_size as usize;
        if bytes.len() < body_end {
            return Err(FountainError::BlockParse(format!(
                "not enough data in block: {} < {body_end}",
                bytes.len()
            )));
        }

        let block = Self {
            data_length,
            block_size,
            seed,
            block_hash: hash,
            body: bytes[HEADER_LEN..body_end].to_vec(),
        };
        if block.source_count() > MAX_SOURCE_BLOCKS {
            return Err(FountainError::BlockParse(format!(
                "geometry needs {} source blocks",
                block.source_count()
            )));
        }
        Ok(block)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.body.len());
        out.extend_from_slice(&self.data_length.to_le_bytes());
        out.extend_from_slice(&self.block_size.to_le_bytes());
        out.extend_from_slice(&self.seed.to_le_bytes());
        out.extend_from_slice(&self.block_hash);
        out.extend_from_slice(&self.body);
        out
    }

    /// Number of source blocks `K` this block's artifact was split into.
    pub fn source_count(&self) -> usize {
        (self.data_length as usize).div_ceil(self.block_size as usize)
    }

    /// True when the body still hashes to the header's hash.
    pub fn is_intact(&self) -> bool {
        block_hash(&self.body) == self.block_hash
    }

    /// True when both blocks describe the same artifact geometry.
    pub fn same_geometry(&self, other: &Self) -> bool {
        self.data_length == other.data_length && self.block_size == other.block_size
    }
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_len() {
        assert_eq!(HEADER_LEN, 44);
    }

    #[test]
    fn test_parse_roundtrip() {
        let block = EncodedBlock::new(100, 42, vec![7u8; 16]);
        let bytes = block.to_bytes();
        assert_eq!(bytes.len(), HEADER_LEN + 16);
        assert_eq!(&bytes[0..4], &100u32.to_le_bytes());
        let parsed = EncodedBlock::parse(&bytes).expect("parse");
        assert_eq!(parsed, block);
        assert!(parsed.is_intact());
        assert_eq!(parsed.source_count(), 7);
    }

    #[test]
    fn test_header_carries_sha3_256_of_body() {
        let block = EncodedBlock::new(3, 7, b"abc".to_vec());
        let bytes = block.to_bytes();
        // SHA3-256("abc"), FIPS 202 example
        assert_eq!(
            hex::encode(&bytes[12..HEADER_LEN]),
            "3a985da74fe225b2045c172d6bd390bd855f086e3e9d525b46bfe24511431532"
        );
    }

    #[test]
    fn test_parse_short_header() {
        let err = EncodedBlock::parse(&[0u8; 10]).expect_err("short");
        assert!(matches!(err, FountainError::BlockParse(_)));
    }

    #[test]
    fn test_parse_truncated_body() {
        let mut bytes = EncodedBlock::new(100, 42, vec![7u8; 16]).to_bytes();
        bytes.truncate(HEADER_LEN + 8);
        assert!(EncodedBlock::parse(&bytes).is_err());
    }

    #[test]
    fn test_parse_rejects_zero_seed() {
        let bytes = EncodedBlock::new(100, 0, vec![1u8; 4]).to_bytes();
        assert!(EncodedBlock::parse(&bytes).is_err());
    }

    #[test]
    fn test_corrupt_body_detected() {
        let mut bytes = EncodedBlock::new(10, 3, vec![1u8; 4]).to_bytes();
        bytes[HEADER_LEN] ^= 0xff;
        let parsed = EncodedBlock::parse(&bytes).expect("parse");
        assert!(!parsed.is_intact());
    }

    #[test]
    fn test_oversized_geometry_rejected() {
        let bytes = EncodedBlock::new(u32::MAX, 3, vec![1u8; 1]).to_bytes();
        assert!(EncodedBlock::parse(&bytes).is_err());
    }
}
