//! Hash functions.
//!
//! - SHA-512 names content. A chunk id is `SHA-512(bytes)` and a peer's ring
//!   position is `SHA-512(identifier)`, so both live in the same 512-bit space.
//! - SHA3-256 authenticates the body of an encoded fountain block.
//! - SHA3-512 produces spot-check digests. A peer cannot answer a spot-check
//!   from the chunk id alone.

use sha2::Sha512;
use sha3::{Digest, Sha3_256, Sha3_512};

/// Length in bytes of a content hash.
pub const CONTENT_HASH_LEN: usize = 64;

/// Length in bytes of a block hash.
pub const BLOCK_HASH_LEN: usize = 32;

/// Length in bytes of a spot-check digest before hex encoding.
pub const AUDIT_DIGEST_LEN: usize = 64;

/// Payload hashed to produce the spot-check answer for a chunk that is not held.
pub const NOT_FOUND_SENTINEL: &[u8] = b"DATA WAS NOT FOUND";

/// SHA-512 of `data`.
pub fn content_hash(data: &[u8]) -> [u8; CONTENT_HASH_LEN] {
    let mut out = [0u8; CONTENT_HASH_LEN];
    out.copy_from_slice(&Sha512::digest(data));
    out
}

/// SHA3-256 of an encoded block body.
pub fn block_hash(data: &[u8]) -> [u8; BLOCK_HASH_LEN] {
    let mut out = [0u8; BLOCK_HASH_LEN];
    out.copy_from_slice(&Sha3_256::digest(data));
    out
}

/// Spot-check digest over a byte range: SHA3-512 as lowercase hex.
pub fn audit_digest(data: &[u8]) -> String {
    hex::encode(Sha3_512::digest(data))
}

/// The digest a node returns when asked about a chunk it does not have.
pub fn not_found_digest() -> String {
    audit_digest(NOT_FOUND_SENTINEL)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_known_vector() {
        // SHA-512("abc"), FIPS 180-2 appendix C.1
        let expected = "ddaf35a193617abacc417349ae20413112e6fa4e89a97ea20a9eeee64b55d39a\
                        2192992a274fc1a836ba3c23a3feebbd454d4423643ce80e2a9ac94fa54ca49f";
        assert_eq!(hex::encode(content_hash(b"abc")), expected);
    }

    #[test]
    fn test_block_hash_known_vector() {
        // SHA3-256("abc"), FIPS 202 example
        let expected = "3a985da74fe225b2045c172d6bd390bd855f086e3e9d525b46bfe24511431532";
        assert_eq!(hex::encode(block_hash(b"abc")), expected);
    }

    #[test]
    fn test_audit_digest_known_vector() {
        // SHA3-512("abc"), FIPS 202 example
        let expected = "b751850b1a57168a5693cd924b6b096e08f621827444f70d884f5d0240d2712e\
                        10e116e9192af3c91a7ec57647e3934057340b4cf408d5a56592f8274eec53f0";
        assert_eq!(audit_digest(b"abc"), expected);
    }

    #[test]
    fn test_audit_digest_differs_from_content_hash() {
        let data = b"same input";
        assert_ne!(audit_digest(data), hex::encode(content_hash(data)));
    }

    #[test]
    fn test_not_found_digest_stable() {
        assert_eq!(not_found_digest(), not_found_digest());
        assert_eq!(not_found_digest(), audit_digest(b"DATA WAS NOT FOUND"));
        assert_eq!(not_found_digest().len(), AUDIT_DIGEST_LEN * 2);
    }

    #[test]
    fn test_audit_digest_range_sensitive() {
        assert_ne!(audit_digest(b"abcd"), audit_digest(b"abce"));
    }
}
