//! Hashing utilities for the wire protocol
//!
//! Message payloads are protected by the first four bytes of their double
//! SHA-256 digest.

use sha2::{Digest, Sha256};

/// Computes SHA-256 hash of the input data
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Computes double SHA-256 hash (SHA-256 of SHA-256)
pub fn double_sha256(data: &[u8]) -> [u8; 32] {
    sha256(&sha256(data))
}

/// Payload checksum: the leading four digest bytes read little-endian, so the
/// value round-trips through a little-endian heading field unchanged.
pub fn checksum(payload: &[u8]) -> u32 {
    let digest = double_sha256(payload);
    u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_known_vector() {
        assert_eq!(
            hex::encode(sha256(b"abc")),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_empty_payload_checksum() {
        assert_eq!(
            hex::encode(double_sha256(b"")),
            "5df6e0e2761359d30a8275058e299fcc0381534545f55cf43e41983f5d4c9456"
        );
        assert_eq!(checksum(b"").to_le_bytes(), [0x5d, 0xf6, 0xe0, 0xe2]);
    }

    #[test]
    fn test_checksum_differs_by_payload() {
        assert_ne!(checksum(b"ping"), checksum(b"pong"));
    }
}
