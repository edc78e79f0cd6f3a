//! Hashing for message checksums

pub mod hash;

pub use hash::{checksum, double_sha256, sha256};
