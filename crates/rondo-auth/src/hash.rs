//! Password and key hashing helpers.

use sha2::{Digest, Sha256};

/// SHA-256 hex digest of a string.
pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// SHA-256 hex digest of raw bytes. Used for host key fingerprints.
pub fn sha256_hex_bytes(input: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input);
    hex::encode(hasher.finalize())
}

/// Constant-shape comparison of a presented hash against the stored one.
///
/// Both sides are hex digests of equal length, so a plain comparison does
/// not leak length; case is normalized.
pub fn verify_password_hash(presented: &str, stored: &str) -> bool {
    presented.len() == stored.len() && presented.eq_ignore_ascii_case(stored)
}
