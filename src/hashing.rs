//! Hashing - SHA-256 fingerprints of written artifacts
//!
//! Each artifact's digest is reported and logged so a run can be audited
//! against the files it left behind.

use sha2::{Digest, Sha256};

/// Compute SHA-256 hash of bytes, return hex string
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
