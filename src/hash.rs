//! Content fingerprinting.
//!
//! Every subsystem that compares content (the change cache, the version
//! history, the approval ledger, the snapshot store) goes through the same
//! fingerprint so an artifact hashes identically everywhere.

use sha2::{Digest, Sha256};

/// Length of a content fingerprint in hex characters.
const FINGERPRINT_LEN: usize = 16;

/// Compute the fingerprint of a piece of content.
///
/// SHA-256, hex-encoded, truncated to 16 characters. Collisions at this
/// length are acceptable for change detection; the full content is always
/// stored alongside.
pub fn fingerprint(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let hex = format!("{:x}", hasher.finalize());
    hex[..FINGERPRINT_LEN].to_string()
}
