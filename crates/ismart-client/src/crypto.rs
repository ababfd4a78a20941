//! Hashing helpers for the login payload

use sha1::{Digest, Sha1};

/// Lowercase hex SHA-1 digest of a UTF-8 string
pub fn sha1_hex_digest(input: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}
