//! Stable cache keys
//!
//! A request is identified by a caller-provided key string (for example a
//! location like `"New York, NY"`). The storage identifier is a truncated
//! SHA256 of that string, so the same key always maps to the same file.

use sha2::{Digest, Sha256};

/// Number of digest bytes kept in the storage identifier
const KEY_HASH_BYTES: usize = 16;

/// Hash a request key into a hex storage identifier
pub fn key_hash(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    let result = hasher.finalize();
    hex::encode(&result[..KEY_HASH_BYTES])
}
