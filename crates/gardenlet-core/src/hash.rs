//! Content hashing for immutable ConfigMaps and Secrets
//!
//! Immutable objects get a name suffix derived from their data, so a content
//! change produces a new object instead of an in-place update.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Length of the checksum suffix appended to unique names
pub const UNIQUE_SUFFIX_LEN: usize = 8;

/// SHA256 hex digest of a byte slice
pub fn sha256_hex(data: impl AsRef<[u8]>) -> String {
    hex::encode(Sha256::digest(data.as_ref()))
}

/// Checksum of a key/value data map
///
/// Keys are visited in sorted order; each key and value is terminated by a
/// NUL byte so that `{"ab": "c"}` and `{"a": "bc"}` hash differently.
pub fn compute_checksum<V: AsRef<[u8]>>(data: &BTreeMap<String, V>) -> String {
    let mut hasher = Sha256::new();
    for (key, value) in data {
        hasher.update(key.as_bytes());
        hasher.update([0u8]);
        hasher.update(value.as_ref());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

/// Name with a content-derived suffix: `<name>-<first 8 hex chars of checksum>`
pub fn unique_name<V: AsRef<[u8]>>(name: &str, data: &BTreeMap<String, V>) -> String {
    let checksum = compute_checksum(data);
    format!("{}-{}", name, &checksum[..UNIQUE_SUFFIX_LEN])
}
