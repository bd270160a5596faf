//! Identifier and fingerprint helpers.

use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Generates a new UUID v7 (time-ordered).
#[must_use]
pub fn generate_uuid_v7() -> Uuid {
    Uuid::now_v7()
}

/// Hashes the given components into a stable hex fingerprint.
///
/// Components are joined with a unit separator so that `["ab", "c"]` and
/// `["a", "bc"]` produce different fingerprints.
#[must_use]
pub fn fingerprint(components: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (i, component) in components.iter().enumerate() {
        if i > 0 {
            hasher.update([0x1f]);
        }
        hasher.update(component.as_bytes());
    }
    let result = hasher.finalize();
    hex::encode(&result[..16])
}
