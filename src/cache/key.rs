//! Cache key generation.

use sha2::{Digest, Sha256};

/// Stable digest of a classification request.
///
/// Two requests hash identically iff their normalized input, identifier and
/// context flag match, so cached results are shared exactly when the pipeline
/// would have produced the same answer.
pub fn classification_key(input: &str, identifier: &str, has_context: bool) -> String {
    let normalized = normalize(input);
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hasher.update([0u8]);
    hasher.update(identifier.as_bytes());
    hasher.update([0u8]);
    hasher.update([has_context as u8]);
    let digest = hasher.finalize();
    format!("classify:{}", hex(&digest[..16]))
}

/// Short digest of the raw input, recorded in audit rows instead of the
/// input itself.
pub fn input_digest(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex(&hasher.finalize()[..8])
}

/// Lowercase and collapse runs of whitespace so formatting differences do not
/// fragment the cache.
fn normalize(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
