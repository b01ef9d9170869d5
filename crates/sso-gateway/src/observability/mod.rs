//! Observability for the SSO gateway.
//!
//! Instrumentation uses `#[instrument(skip_all)]` and explicit field
//! allow-listing. Principal names are logged only as correlation hashes;
//! tokens, key material and request bodies are never logged.

pub mod metrics;

use sha2::{Digest, Sha256};

/// Hash a field value for correlation in logs (SHA-256, first 8 hex chars)
///
/// This is a one-way hash for correlating log lines about the same principal,
/// not a secret-protection mechanism.
pub fn hash_for_correlation(value: &str) -> String {
    let digest = Sha256::digest(value.as_bytes());
    hex::encode(digest.iter().take(4).copied().collect::<Vec<u8>>())
}
