//! Domain-separated digests for identifiers.

use sha2::{Digest, Sha256};

use crate::Hash32;

/// `SHA-256(domain || parts[0] || parts[1] || ...)`.
///
/// Parts are concatenated without length prefixes, so callers must only vary the last part.
pub fn sha256_domain(domain: &[u8], parts: &[&[u8]]) -> Hash32 {
    let digest = parts
        .iter()
        .fold(Sha256::new().chain_update(domain), |h, part| h.chain_update(part))
        .finalize();
    Hash32(digest.into())
}
