//! Deterministic content hashing for change detection and naming.
//!
//! The digest only has to be stable and short, not collision resistant, so
//! SHA-256 is truncated to its first four bytes. Those are hex encoded and
//! mapped onto a name-safe alphabet, giving eight characters.
//!
//! The JSON fed to the digest is canonical without extra work: every map in
//! the model is a `BTreeMap`, and struct fields serialize in declaration order.

use sha2::{Digest, Sha256};

use crate::error::ReconcileError;
use crate::types::ParentSpec;

/// Characters allowed in encoded digests: no vowels (so no words can be
/// formed) and nothing easily confused.
const SAFE_ALPHABET: &[u8] = b"bcdfghjklmnpqrstvwxz2456789";

/// Number of digest bytes kept before encoding.
const DIGEST_BYTES: usize = 4;

/// A spec hash for deterministic comparison.
///
/// Used to detect when a parent's template has changed and embedded into
/// instance names, so it is always a short run of name-safe characters.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SpecHash(String);

impl SpecHash {
    /// Compute the hash of a parent spec.
    ///
    /// Labels and annotations take part in the hash; their ordering does not.
    pub fn of(spec: &ParentSpec) -> Result<Self, ReconcileError> {
        let encoded = serde_json::to_vec(spec)?;
        Ok(Self(short_digest(&encoded)))
    }

    /// Get the hash string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SpecHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SpecHash {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Digest arbitrary bytes into a short, name-safe token.
pub fn short_digest(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    safe_encode(&hex::encode(&digest[..DIGEST_BYTES]))
}

/// Map every byte of `s` onto [`SAFE_ALPHABET`].
pub fn safe_encode(s: &str) -> String {
    s.bytes()
        .map(|b| char::from(SAFE_ALPHABET[usize::from(b) % SAFE_ALPHABET.len()]))
        .collect()
}
