//! Content addressing for stored blobs.
//!
//! A [`ContentKey`] is the SHA-256 digest of the exact bytes that end up in
//! the blob store, rendered with the Bitcoin base58 alphabet so it is safe in
//! URLs and file names and free of look-alike characters (`0`, `O`, `I`, `l`).

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Base58 length range for a 32-byte digest. Leading zero bytes shorten the
/// encoding, so the lower bound is loose.
const MIN_KEY_LEN: usize = 32;
const MAX_KEY_LEN: usize = 44;

/// Immutable identifier of a stored blob and primary key of its metadata row.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentKey(String);

impl ContentKey {
    /// Accept an externally supplied key only if it could have been produced
    /// by [`hash`]. Anything else never reaches a storage backend.
    pub fn parse(raw: &str) -> Option<Self> {
        let len = raw.len();
        if !(MIN_KEY_LEN..=MAX_KEY_LEN).contains(&len) {
            return None;
        }
        match bs58::decode(raw).into_vec() {
            Ok(bytes) if bytes.len() == 32 => Some(Self(raw.to_string())),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ContentKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Compute the content key of `data`.
pub fn hash(data: &[u8]) -> ContentKey {
    let digest = Sha256::digest(data);
    ContentKey(bs58::encode(digest).into_string())
}
