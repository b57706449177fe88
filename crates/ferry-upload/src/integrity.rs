use std::fmt;

use sha2::{Digest as _, Sha256};

use crate::cancel::CancellationToken;
use crate::error::UploadError;
use crate::source::ByteSource;

/// Read size used when hashing a whole source.
const HASH_BLOCK: usize = 4 * 1024 * 1024;

/// SHA-256 fingerprint of some byte content.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Digest([u8; 32]);

impl Digest {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex, the form sent on the wire.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

/// Computes the digest of `data`.
pub fn hash(data: &[u8]) -> Digest {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Incremental digest over data fed in pieces.
#[derive(Clone, Default)]
pub struct Hasher {
    inner: Sha256,
}

impl Hasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    pub fn finalize(self) -> Digest {
        Digest(self.inner.finalize().into())
    }
}

/// Streams the whole source through the hasher in fixed-size blocks.
/// `token` is checked before each block.
pub async fn hash_source<S: ByteSource>(
    source: &S,
    token: &CancellationToken,
) -> Result<Digest, UploadError> {
    let total = source.len();
    let mut hasher = Hasher::new();
    let mut offset = 0u64;
    while offset < total {
        if token.is_cancelled() {
            return Err(UploadError::cancelled());
        }
        let len = (total - offset).min(HASH_BLOCK as u64) as usize;
        let block = source.read_range(offset, len).await?;
        hasher.update(&block);
        offset += len as u64;
    }
    Ok(hasher.finalize())
}
