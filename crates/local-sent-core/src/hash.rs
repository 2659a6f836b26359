//! Streaming SHA-256 for file digests and on-the-fly payload verification.

use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use crate::constants::PAYLOAD_CHUNK_SIZE;
use crate::error::{Error, Result};

/// Incremental SHA-256 over a session's payload.
///
/// One instance lives per transfer; on resume it is pre-seeded with the
/// existing temp file prefix before live bytes are added.
#[derive(Clone)]
pub struct StreamingDigest {
    inner: Sha256,
}

impl std::fmt::Debug for StreamingDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingDigest").finish_non_exhaustive()
    }
}

impl Default for StreamingDigest {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamingDigest {
    /// Create a fresh digest.
    pub fn new() -> Self {
        Self {
            inner: Sha256::new(),
        }
    }

    /// Add a payload buffer.
    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    /// Finish and return the digest as 64 lowercase hex characters.
    pub fn finalize_hex(self) -> String {
        hex::encode(self.inner.finalize())
    }

    /// Seed the digest with the first `len` bytes of `path`.
    ///
    /// Fails if the file ends before `len` bytes; a shrinking temp file means
    /// the resume offset is stale.
    pub async fn seed_from_file(&mut self, path: &Path, len: u64) -> Result<()> {
        let mut file = File::open(path).await?;
        let mut remaining = len;
        let mut chunk = vec![0u8; PAYLOAD_CHUNK_SIZE];

        while remaining > 0 {
            let want = remaining.min(chunk.len() as u64) as usize;
            let n = file.read(&mut chunk[..want]).await?;
            if n == 0 {
                return Err(Error::integrity(format!(
                    "{} ended before {} bytes",
                    path.display(),
                    len
                )));
            }
            self.inner.update(&chunk[..n]);
            remaining -= n as u64;
        }
        Ok(())
    }
}

/// Stream a whole file and return its hex digest and size.
pub async fn digest_file(path: &Path) -> Result<(String, u64)> {
    let mut file = File::open(path).await?;
    let mut digest = StreamingDigest::new();
    let mut size = 0u64;
    let mut chunk = vec![0u8; PAYLOAD_CHUNK_SIZE];

    loop {
        let n = file.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        digest.update(&chunk[..n]);
        size += n as u64;
    }
    Ok((digest.finalize_hex(), size))
}

/// True when `s` is 64 lowercase hex characters.
pub fn is_sha256_hex(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}
