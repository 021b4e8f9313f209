//! Streaming BLAKE2b-256 content hashing.
//!
//! Hashes are the key that decides whether a file changed between two refreshes, so the
//! algorithm and output size are fixed. Files are read in bounded chunks so memory use
//! does not depend on file size, and the cancellation token is checked after every chunk.

use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;

use blake2::Blake2bVar;
use blake2::digest::{Update, VariableOutput};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::path_utils::path_to_string_lossy;
use crate::types::ContentHash;

/// Largest read issued by [`ContentHasher::hash_file`].
pub const MAX_CHUNK_SIZE: usize = 10 * 1024 * 1024;

/// Computes [`ContentHash`]es of byte buffers and files.
#[derive(Debug, Clone, Copy)]
pub struct ContentHasher {
    chunk_size: usize,
}

impl Default for ContentHasher {
    fn default() -> Self {
        Self {
            chunk_size: MAX_CHUNK_SIZE,
        }
    }
}

impl ContentHasher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a hasher reading `chunk_size` bytes at a time, clamped to `1..=MAX_CHUNK_SIZE`.
    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.clamp(1, MAX_CHUNK_SIZE),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Hashes an in-memory buffer.
    pub fn hash(&self, bytes: &[u8]) -> Result<ContentHash> {
        let mut context = Self::context()?;
        context.update(bytes);
        Self::finish(context)
    }

    /// Hashes a file, checking `cancel` after every chunk.
    ///
    /// # Returns
    ///
    /// * `Ok(ContentHash)` - Digest of the complete file
    /// * `Err(Error::Cancelled)` - The token fired; no digest is produced
    /// * `Err(Error::Io)` - The file could not be opened or read
    /// * `Err(Error::Hashing)` - The digest context failed
    pub fn hash_file(&self, path: &Path, cancel: &CancellationToken) -> Result<ContentHash> {
        self.hash_file_with_progress(path, cancel, |_| {})
    }

    /// Same as [`hash_file`](Self::hash_file), reporting the size of every chunk hashed.
    pub fn hash_file_with_progress<F>(
        &self,
        path: &Path,
        cancel: &CancellationToken,
        mut on_chunk: F,
    ) -> Result<ContentHash>
    where
        F: FnMut(u64),
    {
        let mut context = Self::context()?;
        let mut file = File::open(path).map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!(
                    "Failed to open '{}' for hashing: {}",
                    path_to_string_lossy(path),
                    e
                ),
            ))
        })?;

        // Small files do not need a full-size buffer.
        let expected = file.metadata().map(|m| m.len()).unwrap_or(0);
        let capacity = self
            .chunk_size
            .min(usize::try_from(expected).unwrap_or(usize::MAX).max(1));
        let mut buffer = vec![0u8; capacity];

        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let read = match file.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            context.update(&buffer[..read]);
            on_chunk(read as u64);
        }

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Self::finish(context)
    }

    fn context() -> Result<Blake2bVar> {
        Blake2bVar::new(ContentHash::LEN)
            .map_err(|e| Error::Hashing(format!("cannot create BLAKE2b context: {}", e)))
    }

    fn finish(context: Blake2bVar) -> Result<ContentHash> {
        let mut digest = [0u8; ContentHash::LEN];
        context
            .finalize_variable(&mut digest)
            .map_err(|e| Error::Hashing(format!("cannot finalize BLAKE2b digest: {}", e)))?;
        Ok(ContentHash(digest))
    }
}
