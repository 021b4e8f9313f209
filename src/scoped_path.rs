//! Shared ownership of temporary extraction paths.
//!
//! A file or directory unpacked from an archive is often used by several consumers at
//! once: the archive walker, a book path handed to the caller, a copy in progress. The
//! path is removed from disk exactly once, when the last [`ScopedExtractionPath`] handle
//! referring to it is dropped, whichever consumer that happens to be.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::Result;
use crate::path_utils::{path_to_string_lossy, sanitize_filename};

struct Guard {
    path: PathBuf,
}

impl Drop for Guard {
    fn drop(&mut self) {
        let result = if self.path.is_dir() {
            std::fs::remove_dir_all(&self.path)
        } else if self.path.exists() {
            std::fs::remove_file(&self.path)
        } else {
            Ok(())
        };
        match result {
            Ok(()) => log::debug!("Removed scratch path '{}'", path_to_string_lossy(&self.path)),
            Err(e) => log::warn!(
                "Failed to remove scratch path '{}': {}",
                path_to_string_lossy(&self.path),
                e
            ),
        }
    }
}

/// Clonable handle to a path that is recursively deleted when the last handle drops.
///
/// Handles compare equal when they point at the same path, not when they share a count.
#[derive(Clone)]
pub struct ScopedExtractionPath {
    guard: Arc<Guard>,
}

impl ScopedExtractionPath {
    /// Takes ownership of `path`; the share count starts at 1.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            guard: Arc::new(Guard { path: path.into() }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.guard.path
    }

    /// Number of live handles sharing this path.
    pub fn share_count(&self) -> usize {
        Arc::strong_count(&self.guard)
    }

    /// Points this handle at another path.
    ///
    /// The old path loses one share (and is deleted if that was the last one) and the new
    /// path starts a fresh count. Reassigning the path already held changes nothing.
    pub fn reassign(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        if self.guard.path == path {
            return;
        }
        *self = Self::new(path);
    }
}

impl PartialEq for ScopedExtractionPath {
    fn eq(&self, other: &Self) -> bool {
        self.guard.path == other.guard.path
    }
}

impl Eq for ScopedExtractionPath {}

impl AsRef<Path> for ScopedExtractionPath {
    fn as_ref(&self) -> &Path {
        self.path()
    }
}

impl fmt::Debug for ScopedExtractionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedExtractionPath")
            .field("path", &self.guard.path)
            .field("shares", &self.share_count())
            .finish()
    }
}

static SCRATCH_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Mints unique scratch directories below a common root.
#[derive(Debug, Clone)]
pub struct ScratchSpace {
    root: PathBuf,
}

impl ScratchSpace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates a fresh, empty directory whose lifetime is tied to the returned handle.
    pub fn directory(&self, label: &str) -> Result<ScopedExtractionPath> {
        let name = format!(
            "shelve-{}-{}-{}",
            std::process::id(),
            SCRATCH_COUNTER.fetch_add(1, Ordering::Relaxed),
            sanitize_filename(label)
        );
        let path = self.root.join(name);
        std::fs::create_dir_all(&path)?;
        Ok(ScopedExtractionPath::new(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch() -> ScratchSpace {
        ScratchSpace::new(std::env::temp_dir().join("shelve-scoped-tests"))
    }

    #[test]
    fn test_path_removed_after_last_clone() {
        let original = scratch().directory("clones").unwrap();
        std::fs::write(original.path().join("inner.txt"), b"data").unwrap();
        let path = original.path().to_path_buf();

        let clones: Vec<_> = (0..4).map(|_| original.clone()).collect();
        assert_eq!(original.share_count(), 5);

        drop(original);
        for (index, clone) in clones.into_iter().enumerate() {
            assert!(path.exists(), "removed too early at clone {}", index);
            drop(clone);
        }
        assert!(!path.exists());
    }

    #[test]
    fn test_reassign_releases_old_path() {
        let space = scratch();
        let first = space.directory("first").unwrap();
        let first_path = first.path().to_path_buf();

        let mut handle = first.clone();
        drop(first);
        assert!(first_path.exists());

        let target = space
            .root()
            .join(format!("reassigned-{}", std::process::id()));
        std::fs::create_dir_all(&target).unwrap();
        handle.reassign(target.clone());
        assert!(!first_path.exists());
        assert_eq!(handle.share_count(), 1);

        // Same path again: count untouched.
        handle.reassign(target.clone());
        assert_eq!(handle.share_count(), 1);

        let other = handle.clone();
        assert_eq!(other, handle);
        drop(handle);
        assert!(target.exists());
        drop(other);
        assert!(!target.exists());
    }
}
