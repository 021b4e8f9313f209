//! Custom error types and result handling for Shelve operations.
//!
//! All operations return a [`Result<T>`] which is a type alias for `std::result::Result<T, Error>`.
//!
//! Failures fall in two groups. Per-file problems met during a build (a corrupt book, an
//! unreadable nested archive, a hashing error on one file) are downgraded by the builder
//! into an empty record plus a logged warning. Everything else propagates to the caller.
//! Cancellation is reported as [`Error::Cancelled`] so it can be told apart from an empty
//! but successful result.
use std::path::PathBuf;

/// Type alias for Results with Shelve errors.
pub type Result<T> = std::result::Result<T, Error>;

/// Comprehensive error type for all Shelve operations.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// I/O errors from the standard library
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Archive library failure, tagged with the operation that was running
    #[error("Archive operation '{operation}' failed: {source}")]
    Archive {
        operation: &'static str,
        #[source]
        source: zip::result::ZipError,
    },
    /// The digest context could not be created or finalized
    #[error("Hashing failed: {0}")]
    Hashing(String),
    /// A collection database is missing, truncated or malformed
    #[error("Cannot load collection database '{path:?}': {reason}")]
    Load { path: PathBuf, reason: String },
    /// A format parser rejected a book
    #[error("Cannot parse '{name}': {reason}")]
    Parse { name: String, reason: String },
    /// The operation was cancelled through its cancellation token
    #[error("Operation cancelled")]
    Cancelled,
    /// A query was issued while no collection is loaded
    #[error("No collection is loaded")]
    NotLoaded,
    /// Async task join errors
    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),
    #[error(transparent)]
    Semaphore(#[from] tokio::sync::AcquireError),
    #[error(transparent)]
    Config(#[from] crate::builder::BuildConfigBuilderError),
    #[error(transparent)]
    StoreConfig(#[from] crate::store::StoreConfigBuilderError),
    /// Error for invalid file or directory paths
    #[error("The given path '{0:?}' is invalid: {1}")]
    InvalidPath(PathBuf, String),
    /// Error for unsupported operations or formats (e.g., unknown book extension)
    #[error("Unsupported: {0}")]
    Unsupported(String),
    /// Error for resources that couldn't be found (e.g., books directory, collection)
    #[error("Not found: {0}")]
    NotFound(String),
    /// Other errors that don't fit into specific categories
    #[error("Other error: {0}")]
    Other(String),
}

impl Error {
    /// Wraps a `zip` error with the name of the archive operation that produced it.
    pub fn archive(operation: &'static str, source: zip::result::ZipError) -> Self {
        Error::Archive { operation, source }
    }

    /// Shorthand for building a [`Error::Load`].
    pub fn load(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::Load {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for building a [`Error::Parse`].
    pub fn parse(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Parse {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Returns `true` when the error only signals cooperative cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

// Basic From<String> conversion for convenience
impl From<String> for Error {
    fn from(error: String) -> Self {
        Error::Other(error)
    }
}

impl From<&str> for Error {
    fn from(error: &str) -> Self {
        Error::Other(error.to_string())
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for Error {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.to_string().as_ref())
    }
}
