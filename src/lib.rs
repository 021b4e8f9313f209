//! Shelve - E-book Collection Ingestion and Query Engine
//!
//! This crate scans a directory of e-books and archives, extracts bibliographic
//! metadata (descending into archives nested at any depth), hashes file content and
//! persists everything into a flat-file collection database. Refreshing a collection
//! only re-parses files whose content changed. Loaded collections answer fuzzy,
//! multi-field, accent-insensitive queries.
//!
//! # Getting Started
//!
//! Build (or refresh) a collection with a [`CollectionBuilder`], then load it into a
//! [`CollectionStore`] and query it.
//!
//! ```rust,no_run
//! use shelve::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> shelve::error::Result<()> {
//!     // 1. Describe the collection
//!     let config = BuildConfig::builder()
//!         .collections_root(PathBuf::from("./collections"))
//!         .collection_name("library")
//!         .books_path(PathBuf::from("./books"))
//!         .build()?;
//!
//!     // 2. Build it; unchanged files are reused on later refreshes
//!     let summary = CollectionBuilder::new(config).refresh().await?;
//!     println!("{} books in {} files", summary.books_total, summary.files_total);
//!
//!     // 3. Load and search
//!     let store = CollectionStore::new(
//!         StoreConfig::builder()
//!             .collections_root(PathBuf::from("./collections"))
//!             .build()?,
//!     );
//!     store.load("library").await?;
//!
//!     let query = SearchQuery {
//!         surname: "Pushkin".to_string(),
//!         ..Default::default()
//!     };
//!     for hit in store.search(&query, &CancellationToken::new())? {
//!         println!("{} - {:?}", hit.book.title, hit.file_path);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! Archive manipulation ([`archive`]), hashing ([`hasher`]) and the database codec
//! ([`database`]) are public as well for callers that need them on their own.

pub mod archive;
pub mod builder;
pub mod database;
pub mod error;
pub mod hasher;
pub mod parser;
pub mod path_utils;
pub mod scoped_path;
pub mod store;
pub mod types;

pub use builder::{BuildConfig, BuildConfigBuilder, CollectionBuilder, ProgressHook};
pub use store::{CollectionStore, LoadedCollection, StoreConfig, StoreConfigBuilder};

// Re-export error and core types for direct access
pub use types::{
    AuthorMatchPolicy, BookRecord, BuildSummary, ContentHash, EntryKind, FileRecord, SearchQuery,
    SearchResultEntry,
};

/// Prelude module for convenient imports.
///
/// Brings the builder, the store, the record types and the cancellation token into
/// scope with a single `use shelve::prelude::*;`.
pub mod prelude {
    pub use super::{
        AuthorMatchPolicy, BookRecord, BuildConfig, BuildConfigBuilder, BuildSummary,
        CollectionBuilder, CollectionStore, ContentHash, EntryKind, FileRecord, LoadedCollection,
        ProgressHook, SearchQuery, SearchResultEntry, StoreConfig, StoreConfigBuilder, error,
        types,
    };
    pub use crate::archive::ArchiveWalker;
    pub use crate::hasher::ContentHasher;
    pub use crate::parser::{BookParser, ParserRegistry};
    pub use crate::scoped_path::{ScopedExtractionPath, ScratchSpace};
    pub use std::path::{Path, PathBuf};
    pub use std::sync::Arc;
    pub use tokio_util::sync::CancellationToken;
}
