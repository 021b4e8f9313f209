//! Core data types and reports for the Shelve collection engine.
//!
//! This module defines the fundamental data structures used throughout Shelve:
//! - Database records (`FileRecord`, `BookRecord`, `ContentHash`)
//! - Query types (`SearchQuery`, `SearchResultEntry`, `AuthorMatchPolicy`)
//! - Reporting types (`BuildSummary`)
//! - Entry classification (`EntryKind`)

use std::fmt;
use std::path::PathBuf;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Separator between container names in [`BookRecord::path_in_container`].
/// A newline cannot occur in a file name, so it never collides with a real name.
pub const NESTING_SEPARATOR: char = '\n';

/// Extensions handled as archives to descend into.
pub const ARCHIVE_EXTENSIONS: &[&str] = &["zip"];

/// Extension of fbd companion files (FB2-style description sidecars).
pub const COMPANION_EXTENSION: &str = "fbd";

/// One logical book found inside a file.
///
/// Two records are equal when their `path_in_container` is equal; the metadata
/// fields do not take part in the comparison.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BookRecord {
    /// Empty when the file itself is the book. For nested archives, the chain of
    /// container names and the book's own name joined by [`NESTING_SEPARATOR`].
    pub path_in_container: String,
    pub author: String,
    pub title: String,
    pub series: String,
    /// Comma-separated genre codes.
    pub genre: String,
    pub date: String,
}

impl PartialEq for BookRecord {
    fn eq(&self, other: &Self) -> bool {
        self.path_in_container == other.path_in_container
    }
}

impl Eq for BookRecord {}

impl BookRecord {
    /// Creates a record that only carries a title.
    pub fn with_title(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    /// Fills in `title` with `stem` if the parser left it empty.
    pub fn ensure_title(&mut self, stem: &str) {
        if self.title.trim().is_empty() {
            self.title = stem.to_string();
        }
    }

    /// Overrides every field for which `companion` carries a non-empty value.
    pub fn merge_companion(&mut self, companion: &BookRecord) {
        let pairs = [
            (&mut self.author, &companion.author),
            (&mut self.title, &companion.title),
            (&mut self.series, &companion.series),
            (&mut self.genre, &companion.genre),
            (&mut self.date, &companion.date),
        ];
        for (field, value) in pairs {
            if !value.trim().is_empty() {
                *field = value.clone();
            }
        }
    }

    /// Iterates the nesting chain: container names first, the book's own entry name last.
    pub fn nesting_chain(&self) -> impl Iterator<Item = &str> {
        self.path_in_container
            .split(NESTING_SEPARATOR)
            .filter(|part| !part.is_empty())
    }
}

/// A BLAKE2b-256 digest of a file's content.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ContentHash(pub [u8; 32]);

impl ContentHash {
    pub const LEN: usize = 32;

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lower-case hexadecimal representation.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.to_hex())
    }
}

/// One physical file under a collection's books directory.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FileRecord {
    /// Path relative to the books root, always with `/` separators.
    pub relative_path: String,
    pub content_hash: ContentHash,
    /// Empty when the file could not be parsed.
    pub books: Vec<BookRecord>,
}

/// A book paired with the absolute path of the file that contains it.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SearchResultEntry {
    pub book: BookRecord,
    pub file_path: PathBuf,
}

/// A BookRecord-shaped search pattern. Empty fields are wildcards.
///
/// The author is given as separate components (surname, first name, middle name)
/// and compared against the free-text author string stored for each book.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SearchQuery {
    pub surname: String,
    pub first_name: String,
    pub middle_name: String,
    pub title: String,
    pub series: String,
    pub genre: String,
    pub date: String,
}

impl SearchQuery {
    /// Returns `true` when every field is empty, i.e. the query matches everything.
    pub fn is_empty(&self) -> bool {
        self.author_components().next().is_none()
            && [&self.title, &self.series, &self.genre, &self.date]
                .iter()
                .all(|field| field.trim().is_empty())
    }

    /// Non-empty author components, in surname, first name, middle name order.
    pub fn author_components(&self) -> impl Iterator<Item = &str> {
        [&self.surname, &self.first_name, &self.middle_name]
            .into_iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
    }
}

/// How author components of a [`SearchQuery`] are compared with a stored author string.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum AuthorMatchPolicy {
    /// Every component must occur inside some word of the stored author, in any order.
    #[default]
    Components,
    /// The components joined by single spaces must occur as one substring.
    Substring,
}

/// Summary handed back by a build or refresh.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BuildSummary {
    /// Candidate files found under the books root.
    pub files_total: usize,
    /// Files hashed and parsed in this run.
    pub files_parsed: usize,
    /// Files whose previous record was reused verbatim.
    pub files_reused: usize,
    /// Files recorded with no books because hashing or parsing failed.
    pub files_failed: usize,
    /// Records of the previous database whose file no longer exists.
    pub files_removed: usize,
    pub books_total: usize,
}

/// What a file or archive entry is, judged by its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// A book format with a registered parser.
    Book,
    /// An archive to descend into.
    Archive,
    /// An fbd description sidecar.
    Companion,
    /// Anything else; ignored.
    Other,
}
