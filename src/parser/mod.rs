//! Parser module provides the interface to per-format bibliographic parsers.
//!
//! Parsers are collaborators of the collection engine: each one turns the bytes of a
//! single book into a [`BookRecord`]. The [`ParserRegistry`] maps file extensions to
//! parsers and also decides, by extension, whether an entry is a book, an archive to
//! descend into or an fbd companion. Custom parsers can be registered for any extension.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate};

use crate::error::{Error, Result};
use crate::path_utils::entry_extension;
use crate::types::{ARCHIVE_EXTENSIONS, BookRecord, COMPANION_EXTENSION, EntryKind};

pub mod epub;
pub mod fb2;
pub mod plain;
pub mod xml;

pub use epub::EpubParser;
pub use fb2::Fb2Parser;
pub use plain::StemParser;
pub use xml::XmlHelper;

/// Common interface for all format parsers.
///
/// Implementations must be stateless with respect to individual books: the same parser
/// instance is shared by every worker thread.
pub trait BookParser: Send + Sync {
    /// Extracts the bibliographic record of one book.
    ///
    /// # Parameters
    /// * `name` - File or entry name of the book (used for diagnostics and fallbacks)
    /// * `bytes` - Complete content of the book
    ///
    /// # Returns
    /// * `Result<BookRecord>` - The record; `path_in_container` is filled in by the caller
    fn parse(&self, name: &str, bytes: &[u8]) -> Result<BookRecord>;
}

/// Extension-keyed set of parsers shared by a build.
#[derive(Clone)]
pub struct ParserRegistry {
    parsers: BTreeMap<String, Arc<dyn BookParser>>,
    companion: Arc<dyn BookParser>,
}

impl ParserRegistry {
    /// A registry that recognizes no book formats (fbd companions still use [`Fb2Parser`]).
    pub fn empty() -> Self {
        Self {
            parsers: BTreeMap::new(),
            companion: Arc::new(Fb2Parser::default()),
        }
    }

    /// The built-in parsers: FB2, EPUB, and filename-only records for PDF, DJVU, ODT and TXT.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry
            .register("fb2", Fb2Parser::default())
            .register("epub", EpubParser::default());
        for extension in ["pdf", "djvu", "odt", "txt"] {
            registry.register(extension, StemParser);
        }
        registry
    }

    /// Registers (or replaces) the parser for `extension` (case-insensitive, no dot).
    pub fn register<P>(&mut self, extension: &str, parser: P) -> &mut Self
    where
        P: BookParser + 'static,
    {
        self.parsers
            .insert(extension.trim_start_matches('.').to_lowercase(), Arc::new(parser));
        self
    }

    /// Replaces the parser used for fbd companion files.
    pub fn register_companion<P>(&mut self, parser: P) -> &mut Self
    where
        P: BookParser + 'static,
    {
        self.companion = Arc::new(parser);
        self
    }

    /// Registered book extensions, sorted.
    pub fn extensions(&self) -> impl Iterator<Item = &str> {
        self.parsers.keys().map(String::as_str)
    }

    /// Classifies a file or entry name by its extension.
    pub fn classify(&self, name: &str) -> EntryKind {
        match entry_extension(name) {
            Some(ext) if self.parsers.contains_key(&ext) => EntryKind::Book,
            Some(ext) if ARCHIVE_EXTENSIONS.contains(&ext.as_str()) => EntryKind::Archive,
            Some(ext) if ext == COMPANION_EXTENSION => EntryKind::Companion,
            _ => EntryKind::Other,
        }
    }

    /// Parses a book with the parser registered for its extension.
    pub fn parse(&self, name: &str, bytes: &[u8]) -> Result<BookRecord> {
        let parser = entry_extension(name)
            .and_then(|ext| self.parsers.get(&ext))
            .ok_or_else(|| Error::Unsupported(format!("No parser for '{}'", name)))?;
        parser.parse(name, bytes)
    }

    /// Parses an fbd companion file.
    pub fn parse_companion(&self, name: &str, bytes: &[u8]) -> Result<BookRecord> {
        self.companion.parse(name, bytes)
    }
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl fmt::Debug for ParserRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParserRegistry")
            .field("extensions", &self.parsers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Rewrites recognizable dates as `YYYY-MM-DD`; anything else is returned trimmed.
pub fn normalize_date(raw: &str) -> String {
    let raw = raw.trim();
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(raw) {
        return timestamp.date_naive().format("%Y-%m-%d").to_string();
    }
    for format in ["%Y-%m-%d", "%d.%m.%Y", "%Y.%m.%d", "%Y/%m/%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return date.format("%Y-%m-%d").to_string();
        }
    }
    raw.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        let registry = ParserRegistry::with_defaults();
        assert_eq!(registry.classify("a/b.FB2"), EntryKind::Book);
        assert_eq!(registry.classify("b.pdf"), EntryKind::Book);
        assert_eq!(registry.classify("b.zip"), EntryKind::Archive);
        assert_eq!(registry.classify("b.fbd"), EntryKind::Companion);
        assert_eq!(registry.classify("cover.jpg"), EntryKind::Other);
        assert_eq!(ParserRegistry::empty().classify("b.fb2"), EntryKind::Other);
    }

    #[test]
    fn test_normalize_date() {
        assert_eq!(normalize_date(" 2001-05-01 "), "2001-05-01");
        assert_eq!(normalize_date("01.05.2001"), "2001-05-01");
        assert_eq!(normalize_date("2011-03-04T10:00:00Z"), "2011-03-04");
        assert_eq!(normalize_date("spring 1999"), "spring 1999");
    }
}
