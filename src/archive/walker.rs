//! Recursive discovery of books inside archives.
//!
//! [`ArchiveWalker`] iterates the entries of an archive in library order. Book entries
//! are parsed through the [`ParserRegistry`]; archive entries are walked recursively,
//! straight from memory when they are small enough and through a scratch file
//! otherwise; fbd companions are merged into their book once the whole level has been
//! seen, because a companion may precede or follow the book it describes.

use std::collections::HashMap;
use std::io::{Cursor, Read, Seek};
use std::path::Path;

use tokio_util::sync::CancellationToken;
use zip::ZipArchive;

use crate::archive::{self, Entry};
use crate::error::{Error, Result};
use crate::parser::ParserRegistry;
use crate::path_utils::{entry_stem, path_to_string_lossy, strip_extension};
use crate::scoped_path::ScratchSpace;
use crate::types::{BookRecord, EntryKind, NESTING_SEPARATOR};

/// Nested archives up to this size are read into memory instead of a scratch file.
pub const DEFAULT_IN_MEMORY_ARCHIVE_LIMIT: u64 = 64 * 1024 * 1024;

/// Archives nested deeper than this are skipped.
pub const DEFAULT_MAX_NESTING_DEPTH: usize = 16;

/// Walks an archive and everything nested inside it, producing one [`BookRecord`] per book.
#[derive(Debug, Clone, Copy)]
pub struct ArchiveWalker<'a> {
    parsers: &'a ParserRegistry,
    scratch: &'a ScratchSpace,
    cancel: &'a CancellationToken,
    in_memory_limit: u64,
    max_depth: usize,
}

impl<'a> ArchiveWalker<'a> {
    pub fn new(
        parsers: &'a ParserRegistry,
        scratch: &'a ScratchSpace,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            parsers,
            scratch,
            cancel,
            in_memory_limit: DEFAULT_IN_MEMORY_ARCHIVE_LIMIT,
            max_depth: DEFAULT_MAX_NESTING_DEPTH,
        }
    }

    /// Largest nested archive (uncompressed size) read into memory.
    pub fn in_memory_limit(mut self, limit: u64) -> Self {
        self.in_memory_limit = limit;
        self
    }

    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// Walks the archive file at `path`.
    ///
    /// # Returns
    ///
    /// * `Ok(Vec<BookRecord>)` - Every book found, possibly none
    /// * `Err(Error::Cancelled)` - The token fired; partial results are discarded
    /// * `Err(_)` - The outer archive itself could not be read
    pub fn walk(&self, path: &Path) -> Result<Vec<BookRecord>> {
        let archive = archive::open(path)?;
        self.walk_archive(archive, &[], 0)
    }

    /// Walks an archive held in memory.
    pub fn walk_bytes(&self, bytes: &[u8]) -> Result<Vec<BookRecord>> {
        let archive = archive::open_reader(Cursor::new(bytes))?;
        self.walk_archive(archive, &[], 0)
    }

    fn walk_archive<R: Read + Seek>(
        &self,
        mut archive: ZipArchive<R>,
        chain: &[String],
        depth: usize,
    ) -> Result<Vec<BookRecord>> {
        let entries = archive::entries_of(&mut archive)?;

        let mut records = Vec::new();
        // Stripped entry name -> index in `records`, for companion matching.
        let mut local_books: HashMap<String, usize> = HashMap::new();
        let mut companions: Vec<(String, BookRecord)> = Vec::new();

        for entry in &entries {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            match self.parsers.classify(&entry.relative_name) {
                EntryKind::Book => {
                    if let Some(record) = self.parse_book(&mut archive, entry, chain)? {
                        local_books.insert(
                            strip_extension(&entry.relative_name).to_string(),
                            records.len(),
                        );
                        records.push(record);
                    }
                }
                EntryKind::Companion => {
                    let parsed = archive::read_entry(&mut archive, entry).and_then(|bytes| {
                        self.parsers.parse_companion(&entry.relative_name, &bytes)
                    });
                    match parsed {
                        Ok(companion) => companions
                            .push((strip_extension(&entry.relative_name).to_string(), companion)),
                        Err(e) => log::warn!(
                            "Skipping unreadable companion '{}': {}",
                            entry.relative_name,
                            e
                        ),
                    }
                }
                EntryKind::Archive => {
                    if depth + 1 > self.max_depth {
                        log::warn!(
                            "Skipping '{}': archives nested deeper than {} levels",
                            entry.relative_name,
                            self.max_depth
                        );
                        continue;
                    }
                    match self.walk_nested(&mut archive, entry, chain, depth + 1) {
                        Ok(nested) => records.extend(nested),
                        Err(e) if e.is_cancelled() => return Err(e),
                        Err(e) => log::warn!(
                            "Skipping unreadable nested archive '{}': {}",
                            entry.relative_name,
                            e
                        ),
                    }
                }
                EntryKind::Other => {}
            }
        }

        // A parser may have been interrupted on the last entry.
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        for (key, companion) in companions {
            match local_books.get(&key) {
                Some(&index) => records[index].merge_companion(&companion),
                None => log::debug!("Companion '{}' has no matching book", key),
            }
        }
        Ok(records)
    }

    /// Reads and parses one book entry. Failures other than cancellation are logged and
    /// yield no record.
    fn parse_book<R: Read + Seek>(
        &self,
        archive: &mut ZipArchive<R>,
        entry: &Entry,
        chain: &[String],
    ) -> Result<Option<BookRecord>> {
        let parsed = archive::read_entry(archive, entry)
            .and_then(|bytes| self.parsers.parse(&entry.relative_name, &bytes));
        match parsed {
            Ok(mut record) => {
                record.ensure_title(entry_stem(&entry.relative_name));
                record.path_in_container = nesting_path(chain, &entry.relative_name);
                Ok(Some(record))
            }
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => {
                log::warn!("Failed to parse '{}': {}", entry.relative_name, e);
                Ok(None)
            }
        }
    }

    fn walk_nested<R: Read + Seek>(
        &self,
        archive: &mut ZipArchive<R>,
        entry: &Entry,
        chain: &[String],
        depth: usize,
    ) -> Result<Vec<BookRecord>> {
        let mut nested_chain = chain.to_vec();
        nested_chain.push(entry.relative_name.clone());

        if entry.size <= self.in_memory_limit {
            let bytes = archive::read_entry(archive, entry)?;
            let nested = archive::open_reader(Cursor::new(bytes))?;
            return self.walk_archive(nested, &nested_chain, depth);
        }

        // Too large for memory: unpack into a scratch directory that disappears with `scope`.
        let scope = self.scratch.directory(entry_stem(&entry.relative_name))?;
        let extracted = archive::extract_entry_to(archive, entry, scope.path(), self.cancel)?;
        log::debug!(
            "Walking large nested archive from '{}'",
            path_to_string_lossy(&extracted)
        );
        let nested = archive::open(&extracted)?;
        self.walk_archive(nested, &nested_chain, depth)
    }
}

fn nesting_path(chain: &[String], name: &str) -> String {
    let mut path = String::new();
    for container in chain {
        path.push_str(container);
        path.push(NESTING_SEPARATOR);
    }
    path.push_str(name);
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::ZipWriter;
    use zip::write::SimpleFileOptions;

    fn fb2(title: &str, surname: &str) -> Vec<u8> {
        format!(
            "<FictionBook><description><title-info><author><last-name>{}</last-name></author>\
             <book-title>{}</book-title></title-info></description></FictionBook>",
            surname, title
        )
        .into_bytes()
    }

    fn zip_of(entries: &[(&str, Vec<u8>)]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, bytes) in entries {
            writer
                .start_file(*name, SimpleFileOptions::default())
                .unwrap();
            writer.write_all(bytes).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    fn scratch() -> ScratchSpace {
        ScratchSpace::new(std::env::temp_dir().join("shelve-walker-tests"))
    }

    #[test]
    fn test_nested_archives_build_chain() {
        let inner = zip_of(&[("c.fb2", fb2("Deep", "Doe"))]);
        let outer = zip_of(&[
            ("top.fb2", fb2("Top", "Roe")),
            ("inner.zip", inner),
            ("cover.jpg", vec![1, 2, 3]),
        ]);

        let parsers = ParserRegistry::with_defaults();
        let space = scratch();
        let cancel = CancellationToken::new();
        let records = ArchiveWalker::new(&parsers, &space, &cancel)
            .walk_bytes(&outer)
            .unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].path_in_container, "top.fb2");
        assert_eq!(records[1].path_in_container, "inner.zip\nc.fb2");
        assert_eq!(records[1].title, "Deep");
        assert_eq!(
            records[1].nesting_chain().collect::<Vec<_>>(),
            vec!["inner.zip", "c.fb2"]
        );
    }

    #[test]
    fn test_large_nested_archive_goes_through_scratch() {
        let inner = zip_of(&[("c.fb2", fb2("Deep", "Doe"))]);
        let outer = zip_of(&[("inner.zip", inner)]);

        let parsers = ParserRegistry::with_defaults();
        let space = scratch();
        let cancel = CancellationToken::new();
        let records = ArchiveWalker::new(&parsers, &space, &cancel)
            .in_memory_limit(0)
            .walk_bytes(&outer)
            .unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].path_in_container, "inner.zip\nc.fb2");
    }

    #[test]
    fn test_depth_limit_skips_deeper_archives() {
        let inner = zip_of(&[("c.fb2", fb2("Deep", "Doe"))]);
        let outer = zip_of(&[("a.fb2", fb2("Shallow", "Roe")), ("inner.zip", inner)]);

        let parsers = ParserRegistry::with_defaults();
        let space = scratch();
        let cancel = CancellationToken::new();
        let records = ArchiveWalker::new(&parsers, &space, &cancel)
            .max_depth(0)
            .walk_bytes(&outer)
            .unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].path_in_container, "a.fb2");
    }

    #[test]
    fn test_companion_overrides_stem_title() {
        let companion = fb2("Real Title", "Author");
        let outer = zip_of(&[
            ("dir/scan.fbd", companion),
            ("dir/scan.pdf", b"%PDF-1.4".to_vec()),
        ]);

        let parsers = ParserRegistry::with_defaults();
        let space = scratch();
        let cancel = CancellationToken::new();
        let records = ArchiveWalker::new(&parsers, &space, &cancel)
            .walk_bytes(&outer)
            .unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].path_in_container, "dir/scan.pdf");
        assert_eq!(records[0].title, "Real Title");
        assert_eq!(records[0].author, "Author");
    }

    #[test]
    fn test_corrupt_entries_are_skipped() {
        let outer = zip_of(&[
            ("broken.zip", b"not a zip at all".to_vec()),
            ("broken.fb2", b"<FictionBook/>".to_vec()),
            ("good.fb2", fb2("Good", "Roe")),
        ]);

        let parsers = ParserRegistry::with_defaults();
        let space = scratch();
        let cancel = CancellationToken::new();
        let records = ArchiveWalker::new(&parsers, &space, &cancel)
            .walk_bytes(&outer)
            .unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].title, "Good");
    }

    /// Cancels the walk it belongs to on the first book it sees.
    struct CancellingParser(CancellationToken);

    impl crate::parser::BookParser for CancellingParser {
        fn parse(&self, name: &str, _bytes: &[u8]) -> Result<BookRecord> {
            self.0.cancel();
            Ok(BookRecord {
                title: name.to_string(),
                ..Default::default()
            })
        }
    }

    fn walk_cancelling(archive: &[u8]) -> Result<Vec<BookRecord>> {
        let cancel = CancellationToken::new();
        let mut parsers = ParserRegistry::with_defaults();
        parsers.register("stub", CancellingParser(cancel.clone()));
        let space = scratch();
        ArchiveWalker::new(&parsers, &space, &cancel).walk_bytes(archive)
    }

    #[test]
    fn test_cancellation_during_walk_discards_partial_results() {
        let flat = zip_of(&[
            ("1.stub", Vec::new()),
            ("2.stub", Vec::new()),
            ("3.stub", Vec::new()),
        ]);
        assert!(matches!(walk_cancelling(&flat), Err(Error::Cancelled)));

        let last_entry = zip_of(&[("a.fb2", fb2("A", "B")), ("z.stub", Vec::new())]);
        assert!(matches!(walk_cancelling(&last_entry), Err(Error::Cancelled)));

        let nested = zip_of(&[("inner.zip", flat), ("after.fb2", fb2("After", "Roe"))]);
        assert!(matches!(walk_cancelling(&nested), Err(Error::Cancelled)));
    }

    #[test]
    fn test_cancelled_walk() {
        let outer = zip_of(&[("a.fb2", fb2("A", "B"))]);
        let parsers = ParserRegistry::with_defaults();
        let space = scratch();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = ArchiveWalker::new(&parsers, &space, &cancel).walk_bytes(&outer);
        assert!(matches!(result, Err(Error::Cancelled)));
    }
}
