//! Flat-file collection database.
//!
//! Layout (all integers little-endian, strings are a `u32` byte length followed by UTF-8):
//!
//! ```text
//! header:  "SHELFDB\0" | u16 version | str books_root
//! record:  str relative_path | [u8; 32] content hash | u32 book count | book*
//! book:    str path_in_container | str author | str title | str series | str genre | str date
//! ```
//!
//! The header is written once, so records can be appended to an existing file. The
//! decoder checks every declared length against what is left of the buffer and never
//! allocates from an unchecked count.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use memmap2::MmapOptions;

use crate::error::{Error, Result};
use crate::path_utils::{get_file_name_lossy, path_to_string_lossy};
use crate::types::{BookRecord, ContentHash, FileRecord};

pub const MAGIC: &[u8; 8] = b"SHELFDB\0";
pub const FORMAT_VERSION: u16 = 1;
pub const DATABASE_FILE_NAME: &str = "books.db";

const HEADER_PREFIX_LEN: usize = MAGIC.len() + 2 + 4;
/// Smallest possible encoded book: six empty strings.
const MIN_BOOK_LEN: usize = 6 * 4;

/// Location of the database of collection `name`.
pub fn database_path(collections_root: &Path, name: &str) -> PathBuf {
    collections_root.join(name).join(DATABASE_FILE_NAME)
}

/// A decoded database file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Database {
    pub books_root: PathBuf,
    pub files: Vec<FileRecord>,
}

fn put_str(buffer: &mut Vec<u8>, value: &str) {
    buffer.extend_from_slice(&(value.len() as u32).to_le_bytes());
    buffer.extend_from_slice(value.as_bytes());
}

pub fn encode_header(books_root: &Path) -> Vec<u8> {
    let root = path_to_string_lossy(books_root);
    let mut buffer = Vec::with_capacity(HEADER_PREFIX_LEN + root.len());
    buffer.extend_from_slice(MAGIC);
    buffer.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    put_str(&mut buffer, &root);
    buffer
}

pub fn encode_record(record: &FileRecord) -> Vec<u8> {
    let mut buffer = Vec::new();
    put_str(&mut buffer, &record.relative_path);
    buffer.extend_from_slice(record.content_hash.as_bytes());
    buffer.extend_from_slice(&(record.books.len() as u32).to_le_bytes());
    for book in &record.books {
        for field in [
            &book.path_in_container,
            &book.author,
            &book.title,
            &book.series,
            &book.genre,
            &book.date,
        ] {
            put_str(&mut buffer, field);
        }
    }
    buffer
}

struct Decoder<'a> {
    buffer: &'a [u8],
    offset: usize,
    path: &'a Path,
}

impl<'a> Decoder<'a> {
    fn new(buffer: &'a [u8], path: &'a Path) -> Self {
        Self {
            buffer,
            offset: 0,
            path,
        }
    }

    fn remaining(&self) -> usize {
        self.buffer.len() - self.offset
    }

    fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn corrupt(&self, what: &str) -> Error {
        Error::load(
            self.path,
            format!("{} at byte offset {}", what, self.offset),
        )
    }

    fn take(&mut self, len: usize, what: &str) -> Result<&'a [u8]> {
        if len > self.remaining() {
            return Err(self.corrupt(&format!("truncated {}", what)));
        }
        let slice = &self.buffer[self.offset..self.offset + len];
        self.offset += len;
        Ok(slice)
    }

    fn u16(&mut self, what: &str) -> Result<u16> {
        let bytes = self.take(2, what)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn u32(&mut self, what: &str) -> Result<u32> {
        let bytes = self.take(4, what)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn string(&mut self, what: &str) -> Result<String> {
        let len = self.u32(what)? as usize;
        let bytes = self.take(len, what)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| self.corrupt(&format!("invalid UTF-8 in {}", what)))
    }

    fn header(&mut self) -> Result<PathBuf> {
        if self.take(MAGIC.len(), "magic")? != MAGIC {
            return Err(self.corrupt("not a collection database (bad magic)"));
        }
        let version = self.u16("version")?;
        if version != FORMAT_VERSION {
            return Err(self.corrupt(&format!("unsupported format version {}", version)));
        }
        Ok(PathBuf::from(self.string("books root")?))
    }

    fn record(&mut self) -> Result<FileRecord> {
        let relative_path = self.string("relative path")?;
        let mut hash = [0u8; ContentHash::LEN];
        hash.copy_from_slice(self.take(ContentHash::LEN, "content hash")?);

        let count = self.u32("book count")? as usize;
        if count.saturating_mul(MIN_BOOK_LEN) > self.remaining() {
            return Err(self.corrupt(&format!("book count {} exceeds remaining data", count)));
        }
        let mut books = Vec::with_capacity(count);
        for _ in 0..count {
            books.push(BookRecord {
                path_in_container: self.string("path in container")?,
                author: self.string("author")?,
                title: self.string("title")?,
                series: self.string("series")?,
                genre: self.string("genre")?,
                date: self.string("date")?,
            });
        }

        Ok(FileRecord {
            relative_path,
            content_hash: ContentHash(hash),
            books,
        })
    }
}

/// Decodes a complete database image. `path` is only used in error messages.
pub fn decode_database(buffer: &[u8], path: &Path) -> Result<Database> {
    let mut decoder = Decoder::new(buffer, path);
    let books_root = decoder.header()?;
    let mut files = Vec::new();
    while !decoder.is_empty() {
        files.push(decoder.record()?);
    }
    Ok(Database { books_root, files })
}

fn open_existing(path: &Path) -> Result<File> {
    File::open(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::load(path, "database file does not exist")
        } else {
            Error::load(path, e.to_string())
        }
    })
}

/// Reads a whole database through a memory map.
pub fn read_database(path: &Path) -> Result<Database> {
    let file = open_existing(path)?;
    let len = file
        .metadata()
        .map_err(|e| Error::load(path, e.to_string()))?
        .len();
    // Mapping an empty file fails on some platforms; report it as truncation instead.
    if len < HEADER_PREFIX_LEN as u64 {
        return Err(Error::load(path, "file is too short for a database header"));
    }
    let mmap = unsafe { MmapOptions::new().map(&file) }
        .map_err(|e| Error::load(path, format!("cannot map file: {}", e)))?;
    decode_database(&mmap, path)
}

/// Reads only the books root stored in the header.
pub fn read_books_root(path: &Path) -> Result<PathBuf> {
    let mut reader = BufReader::new(open_existing(path)?);
    let mut prefix = [0u8; HEADER_PREFIX_LEN];
    reader
        .read_exact(&mut prefix)
        .map_err(|_| Error::load(path, "file is too short for a database header"))?;
    let root_len = u32::from_le_bytes([prefix[10], prefix[11], prefix[12], prefix[13]]) as usize;

    let mut header = prefix.to_vec();
    let mut root = Vec::new();
    reader
        .take(root_len as u64)
        .read_to_end(&mut root)
        .map_err(|e| Error::load(path, e.to_string()))?;
    header.extend_from_slice(&root);
    Decoder::new(&header, path).header()
}

/// Writes a new database into a sibling temporary file and moves it into place on
/// [`commit`](Self::commit). Dropping an uncommitted writer removes the temporary file.
#[derive(Debug)]
pub struct DatabaseWriter {
    writer: Option<BufWriter<File>>,
    temp_path: PathBuf,
    final_path: PathBuf,
}

impl DatabaseWriter {
    pub fn create(final_path: &Path, books_root: &Path) -> Result<Self> {
        let parent = final_path
            .parent()
            .ok_or_else(|| Error::InvalidPath(final_path.to_path_buf(), "no parent directory".to_string()))?;
        std::fs::create_dir_all(parent)?;
        let temp_path = parent.join(format!(".{}.shelve-tmp", get_file_name_lossy(final_path)));

        let mut writer = BufWriter::new(File::create(&temp_path)?);
        writer.write_all(&encode_header(books_root))?;
        Ok(Self {
            writer: Some(writer),
            temp_path,
            final_path: final_path.to_path_buf(),
        })
    }

    pub fn append(&mut self, encoded: &[u8]) -> Result<()> {
        match self.writer.as_mut() {
            Some(writer) => Ok(writer.write_all(encoded)?),
            None => Err(Error::Other("database writer already committed".to_string())),
        }
    }

    /// Flushes, syncs and atomically renames the temporary file over the final path.
    pub fn commit(mut self) -> Result<()> {
        let Some(writer) = self.writer.take() else {
            return Err(Error::Other("database writer already committed".to_string()));
        };
        let file = writer.into_inner().map_err(|e| Error::Io(e.into_error()))?;
        file.sync_all()?;
        drop(file);
        std::fs::rename(&self.temp_path, &self.final_path)?;
        log::debug!("Committed database '{}'", path_to_string_lossy(&self.final_path));
        Ok(())
    }
}

impl Drop for DatabaseWriter {
    fn drop(&mut self) {
        if self.writer.take().is_some() {
            let _ = std::fs::remove_file(&self.temp_path);
        }
    }
}

/// Appends records to an existing database after checking its header.
pub fn append_records(path: &Path, records: &[FileRecord]) -> Result<()> {
    read_books_root(path)?;
    let mut file = BufWriter::new(OpenOptions::new().append(true).open(path)?);
    for record in records {
        file.write_all(&encode_record(record))?;
    }
    let file = file.into_inner().map_err(|e| Error::Io(e.into_error()))?;
    file.sync_all()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_records() -> Vec<FileRecord> {
        vec![
            FileRecord {
                relative_path: "a.fb2".to_string(),
                content_hash: ContentHash([7; 32]),
                books: vec![BookRecord {
                    path_in_container: String::new(),
                    author: "Пушкин Александр".to_string(),
                    title: "A".to_string(),
                    series: String::new(),
                    genre: "poetry".to_string(),
                    date: "1833".to_string(),
                }],
            },
            FileRecord {
                relative_path: "sub/broken.zip".to_string(),
                content_hash: ContentHash::default(),
                books: Vec::new(),
            },
        ]
    }

    fn image(records: &[FileRecord]) -> Vec<u8> {
        let mut buffer = encode_header(Path::new("/library/books"));
        for record in records {
            buffer.extend_from_slice(&encode_record(record));
        }
        buffer
    }

    #[test]
    fn test_decode_encoded_image() {
        let records = sample_records();
        let database = decode_database(&image(&records), Path::new("mem")).unwrap();
        assert_eq!(database.books_root, PathBuf::from("/library/books"));
        assert_eq!(database.files, records);
        assert_eq!(database.files[0].books[0].author, "Пушкин Александр");
    }

    #[test]
    fn test_truncated_images_are_load_errors() {
        let buffer = image(&sample_records());
        for len in 0..buffer.len() {
            match decode_database(&buffer[..len], Path::new("mem")) {
                // A cut exactly between records is a valid, shorter database.
                Ok(database) => assert!(database.files.len() < 2, "prefix {} decoded fully", len),
                Err(e) => assert!(matches!(e, Error::Load { .. }), "prefix {}: {}", len, e),
            }
        }
    }

    #[test]
    fn test_bad_magic_and_version() {
        let mut buffer = image(&[]);
        buffer[0] = b'X';
        assert!(matches!(
            decode_database(&buffer, Path::new("mem")),
            Err(Error::Load { .. })
        ));

        let mut buffer = image(&[]);
        buffer[8] = 9;
        assert!(matches!(
            decode_database(&buffer, Path::new("mem")),
            Err(Error::Load { .. })
        ));
    }

    #[test]
    fn test_huge_book_count_is_rejected() {
        let mut buffer = encode_header(Path::new("/r"));
        put_str(&mut buffer, "x.zip");
        buffer.extend_from_slice(&[0; 32]);
        buffer.extend_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(
            decode_database(&buffer, Path::new("mem")),
            Err(Error::Load { .. })
        ));
    }

    #[test]
    fn test_writer_commit_abort_and_append() {
        let dir = std::env::temp_dir().join(format!("shelve-db-test-{}", std::process::id()));
        let path = dir.join(DATABASE_FILE_NAME);
        let records = sample_records();

        let mut writer = DatabaseWriter::create(&path, Path::new("/library/books")).unwrap();
        writer.append(&encode_record(&records[0])).unwrap();
        drop(writer);
        assert!(!path.exists());
        assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 0);

        let mut writer = DatabaseWriter::create(&path, Path::new("/library/books")).unwrap();
        writer.append(&encode_record(&records[0])).unwrap();
        writer.commit().unwrap();
        assert_eq!(read_books_root(&path).unwrap(), PathBuf::from("/library/books"));

        append_records(&path, &records[1..]).unwrap();
        assert_eq!(read_database(&path).unwrap().files, records);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_missing_file_is_load_error() {
        let result = read_database(Path::new("/definitely/not/here/books.db"));
        assert!(matches!(result, Err(Error::Load { .. })));
        let result = read_books_root(Path::new("/definitely/not/here/books.db"));
        assert!(matches!(result, Err(Error::Load { .. })));
    }

    #[test]
    fn test_unreadable_database_is_load_error() {
        let dir = std::env::temp_dir().join(format!("shelve-db-dir-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        // A directory opens on unix but cannot be mapped or read.
        assert!(matches!(read_database(&dir), Err(Error::Load { .. })));
        assert!(matches!(read_books_root(&dir), Err(Error::Load { .. })));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
