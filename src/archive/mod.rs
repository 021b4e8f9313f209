//! Thin access layer over the `zip` archive library.
//!
//! Listing and extraction work on any `Read + Seek` source, so an archive stored inside
//! another archive can be read straight from memory. Writing operations (`pack`,
//! `add_or_replace`, `remove_entry`) always rebuild the archive entry by entry into a
//! sibling temporary file and rename it over the original, since ZIP has no in-place
//! delete.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, Read, Seek, Write};
use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{Error, Result};
use crate::path_utils::{get_file_name_lossy, path_to_string_lossy, relative_path_string};

pub mod walker;

pub use walker::ArchiveWalker;

/// Buffer size used when copying entry data to disk with cancellation checks.
const COPY_CHUNK_SIZE: usize = 1024 * 1024;

/// Upper bound for pre-allocating an entry buffer from its declared size.
const MAX_PREALLOCATION: u64 = 64 * 1024 * 1024;

/// One file entry of an archive, as reported by the library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub relative_name: String,
    pub size: u64,
    pub compressed_size: u64,
    /// Index inside the archive; disambiguates duplicate names.
    pub position: usize,
}

/// Data for an entry written by [`add_or_replace`].
#[derive(Debug, Clone)]
pub enum EntrySource {
    Bytes(Vec<u8>),
    File(PathBuf),
}

/// A named entry to add to an archive.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub name: String,
    pub source: EntrySource,
}

impl NewEntry {
    pub fn bytes(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            source: EntrySource::Bytes(bytes.into()),
        }
    }

    pub fn file(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            source: EntrySource::File(path.into()),
        }
    }
}

fn write_options() -> SimpleFileOptions {
    SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o644)
}

/// Decodes an entry name from its raw bytes.
///
/// UTF-8 is tried first. Names written by legacy tools on non-UTF-8 systems fall back to
/// the library's own decoding (CP437 for entries without the UTF-8 flag), which applies
/// no Unicode normalization.
fn decode_entry_name(raw: &[u8], library_name: &str) -> String {
    match std::str::from_utf8(raw) {
        Ok(name) => name.to_string(),
        Err(_) => {
            log::debug!("Entry name is not UTF-8, using legacy decoding: {}", library_name);
            library_name.to_string()
        }
    }
}

/// Opens an archive file for reading.
pub fn open(path: &Path) -> Result<ZipArchive<BufReader<File>>> {
    let file = File::open(path).map_err(|e| {
        Error::Io(std::io::Error::new(
            e.kind(),
            format!(
                "Failed to open archive '{}': {}",
                path_to_string_lossy(path),
                e
            ),
        ))
    })?;
    open_reader(BufReader::new(file))
}

/// Opens an archive from any seekable byte source, e.g. a `Cursor` over an entry of
/// another archive.
pub fn open_reader<R: Read + Seek>(reader: R) -> Result<ZipArchive<R>> {
    ZipArchive::new(reader).map_err(|e| Error::archive("open", e))
}

/// Lists the file entries of the archive at `path`.
pub fn list_entries(path: &Path) -> Result<Vec<Entry>> {
    let mut archive = open(path)?;
    entries_of(&mut archive)
}

/// Lists the file entries of an archive read from `reader`.
pub fn list_entries_from<R: Read + Seek>(reader: R) -> Result<Vec<Entry>> {
    let mut archive = open_reader(reader)?;
    entries_of(&mut archive)
}

/// Lists the file entries of an open archive in library order. Directories are skipped.
pub fn entries_of<R: Read + Seek>(archive: &mut ZipArchive<R>) -> Result<Vec<Entry>> {
    let mut entries = Vec::with_capacity(archive.len());
    for position in 0..archive.len() {
        let file = archive
            .by_index_raw(position)
            .map_err(|e| Error::archive("list", e))?;
        if file.is_dir() {
            continue;
        }
        entries.push(Entry {
            relative_name: decode_entry_name(file.name_raw(), file.name()),
            size: file.size(),
            compressed_size: file.compressed_size(),
            position,
        });
    }
    Ok(entries)
}

fn find_by_name<R: Read + Seek>(archive: &mut ZipArchive<R>, name: &str) -> Result<Entry> {
    entries_of(archive)?
        .into_iter()
        .find(|entry| entry.relative_name == name)
        .ok_or_else(|| Error::NotFound(format!("archive entry '{}'", name)))
}

/// Reads the entry at `entry.position` into memory.
///
/// Fails with `NotFound` when the archive changed since `entry` was listed.
pub fn read_entry<R: Read + Seek>(archive: &mut ZipArchive<R>, entry: &Entry) -> Result<Vec<u8>> {
    let mut file = archive
        .by_index(entry.position)
        .map_err(|e| Error::archive("extract", e))?;
    if decode_entry_name(file.name_raw(), file.name()) != entry.relative_name {
        return Err(Error::NotFound(format!(
            "archive entry '{}' at position {}",
            entry.relative_name, entry.position
        )));
    }
    let mut buffer = Vec::with_capacity(file.size().min(MAX_PREALLOCATION) as usize);
    file.read_to_end(&mut buffer)?;
    Ok(buffer)
}

/// Extracts the entry at `entry.position` below `out_dir`, keeping its relative path.
///
/// The copy is chunked and stops with [`Error::Cancelled`] when `cancel` fires; a
/// partially written file is removed.
pub fn extract_entry_to<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    entry: &Entry,
    out_dir: &Path,
    cancel: &CancellationToken,
) -> Result<PathBuf> {
    let mut file = archive
        .by_index(entry.position)
        .map_err(|e| Error::archive("extract", e))?;
    if decode_entry_name(file.name_raw(), file.name()) != entry.relative_name {
        return Err(Error::NotFound(format!(
            "archive entry '{}' at position {}",
            entry.relative_name, entry.position
        )));
    }
    let relative = file.enclosed_name().ok_or_else(|| {
        Error::InvalidPath(
            PathBuf::from(&entry.relative_name),
            "entry name escapes the extraction directory".to_string(),
        )
    })?;
    let target = out_dir.join(relative);
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut output = File::create(&target)?;
    let mut buffer = vec![0u8; COPY_CHUNK_SIZE];
    loop {
        if cancel.is_cancelled() {
            drop(output);
            let _ = std::fs::remove_file(&target);
            return Err(Error::Cancelled);
        }
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        output.write_all(&buffer[..read])?;
    }
    output.flush()?;
    Ok(target)
}

/// Extracts the first entry called `name` into memory.
pub fn extract_by_name(path: &Path, name: &str) -> Result<Vec<u8>> {
    let mut archive = open(path)?;
    let entry = find_by_name(&mut archive, name)?;
    read_entry(&mut archive, &entry)
}

/// Extracts the first entry called `name` below `out_dir`.
pub fn extract_by_name_to(path: &Path, name: &str, out_dir: &Path) -> Result<PathBuf> {
    let mut archive = open(path)?;
    let entry = find_by_name(&mut archive, name)?;
    extract_entry_to(&mut archive, &entry, out_dir, &CancellationToken::new())
}

/// Extracts a previously listed entry into memory.
pub fn extract_by_position(path: &Path, entry: &Entry) -> Result<Vec<u8>> {
    let mut archive = open(path)?;
    read_entry(&mut archive, entry)
}

/// Extracts a previously listed entry below `out_dir`.
pub fn extract_by_position_to(path: &Path, entry: &Entry, out_dir: &Path) -> Result<PathBuf> {
    let mut archive = open(path)?;
    extract_entry_to(&mut archive, entry, out_dir, &CancellationToken::new())
}

fn temporary_sibling(path: &Path) -> PathBuf {
    path.with_file_name(format!(".{}.shelve-tmp", get_file_name_lossy(path)))
}

/// Runs `write` against a fresh archive at a temporary sibling of `destination`, then
/// renames it into place. The temporary file is removed on failure.
fn rebuild<F>(destination: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut ZipWriter<File>) -> Result<()>,
{
    let temporary = temporary_sibling(destination);
    let result = (|| -> Result<()> {
        let mut writer = ZipWriter::new(File::create(&temporary)?);
        write(&mut writer)?;
        writer.finish().map_err(|e| Error::archive("finish", e))?;
        std::fs::rename(&temporary, destination)?;
        Ok(())
    })();
    if result.is_err() {
        let _ = std::fs::remove_file(&temporary);
    }
    result
}

fn write_new_entry(writer: &mut ZipWriter<File>, entry: &NewEntry) -> Result<()> {
    writer
        .start_file(entry.name.as_str(), write_options())
        .map_err(|e| Error::archive("write", e))?;
    match &entry.source {
        EntrySource::Bytes(bytes) => writer.write_all(bytes)?,
        EntrySource::File(path) => {
            let mut file = File::open(path)?;
            std::io::copy(&mut file, writer)?;
        }
    }
    Ok(())
}

/// Packs a file or a directory tree into a new archive at `out_archive`.
///
/// Directory entries keep their path relative to `source_tree`; a single file is stored
/// under its file name.
pub fn pack(source_tree: &Path, out_archive: &Path) -> Result<()> {
    if !source_tree.exists() {
        return Err(Error::NotFound(format!(
            "Pack source does not exist: {:?}",
            source_tree
        )));
    }
    rebuild(out_archive, |writer| {
        if source_tree.is_file() {
            return write_new_entry(
                writer,
                &NewEntry::file(get_file_name_lossy(source_tree), source_tree),
            );
        }
        for item in WalkDir::new(source_tree).min_depth(1).sort_by_file_name() {
            let item = item.map_err(|e| Error::Other(format!("Cannot walk pack source: {}", e)))?;
            let name = relative_path_string(source_tree, item.path())?;
            if item.file_type().is_dir() {
                writer
                    .add_directory(name.as_str(), write_options())
                    .map_err(|e| Error::archive("write", e))?;
            } else if item.file_type().is_file() {
                write_new_entry(writer, &NewEntry::file(name, item.path()))?;
            }
        }
        Ok(())
    })
}

/// Adds `new_entries` to an archive, replacing existing entries of the same name.
///
/// The archive is rebuilt: old entries are copied raw (without recompression), then
/// the new ones are appended. A missing archive is created.
pub fn add_or_replace(archive_path: &Path, new_entries: &[NewEntry]) -> Result<()> {
    let replaced: HashSet<&str> = new_entries.iter().map(|e| e.name.as_str()).collect();
    let mut source = if archive_path.exists() {
        Some(open(archive_path)?)
    } else {
        None
    };

    // The closure owns the reader so it is closed before the rename.
    rebuild(archive_path, move |writer| {
        if let Some(source) = source.as_mut() {
            for position in 0..source.len() {
                let file = source
                    .by_index_raw(position)
                    .map_err(|e| Error::archive("read", e))?;
                let name = decode_entry_name(file.name_raw(), file.name());
                if replaced.contains(name.as_str()) {
                    continue;
                }
                writer
                    .raw_copy_file(file)
                    .map_err(|e| Error::archive("copy", e))?;
            }
        }
        for entry in new_entries {
            write_new_entry(writer, entry)?;
        }
        Ok(())
    })
}

/// Removes every entry called `entry_name` from an archive.
///
/// Fails with `NotFound`, leaving the archive untouched, when no entry has that name.
pub fn remove_entry(archive_path: &Path, entry_name: &str) -> Result<()> {
    let mut source = open(archive_path)?;
    find_by_name(&mut source, entry_name)?;

    rebuild(archive_path, move |writer| {
        for position in 0..source.len() {
            let file = source
                .by_index_raw(position)
                .map_err(|e| Error::archive("read", e))?;
            if decode_entry_name(file.name_raw(), file.name()) == entry_name {
                continue;
            }
            writer
                .raw_copy_file(file)
                .map_err(|e| Error::archive("copy", e))?;
        }
        Ok(())
    })
}
