//! Path utilities for file and archive-entry name handling.
//!
//! Archive entry names always use `/` separators regardless of platform, and database
//! records store relative paths the same way, so most helpers here work on `&str`
//! names rather than `Path`s. The remaining helpers convert between the two.

use crate::error::{Error, Result};

use std::path::{Component, Path, PathBuf};

/// Converts a path to a string with fallback to lossy conversion.
pub fn path_to_string_lossy(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

/// Gets the file name from a path with fallback to lossy conversion.
///
/// # Returns
///
/// * `String` - The file name, or `"unknown"` for paths without one
pub fn get_file_name_lossy(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Checks if a filename starts with a dot (hidden file) using safe conversion.
pub fn is_hidden_file(path: &Path) -> bool {
    path.file_name()
        .map(|name| name.to_string_lossy().starts_with('.'))
        .unwrap_or(false)
}

/// Last `/`-separated component of an archive entry or relative path.
pub fn entry_file_name(name: &str) -> &str {
    name.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(name)
}

/// Lower-cased extension of an entry name, without the dot.
///
/// # Examples
///
/// ```
/// use shelve::path_utils::entry_extension;
/// assert_eq!(entry_extension("books/Foo.FB2"), Some("fb2".to_string()));
/// assert_eq!(entry_extension("README"), None);
/// ```
pub fn entry_extension(name: &str) -> Option<String> {
    let file_name = entry_file_name(name);
    match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => Some(ext.to_lowercase()),
        _ => None,
    }
}

/// File name of an entry without its last extension; used as the fallback title.
pub fn entry_stem(name: &str) -> &str {
    let file_name = entry_file_name(name);
    match file_name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => file_name,
    }
}

/// The full entry name with the last extension removed (directories kept).
///
/// Companion files are matched to books through this key.
pub fn strip_extension(name: &str) -> &str {
    let file_name = entry_file_name(name);
    match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => &name[..name.len() - ext.len() - 1],
        _ => name,
    }
}

/// Expresses `path` relative to `root` with `/` separators.
///
/// # Returns
///
/// * `Ok(String)` - The relative path
/// * `Err(Error::InvalidPath)` - If `path` is not under `root` or is not valid UTF-8
pub fn relative_path_string(root: &Path, path: &Path) -> Result<String> {
    let relative = path.strip_prefix(root).map_err(|_| {
        Error::InvalidPath(
            path.to_path_buf(),
            format!("not under books root {:?}", root),
        )
    })?;

    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str().ok_or_else(|| {
                Error::InvalidPath(path.to_path_buf(), "path is not valid UTF-8".to_string())
            })?),
            _ => {
                return Err(Error::InvalidPath(
                    path.to_path_buf(),
                    "unexpected path component".to_string(),
                ));
            }
        }
    }
    Ok(parts.join("/"))
}

/// Like [`relative_path_string`], with components that are not valid UTF-8 converted
/// lossily. `None` if `path` is not under `root`.
pub fn relative_path_lossy(root: &Path, path: &Path) -> Option<String> {
    path.strip_prefix(root)
        .ok()?
        .components()
        .map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Option<Vec<_>>>()
        .map(|parts| parts.join("/"))
}

/// Joins a `/`-separated relative path onto `root`, refusing anything that would
/// leave it (absolute paths, `..`, drive prefixes).
pub fn join_relative(root: &Path, relative: &str) -> Result<PathBuf> {
    let mut joined = root.to_path_buf();
    for part in relative.split('/').filter(|p| !p.is_empty()) {
        let part_path = Path::new(part);
        match part_path.components().next() {
            Some(Component::Normal(_)) if part_path.components().count() == 1 => {
                joined.push(part)
            }
            _ => {
                return Err(Error::InvalidPath(
                    PathBuf::from(relative),
                    "relative path escapes its root".to_string(),
                ));
            }
        }
    }
    if joined == root {
        return Err(Error::InvalidPath(
            PathBuf::from(relative),
            "relative path is empty".to_string(),
        ));
    }
    Ok(joined)
}

/// Sanitizes a filename by replacing invalid characters with safe alternatives.
pub fn sanitize_filename(filename: &str) -> String {
    filename
        .chars()
        .map(|c| match c {
            '<' | '>' | '"' | '|' | '?' | '*' => '-',
            ':' => '-',
            '/' | '\\' => '-',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_get_file_name_lossy() {
        let path = Path::new("test/file.txt");
        assert_eq!(get_file_name_lossy(path), "file.txt");
        assert_eq!(get_file_name_lossy(Path::new("")), "unknown");
    }

    #[test]
    fn test_is_hidden_file() {
        assert!(is_hidden_file(Path::new(".hidden")));
        assert!(!is_hidden_file(Path::new("normal.fb2")));
    }

    #[test]
    fn test_entry_name_parts() {
        assert_eq!(entry_file_name("a/b/c.fb2"), "c.fb2");
        assert_eq!(entry_stem("a/b/c.fb2"), "c");
        assert_eq!(entry_stem("a/b/c.fb2.zip"), "c.fb2");
        assert_eq!(entry_stem(".hidden"), ".hidden");
        assert_eq!(strip_extension("a/b/c.pdf"), "a/b/c");
        assert_eq!(strip_extension("a.b/c"), "a.b/c");
        assert_eq!(entry_extension("a/B.ZIP"), Some("zip".to_string()));
        assert_eq!(entry_extension("dir/"), None);
    }

    #[test]
    fn test_relative_path_string() {
        let root = Path::new("/books");
        let path = Path::new("/books/sub/dir/file.fb2");
        assert_eq!(relative_path_string(root, path).unwrap(), "sub/dir/file.fb2");
        assert!(relative_path_string(root, Path::new("/elsewhere/x.fb2")).is_err());
        assert_eq!(
            relative_path_lossy(root, path).as_deref(),
            Some("sub/dir/file.fb2")
        );
        assert_eq!(relative_path_lossy(root, Path::new("/elsewhere/x.fb2")), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_relative_path_lossy_non_utf8() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let root = Path::new("/books");
        let path = root.join(OsStr::from_bytes(b"bad\xff.fb2"));
        assert!(relative_path_string(root, &path).is_err());
        assert_eq!(
            relative_path_lossy(root, &path).as_deref(),
            Some("bad\u{FFFD}.fb2")
        );
    }

    #[test]
    fn test_join_relative_rejects_escape() {
        let root = Path::new("/books");
        assert_eq!(
            join_relative(root, "a/b.fb2").unwrap(),
            PathBuf::from("/books/a/b.fb2")
        );
        assert!(join_relative(root, "../etc/passwd").is_err());
        assert!(join_relative(root, "").is_err());
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("test<file>"), "test-file-");
        assert_eq!(sanitize_filename("test:file"), "test-file");
        assert_eq!(sanitize_filename("test/file"), "test-file");
        assert_eq!(sanitize_filename("normal_file.txt"), "normal_file.txt");
    }
}
