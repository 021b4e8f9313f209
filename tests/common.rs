//! Common test utilities and constants for the Shelve crate.
//!
//! Provides functions for setting up test directories, writing FB2 books and building
//! zip archives (including archives nested inside archives) as fixtures.

use rand::{Rng, distributions::Alphanumeric};
use shelve::prelude::*;
use std::io::{Cursor, Write};
use std::time::Duration;
use tokio::fs;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

#[allow(dead_code)]
pub const TEST_TMP_DIR: &str = "tests/tmp";
#[allow(dead_code)]
pub const TEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Directories of one test: books to scan, collections to write, scratch for walking.
#[allow(dead_code)]
pub struct TestDirs {
    pub test_dir: PathBuf,
    pub books_dir: PathBuf,
    pub collections_dir: PathBuf,
    pub scratch_dir: PathBuf,
}

/// Creates a fresh, uniquely named test directory with its sub-directories.
#[allow(dead_code)]
pub async fn setup_test_dirs(sub_path: &str) -> TestDirs {
    let rand_string: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    let unique_sub_path = format!("{}-{}", sub_path, rand_string);
    let test_dir = PathBuf::from(TEST_TMP_DIR).join(unique_sub_path);
    if test_dir.exists() {
        fs::remove_dir_all(&test_dir).await.unwrap();
    }
    let books_dir = test_dir.join("books");
    let collections_dir = test_dir.join("collections");
    let scratch_dir = test_dir.join("scratch");

    fs::create_dir_all(&books_dir).await.unwrap();
    fs::create_dir_all(&collections_dir).await.unwrap();
    fs::create_dir_all(&scratch_dir).await.unwrap();

    TestDirs {
        test_dir,
        books_dir,
        collections_dir,
        scratch_dir,
    }
}

/// Removes a test directory once a test is done with it.
#[allow(dead_code)]
pub async fn cleanup_test_dir(dirs: TestDirs) {
    let _ = fs::remove_dir_all(&dirs.test_dir).await;
}

/// FB2 document with one author (`last first`), a title and a genre.
#[allow(dead_code)]
pub fn fb2_bytes(title: &str, last_name: &str, first_name: &str, genre: &str) -> Vec<u8> {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<FictionBook xmlns="http://www.gribuser.ru/xml/fictionbook/2.0">
  <description>
    <title-info>
      <genre>{genre}</genre>
      <author><first-name>{first_name}</first-name><last-name>{last_name}</last-name></author>
      <book-title>{title}</book-title>
    </title-info>
  </description>
  <body><p>Once upon a time.</p></body>
</FictionBook>"#
    )
    .into_bytes()
}

/// Builds a zip archive in memory from `(name, content)` pairs, in the given order.
#[allow(dead_code)]
pub fn zip_bytes(entries: &[(&str, Vec<u8>)]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, content) in entries {
        writer
            .start_file(*name, SimpleFileOptions::default())
            .unwrap();
        writer.write_all(content).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// Writes `content` to `path`, creating parent directories.
#[allow(dead_code)]
pub async fn write_file(path: &Path, content: &[u8]) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await.unwrap();
    }
    fs::write(path, content).await.unwrap();
}

/// A build configuration over the test directories, with two worker threads.
#[allow(dead_code)]
pub fn build_config(dirs: &TestDirs, name: &str) -> BuildConfigBuilder {
    let mut builder = BuildConfig::builder();
    builder
        .collections_root(dirs.collections_dir.clone())
        .collection_name(name)
        .books_path(dirs.books_dir.clone())
        .scratch_dir(dirs.scratch_dir.clone())
        .threads(2usize);
    builder
}

/// A store over the test collections directory.
#[allow(dead_code)]
pub fn store(dirs: &TestDirs) -> CollectionStore {
    CollectionStore::new(
        StoreConfig::builder()
            .collections_root(dirs.collections_dir.clone())
            .build()
            .unwrap(),
    )
}
