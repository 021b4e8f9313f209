//! Loading collection databases and querying them.
//!
//! The loaded collection is an immutable snapshot behind an `Arc`. Reloading or clearing
//! swaps the pointer; queries already running keep the snapshot they started with.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};

use rayon::prelude::*;
use tokio::task::spawn_blocking;
use tokio_util::sync::CancellationToken;
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

use crate::database::{self, DATABASE_FILE_NAME};
use crate::error::{Error, Result};
use crate::path_utils::path_to_string_lossy;
use crate::types::{AuthorMatchPolicy, BookRecord, FileRecord, SearchQuery, SearchResultEntry};

/// Settings of a [`CollectionStore`], created through [`StoreConfig::builder()`].
#[derive(Debug, Clone, derive_builder::Builder)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct StoreConfig {
    /// Directory holding one sub-directory per collection.
    pub collections_root: PathBuf,

    /// How the author components of a query are matched.
    #[builder(default)]
    pub author_match: AuthorMatchPolicy,
}

impl StoreConfig {
    pub fn builder() -> StoreConfigBuilder {
        StoreConfigBuilder::default()
    }
}

impl StoreConfigBuilder {
    fn validate(&self) -> std::result::Result<(), String> {
        match &self.collections_root {
            Some(root) if root.as_os_str().is_empty() => {
                Err("collections_root must not be empty".to_string())
            }
            _ => Ok(()),
        }
    }
}

/// An immutable, fully decoded collection.
#[derive(Debug, Clone)]
pub struct LoadedCollection {
    pub name: String,
    pub books_root: PathBuf,
    pub files: Vec<FileRecord>,
}

impl LoadedCollection {
    pub fn book_count(&self) -> usize {
        self.files.iter().map(|file| file.books.len()).sum()
    }

    /// Absolute path of the file described by `file`.
    pub fn file_path(&self, file: &FileRecord) -> PathBuf {
        let mut path = self.books_root.clone();
        path.extend(file.relative_path.split('/').filter(|part| !part.is_empty()));
        path
    }
}

/// Marks that make a distinct Cyrillic letter (й, ё, ў, ї) rather than an accent.
const CYRILLIC_LETTER_MARKS: [char; 2] = ['\u{0306}', '\u{0308}'];

fn is_cyrillic(c: char) -> bool {
    matches!(c, '\u{0400}'..='\u{04FF}')
}

/// Case-folds `text` and strips accents: NFKD, combining marks dropped, lower-cased.
///
/// Compatibility decomposition also folds full-width forms onto their ASCII letters.
/// Breve and diaeresis on a Cyrillic letter are kept, so `й` and `ё` stay apart from
/// `и` and `е`.
pub fn normalize(text: &str) -> String {
    let mut folded = String::with_capacity(text.len());
    let mut after_cyrillic = false;
    for c in text.nfkd() {
        if is_combining_mark(c) {
            if after_cyrillic && CYRILLIC_LETTER_MARKS.contains(&c) {
                folded.push(c);
            }
            continue;
        }
        after_cyrillic = is_cyrillic(c);
        folded.extend(c.to_lowercase());
    }
    folded.nfc().collect()
}

/// A [`SearchQuery`] with every pattern normalized once up front.
#[derive(Debug, Clone)]
struct QueryMatcher {
    policy: AuthorMatchPolicy,
    author: Vec<String>,
    title: Option<String>,
    series: Option<String>,
    genre: Option<String>,
    date: Option<String>,
}

fn pattern(field: &str) -> Option<String> {
    let field = field.trim();
    (!field.is_empty()).then(|| normalize(field))
}

impl QueryMatcher {
    fn new(query: &SearchQuery, policy: AuthorMatchPolicy) -> Self {
        let author = match policy {
            AuthorMatchPolicy::Components => query
                .author_components()
                .flat_map(str::split_whitespace)
                .map(normalize)
                .collect(),
            AuthorMatchPolicy::Substring => {
                let joined = query.author_components().collect::<Vec<_>>().join(" ");
                pattern(&joined).into_iter().collect()
            }
        };
        Self {
            policy,
            author,
            title: pattern(&query.title),
            series: pattern(&query.series),
            genre: pattern(&query.genre),
            date: pattern(&query.date),
        }
    }

    fn author_matches(&self, author: &str) -> bool {
        if self.author.is_empty() {
            return true;
        }
        let author = normalize(author);
        match self.policy {
            AuthorMatchPolicy::Components => {
                let words: Vec<&str> = author
                    .split(|c: char| c.is_whitespace() || c == ',')
                    .filter(|word| !word.is_empty())
                    .collect();
                self.author
                    .iter()
                    .all(|component| words.iter().any(|word| word.contains(component.as_str())))
            }
            AuthorMatchPolicy::Substring => self
                .author
                .iter()
                .all(|joined| author.contains(joined.as_str())),
        }
    }

    fn matches(&self, book: &BookRecord) -> bool {
        let field = |pattern: &Option<String>, value: &str| match pattern {
            Some(pattern) => normalize(value).contains(pattern.as_str()),
            None => true,
        };
        field(&self.title, &book.title)
            && field(&self.series, &book.series)
            && field(&self.genre, &book.genre)
            && field(&self.date, &book.date)
            && self.author_matches(&book.author)
    }
}

/// Holds at most one loaded collection and answers queries against it.
///
/// # Example
///
/// ```rust,no_run
/// # use shelve::prelude::*;
/// # use std::path::PathBuf;
/// # use tokio_util::sync::CancellationToken;
/// # #[tokio::main]
/// # async fn main() -> shelve::error::Result<()> {
/// let store = CollectionStore::new(
///     StoreConfig::builder()
///         .collections_root(PathBuf::from("./collections"))
///         .build()?,
/// );
/// store.load("main").await?;
///
/// let query = SearchQuery {
///     surname: "tolstoy".to_string(),
///     ..Default::default()
/// };
/// for hit in store.search(&query, &CancellationToken::new())? {
///     println!("{} ({})", hit.book.title, hit.file_path.display());
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct CollectionStore {
    config: StoreConfig,
    snapshot: RwLock<Option<Arc<LoadedCollection>>>,
}

impl CollectionStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            snapshot: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn collection_dir(&self, name: &str) -> Result<PathBuf> {
        if name.trim().is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(Error::InvalidPath(
                PathBuf::from(name),
                "not a valid collection name".to_string(),
            ));
        }
        Ok(self.config.collections_root.join(name))
    }

    fn install(&self, collection: Option<Arc<LoadedCollection>>) {
        *self
            .snapshot
            .write()
            .unwrap_or_else(PoisonError::into_inner) = collection;
    }

    /// Reads the database of collection `name` and makes it the current snapshot.
    ///
    /// # Returns
    ///
    /// * `Ok(Arc<LoadedCollection>)` - The new snapshot
    /// * `Err(Error::Load)` - The database is missing, truncated or malformed; the
    ///   previous snapshot stays in place
    pub async fn load(&self, name: &str) -> Result<Arc<LoadedCollection>> {
        let path = self.collection_dir(name)?.join(DATABASE_FILE_NAME);
        let database = spawn_blocking(move || database::read_database(&path)).await??;

        let collection = Arc::new(LoadedCollection {
            name: name.to_string(),
            books_root: database.books_root,
            files: database.files,
        });
        log::info!(
            "Loaded collection '{}': {} files, {} books",
            name,
            collection.files.len(),
            collection.book_count()
        );
        self.install(Some(Arc::clone(&collection)));
        Ok(collection)
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> Result<Arc<LoadedCollection>> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(Error::NotLoaded)
    }

    pub fn is_loaded(&self) -> bool {
        self.snapshot().is_ok()
    }

    /// Drops the loaded snapshot. Queries fail with [`Error::NotLoaded`] until the next load.
    pub fn clear_base(&self) {
        self.install(None);
    }

    /// Copy of the file records of the loaded collection, in database order.
    pub fn files(&self) -> Result<Vec<FileRecord>> {
        Ok(self.snapshot()?.files.clone())
    }

    pub fn book_count(&self) -> Result<usize> {
        Ok(self.snapshot()?.book_count())
    }

    /// Finds every book matching all non-empty fields of `query`.
    ///
    /// Fields are compared as case- and accent-insensitive substrings; an empty query
    /// matches every book. Files are scanned in parallel, results keep collection order.
    ///
    /// # Returns
    ///
    /// * `Ok(Vec<SearchResultEntry>)` - Matching books with the absolute path of their file
    /// * `Err(Error::NotLoaded)` - No collection is loaded
    /// * `Err(Error::Cancelled)` - The token fired during the scan
    pub fn search(
        &self,
        query: &SearchQuery,
        cancel: &CancellationToken,
    ) -> Result<Vec<SearchResultEntry>> {
        let snapshot = self.snapshot()?;
        let matcher = QueryMatcher::new(query, self.config.author_match);

        let collection = &*snapshot;
        let matcher = &matcher;
        let results: Vec<SearchResultEntry> = collection
            .files
            .par_iter()
            .filter(|_| !cancel.is_cancelled())
            .flat_map_iter(move |file| {
                let file_path = collection.file_path(file);
                file.books
                    .iter()
                    .filter(move |book| matcher.matches(book))
                    .map(move |book| SearchResultEntry {
                        book: book.clone(),
                        file_path: file_path.clone(),
                    })
            })
            .collect();

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        log::debug!("Search matched {} books", results.len());
        Ok(results)
    }

    /// Distinct author names of the loaded collection, sorted.
    ///
    /// Stored author strings holding several authors are split on `,`. `progress` receives
    /// the fraction of files scanned, ending with `1.0`.
    pub fn list_authors<F>(&self, progress: F, cancel: &CancellationToken) -> Result<Vec<String>>
    where
        F: Fn(f64) + Sync,
    {
        let snapshot = self.snapshot()?;
        let total = snapshot.files.len();
        let step = (total / 100).max(1);

        let mut authors = BTreeSet::new();
        for (index, file) in snapshot.files.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            for book in &file.books {
                authors.extend(
                    book.author
                        .split(',')
                        .map(str::trim)
                        .filter(|author| !author.is_empty())
                        .map(str::to_string),
                );
            }
            let done = index + 1;
            if done % step == 0 && done < total {
                progress(done as f64 / total as f64);
            }
        }
        progress(1.0);
        Ok(authors.into_iter().collect())
    }

    /// Books root of collection `name`, read from its database header without loading it.
    pub fn get_books_path(&self, name: &str) -> Result<PathBuf> {
        database::read_books_root(&self.collection_dir(name)?.join(DATABASE_FILE_NAME))
    }

    /// Names of all collections that have a database, sorted.
    pub fn list_collections(&self) -> Result<Vec<String>> {
        let root = &self.config.collections_root;
        if !root.is_dir() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in std::fs::read_dir(root)? {
            let entry = entry?;
            if !entry.path().join(DATABASE_FILE_NAME).is_file() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) => names.push(name),
                Err(name) => log::warn!("Ignoring collection with non UTF-8 name {:?}", name),
            }
        }
        names.sort();
        Ok(names)
    }

    /// Deletes the collection directory (the books themselves are not touched).
    ///
    /// Clears the snapshot when it belongs to that collection.
    pub async fn remove_collection(&self, name: &str) -> Result<()> {
        let dir = self.collection_dir(name)?;
        if !dir.join(DATABASE_FILE_NAME).is_file() {
            return Err(Error::NotFound(format!("collection '{}'", name)));
        }
        if self.snapshot().map(|loaded| loaded.name == name).unwrap_or(false) {
            self.clear_base();
        }
        tokio::fs::remove_dir_all(&dir).await?;
        log::info!("Removed collection '{}' ({})", name, path_to_string_lossy(&dir));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ContentHash;
    use std::sync::Mutex;

    fn book(path: &str, author: &str, title: &str, genre: &str) -> BookRecord {
        BookRecord {
            path_in_container: path.to_string(),
            author: author.to_string(),
            title: title.to_string(),
            series: String::new(),
            genre: genre.to_string(),
            date: String::new(),
        }
    }

    fn store_with(policy: AuthorMatchPolicy) -> CollectionStore {
        let store = CollectionStore::new(
            StoreConfig::builder()
                .collections_root(PathBuf::from("/nonexistent"))
                .author_match(policy)
                .build()
                .unwrap(),
        );
        store.install(Some(Arc::new(LoadedCollection {
            name: "test".to_string(),
            books_root: PathBuf::from("/library"),
            files: vec![
                FileRecord {
                    relative_path: "ru/war.fb2".to_string(),
                    content_hash: ContentHash::default(),
                    books: vec![book("", "Толстой Лев Николаевич", "Война и мир", "prose")],
                },
                FileRecord {
                    relative_path: "mix.zip".to_string(),
                    content_hash: ContentHash::default(),
                    books: vec![
                        book("a.fb2", "Brontë Emily, Brontë Charlotte", "Wuthering Heights", "prose"),
                        book("b.fb2", "Adams Douglas", "ＨＩＴＣＨＨＩＫＥＲ", "sf"),
                    ],
                },
            ],
        })));
        store
    }

    #[test]
    fn test_normalize_folds_case_accents_and_width() {
        assert_eq!(normalize("Brontë"), "bronte");
        assert_eq!(normalize("ＡＢＣ"), "abc");
        assert_eq!(normalize("Ёлка"), "ёлка");
        assert_eq!(normalize("ЙОГА"), "йога");
        assert_eq!(normalize("Café Ёж"), "cafe ёж");
    }

    #[test]
    fn test_short_i_is_not_folded_onto_i() {
        let store = store_with(AuthorMatchPolicy::Components);
        let cancel = CancellationToken::new();
        let query = |surname: &str| SearchQuery {
            surname: surname.to_string(),
            ..Default::default()
        };
        assert_eq!(store.search(&query("толстой"), &cancel).unwrap().len(), 1);
        assert!(store.search(&query("Толстои"), &cancel).unwrap().is_empty());
    }

    #[test]
    fn test_empty_query_returns_everything_in_order() {
        let store = store_with(AuthorMatchPolicy::Components);
        let results = store
            .search(&SearchQuery::default(), &CancellationToken::new())
            .unwrap();
        let titles: Vec<_> = results.iter().map(|r| r.book.title.as_str()).collect();
        assert_eq!(titles, vec!["Война и мир", "Wuthering Heights", "ＨＩＴＣＨＨＩＫＥＲ"]);
        assert_eq!(results[0].file_path, PathBuf::from("/library/ru/war.fb2"));
    }

    #[test]
    fn test_fields_are_conjunctive() {
        let store = store_with(AuthorMatchPolicy::Components);
        let cancel = CancellationToken::new();

        let query = SearchQuery {
            genre: "prose".to_string(),
            ..Default::default()
        };
        assert_eq!(store.search(&query, &cancel).unwrap().len(), 2);

        let query = SearchQuery {
            genre: "prose".to_string(),
            title: "heights".to_string(),
            ..Default::default()
        };
        let results = store.search(&query, &cancel).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].book.path_in_container, "a.fb2");

        let query = SearchQuery {
            genre: "sf".to_string(),
            title: "heights".to_string(),
            ..Default::default()
        };
        assert!(store.search(&query, &cancel).unwrap().is_empty());

        let query = SearchQuery {
            title: "hitch".to_string(),
            ..Default::default()
        };
        assert_eq!(store.search(&query, &cancel).unwrap().len(), 1);
    }

    #[test]
    fn test_author_component_policies() {
        let cancel = CancellationToken::new();
        let query = SearchQuery {
            surname: "Толстой".to_string(),
            first_name: "лев".to_string(),
            ..Default::default()
        };
        let swapped = SearchQuery {
            surname: "Лев".to_string(),
            first_name: "Толстой".to_string(),
            ..Default::default()
        };

        let components = store_with(AuthorMatchPolicy::Components);
        assert_eq!(components.search(&query, &cancel).unwrap().len(), 1);
        assert_eq!(components.search(&swapped, &cancel).unwrap().len(), 1);

        let substring = store_with(AuthorMatchPolicy::Substring);
        assert_eq!(substring.search(&query, &cancel).unwrap().len(), 1);
        assert!(substring.search(&swapped, &cancel).unwrap().is_empty());

        let accented = SearchQuery {
            surname: "bronte".to_string(),
            ..Default::default()
        };
        assert_eq!(components.search(&accented, &cancel).unwrap().len(), 1);
    }

    #[test]
    fn test_cancelled_search() {
        let store = store_with(AuthorMatchPolicy::Components);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = store.search(&SearchQuery::default(), &cancel);
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[test]
    fn test_list_authors_splits_and_sorts() {
        let store = store_with(AuthorMatchPolicy::Components);
        let reported = Mutex::new(Vec::new());
        let authors = store
            .list_authors(
                |fraction| reported.lock().unwrap().push(fraction),
                &CancellationToken::new(),
            )
            .unwrap();
        assert_eq!(
            authors,
            vec![
                "Adams Douglas",
                "Brontë Charlotte",
                "Brontë Emily",
                "Толстой Лев Николаевич"
            ]
        );
        let reported = reported.into_inner().unwrap();
        assert_eq!(reported.last(), Some(&1.0));
    }

    #[test]
    fn test_clear_base_unloads() {
        let store = store_with(AuthorMatchPolicy::Components);
        assert_eq!(store.book_count().unwrap(), 3);
        store.clear_base();
        assert!(matches!(
            store.search(&SearchQuery::default(), &CancellationToken::new()),
            Err(Error::NotLoaded)
        ));
        assert!(matches!(
            store.list_authors(|_| {}, &CancellationToken::new()),
            Err(Error::NotLoaded)
        ));
    }
}
