//! Building and refreshing collection databases.
//!
//! A [`CollectionBuilder`] enumerates the books directory, hashes every candidate file,
//! reuses the previous record of files whose hash did not change and parses the others.
//! At most [`BuildConfig::threads`] files are in flight at once. Finished records are
//! committed to the database strictly in enumeration order, so two refreshes over an
//! unchanged directory produce byte-identical files.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use futures::future::try_join_all;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::spawn_blocking;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use crate::archive::ArchiveWalker;
use crate::archive::walker::{DEFAULT_IN_MEMORY_ARCHIVE_LIMIT, DEFAULT_MAX_NESTING_DEPTH};
use crate::database::{self, DatabaseWriter, encode_record};
use crate::error::{Error, Result};
use crate::hasher::{ContentHasher, MAX_CHUNK_SIZE};
use crate::parser::ParserRegistry;
use crate::path_utils::{
    entry_stem, get_file_name_lossy, is_hidden_file, join_relative, path_to_string_lossy,
    relative_path_lossy, relative_path_string,
};
use crate::scoped_path::ScratchSpace;
use crate::types::{BookRecord, BuildSummary, ContentHash, EntryKind, FileRecord};

/// Progress callback receiving a running total.
pub type ProgressHook = Arc<dyn Fn(u64) + Send + Sync + 'static>;

/// Settings of a collection build, created through [`BuildConfig::builder()`].
///
/// ```rust,no_run
/// # use shelve::prelude::*;
/// # use std::path::PathBuf;
/// let config = BuildConfig::builder()
///     .collections_root(PathBuf::from("./collections"))
///     .collection_name("main")
///     .books_path(PathBuf::from("./books"))
///     .threads(4usize)
///     .build()
///     .expect("Invalid configuration");
/// ```
#[derive(Clone, derive_builder::Builder)]
#[builder(setter(into, strip_option), build_fn(validate = "Self::validate"))]
pub struct BuildConfig {
    /// Directory holding one sub-directory per collection.
    pub collections_root: PathBuf,

    /// Name of the collection; its database is `<collections_root>/<name>/books.db`.
    pub collection_name: String,

    /// Directory scanned for books.
    ///
    /// Required for a first build. A refresh without it reuses the books root stored in
    /// the existing database.
    #[builder(default)]
    pub books_path: Option<PathBuf>,

    /// Maximum number of files hashed or parsed at the same time.
    #[builder(default = "num_cpus::get()")]
    pub threads: usize,

    /// Read size used while hashing, at most [`MAX_CHUNK_SIZE`].
    #[builder(default = "MAX_CHUNK_SIZE")]
    pub hash_chunk_size: usize,

    /// Nested archives up to this uncompressed size are walked in memory.
    #[builder(default = "DEFAULT_IN_MEMORY_ARCHIVE_LIMIT")]
    pub in_memory_archive_limit: u64,

    #[builder(default = "DEFAULT_MAX_NESTING_DEPTH")]
    pub max_nesting_depth: usize,

    /// Where large nested archives are unpacked while they are walked.
    #[builder(default = "std::env::temp_dir()")]
    pub scratch_dir: PathBuf,

    /// On refresh, delete directories left empty by files that disappeared.
    #[builder(default = "false")]
    pub remove_empty: bool,

    #[builder(default)]
    pub parsers: ParserRegistry,

    /// Called with the total number of bytes hashed so far.
    #[builder(default)]
    pub on_bytes_hashed: Option<ProgressHook>,

    /// Called with the number of files finished so far (parsed, reused or failed).
    #[builder(default)]
    pub on_file_parsed: Option<ProgressHook>,

    /// Called once with the total size of all candidate files.
    #[builder(default)]
    pub on_total_bytes_known: Option<ProgressHook>,
}

fn hook_state(hook: &Option<ProgressHook>) -> &'static str {
    if hook.is_some() {
        "Some(Function)"
    } else {
        "None"
    }
}

impl fmt::Debug for BuildConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildConfig")
            .field("collections_root", &self.collections_root)
            .field("collection_name", &self.collection_name)
            .field("books_path", &self.books_path)
            .field("threads", &self.threads)
            .field("hash_chunk_size", &self.hash_chunk_size)
            .field("in_memory_archive_limit", &self.in_memory_archive_limit)
            .field("max_nesting_depth", &self.max_nesting_depth)
            .field("scratch_dir", &self.scratch_dir)
            .field("remove_empty", &self.remove_empty)
            .field("parsers", &self.parsers)
            .field("on_bytes_hashed", &hook_state(&self.on_bytes_hashed))
            .field("on_file_parsed", &hook_state(&self.on_file_parsed))
            .field("on_total_bytes_known", &hook_state(&self.on_total_bytes_known))
            .finish()
    }
}

impl BuildConfig {
    pub fn builder() -> BuildConfigBuilder {
        BuildConfigBuilder::default()
    }

    /// Path of the database this configuration builds.
    pub fn database_path(&self) -> PathBuf {
        database::database_path(&self.collections_root, &self.collection_name)
    }
}

impl BuildConfigBuilder {
    fn validate(&self) -> std::result::Result<(), String> {
        if let Some(root) = &self.collections_root {
            if root.as_os_str().is_empty() {
                return Err("collections_root must not be empty".to_string());
            }
        }
        if let Some(name) = &self.collection_name {
            if name.trim().is_empty() {
                return Err("collection_name must not be empty".to_string());
            }
            if name.contains(['/', '\\']) || name == "." || name == ".." {
                return Err(format!("Invalid collection_name: {}", name));
            }
        }
        if let Some(threads) = self.threads {
            if threads == 0 {
                return Err("threads must be at least 1".to_string());
            }
        }
        if let Some(chunk) = self.hash_chunk_size {
            if chunk == 0 || chunk > MAX_CHUNK_SIZE {
                return Err(format!(
                    "hash_chunk_size must be between 1 and {} bytes",
                    MAX_CHUNK_SIZE
                ));
            }
        }
        Ok(())
    }
}

/// A file under the books root selected for ingestion.
#[derive(Debug, Clone)]
struct Candidate {
    path: PathBuf,
    relative_path: String,
    size: u64,
    /// The name is not valid UTF-8 and `relative_path` is a lossy rendering of it.
    lossy_name: bool,
}

/// Lists book and archive files below `root`, sorted by name at every level.
fn enumerate_candidates(root: &Path, parsers: &ParserRegistry) -> Result<Vec<Candidate>> {
    let mut candidates = Vec::new();
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_hidden_file(entry.path()));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => return Err(std::io::Error::from(e).into()),
            Err(e) => {
                log::warn!("Skipping unreadable path below books root: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let name = get_file_name_lossy(entry.path());
        if !matches!(parsers.classify(&name), EntryKind::Book | EntryKind::Archive) {
            continue;
        }
        let (relative_path, lossy_name) = match relative_path_string(root, entry.path()) {
            Ok(relative) => (relative, false),
            Err(e) => match relative_path_lossy(root, entry.path()) {
                Some(relative) => {
                    log::warn!("Recording '{}' without books: {}", relative, e);
                    (relative, true)
                }
                None => {
                    log::warn!("Skipping '{}': {}", path_to_string_lossy(entry.path()), e);
                    continue;
                }
            },
        };
        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        candidates.push(Candidate {
            path: entry.into_path(),
            relative_path,
            size,
            lossy_name,
        });
    }
    Ok(candidates)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileStatus {
    Parsed,
    Reused,
    Failed,
}

#[derive(Debug)]
struct Ingested {
    record: FileRecord,
    status: FileStatus,
}

/// Everything a file task needs, shared by all tasks of one run.
struct Ingest {
    parsers: ParserRegistry,
    scratch: ScratchSpace,
    hasher: ContentHasher,
    cancel: CancellationToken,
    previous: HashMap<String, FileRecord>,
    in_memory_limit: u64,
    max_depth: usize,
    bytes_hashed: AtomicU64,
    files_done: AtomicU64,
    on_bytes_hashed: Option<ProgressHook>,
    on_file_parsed: Option<ProgressHook>,
}

impl Ingest {
    fn new(
        config: &BuildConfig,
        cancel: CancellationToken,
        previous: HashMap<String, FileRecord>,
    ) -> Self {
        Self {
            parsers: config.parsers.clone(),
            scratch: ScratchSpace::new(config.scratch_dir.clone()),
            hasher: ContentHasher::with_chunk_size(config.hash_chunk_size),
            cancel,
            previous,
            in_memory_limit: config.in_memory_archive_limit,
            max_depth: config.max_nesting_depth,
            bytes_hashed: AtomicU64::new(0),
            files_done: AtomicU64::new(0),
            on_bytes_hashed: config.on_bytes_hashed.clone(),
            on_file_parsed: config.on_file_parsed.clone(),
        }
    }

    fn report_hashed(&self, bytes: u64) {
        let total = self.bytes_hashed.fetch_add(bytes, Ordering::Relaxed) + bytes;
        if let Some(hook) = &self.on_bytes_hashed {
            hook(total);
        }
    }

    fn finish(&self, record: FileRecord, status: FileStatus) -> Ingested {
        let total = self.files_done.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(hook) = &self.on_file_parsed {
            hook(total);
        }
        Ingested { record, status }
    }

    /// Hashes the file, then reuses or parses it.
    ///
    /// Only cancellation is returned as an error; every other failure becomes a record
    /// without books.
    fn ingest(&self, candidate: &Candidate) -> Result<Ingested> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let empty = |content_hash: ContentHash| FileRecord {
            relative_path: candidate.relative_path.clone(),
            content_hash,
            books: Vec::new(),
        };
        // Its stored path would not lead back to the file.
        if candidate.lossy_name {
            return Ok(self.finish(empty(ContentHash::default()), FileStatus::Failed));
        }

        let hash = match self.hasher.hash_file_with_progress(&candidate.path, &self.cancel, |n| {
            self.report_hashed(n)
        }) {
            Ok(hash) => hash,
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                log::warn!("Failed to hash '{}': {}", candidate.relative_path, e);
                return Ok(self.finish(empty(ContentHash::default()), FileStatus::Failed));
            }
        };

        if let Some(previous) = self
            .previous
            .get(&candidate.relative_path)
            .filter(|previous| previous.content_hash == hash)
        {
            log::debug!("Reusing unchanged '{}'", candidate.relative_path);
            return Ok(self.finish(previous.clone(), FileStatus::Reused));
        }

        // A panicking parser only costs this file.
        let parsed = panic::catch_unwind(AssertUnwindSafe(|| self.parse(candidate)))
            .unwrap_or_else(|_| Err(Error::parse(&candidate.relative_path, "parser panicked")));
        match parsed {
            Ok(books) => Ok(self.finish(
                FileRecord {
                    relative_path: candidate.relative_path.clone(),
                    content_hash: hash,
                    books,
                },
                FileStatus::Parsed,
            )),
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => {
                log::warn!("Failed to parse '{}': {}", candidate.relative_path, e);
                Ok(self.finish(empty(hash), FileStatus::Failed))
            }
        }
    }

    fn parse(&self, candidate: &Candidate) -> Result<Vec<BookRecord>> {
        let name = get_file_name_lossy(&candidate.path);
        match self.parsers.classify(&name) {
            EntryKind::Archive => ArchiveWalker::new(&self.parsers, &self.scratch, &self.cancel)
                .in_memory_limit(self.in_memory_limit)
                .max_depth(self.max_depth)
                .walk(&candidate.path),
            _ => {
                let bytes = std::fs::read(&candidate.path)?;
                let mut record = self.parsers.parse(&name, &bytes)?;
                record.path_in_container.clear();
                record.ensure_title(entry_stem(&name));
                Ok(vec![record])
            }
        }
    }
}

struct SinkState {
    writer: Option<DatabaseWriter>,
    next: usize,
    parked: BTreeMap<usize, (Option<Vec<u8>>, OwnedSemaphorePermit)>,
    error: Option<Error>,
}

/// Serializes records into the database in enumeration order.
///
/// A record that finishes early is parked together with its admission permit until every
/// predecessor has been written, which keeps at most `threads` records in memory.
struct RecordSink {
    state: Mutex<SinkState>,
}

impl RecordSink {
    fn new(writer: DatabaseWriter) -> Self {
        Self {
            state: Mutex::new(SinkState {
                writer: Some(writer),
                next: 0,
                parked: BTreeMap::new(),
                error: None,
            }),
        }
    }

    /// Hands in the encoded record for `seq` (`None` writes nothing but still advances).
    fn commit(&self, seq: usize, encoded: Option<Vec<u8>>, permit: OwnedSemaphorePermit) {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let state = &mut *guard;
        state.parked.insert(seq, (encoded, permit));

        while let Some(entry) = state.parked.first_entry() {
            if *entry.key() != state.next {
                break;
            }
            let (encoded, permit) = entry.remove();
            if let (Some(bytes), Some(writer), None) =
                (encoded, state.writer.as_mut(), state.error.as_ref())
            {
                if let Err(e) = writer.append(&bytes) {
                    state.error = Some(e);
                }
            }
            state.next += 1;
            drop(permit);
        }
    }

    /// Takes the writer back once every task has committed.
    fn finish(&self) -> Result<DatabaseWriter> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(e) = state.error.take() {
            return Err(e);
        }
        if !state.parked.is_empty() {
            return Err(Error::Other(format!(
                "{} records were never written",
                state.parked.len()
            )));
        }
        state
            .writer
            .take()
            .ok_or_else(|| Error::Other("database writer already taken".to_string()))
    }
}

/// A task's claim on its sequence number in a [`RecordSink`].
///
/// Dropping the slot without committing (a panicking task) commits nothing for `seq`,
/// so later records are still written and their permits released.
struct CommitSlot {
    sink: Arc<RecordSink>,
    seq: usize,
    permit: Option<OwnedSemaphorePermit>,
}

impl CommitSlot {
    fn new(sink: Arc<RecordSink>, seq: usize, permit: OwnedSemaphorePermit) -> Self {
        Self {
            sink,
            seq,
            permit: Some(permit),
        }
    }

    fn commit(mut self, encoded: Option<Vec<u8>>) {
        if let Some(permit) = self.permit.take() {
            self.sink.commit(self.seq, encoded, permit);
        }
    }
}

impl Drop for CommitSlot {
    fn drop(&mut self) {
        if let Some(permit) = self.permit.take() {
            log::debug!("Task for record {} ended without a result", self.seq);
            self.sink.commit(self.seq, None, permit);
        }
    }
}

/// Builds, refreshes and extends one collection database.
///
/// # Example
///
/// ```rust,no_run
/// # use shelve::prelude::*;
/// # use std::path::PathBuf;
/// # #[tokio::main]
/// # async fn main() -> shelve::error::Result<()> {
/// let config = BuildConfig::builder()
///     .collections_root(PathBuf::from("./collections"))
///     .collection_name("main")
///     .books_path(PathBuf::from("./books"))
///     .build()?;
///
/// let builder = CollectionBuilder::new(config);
/// let summary = builder.refresh().await?;
/// println!("{} books in {} files", summary.books_total, summary.files_total);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct CollectionBuilder {
    config: BuildConfig,
    cancel: CancellationToken,
}

impl CollectionBuilder {
    pub fn new(config: BuildConfig) -> Self {
        Self::with_cancellation(config, CancellationToken::new())
    }

    /// Uses an existing token, e.g. one shared with a [`CollectionStore`](crate::store::CollectionStore) query.
    pub fn with_cancellation(config: BuildConfig, cancel: CancellationToken) -> Self {
        Self { config, cancel }
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    /// Requests cancellation of the running build. The previous database stays untouched.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn database_path(&self) -> PathBuf {
        self.config.database_path()
    }

    /// The configured books path, or the one recorded in the existing database.
    pub fn books_root(&self) -> Result<PathBuf> {
        match &self.config.books_path {
            Some(path) => Ok(path.clone()),
            None => database::read_books_root(&self.database_path()).map_err(|_| {
                Error::NotFound(format!(
                    "No books path configured for collection '{}' and no existing database",
                    self.config.collection_name
                ))
            }),
        }
    }

    /// Builds the database from scratch, parsing every file.
    ///
    /// # Returns
    ///
    /// * `Ok(BuildSummary)` - The database was written and renamed into place
    /// * `Err(Error::Cancelled)` - The build was cancelled; the old database is untouched
    /// * `Err(Error)` - The books root could not be enumerated or the database not written
    pub async fn build(&self) -> Result<BuildSummary> {
        let books_root = self.books_root()?;
        log::info!(
            "Building collection '{}' from '{}'",
            self.config.collection_name,
            path_to_string_lossy(&books_root)
        );
        self.run(books_root, HashMap::new()).await
    }

    /// Rebuilds the database, reusing the records of files whose content hash is unchanged.
    ///
    /// Files that disappeared are dropped; with [`BuildConfig::remove_empty`] the
    /// directories they leave empty are removed as well.
    pub async fn refresh(&self) -> Result<BuildSummary> {
        let books_root = self.books_root()?;
        let db_path = self.database_path();
        let previous = if db_path.exists() {
            let path = db_path.clone();
            match spawn_blocking(move || database::read_database(&path)).await? {
                Ok(database) => database
                    .files
                    .into_iter()
                    .map(|record| (record.relative_path.clone(), record))
                    .collect(),
                Err(e) => {
                    log::warn!("Previous database unusable, rebuilding from scratch: {}", e);
                    HashMap::new()
                }
            }
        } else {
            HashMap::new()
        };
        log::info!(
            "Refreshing collection '{}' ({} known files)",
            self.config.collection_name,
            previous.len()
        );
        self.run(books_root, previous).await
    }

    async fn run(
        &self,
        books_root: PathBuf,
        previous: HashMap<String, FileRecord>,
    ) -> Result<BuildSummary> {
        let started = Instant::now();
        if !books_root.is_dir() {
            return Err(Error::NotFound(format!(
                "Books directory does not exist: {:?}",
                books_root
            )));
        }

        let parsers = self.config.parsers.clone();
        let root = books_root.clone();
        let candidates = spawn_blocking(move || enumerate_candidates(&root, &parsers)).await??;

        if let Some(hook) = &self.config.on_total_bytes_known {
            hook(candidates.iter().map(|candidate| candidate.size).sum());
        }

        let current: HashSet<String> = candidates
            .iter()
            .map(|candidate| candidate.relative_path.clone())
            .collect();
        let removed: Vec<String> = previous
            .keys()
            .filter(|relative| !current.contains(*relative))
            .cloned()
            .collect();
        let files_total = candidates.len();

        let writer = DatabaseWriter::create(&self.database_path(), &books_root)?;
        let sink = Arc::new(RecordSink::new(writer));
        let ingest = Arc::new(Ingest::new(&self.config, self.cancel.clone(), previous));
        let semaphore = Arc::new(Semaphore::new(self.config.threads));

        let mut handles = Vec::with_capacity(files_total);
        let mut interrupted = false;
        for (seq, candidate) in candidates.into_iter().enumerate() {
            let permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    interrupted = true;
                    break;
                }
                permit = Arc::clone(&semaphore).acquire_owned() => permit?,
            };
            let ingest = Arc::clone(&ingest);
            let sink = Arc::clone(&sink);
            handles.push(spawn_blocking(move || {
                let slot = CommitSlot::new(sink, seq, permit);
                let result = ingest.ingest(&candidate);
                slot.commit(result.as_ref().ok().map(|done| encode_record(&done.record)));
                result
            }));
        }

        let results = try_join_all(handles).await?;
        if interrupted || self.cancel.is_cancelled() {
            log::debug!(
                "Build of '{}' cancelled, keeping the previous database",
                self.config.collection_name
            );
            return Err(Error::Cancelled);
        }

        let mut summary = BuildSummary {
            files_total,
            files_removed: removed.len(),
            ..Default::default()
        };
        for result in results {
            let done = result?;
            summary.books_total += done.record.books.len();
            match done.status {
                FileStatus::Parsed => summary.files_parsed += 1,
                FileStatus::Reused => summary.files_reused += 1,
                FileStatus::Failed => summary.files_failed += 1,
            }
        }

        sink.finish()?.commit()?;

        if self.config.remove_empty && !removed.is_empty() {
            prune_empty_dirs(&books_root, &removed);
        }

        log::info!(
            "Collection '{}': {} files ({} parsed, {} reused, {} failed, {} removed), {} books in {:.2?}",
            self.config.collection_name,
            summary.files_total,
            summary.files_parsed,
            summary.files_reused,
            summary.files_failed,
            summary.files_removed,
            summary.books_total,
            started.elapsed()
        );
        Ok(summary)
    }

    /// Copies `source` into the books directory at `relative_target`, parses it and
    /// appends its record to the database (created if it does not exist yet).
    ///
    /// # Returns
    ///
    /// * `Ok(FileRecord)` - The record that was appended
    /// * `Err(Error::InvalidPath)` - The target escapes the books root or already exists
    /// * `Err(Error::Unsupported)` - The target name is neither a book nor an archive
    pub async fn add_file(
        &self,
        source: impl AsRef<Path>,
        relative_target: &str,
    ) -> Result<FileRecord> {
        let source = source.as_ref().to_path_buf();
        let books_root = self.books_root()?;
        let target = join_relative(&books_root, relative_target)?;
        let name = get_file_name_lossy(&target);
        if !matches!(
            self.config.parsers.classify(&name),
            EntryKind::Book | EntryKind::Archive
        ) {
            return Err(Error::Unsupported(format!(
                "'{}' is neither a book nor an archive",
                relative_target
            )));
        }
        if target.exists() {
            return Err(Error::InvalidPath(
                target,
                "a file with this name already exists in the collection".to_string(),
            ));
        }

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let size = tokio::fs::copy(&source, &target).await?;
        let candidate = Candidate {
            relative_path: relative_path_string(&books_root, &target)?,
            path: target.clone(),
            size,
            lossy_name: false,
        };

        let ingest = Ingest::new(&self.config, self.cancel.clone(), HashMap::new());
        let db_path = self.database_path();
        let outcome = spawn_blocking(move || -> Result<FileRecord> {
            let done = ingest.ingest(&candidate)?;
            if db_path.exists() {
                database::append_records(&db_path, std::slice::from_ref(&done.record))?;
            } else {
                let mut writer = DatabaseWriter::create(&db_path, &books_root)?;
                writer.append(&encode_record(&done.record))?;
                writer.commit()?;
            }
            Ok(done.record)
        })
        .await?;

        match outcome {
            Ok(record) => {
                log::info!(
                    "Added '{}' with {} books",
                    record.relative_path,
                    record.books.len()
                );
                Ok(record)
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&target).await;
                Err(e)
            }
        }
    }
}

/// Removes directories below `root` that became empty after `removed` files vanished.
fn prune_empty_dirs(root: &Path, removed: &[String]) {
    for relative in removed {
        let Ok(path) = join_relative(root, relative) else {
            continue;
        };
        let mut dir = path.parent().map(Path::to_path_buf);
        while let Some(current) = dir {
            if current == root || !current.starts_with(root) {
                break;
            }
            let is_empty = std::fs::read_dir(&current)
                .map(|mut entries| entries.next().is_none())
                .unwrap_or(false);
            if !is_empty || std::fs::remove_dir(&current).is_err() {
                break;
            }
            log::debug!("Removed empty directory '{}'", path_to_string_lossy(&current));
            dir = current.parent().map(Path::to_path_buf);
        }
    }
}
