use pageturn::{
    Book, BookError, Chapter, ContentParser, FetchError, IndexKind, Loader, ParseError,
    StructuredChapter,
};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, RwLock};
use std::time::Instant;

use crate::render_ir::{ContentDigest, LaidOutChapter, PaginationProfileId, RenderPage};
use crate::render_layout::{LayoutConfig, LayoutEngine, LayoutError};

/// Per-chapter lifecycle state. Ordered; a chapter only moves forward except
/// when a layout change demotes `Paginated` back to `Parsed`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChapterState {
    #[default]
    Unloaded,
    Parsed,
    Paginated,
}

impl ChapterState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unloaded => "unloaded",
            Self::Parsed => "parsed",
            Self::Paginated => "paginated",
        }
    }
}

impl fmt::Display for ChapterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Page-turn direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    Next,
    Prev,
}

/// Reading position: 1-based chapter and page.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cursor {
    pub chapter: usize,
    pub page: usize,
}

impl Default for Cursor {
    fn default() -> Self {
        Self {
            chapter: 1,
            page: 1,
        }
    }
}

/// Result of a cursor move.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Advance {
    pub chapter: usize,
    pub page: usize,
    /// The move crossed a chapter boundary; callers re-issue a preload.
    pub chapter_changed: bool,
}

impl Advance {
    pub fn cursor(&self) -> Cursor {
        Cursor {
            chapter: self.chapter,
            page: self.page,
        }
    }
}

/// Outcome of a preload window pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PreloadReport {
    /// Chapters visited, in the order they were driven.
    pub chapters: Vec<usize>,
    /// Chapters that failed to load or paginate.
    pub failures: usize,
}

impl PreloadReport {
    pub fn succeeded(&self) -> bool {
        self.failures == 0
    }
}

/// Reading-session options.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionOptions {
    /// Chapters preloaded before the cursor chapter.
    pub preload_before: usize,
    /// Chapters preloaded after the cursor chapter.
    pub preload_behind: usize,
    /// Background worker threads used by [`PreloadWorker`](crate::PreloadWorker).
    pub worker_threads: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            preload_before: 1,
            preload_behind: 2,
            worker_threads: 4,
        }
    }
}

/// Runtime diagnostics from loading and layout.
#[derive(Clone, Debug, PartialEq)]
pub enum RenderDiagnostic {
    ReflowTimeMs(u32),
    CacheHit {
        chapter_index: usize,
        page_count: usize,
    },
    CacheMiss {
        chapter_index: usize,
    },
    FetchFailed {
        chapter_index: usize,
    },
    /// Layout config changed; this many chapters went back to `Parsed`.
    LayoutInvalidated {
        demoted: usize,
    },
}

type DiagnosticCallback = Arc<Mutex<Box<dyn FnMut(RenderDiagnostic) + Send + 'static>>>;
type DiagnosticSink = Option<DiagnosticCallback>;

/// Identity of one chapter's laid-out pages.
///
/// Pages are reusable only when the layout profile and the parsed blocks both
/// match, so both are part of the key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PageCacheKey {
    pub profile: PaginationProfileId,
    pub chapter_index: usize,
    pub content: ContentDigest,
}

impl PageCacheKey {
    pub fn new(profile: PaginationProfileId, chapter_index: usize, content: ContentDigest) -> Self {
        Self {
            profile,
            chapter_index,
            content,
        }
    }
}

/// Persisted page storage consulted by [`ReadingSession::paginate`].
///
/// Stores are best effort: a failed read is a miss and a failed write is
/// dropped.
pub trait RenderCacheStore: Send + Sync {
    fn load_pages(&self, key: &PageCacheKey) -> Option<Vec<RenderPage>>;

    fn store_pages(&self, key: &PageCacheKey, pages: &[RenderPage]);
}

const CACHE_SCHEMA_VERSION: u8 = 2;
const DEFAULT_MAX_CACHE_FILE_BYTES: usize = 4 * 1024 * 1024;
static CACHE_WRITE_NONCE: AtomicUsize = AtomicUsize::new(0);

/// Page cache kept as one JSON file per key:
/// `<root>/<profile-hex>/chapter-<index>-<content-digest>.json`.
///
/// Files larger than `max_file_bytes` are neither written nor read.
#[derive(Clone, Debug)]
pub struct FileRenderCacheStore {
    root: PathBuf,
    max_file_bytes: usize,
}

impl FileRenderCacheStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_file_bytes: DEFAULT_MAX_CACHE_FILE_BYTES,
        }
    }

    /// Size cap per cache file, at least one byte.
    pub fn with_max_file_bytes(mut self, max_file_bytes: usize) -> Self {
        self.max_file_bytes = max_file_bytes.max(1);
        self
    }

    pub fn cache_root(&self) -> &Path {
        &self.root
    }

    pub fn max_file_bytes(&self) -> usize {
        self.max_file_bytes
    }

    pub fn path_for(&self, key: &PageCacheKey) -> PathBuf {
        self.root.join(key.profile.to_hex()).join(format!(
            "chapter-{}-{}.json",
            key.chapter_index, key.content
        ))
    }

    fn read_capped(&self, path: &Path) -> Option<Vec<u8>> {
        let limit = self.max_file_bytes as u64;
        if fs::metadata(path).ok()?.len() > limit {
            return None;
        }
        let mut payload = Vec::with_capacity(1024);
        File::open(path)
            .ok()?
            .take(limit + 1)
            .read_to_end(&mut payload)
            .ok()?;
        (payload.len() <= self.max_file_bytes).then_some(payload)
    }
}

impl RenderCacheStore for FileRenderCacheStore {
    fn load_pages(&self, key: &PageCacheKey) -> Option<Vec<RenderPage>> {
        let payload = self.read_capped(&self.path_for(key))?;
        let envelope: CacheEnvelope<'static> = serde_json::from_slice(&payload).ok()?;
        envelope.into_pages(key)
    }

    fn store_pages(&self, key: &PageCacheKey, pages: &[RenderPage]) {
        let envelope = CacheEnvelope {
            version: CACHE_SCHEMA_VERSION,
            chapter_index: key.chapter_index,
            content: key.content,
            pages: Cow::Borrowed(pages),
        };
        let payload = match serde_json::to_vec(&envelope) {
            Ok(payload) => payload,
            Err(err) => {
                log::debug!("chapter {} pages not cached: {}", key.chapter_index, err);
                return;
            }
        };
        if payload.len() > self.max_file_bytes {
            log::debug!(
                "chapter {} pages not cached: {} bytes over the {} byte cap",
                key.chapter_index,
                payload.len(),
                self.max_file_bytes
            );
            return;
        }
        if let Err(err) = replace_file(&self.path_for(key), &payload) {
            log::debug!("chapter {} pages not cached: {}", key.chapter_index, err);
        }
    }
}

#[derive(Serialize, Deserialize)]
struct CacheEnvelope<'a> {
    version: u8,
    chapter_index: usize,
    content: ContentDigest,
    pages: Cow<'a, [RenderPage]>,
}

impl CacheEnvelope<'_> {
    fn into_pages(self, key: &PageCacheKey) -> Option<Vec<RenderPage>> {
        let matches = self.version == CACHE_SCHEMA_VERSION
            && self.chapter_index == key.chapter_index
            && self.content == key.content;
        (matches && !self.pages.is_empty()).then(|| self.pages.into_owned())
    }
}

/// Write `payload` next to `path` under a unique name, then rename it into
/// place so readers never see a partial file.
fn replace_file(path: &Path, payload: &[u8]) -> io::Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "cache path has no parent"))?;
    fs::create_dir_all(dir)?;
    let nonce = CACHE_WRITE_NONCE.fetch_add(1, Ordering::Relaxed);
    let staging = path.with_extension(format!("tmp-{}-{}", std::process::id(), nonce));
    let written = write_synced(&staging, payload).and_then(|()| fs::rename(&staging, path));
    if written.is_err() {
        let _ = fs::remove_file(&staging);
        return written;
    }
    if let Ok(handle) = File::open(dir) {
        let _ = handle.sync_all();
    }
    Ok(())
}

fn write_synced(path: &Path, payload: &[u8]) -> io::Result<()> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    file.write_all(payload)?;
    file.sync_all()
}

/// Loading state of one chapter. Guarded by [`ChapterCell::slot`].
#[derive(Debug, Default)]
struct ChapterSlot {
    state: ChapterState,
    chapter: Option<Arc<LaidOutChapter>>,
    /// Outcome of the last load attempt when it failed.
    last_failure: Option<LoadFailure>,
}

#[derive(Debug)]
enum LoadFailure {
    Fetch(FetchError),
    Parse(ParseError),
}

impl LoadFailure {
    fn to_error(&self) -> RenderEngineError {
        match self {
            Self::Fetch(err) => err.detached().into(),
            Self::Parse(err) => BookError::from(err.clone()).into(),
        }
    }
}

/// Per-chapter lock plus a count of finished load attempts, readable without
/// the lock. A caller that sees the count move while it waited shares that
/// attempt's outcome instead of fetching again.
#[derive(Debug, Default)]
struct ChapterCell {
    attempts: AtomicU64,
    slot: Mutex<ChapterSlot>,
}

impl ChapterCell {
    fn lock(&self) -> MutexGuard<'_, ChapterSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A reading session over one book.
///
/// Owns the per-chapter lifecycle table, the layout engine, and the reading
/// cursor. Each chapter has its own lock, so a slow fetch of one chapter
/// never blocks work on another.
///
/// Lock order: layout engine, then cursor, then the chapter table, then a
/// single chapter. No path holds two chapter locks at once.
pub struct ReadingSession {
    loader: Arc<dyn Loader>,
    parser: Arc<dyn ContentParser>,
    engine: RwLock<LayoutEngine>,
    options: SessionOptions,
    book: OnceLock<Arc<Book>>,
    cells: RwLock<HashMap<usize, Arc<ChapterCell>>>,
    cursor: Mutex<Cursor>,
    cache: Option<Arc<dyn RenderCacheStore>>,
    diagnostic_sink: DiagnosticSink,
}

impl fmt::Debug for ReadingSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadingSession")
            .field("options", &self.options)
            .field("has_book", &self.book.get().is_some())
            .field("cursor", &self.cursor())
            .finish_non_exhaustive()
    }
}

impl ReadingSession {
    /// Create a session. Nothing is fetched until
    /// [`init_table_of_contents`](Self::init_table_of_contents).
    pub fn new(
        loader: Arc<dyn Loader>,
        parser: Arc<dyn ContentParser>,
        engine: LayoutEngine,
        options: SessionOptions,
    ) -> Self {
        Self {
            loader,
            parser,
            engine: RwLock::new(engine),
            options,
            book: OnceLock::new(),
            cells: RwLock::new(HashMap::new()),
            cursor: Mutex::new(Cursor::default()),
            cache: None,
            diagnostic_sink: None,
        }
    }

    /// Consult and fill a persisted page cache during pagination.
    pub fn with_cache_store(mut self, cache: Arc<dyn RenderCacheStore>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Register or replace the diagnostics sink.
    pub fn set_diagnostic_sink<F>(&mut self, sink: F)
    where
        F: FnMut(RenderDiagnostic) + Send + 'static,
    {
        self.diagnostic_sink = Some(Arc::new(Mutex::new(Box::new(sink))));
    }

    fn emit_diagnostic(&self, diagnostic: RenderDiagnostic) {
        let Some(sink) = &self.diagnostic_sink else {
            return;
        };
        if let Ok(mut sink) = sink.lock() {
            sink(diagnostic);
        }
    }

    pub fn options(&self) -> SessionOptions {
        self.options
    }

    /// Fingerprint of the active layout configuration.
    pub fn pagination_profile_id(&self) -> PaginationProfileId {
        self.engine_read().pagination_profile_id()
    }

    pub fn layout_config(&self) -> LayoutConfig {
        *self.engine_read().config()
    }

    /// Build the book structure through the loader. Idempotent once it has
    /// succeeded.
    pub fn init_table_of_contents(&self) -> Result<Arc<Book>, RenderEngineError> {
        if let Some(book) = self.book.get() {
            return Ok(Arc::clone(book));
        }
        let book = self.loader.init_table_of_contents()?;
        log::info!(
            "table of contents ready: {:?} with {} chapters",
            book.title(),
            book.chapter_count()
        );
        let _ = self.book.set(Arc::new(book));
        self.book()
    }

    /// The book, once the table of contents is established.
    pub fn book(&self) -> Result<Arc<Book>, RenderEngineError> {
        self.book
            .get()
            .cloned()
            .ok_or(RenderEngineError::TableOfContentsMissing)
    }

    pub fn chapter_count(&self) -> usize {
        self.book.get().map_or(0, |book| book.chapter_count())
    }

    fn engine_read(&self) -> std::sync::RwLockReadGuard<'_, LayoutEngine> {
        self.engine.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_cursor(&self) -> MutexGuard<'_, Cursor> {
        self.cursor.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_chapter(&self, chapter: usize) -> Result<Arc<Book>, RenderEngineError> {
        let book = self.book()?;
        let len = book.chapter_count();
        if chapter == 0 || chapter > len {
            return Err(RenderEngineError::IndexOutOfRange {
                kind: IndexKind::Chapter,
                index: chapter,
                len,
            });
        }
        Ok(book)
    }

    /// Lock handle for one chapter, created on first access.
    fn cell(&self, chapter: usize) -> Result<Arc<ChapterCell>, RenderEngineError> {
        self.check_chapter(chapter)?;
        {
            let cells = self.cells.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(cell) = cells.get(&chapter) {
                return Ok(Arc::clone(cell));
            }
        }
        let mut cells = self.cells.write().unwrap_or_else(PoisonError::into_inner);
        Ok(Arc::clone(cells.entry(chapter).or_default()))
    }

    /// Fetch and parse chapter `chapter`.
    ///
    /// Returns `Ok(false)` when the fetch failed; the chapter stays
    /// `Unloaded` and a later call retries. Already-loaded chapters return
    /// `Ok(true)` without fetching.
    pub fn load(&self, chapter: usize) -> Result<bool, RenderEngineError> {
        match self.try_load(chapter) {
            Ok(()) => Ok(true),
            Err(RenderEngineError::Book(BookError::Fetch(_))) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Like [`load`](Self::load) but surfaces the fetch error.
    ///
    /// Callers that queued behind a failing attempt get that attempt's error
    /// without fetching again. A call made after the failure settled retries.
    pub fn try_load(&self, chapter: usize) -> Result<(), RenderEngineError> {
        let book = self.check_chapter(chapter)?;
        let cell = self.cell(chapter)?;
        let arrived = cell.attempts.load(Ordering::Acquire);
        let mut slot = cell.lock();
        if slot.state >= ChapterState::Parsed {
            return Ok(());
        }
        if cell.attempts.load(Ordering::Acquire) != arrived {
            if let Some(failure) = &slot.last_failure {
                log::debug!("chapter {} load shares the failed attempt", chapter);
                return Err(failure.to_error());
            }
        }

        let entry = book.resolve(chapter)?;
        let outcome = self.fetch_and_parse(entry);
        cell.attempts.fetch_add(1, Ordering::Release);
        match outcome {
            Ok(structured) => {
                log::debug!(
                    "chapter {} parsed into {} blocks",
                    chapter,
                    structured.blocks.len()
                );
                slot.chapter = Some(Arc::new(LaidOutChapter {
                    chapter_index: chapter,
                    blocks: structured.blocks,
                    pages: Vec::new(),
                }));
                slot.state = ChapterState::Parsed;
                slot.last_failure = None;
                Ok(())
            }
            Err(failure) => {
                let err = failure.to_error();
                slot.last_failure = Some(failure);
                Err(err)
            }
        }
    }

    fn fetch_and_parse(&self, entry: &Chapter) -> Result<StructuredChapter, LoadFailure> {
        let chapter = entry.index();
        if !entry.has_content() {
            match self.loader.fetch_content(entry) {
                Ok(content) => {
                    entry.publish_content(content);
                }
                Err(err) => {
                    log::warn!("{}", err);
                    self.emit_diagnostic(RenderDiagnostic::FetchFailed {
                        chapter_index: chapter,
                    });
                    return Err(LoadFailure::Fetch(err));
                }
            }
        }
        self.parser.parse(entry).map_err(LoadFailure::Parse)
    }

    /// Lay out a parsed chapter into pages.
    ///
    /// Fails with [`RenderEngineError::Precondition`] when the chapter has not
    /// been loaded. Already-paginated chapters are returned as-is. A cursor on
    /// this chapter that points past its new last page is moved to it.
    pub fn paginate(&self, chapter: usize) -> Result<Arc<LaidOutChapter>, RenderEngineError> {
        let engine = self.engine_read();
        let cell = self.cell(chapter)?;
        let mut slot = cell.lock();
        let parsed = match (slot.state, slot.chapter.as_ref()) {
            (ChapterState::Paginated, Some(done)) => return Ok(Arc::clone(done)),
            (ChapterState::Parsed, Some(parsed)) => Arc::clone(parsed),
            (state, _) => return Err(RenderEngineError::Precondition { chapter, state }),
        };

        let key = PageCacheKey::new(
            engine.pagination_profile_id(),
            chapter,
            ContentDigest::of_blocks(&parsed.blocks),
        );
        let pages = match self.cache.as_ref().and_then(|cache| cache.load_pages(&key)) {
            Some(pages) => {
                log::debug!("chapter {} served {} pages from cache", chapter, pages.len());
                self.emit_diagnostic(RenderDiagnostic::CacheHit {
                    chapter_index: chapter,
                    page_count: pages.len(),
                });
                pages
            }
            None => {
                if self.cache.is_some() {
                    self.emit_diagnostic(RenderDiagnostic::CacheMiss {
                        chapter_index: chapter,
                    });
                }
                let started = Instant::now();
                let pages = engine.layout_blocks(&parsed.blocks)?;
                let elapsed = started.elapsed().as_millis().min(u32::MAX as u128) as u32;
                self.emit_diagnostic(RenderDiagnostic::ReflowTimeMs(elapsed));
                if let Some(cache) = &self.cache {
                    cache.store_pages(&key, &pages);
                }
                pages
            }
        };
        log::debug!("chapter {} paginated into {} pages", chapter, pages.len());

        let page_count = pages.len();
        let done = Arc::new(LaidOutChapter {
            chapter_index: chapter,
            blocks: parsed.blocks.clone(),
            pages,
        });
        slot.chapter = Some(Arc::clone(&done));
        slot.state = ChapterState::Paginated;
        drop(slot);

        let mut cursor = self.lock_cursor();
        if cursor.chapter == chapter && cursor.page > page_count {
            log::debug!(
                "cursor page {} moved to {} after chapter {} re-paginated",
                cursor.page,
                page_count,
                chapter
            );
            cursor.page = page_count;
        }
        Ok(done)
    }

    /// Load and paginate the cursor chapter, then up to `behind` following
    /// and `before` preceding chapters.
    ///
    /// Fetch and parse failures are counted and do not stop the window. A
    /// layout configuration that cannot fit a line aborts with an error.
    pub fn preload(
        &self,
        cursor_chapter: usize,
        before: usize,
        behind: usize,
    ) -> Result<PreloadReport, RenderEngineError> {
        let book = self.check_chapter(cursor_chapter)?;
        let last = book.chapter_count();
        let following = (cursor_chapter + 1)..=cursor_chapter.saturating_add(behind).min(last);
        let preceding = (cursor_chapter.saturating_sub(before).max(1)..cursor_chapter).rev();
        let chapters: Vec<usize> = core::iter::once(cursor_chapter)
            .chain(following)
            .chain(preceding)
            .collect();
        log::debug!("preload window around {}: {:?}", cursor_chapter, chapters);

        let mut failures = 0usize;
        for &chapter in &chapters {
            let outcome = self
                .try_load(chapter)
                .and_then(|()| self.paginate(chapter).map(|_| ()));
            match outcome {
                Ok(()) => {}
                Err(RenderEngineError::Layout(err)) => return Err(err.into()),
                Err(err) => {
                    if !matches!(err, RenderEngineError::Book(BookError::Fetch(_))) {
                        log::warn!("preload of chapter {} failed: {}", chapter, err);
                    }
                    failures += 1;
                }
            }
        }
        Ok(PreloadReport { chapters, failures })
    }

    /// Preload around the current cursor using the session options.
    pub fn preload_cursor(&self) -> Result<PreloadReport, RenderEngineError> {
        let chapter = self.cursor().chapter;
        self.preload(
            chapter,
            self.options.preload_before,
            self.options.preload_behind,
        )
    }

    fn paginated_page_count(&self, chapter: usize) -> Result<Option<usize>, RenderEngineError> {
        let cell = self.cell(chapter)?;
        let slot = cell.lock();
        Ok(match (slot.state, slot.chapter.as_ref()) {
            (ChapterState::Paginated, Some(done)) => Some(done.page_count()),
            _ => None,
        })
    }

    /// Move the cursor one page.
    ///
    /// Does not consult [`has_next`](Self::has_next) or
    /// [`has_prev`](Self::has_prev); a move past either end of the book fails
    /// with `IndexOutOfRange` and leaves the cursor unchanged. `Next` from a
    /// chapter that is not yet paginated jumps to the start of the following
    /// chapter.
    pub fn advance(&self, direction: Direction) -> Result<Advance, RenderEngineError> {
        let book = self.book()?;
        let len = book.chapter_count();
        let mut cursor = self.lock_cursor();
        let current = self.paginated_page_count(cursor.chapter)?;
        // A re-layout can shrink the chapter under the cursor.
        let at = Cursor {
            chapter: cursor.chapter,
            page: current.map_or(cursor.page, |count| cursor.page.min(count)),
        };

        let (chapter, page) = match direction {
            Direction::Next => match current {
                Some(count) if at.page < count => (at.chapter, at.page + 1),
                _ => (at.chapter + 1, 1),
            },
            Direction::Prev => match current {
                Some(_) if at.page > 1 => (at.chapter, at.page - 1),
                _ => {
                    let prev = at.chapter.saturating_sub(1);
                    if prev == 0 {
                        (0, 1)
                    } else {
                        (prev, self.paginated_page_count(prev)?.unwrap_or(1))
                    }
                }
            },
        };
        if chapter == 0 || chapter > len {
            return Err(RenderEngineError::IndexOutOfRange {
                kind: IndexKind::Chapter,
                index: chapter,
                len,
            });
        }

        let chapter_changed = chapter != cursor.chapter;
        *cursor = Cursor { chapter, page };
        Ok(Advance {
            chapter,
            page,
            chapter_changed,
        })
    }

    pub fn has_next(&self) -> bool {
        let Some(book) = self.book.get() else {
            return false;
        };
        let cursor = self.lock_cursor();
        if cursor.chapter < book.chapter_count() {
            return true;
        }
        matches!(
            self.paginated_page_count(cursor.chapter),
            Ok(Some(count)) if cursor.page < count
        )
    }

    pub fn has_prev(&self) -> bool {
        if self.book.get().is_none() {
            return false;
        }
        let cursor = self.lock_cursor();
        if cursor.chapter > 1 {
            return true;
        }
        matches!(
            self.paginated_page_count(cursor.chapter),
            Ok(Some(_)) if cursor.page > 1
        )
    }

    pub fn cursor(&self) -> Cursor {
        *self.lock_cursor()
    }

    /// Place the cursor, e.g. when reopening a book at a saved position.
    ///
    /// The page is checked against the chapter's page count only when the
    /// chapter is already paginated.
    pub fn set_cursor(&self, chapter: usize, page: usize) -> Result<(), RenderEngineError> {
        let mut cursor = self.lock_cursor();
        let count = self.paginated_page_count(chapter)?;
        let len = count.unwrap_or(usize::MAX);
        if page == 0 || page > len {
            return Err(RenderEngineError::IndexOutOfRange {
                kind: IndexKind::Page,
                index: page,
                len: count.unwrap_or(0),
            });
        }
        *cursor = Cursor { chapter, page };
        Ok(())
    }

    pub fn state(&self, chapter: usize) -> Result<ChapterState, RenderEngineError> {
        let state = self.cell(chapter)?.lock().state;
        Ok(state)
    }

    /// Page count once the chapter is paginated.
    pub fn page_count(&self, chapter: usize) -> Result<Option<usize>, RenderEngineError> {
        self.paginated_page_count(chapter)
    }

    /// Blocks (and pages, once paginated) of a loaded chapter.
    pub fn laid_out_chapter(
        &self,
        chapter: usize,
    ) -> Result<Option<Arc<LaidOutChapter>>, RenderEngineError> {
        let chapter = self.cell(chapter)?.lock().chapter.clone();
        Ok(chapter)
    }

    /// One page of a paginated chapter.
    pub fn page(&self, chapter: usize, page: usize) -> Result<RenderPage, RenderEngineError> {
        let cell = self.cell(chapter)?;
        let slot = cell.lock();
        let done = match (slot.state, slot.chapter.as_ref()) {
            (ChapterState::Paginated, Some(done)) => done,
            (state, _) => return Err(RenderEngineError::Precondition { chapter, state }),
        };
        done.page(page)
            .cloned()
            .ok_or(RenderEngineError::IndexOutOfRange {
                kind: IndexKind::Page,
                index: page,
                len: done.page_count(),
            })
    }

    /// Page under the cursor.
    pub fn current_page(&self) -> Result<RenderPage, RenderEngineError> {
        let cursor = self.cursor();
        self.page(cursor.chapter, cursor.page)
    }

    /// Swap the layout configuration, keeping the text measurer.
    ///
    /// Every paginated chapter is demoted to `Parsed` and re-paginated on the
    /// next [`paginate`](Self::paginate). Returns the number of demoted
    /// chapters.
    pub fn set_layout_config(&self, cfg: LayoutConfig) -> Result<usize, RenderEngineError> {
        cfg.validate()?;
        let mut engine = self.engine.write().unwrap_or_else(PoisonError::into_inner);
        if *engine.config() == cfg {
            return Ok(0);
        }
        let measurer = Arc::clone(engine.text_measurer());
        *engine = LayoutEngine::new(cfg).with_text_measurer(measurer);

        let cells: Vec<Arc<ChapterCell>> = self
            .cells
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        let mut demoted = 0usize;
        for cell in cells {
            let mut slot = cell.lock();
            if slot.state != ChapterState::Paginated {
                continue;
            }
            slot.chapter = slot.chapter.as_ref().map(|done| {
                Arc::new(LaidOutChapter {
                    chapter_index: done.chapter_index,
                    blocks: done.blocks.clone(),
                    pages: Vec::new(),
                })
            });
            slot.state = ChapterState::Parsed;
            demoted += 1;
        }
        drop(engine);
        log::info!("layout config changed; {} chapters need re-pagination", demoted);
        self.emit_diagnostic(RenderDiagnostic::LayoutInvalidated { demoted });
        Ok(demoted)
    }
}

/// Reading-session error.
#[derive(Debug)]
pub enum RenderEngineError {
    /// Book model, fetch, or parse failure.
    Book(BookError),
    /// Layout configuration cannot fit a line.
    Layout(LayoutError),
    /// Chapter or page number outside valid bounds.
    IndexOutOfRange {
        kind: IndexKind,
        index: usize,
        len: usize,
    },
    /// Operation called before the chapter reached the required state.
    Precondition { chapter: usize, state: ChapterState },
    /// The table of contents has not been established yet.
    TableOfContentsMissing,
    /// The background worker pool is shut down.
    WorkerShutdown,
}

impl RenderEngineError {
    /// Fetch failures; the chapter can be retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Book(err) if err.is_transient())
    }
}

impl fmt::Display for RenderEngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Book(err) => write!(f, "{}", err),
            Self::Layout(err) => write!(f, "{}", err),
            Self::IndexOutOfRange { kind, index, len } => {
                write!(f, "{} {} out of range (valid: 1..={})", kind, index, len)
            }
            Self::Precondition { chapter, state } => write!(
                f,
                "chapter {} is {}; load it before paginating or reading pages",
                chapter, state
            ),
            Self::TableOfContentsMissing => write!(f, "table of contents not initialized"),
            Self::WorkerShutdown => write!(f, "preload worker is shut down"),
        }
    }
}

impl std::error::Error for RenderEngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Book(err) => Some(err),
            Self::Layout(err) => Some(err),
            _ => None,
        }
    }
}

impl From<BookError> for RenderEngineError {
    fn from(value: BookError) -> Self {
        match value {
            BookError::IndexOutOfRange { kind, index, len } => {
                Self::IndexOutOfRange { kind, index, len }
            }
            other => Self::Book(other),
        }
    }
}

impl From<FetchError> for RenderEngineError {
    fn from(value: FetchError) -> Self {
        Self::Book(BookError::Fetch(value))
    }
}

impl From<LayoutError> for RenderEngineError {
    fn from(value: LayoutError) -> Self {
        Self::Layout(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render_layout::FixedAdvanceMeasurer;
    use pageturn::{BookChild, Chapter, DefaultContentParser, Volume, VolumeMode};
    use std::collections::HashSet;
    use std::time::Duration;

    struct FixtureLoader {
        volume_sizes: Vec<usize>,
        contents: Vec<String>,
        fetches: AtomicUsize,
        failing: Mutex<HashSet<usize>>,
        delay: Duration,
    }

    impl FixtureLoader {
        /// Six chapters in two volumes. Chapter 1 fills two pages, the rest one.
        fn new() -> Self {
            let long = "abcde\n".repeat(9);
            let short = "abcde\nfghij".to_string();
            let mut contents = vec![long];
            contents.extend(std::iter::repeat(short).take(5));
            Self {
                volume_sizes: vec![3, 3],
                contents,
                fetches: AtomicUsize::new(0),
                failing: Mutex::new(HashSet::new()),
                delay: Duration::ZERO,
            }
        }

        fn failing(self, chapters: &[usize]) -> Self {
            self.failing
                .lock()
                .expect("failing set")
                .extend(chapters.iter().copied());
            self
        }

        fn heal(&self) {
            self.failing.lock().expect("failing set").clear();
        }
    }

    impl Loader for FixtureLoader {
        fn init_table_of_contents(&self) -> Result<Book, BookError> {
            let mut book = Book::new("Fixture", "Tester", VolumeMode::MultiVolume);
            for (idx, size) in self.volume_sizes.iter().enumerate() {
                let mut volume =
                    Volume::new(format!("Volume {}", idx + 1), book.next_chapter_index());
                for _ in 0..*size {
                    let title = format!("C{}", volume.range().to);
                    volume.push_chapter(Some(title.as_str()));
                }
                book.add_child(BookChild::Volume(volume))?;
            }
            Ok(book)
        }

        fn fetch_content(&self, chapter: &Chapter) -> Result<String, FetchError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                std::thread::sleep(self.delay);
            }
            if self
                .failing
                .lock()
                .expect("failing set")
                .contains(&chapter.index())
            {
                return Err(FetchError::new(chapter.index(), "offline"));
            }
            self.contents
                .get(chapter.index() - 1)
                .cloned()
                .ok_or_else(|| FetchError::new(chapter.index(), "no such chapter"))
        }
    }

    /// 100x100 box, 20px lines, 20px glyphs: five lines of five glyphs per page.
    fn grid_config() -> LayoutConfig {
        LayoutConfig {
            display_width: 100.0,
            display_height: 100.0,
            padding_left: 0.0,
            padding_right: 0.0,
            padding_top: 0.0,
            padding_bottom: 0.0,
            title_font_size: 20.0,
            content_font_size: 20.0,
            char_spacing: 0.0,
            line_spacing: 0.0,
            title_gap: 0.0,
            paragraph_gap: 0.0,
            first_line_indent: 0.0,
            ..LayoutConfig::default()
        }
    }

    fn session_with(loader: Arc<FixtureLoader>) -> ReadingSession {
        let engine = LayoutEngine::new(grid_config())
            .with_text_measurer(Arc::new(FixedAdvanceMeasurer::new(20.0)));
        ReadingSession::new(
            loader,
            Arc::new(DefaultContentParser),
            engine,
            SessionOptions::default(),
        )
    }

    fn ready_session(loader: Arc<FixtureLoader>) -> ReadingSession {
        let session = session_with(loader);
        session.init_table_of_contents().expect("toc");
        session
    }

    fn temp_cache_root(label: &str) -> PathBuf {
        let nonce = CACHE_WRITE_NONCE.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!(
            "pageturn-render-{label}-{}-{nonce}",
            std::process::id()
        ))
    }

    #[test]
    fn operations_before_toc_fail_cleanly() {
        let session = session_with(Arc::new(FixtureLoader::new()));
        assert!(!session.has_next());
        assert!(!session.has_prev());
        assert!(matches!(
            session.load(1),
            Err(RenderEngineError::TableOfContentsMissing)
        ));
        assert!(matches!(
            session.advance(Direction::Next),
            Err(RenderEngineError::TableOfContentsMissing)
        ));
    }

    #[test]
    fn concurrent_loads_fetch_once() {
        let mut loader = FixtureLoader::new();
        loader.delay = Duration::from_millis(20);
        let loader = Arc::new(loader);
        let session = ready_session(Arc::clone(&loader));

        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8).map(|_| scope.spawn(|| session.load(2))).collect();
            for handle in handles {
                let loaded = handle.join().expect("join").expect("load");
                assert!(loaded);
            }
        });
        assert_eq!(loader.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(session.state(2).expect("state"), ChapterState::Parsed);
    }

    #[test]
    fn concurrent_failed_loads_share_one_fetch() {
        let mut loader = FixtureLoader::new().failing(&[2]);
        loader.delay = Duration::from_millis(50);
        let loader = Arc::new(loader);
        let session = ready_session(Arc::clone(&loader));
        let start = std::sync::Barrier::new(8);

        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        start.wait();
                        session.try_load(2)
                    })
                })
                .collect();
            for handle in handles {
                let err = handle.join().expect("join").expect_err("offline");
                assert!(err.is_transient());
                assert!(err.to_string().contains("offline"), "{}", err);
            }
        });
        assert_eq!(loader.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(session.state(2).expect("state"), ChapterState::Unloaded);

        // A later call is a fresh attempt.
        loader.heal();
        assert!(session.load(2).expect("load"));
        assert_eq!(loader.fetches.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failed_fetch_stays_unloaded_and_retries() {
        let loader = Arc::new(FixtureLoader::new().failing(&[3]));
        let session = ready_session(Arc::clone(&loader));

        assert!(!session.load(3).expect("load"));
        assert_eq!(session.state(3).expect("state"), ChapterState::Unloaded);
        assert!(session.laid_out_chapter(3).expect("chapter").is_none());
        assert!(session.try_load(3).expect_err("still failing").is_transient());

        loader.heal();
        assert!(session.load(3).expect("load"));
        assert_eq!(session.state(3).expect("state"), ChapterState::Parsed);
        let blocks = &session
            .laid_out_chapter(3)
            .expect("chapter")
            .expect("parsed")
            .blocks;
        assert_eq!(blocks.len(), 3);
    }

    #[test]
    fn paginate_requires_parsed_chapter() {
        let session = ready_session(Arc::new(FixtureLoader::new()));
        let err = session.paginate(4).expect_err("not loaded");
        assert!(matches!(
            err,
            RenderEngineError::Precondition {
                chapter: 4,
                state: ChapterState::Unloaded
            }
        ));
        assert!(matches!(
            session.load(7),
            Err(RenderEngineError::IndexOutOfRange {
                kind: IndexKind::Chapter,
                index: 7,
                len: 6
            })
        ));
    }

    #[test]
    fn paginate_is_idempotent() {
        let session = ready_session(Arc::new(FixtureLoader::new()));
        session.load(1).expect("load");
        let first = session.paginate(1).expect("paginate");
        let second = session.paginate(1).expect("paginate again");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.page_count(), 2);
        assert_eq!(session.page(1, 2).expect("page 2").lines.len(), 5);
        assert!(matches!(
            session.page(1, 3),
            Err(RenderEngineError::IndexOutOfRange {
                kind: IndexKind::Page,
                index: 3,
                len: 2
            })
        ));
    }

    #[test]
    fn preload_counts_failures_without_stopping() {
        let loader = Arc::new(FixtureLoader::new().failing(&[3]));
        let session = ready_session(loader);
        let report = session.preload(2, 1, 2).expect("preload");
        assert_eq!(report.chapters, vec![2, 3, 4, 1]);
        assert_eq!(report.failures, 1);
        assert!(!report.succeeded());
        for chapter in [1, 2, 4] {
            assert_eq!(
                session.state(chapter).expect("state"),
                ChapterState::Paginated
            );
        }
        assert_eq!(session.state(3).expect("state"), ChapterState::Unloaded);
        assert_eq!(session.state(5).expect("state"), ChapterState::Unloaded);
    }

    #[test]
    fn preload_window_is_clamped_to_book() {
        let session = ready_session(Arc::new(FixtureLoader::new()));
        let report = session.preload(6, 2, 3).expect("preload");
        assert_eq!(report.chapters, vec![6, 5, 4]);
        assert!(report.succeeded());
    }

    #[test]
    fn next_then_prev_returns_to_start() {
        let session = ready_session(Arc::new(FixtureLoader::new()));
        session.preload(1, 0, 5).expect("preload");

        let step = session.advance(Direction::Next).expect("next");
        assert_eq!((step.chapter, step.page, step.chapter_changed), (1, 2, false));
        let step = session.advance(Direction::Prev).expect("prev");
        assert_eq!((step.chapter, step.page, step.chapter_changed), (1, 1, false));

        session.set_cursor(1, 2).expect("cursor");
        let step = session.advance(Direction::Next).expect("next");
        assert_eq!((step.chapter, step.page, step.chapter_changed), (2, 1, true));
        let step = session.advance(Direction::Prev).expect("prev");
        assert_eq!((step.chapter, step.page, step.chapter_changed), (1, 2, true));
    }

    #[test]
    fn next_from_unpaginated_chapter_jumps_ahead() {
        let session = ready_session(Arc::new(FixtureLoader::new()));
        let step = session.advance(Direction::Next).expect("next");
        assert_eq!(step.cursor(), Cursor { chapter: 2, page: 1 });
        assert!(step.chapter_changed);
        let step = session.advance(Direction::Prev).expect("prev");
        assert_eq!(step.cursor(), Cursor { chapter: 1, page: 1 });
    }

    #[test]
    fn book_edges_gate_navigation() {
        let session = ready_session(Arc::new(FixtureLoader::new()));
        assert!(session.has_next());
        assert!(!session.has_prev());
        assert!(matches!(
            session.advance(Direction::Prev),
            Err(RenderEngineError::IndexOutOfRange { index: 0, .. })
        ));
        assert_eq!(session.cursor(), Cursor::default());

        session.set_cursor(6, 1).expect("cursor");
        assert!(!session.has_next());
        assert!(session.has_prev());
        assert!(session.advance(Direction::Next).is_err());
        assert_eq!(session.cursor(), Cursor { chapter: 6, page: 1 });

        session.preload(1, 0, 0).expect("preload");
        session.set_cursor(1, 2).expect("cursor");
        assert!(session.has_prev());
        assert!(session.set_cursor(1, 3).is_err());
    }

    #[test]
    fn layout_change_demotes_paginated_chapters() {
        let mut session = session_with(Arc::new(FixtureLoader::new()));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        session.set_diagnostic_sink(move |diag| {
            if let Ok(mut seen) = sink.lock() {
                seen.push(diag);
            }
        });
        session.init_table_of_contents().expect("toc");
        session.preload(1, 0, 1).expect("preload");
        let old_profile = session.pagination_profile_id();

        let taller = LayoutConfig {
            display_height: 200.0,
            ..grid_config()
        };
        assert_eq!(session.set_layout_config(taller).expect("relayout"), 2);
        assert_ne!(session.pagination_profile_id(), old_profile);
        assert_eq!(session.state(1).expect("state"), ChapterState::Parsed);
        assert_eq!(session.page_count(1).expect("count"), None);

        assert_eq!(session.paginate(1).expect("paginate").page_count(), 1);
        let seen = seen.lock().expect("diagnostics");
        assert!(seen.contains(&RenderDiagnostic::LayoutInvalidated { demoted: 2 }));
    }

    #[test]
    fn relayout_moves_cursor_onto_a_real_page() {
        let session = ready_session(Arc::new(FixtureLoader::new()));
        session.preload(1, 0, 1).expect("preload");
        session.set_cursor(1, 2).expect("cursor");

        let taller = LayoutConfig {
            display_height: 200.0,
            ..grid_config()
        };
        session.set_layout_config(taller).expect("relayout");
        session.paginate(1).expect("paginate");
        assert_eq!(session.cursor(), Cursor { chapter: 1, page: 1 });
        assert_eq!(session.current_page().expect("page").page_number, 1);
        assert!(matches!(
            session.advance(Direction::Prev),
            Err(RenderEngineError::IndexOutOfRange { index: 0, .. })
        ));
        let step = session.advance(Direction::Next).expect("next");
        assert_eq!(step.cursor(), Cursor { chapter: 2, page: 1 });
    }

    #[test]
    fn cursor_saved_past_the_end_is_corrected_on_pagination() {
        let session = ready_session(Arc::new(FixtureLoader::new()));
        // Chapter 2 is one page; the saved position predates a layout change.
        session.set_cursor(2, 4).expect("cursor on unpaginated chapter");
        session.load(2).expect("load");
        session.paginate(2).expect("paginate");
        assert_eq!(session.cursor(), Cursor { chapter: 2, page: 1 });

        session.set_cursor(3, 7).expect("cursor on unpaginated chapter");
        assert!(matches!(
            session.current_page(),
            Err(RenderEngineError::Precondition { chapter: 3, .. })
        ));
        session.preload(3, 0, 0).expect("preload");
        assert_eq!(session.cursor().page, 1);
        let step = session.advance(Direction::Prev).expect("prev");
        assert_eq!(step.cursor(), Cursor { chapter: 2, page: 1 });
    }

    #[test]
    fn infeasible_layout_is_rejected() {
        let session = ready_session(Arc::new(FixtureLoader::new()));
        let cramped = LayoutConfig {
            content_font_size: 120.0,
            ..grid_config()
        };
        assert!(matches!(
            session.set_layout_config(cramped),
            Err(RenderEngineError::Layout(LayoutError::Infeasible { .. }))
        ));
    }

    #[test]
    fn persisted_pages_are_reused_across_sessions() {
        let root = temp_cache_root("session-cache");
        let store: Arc<dyn RenderCacheStore> = Arc::new(FileRenderCacheStore::new(&root));

        let first = session_with(Arc::new(FixtureLoader::new())).with_cache_store(Arc::clone(&store));
        first.init_table_of_contents().expect("toc");
        first.load(1).expect("load");
        let laid_out = first.paginate(1).expect("paginate");

        let mut second =
            session_with(Arc::new(FixtureLoader::new())).with_cache_store(Arc::clone(&store));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        second.set_diagnostic_sink(move |diag| {
            if let Ok(mut seen) = sink.lock() {
                seen.push(diag);
            }
        });
        second.init_table_of_contents().expect("toc");
        second.load(1).expect("load");
        let cached = second.paginate(1).expect("paginate");
        assert_eq!(cached.pages, laid_out.pages);
        assert!(seen
            .lock()
            .expect("diagnostics")
            .contains(&RenderDiagnostic::CacheHit {
                chapter_index: 1,
                page_count: 2
            }));

        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn edited_chapter_text_misses_the_cache() {
        let root = temp_cache_root("content-key");
        let store: Arc<dyn RenderCacheStore> = Arc::new(FileRenderCacheStore::new(&root));

        let first = session_with(Arc::new(FixtureLoader::new())).with_cache_store(Arc::clone(&store));
        first.init_table_of_contents().expect("toc");
        first.preload(1, 0, 0).expect("preload");
        assert_eq!(first.page_count(1).expect("count"), Some(2));

        let mut edited = FixtureLoader::new();
        edited.contents[0] = "zzzzz\n".to_string();
        let mut second = session_with(Arc::new(edited)).with_cache_store(Arc::clone(&store));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        second.set_diagnostic_sink(move |diag| {
            if let Ok(mut seen) = sink.lock() {
                seen.push(diag);
            }
        });
        second.init_table_of_contents().expect("toc");
        second.preload(1, 0, 0).expect("preload");
        assert_eq!(second.current_page().expect("page").text(), "C1\nzzzzz");
        assert_eq!(second.page_count(1).expect("count"), Some(1));
        assert!(seen
            .lock()
            .expect("diagnostics")
            .contains(&RenderDiagnostic::CacheMiss { chapter_index: 1 }));

        // Both versions stay cached side by side.
        let third = session_with(Arc::new(FixtureLoader::new())).with_cache_store(store);
        third.init_table_of_contents().expect("toc");
        third.preload(1, 0, 0).expect("preload");
        assert_eq!(third.page(1, 2).expect("page 2").lines.len(), 5);

        let _ = fs::remove_dir_all(root);
    }

    fn sample_key(label: &[u8], chapter_index: usize) -> (PageCacheKey, Vec<RenderPage>) {
        let blocks = [
            pageturn::ContentBlock::title("T"),
            pageturn::ContentBlock::paragraph("hello"),
        ];
        let engine = LayoutEngine::new(grid_config())
            .with_text_measurer(Arc::new(FixedAdvanceMeasurer::new(20.0)));
        let pages = engine.layout_blocks(&blocks).expect("layout");
        let key = PageCacheKey::new(
            PaginationProfileId::from_bytes(label),
            chapter_index,
            ContentDigest::of_blocks(&blocks),
        );
        (key, pages)
    }

    #[test]
    fn file_store_round_trips_and_caps_size() {
        let root = temp_cache_root("cache-roundtrip");
        let store = FileRenderCacheStore::new(&root).with_max_file_bytes(256 * 1024);
        let (key, pages) = sample_key(b"profile-a", 9);

        store.store_pages(&key, &pages);
        let path = store.path_for(&key);
        assert!(path.exists());
        let payload: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).expect("read")).expect("json");
        assert_eq!(payload["version"].as_u64(), Some(CACHE_SCHEMA_VERSION as u64));
        assert_eq!(payload["content"].as_u64(), Some(key.content.0));
        assert_eq!(payload["pages"][0]["lines"][1]["glyphs"][0]["ch"], "h");
        assert_eq!(store.load_pages(&key), Some(pages.clone()));

        let other_chapter = PageCacheKey {
            chapter_index: 10,
            ..key
        };
        assert!(store.load_pages(&other_chapter).is_none());
        let other_text = PageCacheKey {
            content: ContentDigest(key.content.0 ^ 1),
            ..key
        };
        assert!(store.load_pages(&other_text).is_none());

        let tiny = FileRenderCacheStore::new(&root).with_max_file_bytes(48);
        let (small_key, _) = sample_key(b"profile-a", 11);
        tiny.store_pages(&small_key, &pages);
        assert!(!tiny.path_for(&small_key).exists());
        assert!(tiny.load_pages(&key).is_none());

        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn file_store_checks_envelope_fields() {
        let root = temp_cache_root("cache-envelope");
        let store = FileRenderCacheStore::new(&root);
        let (key, _) = sample_key(b"profile-b", 1);
        let path = store.path_for(&key);
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        let page = serde_json::json!([{ "page_number": 1, "lines": [] }]);

        let stale = serde_json::json!({
            "version": CACHE_SCHEMA_VERSION + 1,
            "chapter_index": 1,
            "content": key.content.0,
            "pages": page,
        });
        fs::write(&path, stale.to_string()).expect("write");
        assert!(store.load_pages(&key).is_none());

        let foreign = serde_json::json!({
            "version": CACHE_SCHEMA_VERSION,
            "chapter_index": 1,
            "content": key.content.0 ^ 1,
            "pages": page,
        });
        fs::write(&path, foreign.to_string()).expect("write");
        assert!(store.load_pages(&key).is_none());

        let good = serde_json::json!({
            "version": CACHE_SCHEMA_VERSION,
            "chapter_index": 1,
            "content": key.content.0,
            "pages": page,
        });
        fs::write(&path, good.to_string()).expect("write");
        assert_eq!(store.load_pages(&key).map(|pages| pages.len()), Some(1));

        let _ = fs::remove_dir_all(root);
    }
}
