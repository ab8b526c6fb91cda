use crate::cache::{CacheKey, PageCache};
use crate::error::{self, ErrorKind, Result};
use crate::progress::ProgressStore;
use derive_more::Display;
use exn::{OptionExt, ResultExt};
use folio_container::{Container, ContainerFormat, PageEntry};
use folio_decode::{DecodedPage, PageDecoder};
use folio_progress::ReadingProgress;
use folio_storage::{ArchiveIdentity, BackendHandle};
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::instrument;

/// Lifecycle of an [`ArchiveSession`].
///
/// `Opening → Open → Closing → Closed`, or `Open → Failed` once storage stays
/// unavailable after a reconnect. `Failed` sessions can only be closed.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum SessionState {
    #[display("opening")]
    Opening,
    #[display("open")]
    Open,
    #[display("closing")]
    Closing,
    #[display("closed")]
    Closed,
    #[display("failed")]
    Failed,
}

/// Outcome of a relative move.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Navigation {
    /// The cursor moved to this page.
    Moved(usize),
    /// Already on the first or last page; nothing changed.
    Boundary,
}

/// Everything a background read-ahead task needs, outliving the borrow of
/// the session that scheduled it.
pub(crate) struct Shared {
    pub(crate) identity: ArchiveIdentity,
    pub(crate) path: PathBuf,
    pub(crate) format: ContainerFormat,
    pub(crate) entries: Vec<PageEntry>,
    /// Reaching a page may decompress the pages before it.
    pub(crate) sequential: bool,
    /// `None` once closed.
    pub(crate) container: tokio::sync::Mutex<Option<Container>>,
    pub(crate) backend: BackendHandle,
    pub(crate) cache: Arc<PageCache>,
    pub(crate) workers: Arc<Semaphore>,
    pub(crate) decoder: PageDecoder,
    pub(crate) generation: AtomicU64,
    pub(crate) state: Mutex<SessionState>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, to: SessionState) {
        let mut state = self.state();
        tracing::debug!(identity = %self.identity, from = %*state, %to, "session state");
        *state = to;
    }

    /// Whether pages read now may still be cached.
    fn is_live(&self) -> bool {
        matches!(*self.state(), SessionState::Opening | SessionState::Open)
    }

    fn ensure_usable(&self) -> Result<()> {
        match *self.state() {
            SessionState::Opening | SessionState::Open => Ok(()),
            SessionState::Failed => exn::bail!(ErrorKind::SessionFailed),
            SessionState::Closing | SessionState::Closed => exn::bail!(ErrorKind::SessionClosed),
        }
    }

    /// Cache-first load of one page. The page is only cached while the
    /// session is live and, when `generation` is given, still current.
    async fn load(self: &Arc<Self>, index: usize, generation: Option<u64>) -> Result<Arc<DecodedPage>> {
        let key = CacheKey::new(self.identity.clone(), index);
        if let Some(page) = self.cache.get(&key) {
            return Ok(page);
        }
        let permit = Arc::clone(&self.workers).acquire_owned().await.or_raise(|| ErrorKind::SessionClosed)?;
        let shared = Arc::clone(self);
        let page = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            shared.read_and_decode(index)
        })
        .await
        .or_raise(|| ErrorKind::DecodeFailed(index))??;

        let page = Arc::new(page);
        let current = || generation.is_none_or(|expected| self.generation.load(Ordering::SeqCst) == expected);
        // Checked under the cache lock: `close` leaves the live states before
        // it invalidates, so nothing lands after the invalidation.
        if !self.cache.put_if(key, Arc::clone(&page), || self.is_live() && current()) {
            tracing::debug!(identity = %self.identity, index, bytes = page.footprint(), "page not cached");
        }
        Ok(page)
    }

    /// Blocking: read one member under the container lock, then decode it
    /// with the lock released.
    fn read_and_decode(&self, index: usize) -> Result<DecodedPage> {
        let entry = &self.entries[index];
        let bytes = {
            let mut container = self.container.blocking_lock();
            let container = container.as_mut().ok_or_raise(|| ErrorKind::SessionClosed)?;
            container.read_entry(entry.locator).map_err(|err| error::from_container_read(err, index))?
        };
        self.decoder.decode(&bytes).or_raise(|| ErrorKind::DecodeFailed(index))
    }

    /// Replace the container with one opened on a fresh reader.
    #[instrument(skip(self), fields(identity = %self.identity))]
    async fn reconnect(&self) -> Result<()> {
        let source = self.backend.reader(&self.path).await.or_raise(|| ErrorKind::StorageUnavailable)?;
        let format = self.format;
        let reopened = tokio::task::spawn_blocking(move || Container::open(format, source))
            .await
            .or_raise(|| ErrorKind::StorageUnavailable)?
            .or_raise(|| ErrorKind::StorageUnavailable)?;
        // The page list is fixed for the lifetime of a session.
        let unchanged = reopened.entries().len() == self.entries.len()
            && reopened.entries().iter().zip(&self.entries).all(|(new, old)| new.name == old.name);
        if !unchanged {
            exn::bail!(ErrorKind::StorageUnavailable);
        }
        let mut container = self.container.lock().await;
        if container.is_none() {
            exn::bail!(ErrorKind::SessionClosed);
        }
        *container = Some(reopened);
        tracing::info!("reconnected archive");
        Ok(())
    }
}

struct Cursor {
    /// Progress that could not be saved yet.
    unsaved: Option<ReadingProgress>,
}

/// One open archive: its page list, a cursor, and background read-ahead
/// around the cursor.
///
/// Created by [`Engine::open`](crate::Engine::open). Page reads go through
/// the engine's shared [`PageCache`]. Every committed move is saved to the
/// progress store. [`close`](Self::close) releases the byte source; dropping
/// an open session without closing it cancels read-ahead but skips the final
/// progress flush.
pub struct ArchiveSession {
    shared: Arc<Shared>,
    store: Arc<dyn ProgressStore>,
    read_ahead_count: usize,
    index: AtomicUsize,
    cursor: tokio::sync::Mutex<Cursor>,
    read_ahead: Mutex<Option<JoinHandle<()>>>,
}

impl ArchiveSession {
    /// Wrap a freshly opened container. Called by the engine once the
    /// initial index is known; saves the initial progress row and starts
    /// the preload.
    pub(crate) async fn start(
        shared: Shared,
        store: Arc<dyn ProgressStore>,
        read_ahead_count: usize,
        initial_index: usize,
    ) -> Self {
        let session = Self {
            shared: Arc::new(shared),
            store,
            read_ahead_count,
            index: AtomicUsize::new(initial_index),
            cursor: tokio::sync::Mutex::new(Cursor { unsaved: None }),
            read_ahead: Mutex::new(None),
        };
        {
            let mut cursor = session.cursor.lock().await;
            session.persist(&mut cursor, initial_index).await;
        }
        session.shared.transition(SessionState::Open);
        let window: Vec<usize> = std::iter::once(initial_index).chain(session.window(initial_index)).collect();
        session.schedule_read_ahead(window);
        session
    }

    pub fn identity(&self) -> &ArchiveIdentity {
        &self.shared.identity
    }

    /// Storage locator the archive was opened from.
    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    pub fn format(&self) -> ContainerFormat {
        self.shared.format
    }

    pub fn entries(&self) -> &[PageEntry] {
        &self.shared.entries
    }

    pub fn page_count(&self) -> usize {
        self.shared.entries.len()
    }

    pub fn current_index(&self) -> usize {
        self.index.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> SessionState {
        *self.shared.state()
    }

    /// The page under the cursor.
    pub async fn current_page(&self) -> Result<Arc<DecodedPage>> {
        self.page(self.current_index()).await
    }

    /// Any page, without moving the cursor.
    #[instrument(level = "debug", skip(self), fields(identity = %self.shared.identity))]
    pub async fn page(&self, index: usize) -> Result<Arc<DecodedPage>> {
        self.shared.ensure_usable()?;
        self.check_range(index)?;
        match self.shared.load(index, None).await {
            Err(err) if matches!(err.deref(), ErrorKind::StorageUnavailable) => {
                tracing::warn!(identity = %self.shared.identity, index, "storage unavailable, reconnecting");
                if let Err(reconnect) = self.shared.reconnect().await {
                    if !matches!(reconnect.deref(), ErrorKind::SessionClosed) {
                        self.fail();
                    }
                    return Err(reconnect);
                }
                self.shared.load(index, None).await.inspect_err(|err| {
                    if matches!(err.deref(), ErrorKind::StorageUnavailable) {
                        self.fail();
                    }
                })
            },
            other => other,
        }
    }

    /// Move the cursor to `index`.
    #[instrument(level = "debug", skip(self), fields(identity = %self.shared.identity))]
    pub async fn seek(&self, index: usize) -> Result<()> {
        self.shared.ensure_usable()?;
        self.check_range(index)?;
        let mut cursor = self.cursor.lock().await;
        self.commit(&mut cursor, index).await;
        Ok(())
    }

    pub async fn next(&self) -> Result<Navigation> {
        self.step(|index, count| index.checked_add(1).filter(|&next| next < count)).await
    }

    pub async fn previous(&self) -> Result<Navigation> {
        self.step(|index, _| index.checked_sub(1)).await
    }

    pub async fn first(&self) -> Result<()> {
        self.seek(0).await
    }

    pub async fn last(&self) -> Result<()> {
        self.seek(self.page_count() - 1).await
    }

    /// Cancel read-ahead, drop this archive's cached pages, flush unsaved
    /// progress and release the byte source. Closing twice is a no-op.
    #[instrument(skip(self), fields(identity = %self.shared.identity))]
    pub async fn close(&self) -> Result<()> {
        {
            let mut state = self.shared.state();
            if *state == SessionState::Closed {
                return Ok(());
            }
            *state = SessionState::Closing;
        }
        self.cancel_read_ahead();
        let purged = self.shared.cache.invalidate(&self.shared.identity);

        let mut cursor = self.cursor.lock().await;
        if let Some(progress) = cursor.unsaved.take() {
            if let Err(err) = self.store.save(&progress).await {
                tracing::warn!(error = %err, page = progress.page_index, "dropping unsaved reading progress");
            }
        }
        drop(cursor);

        // Waits for an in-flight read to let go of the container first.
        self.shared.container.lock().await.take();
        self.shared.transition(SessionState::Closed);
        tracing::info!(purged, "closed archive");
        Ok(())
    }

    fn check_range(&self, index: usize) -> Result<()> {
        let count = self.page_count();
        if index >= count {
            exn::bail!(ErrorKind::PageOutOfRange { index, count });
        }
        Ok(())
    }

    fn fail(&self) {
        self.cancel_read_ahead();
        self.shared.transition(SessionState::Failed);
        tracing::warn!(identity = %self.shared.identity, "storage stayed unavailable, session failed");
    }

    async fn step(&self, target: impl FnOnce(usize, usize) -> Option<usize>) -> Result<Navigation> {
        self.shared.ensure_usable()?;
        let mut cursor = self.cursor.lock().await;
        match target(self.current_index(), self.page_count()) {
            Some(index) => {
                self.commit(&mut cursor, index).await;
                Ok(Navigation::Moved(index))
            },
            None => {
                self.retry_unsaved(&mut cursor).await;
                Ok(Navigation::Boundary)
            },
        }
    }

    async fn commit(&self, cursor: &mut Cursor, index: usize) {
        self.index.store(index, Ordering::SeqCst);
        self.persist(cursor, index).await;
        self.schedule_read_ahead(self.window(index));
    }

    async fn persist(&self, cursor: &mut Cursor, index: usize) {
        let identity = self.shared.identity.clone();
        let progress = ReadingProgress::new(identity, self.shared.path.clone(), index, self.page_count());
        match self.store.save(&progress).await {
            Ok(()) => cursor.unsaved = None,
            Err(err) => {
                tracing::warn!(error = %err, page = index, "failed to save reading progress, will retry");
                cursor.unsaved = Some(progress);
            },
        }
    }

    async fn retry_unsaved(&self, cursor: &mut Cursor) {
        if let Some(progress) = cursor.unsaved.take() {
            self.persist(cursor, progress.page_index).await;
        }
    }

    /// Pages to warm after moving to `index`: the next `read_ahead_count` in
    /// order, then the previous one. Sequential containers skip the previous
    /// page, which would restart their decode from the block start.
    fn window(&self, index: usize) -> Vec<usize> {
        let count = self.page_count();
        let forward = (index + 1..count).take(self.read_ahead_count);
        let previous = index.checked_sub(1).filter(|_| !self.shared.sequential);
        forward.chain(previous).collect()
    }

    fn schedule_read_ahead(&self, window: Vec<usize>) {
        // Holding the slot orders this against `cancel_read_ahead` in `close`:
        // either the new task is aborted there, or the state check sees
        // `Closing` first.
        let mut slot = self.read_ahead.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = slot.take() {
            previous.abort();
        }
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        if window.is_empty() || self.state() != SessionState::Open {
            return;
        }
        let shared = Arc::clone(&self.shared);
        tracing::trace!(?window, generation, "scheduling read-ahead");
        *slot = Some(tokio::spawn(async move {
            for index in window {
                if shared.generation.load(Ordering::SeqCst) != generation {
                    return;
                }
                if shared.cache.contains(&CacheKey::new(shared.identity.clone(), index)) {
                    continue;
                }
                if let Err(err) = shared.load(index, Some(generation)).await {
                    tracing::debug!(identity = %shared.identity, index, error = %err, "read-ahead failed");
                }
            }
        }));
    }

    fn cancel_read_ahead(&self) {
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(handle) = self.read_ahead.lock().unwrap_or_else(PoisonError::into_inner).take() {
            handle.abort();
        }
    }
}

impl Drop for ArchiveSession {
    fn drop(&mut self) {
        self.cancel_read_ahead();
    }
}
