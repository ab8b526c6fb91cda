use crate::cache::PageCache;
use crate::error::{self, ErrorKind, Result};
use crate::progress::ProgressStore;
use crate::session::{ArchiveSession, SessionState, Shared};
use exn::{OptionExt, ResultExt};
use folio_config::{EngineConfig, IdentityStrategy};
use folio_container::{Container, ContainerFormat, DETECT_WINDOW};
use folio_decode::{DecodedPage, PageDecoder};
use folio_storage::{ArchiveIdentity, BackendHandle, FileInfo};
use std::path::Path;
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tracing::{Span, instrument};

/// Opens archive sessions over one storage backend.
///
/// Owns what sessions share: the decoded page cache and the decode worker
/// budget. Build one per process, or one per test for isolation.
pub struct Engine {
    config: EngineConfig,
    backend: BackendHandle,
    store: Arc<dyn ProgressStore>,
    cache: Arc<PageCache>,
    workers: Arc<Semaphore>,
}

struct Opened {
    info: FileInfo,
    identity: ArchiveIdentity,
    format: ContainerFormat,
    container: Container,
}

impl Engine {
    pub fn new(config: EngineConfig, backend: BackendHandle, store: Arc<dyn ProgressStore>) -> Self {
        let cache = Arc::new(PageCache::new(config.max_cache_bytes));
        let workers = Arc::new(Semaphore::new(config.decode_workers.max(1)));
        Self { config, backend, store, cache, workers }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<PageCache> {
        &self.cache
    }

    pub fn backend(&self) -> &BackendHandle {
        &self.backend
    }

    /// Open the archive at `locator`, resuming at the last page read.
    ///
    /// Fails with [`DetectionFailed`](ErrorKind::DetectionFailed) for
    /// unrecognised files, [`OpenFailed`](ErrorKind::OpenFailed) for missing,
    /// corrupt or empty archives, and
    /// [`StorageUnavailable`](ErrorKind::StorageUnavailable) when the backend
    /// cannot be reached.
    #[instrument(skip(self), fields(identity, format, pages))]
    pub async fn open(&self, locator: &Path) -> Result<ArchiveSession> {
        let Opened { info, identity, format, container } = self.open_container(locator).await?;
        let entries = container.entries().to_vec();
        let span = Span::current();
        span.record("identity", identity.as_str());
        span.record("format", format.as_str());
        span.record("pages", entries.len());

        let initial = self.resume_index(&identity, entries.len()).await;
        let sequential = container.is_sequential();
        let shared = Shared {
            identity,
            path: info.path,
            format,
            entries,
            sequential,
            container: tokio::sync::Mutex::new(Some(container)),
            backend: Arc::clone(&self.backend),
            cache: Arc::clone(&self.cache),
            workers: Arc::clone(&self.workers),
            decoder: self.decoder(self.config.max_page_dimension),
            generation: AtomicU64::new(0),
            state: Mutex::new(SessionState::Opening),
        };
        let session = ArchiveSession::start(shared, Arc::clone(&self.store), self.config.read_ahead_count, initial).await;
        tracing::info!(backend = self.backend.name(), page = initial, sequential, "opened archive");
        Ok(session)
    }

    /// Decode the first page of an archive at thumbnail size. Thumbnails
    /// bypass the page cache.
    #[instrument(skip(self))]
    pub async fn thumbnail(&self, locator: &Path) -> Result<DecodedPage> {
        let Opened { mut container, .. } = self.open_container(locator).await?;
        let decoder = self.decoder(self.config.thumbnail_dimension);
        let permit = Arc::clone(&self.workers).acquire_owned().await.or_raise(|| ErrorKind::SessionClosed)?;
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let cover = container.entries().first().map(|entry| entry.locator).ok_or_raise(|| ErrorKind::OpenFailed)?;
            let bytes = container.read_entry(cover).map_err(|err| error::from_container_read(err, 0))?;
            decoder.decode(&bytes).or_raise(|| ErrorKind::DecodeFailed(0))
        })
        .await
        .or_raise(|| ErrorKind::DecodeFailed(0))?
    }

    /// Drop every cached page. Open sessions keep working, starting cold.
    pub fn shutdown(&self) {
        let removed = self.cache.clear();
        tracing::info!(removed, "page cache cleared");
    }

    async fn open_container(&self, locator: &Path) -> Result<Opened> {
        let info = self.backend.stat(locator).await.map_err(error::from_storage)?;
        let identity = match self.config.identity {
            IdentityStrategy::Metadata => ArchiveIdentity::from_metadata(&info.path, info.size, info.modified),
            IdentityStrategy::ContentHash => {
                let source = self.backend.reader(&info.path).await.map_err(error::from_storage)?;
                tokio::task::spawn_blocking(move || ArchiveIdentity::from_reader(source))
                    .await
                    .or_raise(|| ErrorKind::StorageUnavailable)?
                    .or_raise(|| ErrorKind::StorageUnavailable)?
            },
        };
        let head = self.backend.read_head(&info.path, DETECT_WINDOW).await.map_err(error::from_storage)?;
        let format = ContainerFormat::detect(&head, &info.path).ok_or_raise(|| ErrorKind::DetectionFailed)?;
        let source = self.backend.reader(&info.path).await.map_err(error::from_storage)?;
        // The reader is dropped with the task if opening fails.
        let container = tokio::task::spawn_blocking(move || Container::open(format, source))
            .await
            .or_raise(|| ErrorKind::OpenFailed)?
            .map_err(error::from_container_open)?;
        Ok(Opened { info, identity, format, container })
    }

    fn decoder(&self, max_dimension: u32) -> PageDecoder {
        PageDecoder::new(max_dimension).with_max_decode_bytes(self.config.max_decode_bytes)
    }

    async fn resume_index(&self, identity: &ArchiveIdentity, page_count: usize) -> usize {
        if !self.config.resume_progress {
            return 0;
        }
        match self.store.load(identity).await {
            Ok(Some(progress)) => progress.resume_index(page_count).unwrap_or_else(|| {
                tracing::debug!(stored = progress.page_index, page_count, "stored page no longer exists");
                0
            }),
            Ok(None) => 0,
            Err(err) => {
                tracing::warn!(error = %err, "failed to load reading progress");
                0
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use crate::{MemoryProgressStore, Navigation};
    use folio_progress::{Database, ReadingProgress, Repository};
    use folio_storage::backend::MockBackend;
    use std::time::Duration;

    struct Harness {
        engine: Engine,
        backend: Arc<MockBackend>,
        store: Arc<MemoryProgressStore>,
    }

    fn harness(files: Vec<(&str, Vec<u8>)>, config: EngineConfig) -> Harness {
        let backend = Arc::new(MockBackend::with_files(files));
        let store = Arc::new(MemoryProgressStore::new());
        let engine = Engine::new(config, backend.clone(), store.clone());
        Harness { engine, backend, store }
    }

    fn fifty() -> Harness {
        harness(vec![("fifty.cbz", fixtures::numbered_zip(50))], EngineConfig::default())
    }

    fn current_name(session: &ArchiveSession) -> &str {
        &session.entries()[session.current_index()].name
    }

    fn decoded(number: usize) -> DecodedPage {
        PageDecoder::new(4096).decode(&fixtures::page_png(number)).unwrap()
    }

    #[tokio::test]
    async fn test_navigation_scenario() {
        let h = fifty();
        let session = h.engine.open(Path::new("fifty.cbz")).await.unwrap();
        assert_eq!(session.state(), SessionState::Open);
        assert_eq!(session.format(), ContainerFormat::Zip);
        assert_eq!(session.page_count(), 50);
        assert_eq!(current_name(&session), "1.jpg");

        session.seek(9).await.unwrap();
        assert_eq!(current_name(&session), "10.jpg");
        assert_eq!(session.next().await.unwrap(), Navigation::Moved(10));
        assert_eq!(current_name(&session), "11.jpg");
        session.previous().await.unwrap();
        assert_eq!(session.previous().await.unwrap(), Navigation::Moved(8));
        assert_eq!(current_name(&session), "9.jpg");
    }

    #[tokio::test]
    async fn test_entries_in_natural_order() {
        let h = fifty();
        let session = h.engine.open(Path::new("fifty.cbz")).await.unwrap();
        let names: Vec<String> = session.entries().iter().map(|e| e.name.clone()).collect();
        let expected: Vec<String> = (1..=50).map(|n| format!("{n}.jpg")).collect();
        assert_eq!(names, expected);
    }

    #[tokio::test]
    async fn test_current_page_matches_direct_decode() {
        let h = fifty();
        let session = h.engine.open(Path::new("fifty.cbz")).await.unwrap();
        session.seek(9).await.unwrap();
        assert_eq!(*session.current_page().await.unwrap(), decoded(10));
        // Second read is served from the cache.
        assert!(h.engine.cache().contains(&crate::CacheKey::new(session.identity().clone(), 9)));
        assert_eq!(*session.current_page().await.unwrap(), decoded(10));
        // `page` reads without moving the cursor.
        assert_eq!(*session.page(40).await.unwrap(), decoded(41));
        assert_eq!(session.current_index(), 9);
    }

    #[tokio::test]
    async fn test_boundaries() {
        let h = fifty();
        let session = h.engine.open(Path::new("fifty.cbz")).await.unwrap();
        assert_eq!(session.previous().await.unwrap(), Navigation::Boundary);
        assert_eq!(session.current_index(), 0);
        session.last().await.unwrap();
        assert_eq!(session.current_index(), 49);
        assert_eq!(session.next().await.unwrap(), Navigation::Boundary);
        session.first().await.unwrap();
        assert_eq!(session.current_index(), 0);
    }

    #[tokio::test]
    async fn test_out_of_range() {
        let h = fifty();
        let session = h.engine.open(Path::new("fifty.cbz")).await.unwrap();
        let err = session.seek(50).await.unwrap_err();
        assert_eq!(*err, ErrorKind::PageOutOfRange { index: 50, count: 50 });
        let err = session.page(99).await.unwrap_err();
        assert_eq!(*err, ErrorKind::PageOutOfRange { index: 99, count: 50 });
        assert_eq!(session.current_index(), 0);
        assert_eq!(session.state(), SessionState::Open);
    }

    #[tokio::test]
    async fn test_resume_after_close() {
        let h = fifty();
        let session = h.engine.open(Path::new("fifty.cbz")).await.unwrap();
        let identity = session.identity().clone();
        session.seek(5).await.unwrap();
        session.close().await.unwrap();
        assert_eq!(h.store.get(&identity).unwrap().page_index, 5);

        let reopened = h.engine.open(Path::new("fifty.cbz")).await.unwrap();
        assert_eq!(reopened.identity(), &identity);
        assert_eq!(reopened.current_index(), 5);
        assert_eq!(*reopened.current_page().await.unwrap(), decoded(6));
    }

    #[tokio::test]
    async fn test_unseen_archive_starts_at_first_page() {
        let h = fifty();
        let session = h.engine.open(Path::new("fifty.cbz")).await.unwrap();
        assert_eq!(session.current_index(), 0);
        // The first open already records progress.
        let saved = h.store.get(session.identity()).unwrap();
        assert_eq!((saved.page_index, saved.page_count), (0, 50));
        assert_eq!(saved.path, Path::new("fifty.cbz"));
    }

    #[tokio::test]
    async fn test_resume_disabled() {
        let config = EngineConfig { resume_progress: false, ..EngineConfig::default() };
        let h = harness(vec![("fifty.cbz", fixtures::numbered_zip(50))], config);
        let session = h.engine.open(Path::new("fifty.cbz")).await.unwrap();
        session.seek(20).await.unwrap();
        session.close().await.unwrap();
        let reopened = h.engine.open(Path::new("fifty.cbz")).await.unwrap();
        assert_eq!(reopened.current_index(), 0);
    }

    #[tokio::test]
    async fn test_stored_index_beyond_page_count_is_ignored() {
        let h = fifty();
        let session = h.engine.open(Path::new("fifty.cbz")).await.unwrap();
        let identity = session.identity().clone();
        session.close().await.unwrap();
        h.store.save(&ReadingProgress::new(identity, "fifty.cbz", 80, 100)).await.unwrap();
        let reopened = h.engine.open(Path::new("fifty.cbz")).await.unwrap();
        assert_eq!(reopened.current_index(), 0);
    }

    #[tokio::test]
    async fn test_progress_failure_is_retried() {
        let h = fifty();
        let session = h.engine.open(Path::new("fifty.cbz")).await.unwrap();
        let identity = session.identity().clone();

        h.store.set_failing(true);
        session.last().await.unwrap();
        assert_eq!(session.current_index(), 49);
        assert_eq!(h.store.get(&identity).unwrap().page_index, 0);

        // A boundary move still retries the pending write.
        h.store.set_failing(false);
        assert_eq!(session.next().await.unwrap(), Navigation::Boundary);
        assert_eq!(h.store.get(&identity).unwrap().page_index, 49);
    }

    #[tokio::test]
    async fn test_close_flushes_unsaved_progress() {
        let h = fifty();
        let session = h.engine.open(Path::new("fifty.cbz")).await.unwrap();
        let identity = session.identity().clone();
        h.store.set_failing(true);
        session.seek(17).await.unwrap();
        h.store.set_failing(false);
        session.close().await.unwrap();
        assert_eq!(h.store.get(&identity).unwrap().page_index, 17);
    }

    #[tokio::test]
    async fn test_progress_load_failure_starts_at_first_page() {
        let h = fifty();
        h.store.set_failing(true);
        let session = h.engine.open(Path::new("fifty.cbz")).await.unwrap();
        assert_eq!(session.current_index(), 0);
        assert_eq!(session.state(), SessionState::Open);
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_isolated() {
        let payload = b"this page will be damaged in transit";
        let mut bytes = fixtures::zip(&[
            ("1.jpg", fixtures::page_png(1)),
            ("2.jpg", fixtures::page_png(2)),
            ("3.jpg", payload.to_vec()),
            ("4.jpg", fixtures::page_png(4)),
        ]);
        let offset = bytes.windows(payload.len()).position(|window| window == payload).unwrap();
        bytes[offset + 5] ^= 0xFF;
        let h = harness(vec![("damaged.cbz", bytes)], EngineConfig::default());

        let session = h.engine.open(Path::new("damaged.cbz")).await.unwrap();
        session.seek(2).await.unwrap();
        let err = session.current_page().await.unwrap_err();
        assert_eq!(*err, ErrorKind::EntryReadFailed(2));
        assert!(err.is_page_level());

        assert_eq!(session.next().await.unwrap(), Navigation::Moved(3));
        assert_eq!(*session.current_page().await.unwrap(), decoded(4));
        assert_eq!(*session.page(1).await.unwrap(), decoded(2));
        assert_eq!(session.state(), SessionState::Open);
    }

    #[tokio::test]
    async fn test_undecodable_entry() {
        let bytes = fixtures::zip(&[("1.jpg", fixtures::page_png(1)), ("2.jpg", b"plain text, not a page".to_vec())]);
        let h = harness(vec![("odd.cbz", bytes)], EngineConfig::default());
        let session = h.engine.open(Path::new("odd.cbz")).await.unwrap();
        let err = session.page(1).await.unwrap_err();
        assert_eq!(*err, ErrorKind::DecodeFailed(1));
        assert_eq!(*session.page(0).await.unwrap(), decoded(1));
    }

    #[tokio::test]
    async fn test_cache_smaller_than_one_page() {
        let config = EngineConfig { max_cache_bytes: 1, ..EngineConfig::default() };
        let h = harness(vec![("fifty.cbz", fixtures::numbered_zip(50))], config);
        let session = h.engine.open(Path::new("fifty.cbz")).await.unwrap();
        session.seek(3).await.unwrap();
        assert_eq!(*session.current_page().await.unwrap(), decoded(4));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(h.engine.cache().is_empty());
    }

    #[tokio::test]
    async fn test_read_ahead_warms_the_cache() {
        let h = fifty();
        let session = h.engine.open(Path::new("fifty.cbz")).await.unwrap();
        session.seek(10).await.unwrap();
        let identity = session.identity().clone();
        let warm = |index| h.engine.cache().contains(&crate::CacheKey::new(identity.clone(), index));
        for _ in 0..100 {
            if [11, 12, 9].into_iter().all(warm) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(warm(11) && warm(12) && warm(9));
        assert!(!warm(13));
    }

    #[tokio::test]
    async fn test_close_cancels_read_ahead() {
        let config = EngineConfig { read_ahead_count: 30, decode_workers: 1, ..EngineConfig::default() };
        let h = harness(vec![("fifty.cbz", fixtures::numbered_zip(50))], config);
        let session = h.engine.open(Path::new("fifty.cbz")).await.unwrap();
        session.seek(1).await.unwrap();
        session.close().await.unwrap();
        assert_eq!(session.state(), SessionState::Closed);
        assert!(h.engine.cache().is_empty());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(h.engine.cache().is_empty());

        let err = session.current_page().await.unwrap_err();
        assert_eq!(*err, ErrorKind::SessionClosed);
        let err = session.next().await.unwrap_err();
        assert_eq!(*err, ErrorKind::SessionClosed);
        // Closing again is harmless.
        session.close().await.unwrap();
    }

    /// Holds the first save of one page until released, then fails it.
    #[derive(Default)]
    struct ParkedStore {
        inner: MemoryProgressStore,
        page: usize,
        parked: std::sync::atomic::AtomicBool,
        entered: tokio::sync::Notify,
        release: tokio::sync::Notify,
    }

    #[async_trait::async_trait]
    impl ProgressStore for ParkedStore {
        async fn load(&self, identity: &ArchiveIdentity) -> Result<Option<ReadingProgress>> {
            self.inner.load(identity).await
        }

        async fn save(&self, progress: &ReadingProgress) -> Result<()> {
            if progress.page_index == self.page && !self.parked.swap(true, std::sync::atomic::Ordering::SeqCst) {
                self.entered.notify_one();
                self.release.notified().await;
                exn::bail!(ErrorKind::Progress);
            }
            self.inner.save(progress).await
        }
    }

    #[tokio::test]
    async fn test_close_during_seek_caches_nothing() {
        let backend = Arc::new(MockBackend::with_files(vec![("fifty.cbz", fixtures::numbered_zip(50))]));
        let store = Arc::new(ParkedStore { page: 20, ..ParkedStore::default() });
        let engine = Engine::new(EngineConfig::default(), backend, store.clone());
        let session = engine.open(Path::new("fifty.cbz")).await.unwrap();

        // The seek is parked in its progress save while close runs up to
        // waiting for the cursor; the seek then finishes with close underway.
        let (seeked, closed) = tokio::join!(session.seek(20), async {
            store.entered.notified().await;
            store.release.notify_one();
            session.close().await
        });
        seeked.unwrap();
        closed.unwrap();
        assert_eq!(session.state(), SessionState::Closed);

        tokio::time::sleep(Duration::from_millis(100)).await;
        let identity = session.identity().clone();
        assert!((0..50).all(|index| !engine.cache().contains(&crate::CacheKey::new(identity.clone(), index))));
        assert!(engine.cache().is_empty());
        // Close flushed the save the seek could not make.
        assert_eq!(store.inner.get(&identity).unwrap().page_index, 20);
    }

    #[tokio::test]
    async fn test_close_leaves_other_archives_cached() {
        let h = harness(
            vec![("a.cbz", fixtures::numbered_zip(3)), ("b.cbz", fixtures::numbered_zip(3))],
            EngineConfig { read_ahead_count: 0, ..EngineConfig::default() },
        );
        let a = h.engine.open(Path::new("a.cbz")).await.unwrap();
        let b = h.engine.open(Path::new("b.cbz")).await.unwrap();
        a.current_page().await.unwrap();
        b.current_page().await.unwrap();
        a.close().await.unwrap();
        assert!(h.engine.cache().contains(&crate::CacheKey::new(b.identity().clone(), 0)));
        assert!(!h.engine.cache().contains(&crate::CacheKey::new(a.identity().clone(), 0)));
    }

    #[tokio::test]
    async fn test_storage_loss_is_retried_once() {
        let config = EngineConfig { read_ahead_count: 0, ..EngineConfig::default() };
        let h = harness(vec![("fifty.cbz", fixtures::numbered_zip(50))], config);
        let session = h.engine.open(Path::new("fifty.cbz")).await.unwrap();
        h.backend.disconnect_readers();
        assert_eq!(*session.page(30).await.unwrap(), decoded(31));
        assert_eq!(session.state(), SessionState::Open);
    }

    #[tokio::test]
    async fn test_storage_offline_fails_session() {
        let config = EngineConfig { read_ahead_count: 0, ..EngineConfig::default() };
        let h = harness(vec![("fifty.cbz", fixtures::numbered_zip(50))], config);
        let session = h.engine.open(Path::new("fifty.cbz")).await.unwrap();
        h.backend.set_offline(true);

        let err = session.page(30).await.unwrap_err();
        assert_eq!(*err, ErrorKind::StorageUnavailable);
        assert_eq!(session.state(), SessionState::Failed);
        let err = session.page(31).await.unwrap_err();
        assert_eq!(*err, ErrorKind::SessionFailed);
        let err = session.seek(2).await.unwrap_err();
        assert_eq!(*err, ErrorKind::SessionFailed);

        h.backend.set_offline(false);
        session.close().await.unwrap();
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_open_sevenz() {
        let bytes = fixtures::sevenz(&[
            ("p10.png", fixtures::page_png(10)),
            ("p2.png", fixtures::page_png(2)),
            ("p1.png", fixtures::page_png(1)),
        ]);
        let h = harness(vec![("issue.cb7", bytes)], EngineConfig::default());
        let session = h.engine.open(Path::new("issue.cb7")).await.unwrap();
        assert_eq!(session.format(), ContainerFormat::SevenZip);
        let names: Vec<&str> = session.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["p1.png", "p2.png", "p10.png"]);
        assert_eq!(*session.page(2).await.unwrap(), decoded(10));
        session.next().await.unwrap();
        assert_eq!(*session.current_page().await.unwrap(), decoded(2));
    }

    #[tokio::test]
    async fn test_open_rar() {
        let bytes = fixtures::rar(&[
            ("03.png", fixtures::page_png(3)),
            ("ComicInfo.xml", b"<ComicInfo/>".to_vec()),
            ("01.png", fixtures::page_png(1)),
            ("02.png", fixtures::page_png(2)),
        ]);
        let h = harness(vec![("issue.cbr", bytes)], EngineConfig::default());
        let session = h.engine.open(Path::new("issue.cbr")).await.unwrap();
        assert_eq!(session.format(), ContainerFormat::Rar);
        let names: Vec<&str> = session.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["01.png", "02.png", "03.png"]);
        assert_eq!(*session.page(2).await.unwrap(), decoded(3));
        assert_eq!(*session.page(0).await.unwrap(), decoded(1));
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_solid_sevenz_out_of_order() {
        // Nothing stays cached, so every read goes back to the solid block.
        let config = EngineConfig { max_cache_bytes: 1, read_ahead_count: 0, ..EngineConfig::default() };
        let h = harness(vec![("solid.cb7", fixtures::solid_sevenz(12))], config);
        let session = h.engine.open(Path::new("solid.cb7")).await.unwrap();
        assert_eq!(session.page_count(), 12);
        for index in [0, 1, 2, 7, 3, 11, 10, 0, 5, 6] {
            assert_eq!(*session.page(index).await.unwrap(), decoded(index + 1), "page {index}");
        }
    }

    #[tokio::test]
    async fn test_sequential_read_ahead_skips_previous_page() {
        let h = harness(vec![("solid.cb7", fixtures::solid_sevenz(12))], EngineConfig::default());
        let session = h.engine.open(Path::new("solid.cb7")).await.unwrap();
        session.seek(6).await.unwrap();
        let identity = session.identity().clone();
        let warm = |index| h.engine.cache().contains(&crate::CacheKey::new(identity.clone(), index));
        for _ in 0..200 {
            if warm(7) && warm(8) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(warm(7) && warm(8));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!warm(5));
    }

    #[tokio::test]
    async fn test_open_failures() {
        let mut garbage_zip = b"PK\x03\x04".to_vec();
        garbage_zip.resize(256, b' ');
        let h = harness(
            vec![
                ("notes.txt", b"just some notes, not an archive".to_vec()),
                ("issue.cbt", b"tar is not a comic container here".to_vec()),
                ("old.cbr", b"Rar!\x1a\x07\x01\x00 and the rest".to_vec()),
                ("broken.cbz", garbage_zip),
                ("empty.cbz", fixtures::zip(&[("ComicInfo.xml", b"<ComicInfo/>".to_vec())])),
            ],
            EngineConfig::default(),
        );
        let open = |path: &'static str| h.engine.open(Path::new(path));
        assert_eq!(*open("notes.txt").await.err().unwrap(), ErrorKind::DetectionFailed);
        assert_eq!(*open("issue.cbt").await.err().unwrap(), ErrorKind::DetectionFailed);
        assert_eq!(*open("old.cbr").await.err().unwrap(), ErrorKind::OpenFailed);
        assert_eq!(*open("broken.cbz").await.err().unwrap(), ErrorKind::OpenFailed);
        assert_eq!(*open("empty.cbz").await.err().unwrap(), ErrorKind::OpenFailed);
        assert_eq!(*open("missing.cbz").await.err().unwrap(), ErrorKind::OpenFailed);

        h.backend.set_offline(true);
        assert_eq!(*open("broken.cbz").await.err().unwrap(), ErrorKind::StorageUnavailable);
    }

    #[tokio::test]
    async fn test_content_hash_identity_follows_content() {
        let zip = fixtures::numbered_zip(3);
        let files = || vec![("one.cbz", zip.clone()), ("copy/two.cbz", zip.clone())];

        let config = EngineConfig { identity: IdentityStrategy::ContentHash, ..EngineConfig::default() };
        let h = harness(files(), config);
        let one = h.engine.open(Path::new("one.cbz")).await.unwrap();
        let two = h.engine.open(Path::new("copy/two.cbz")).await.unwrap();
        assert_eq!(one.identity(), two.identity());
        // Streamed from the reader, same digest as hashing the whole file.
        assert_eq!(one.identity(), &ArchiveIdentity::from_content(&zip));

        let h = harness(files(), EngineConfig::default());
        let one = h.engine.open(Path::new("one.cbz")).await.unwrap();
        let two = h.engine.open(Path::new("copy/two.cbz")).await.unwrap();
        assert_ne!(one.identity(), two.identity());
    }

    #[tokio::test]
    async fn test_thumbnail() {
        let bytes = fixtures::zip(&[("0002.png", fixtures::page_png(2)), ("0001.png", fixtures::png(64, 32))]);
        let config = EngineConfig { thumbnail_dimension: 16, ..EngineConfig::default() };
        let h = harness(vec![("issue.cbz", bytes)], config);
        let thumbnail = h.engine.thumbnail(Path::new("issue.cbz")).await.unwrap();
        assert_eq!((thumbnail.width(), thumbnail.height()), (16, 8));
        assert!(h.engine.cache().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_clears_cache() {
        let h = fifty();
        let session = h.engine.open(Path::new("fifty.cbz")).await.unwrap();
        session.current_page().await.unwrap();
        // Let the preload of pages 0..=2 finish so nothing lands after the clear.
        let identity = session.identity().clone();
        for _ in 0..100 {
            if (0..3).all(|index| h.engine.cache().contains(&crate::CacheKey::new(identity.clone(), index))) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(h.engine.cache().len(), 3);
        h.engine.shutdown();
        assert!(h.engine.cache().is_empty());
        assert_eq!(*session.current_page().await.unwrap(), decoded(1));
    }

    #[tokio::test]
    async fn test_sqlite_progress_store() {
        let db = Database::connect_in_memory().await.unwrap();
        let repo = Repository::from(&db);
        let backend = Arc::new(MockBackend::with_files([("Saga/001.cbz", fixtures::numbered_zip(12))]));
        let engine = Engine::new(EngineConfig::default(), backend, Arc::new(repo.clone()));

        let session = engine.open(Path::new("Saga/001.cbz")).await.unwrap();
        session.seek(4).await.unwrap();
        session.close().await.unwrap();

        let recent = repo.list_recent(10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].page_index, 4);
        assert_eq!(recent[0].path, Path::new("Saga/001.cbz"));
        let reopened = engine.open(Path::new("Saga/001.cbz")).await.unwrap();
        assert_eq!(reopened.current_index(), 4);
    }
}
