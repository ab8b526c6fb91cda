//! Byte-budgeted LRU cache of decoded pages, shared by every session.

use folio_decode::DecodedPage;
use folio_storage::ArchiveIdentity;
use lru::LruCache;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// One decoded page of one archive.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub identity: ArchiveIdentity,
    pub index: usize,
}

impl CacheKey {
    pub fn new(identity: ArchiveIdentity, index: usize) -> Self {
        Self { identity, index }
    }
}

struct Inner {
    pages: LruCache<CacheKey, Arc<DecodedPage>>,
    resident: usize,
}

impl Inner {
    fn remove(&mut self, key: &CacheKey) -> bool {
        match self.pages.pop(key) {
            Some(page) => {
                self.resident -= page.footprint();
                true
            },
            None => false,
        }
    }

    fn evict_to(&mut self, budget: usize) -> usize {
        let mut evicted = 0;
        while self.resident > budget {
            let Some((key, page)) = self.pages.pop_lru() else { break };
            self.resident -= page.footprint();
            evicted += 1;
            tracing::debug!(identity = %key.identity, index = key.index, bytes = page.footprint(), "evicted page");
        }
        evicted
    }

    fn insert(&mut self, max_bytes: usize, key: CacheKey, page: Arc<DecodedPage>) -> bool {
        let footprint = page.footprint();
        self.remove(&key);
        if footprint > max_bytes {
            return false;
        }
        self.evict_to(max_bytes - footprint);
        self.resident += footprint;
        self.pages.put(key, page);
        true
    }
}

/// Decoded pages keyed by `(archive, page index)`, evicted least recently
/// used first once their combined footprint would exceed `max_bytes`.
///
/// Pages are handed out as [`Arc`]s, so evicting a page never invalidates a
/// copy a caller is still displaying. All bookkeeping happens under one lock
/// that is never held while reading or decoding.
pub struct PageCache {
    max_bytes: usize,
    inner: Mutex<Inner>,
}

impl PageCache {
    pub fn new(max_bytes: u64) -> Self {
        Self {
            max_bytes: usize::try_from(max_bytes).unwrap_or(usize::MAX),
            inner: Mutex::new(Inner { pages: LruCache::unbounded(), resident: 0 }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Every critical section leaves `Inner` consistent, so a panic
        // elsewhere while holding the lock is safe to ignore.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up a page, marking it most recently used.
    pub fn get(&self, key: &CacheKey) -> Option<Arc<DecodedPage>> {
        let page = self.lock().pages.get(key).cloned();
        match &page {
            Some(_) => tracing::debug!(identity = %key.identity, index = key.index, "page cache hit"),
            None => tracing::debug!(identity = %key.identity, index = key.index, "page cache miss"),
        }
        page
    }

    /// Insert or replace a page, evicting older pages as needed.
    ///
    /// Returns `false`, leaving the cache without this key, when the page
    /// alone is larger than the whole budget.
    pub fn put(&self, key: CacheKey, page: Arc<DecodedPage>) -> bool {
        self.lock().insert(self.max_bytes, key, page)
    }

    /// [`put`](Self::put), but only if `live` still holds once the lock is
    /// taken.
    ///
    /// `live` runs under the cache lock, so an owner that makes it false and
    /// then calls [`invalidate`](Self::invalidate) never sees this page
    /// inserted afterwards.
    pub fn put_if(&self, key: CacheKey, page: Arc<DecodedPage>, live: impl FnOnce() -> bool) -> bool {
        let mut inner = self.lock();
        if !live() {
            tracing::debug!(identity = %key.identity, index = key.index, "dropped page of a closing archive");
            return false;
        }
        inner.insert(self.max_bytes, key, page)
    }

    /// Evict until resident pages fit the budget. Returns the number evicted.
    pub fn evict_if_needed(&self) -> usize {
        self.lock().evict_to(self.max_bytes)
    }

    /// Drop every page of `identity`. Returns the number of pages removed.
    pub fn invalidate(&self, identity: &ArchiveIdentity) -> usize {
        let mut inner = self.lock();
        let keys: Vec<CacheKey> =
            inner.pages.iter().filter(|(key, _)| &key.identity == identity).map(|(key, _)| key.clone()).collect();
        keys.iter().filter(|key| inner.remove(key)).count()
    }

    /// Drop every page of every archive.
    pub fn clear(&self) -> usize {
        let mut inner = self.lock();
        let removed = inner.pages.len();
        inner.pages.clear();
        inner.resident = 0;
        removed
    }

    pub fn len(&self) -> usize {
        self.lock().pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sum of the footprints of every resident page.
    pub fn resident_bytes(&self) -> usize {
        self.lock().resident
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Whether `key` is resident, without touching its recency.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.lock().pages.contains(key)
    }
}
