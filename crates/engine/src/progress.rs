//! Where sessions remember the last page read.

use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use exn::ResultExt;
use folio_progress::{ReadingProgress, Repository};
use folio_storage::ArchiveIdentity;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

/// Record store for [`ReadingProgress`], keyed by archive identity.
///
/// Sessions treat every failure as non-fatal: a failed load resumes at the
/// first page, and a failed save is retried on the next navigation.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    async fn load(&self, identity: &ArchiveIdentity) -> Result<Option<ReadingProgress>>;

    async fn save(&self, progress: &ReadingProgress) -> Result<()>;
}

#[async_trait]
impl ProgressStore for Repository {
    async fn load(&self, identity: &ArchiveIdentity) -> Result<Option<ReadingProgress>> {
        Repository::load(self, identity).await.or_raise(|| ErrorKind::Progress)
    }

    async fn save(&self, progress: &ReadingProgress) -> Result<()> {
        Repository::save(self, progress).await.or_raise(|| ErrorKind::Progress)
    }
}

/// Progress kept in memory for the lifetime of the process.
#[derive(Default)]
pub struct MemoryProgressStore {
    rows: Mutex<HashMap<ArchiveIdentity, ReadingProgress>>,
    failing: AtomicBool,
}

impl MemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every load and save fail while `true`.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn get(&self, identity: &ArchiveIdentity) -> Option<ReadingProgress> {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner).get(identity).cloned()
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            exn::bail!(ErrorKind::Progress);
        }
        Ok(())
    }
}

#[async_trait]
impl ProgressStore for MemoryProgressStore {
    async fn load(&self, identity: &ArchiveIdentity) -> Result<Option<ReadingProgress>> {
        self.check()?;
        Ok(self.get(identity))
    }

    async fn save(&self, progress: &ReadingProgress) -> Result<()> {
        self.check()?;
        let mut rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        rows.insert(progress.identity.clone(), progress.clone());
        Ok(())
    }
}
