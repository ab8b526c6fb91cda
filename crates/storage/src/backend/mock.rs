//! In-memory storage backend for testing.

use super::{BoxReadSeek, FileInfoStream};
use crate::StorageBackend;
use crate::error::{ErrorKind, Result};
use crate::models::FileInfo;
use crate::path::validate as validate_path;
use async_stream::stream;
use async_trait::async_trait;
use std::collections::HashMap;
use std::io::{Cursor, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use time::UtcDateTime;
use tokio::sync::RwLock;

/// In-memory storage backend for testing.
///
/// Files are stored in a `HashMap` behind a [`RwLock`], so all trait methods
/// can operate on `&self` without external synchronisation.
///
/// Two switches simulate a byte source going away underneath an open
/// archive: [`disconnect_readers`](Self::disconnect_readers) breaks every
/// reader handed out so far (fresh readers still work), and
/// [`set_offline`](Self::set_offline) fails every operation until switched
/// back.
///
/// # Examples
///
/// ```
/// use folio_storage::backend::{MockBackend, StorageBackend};
/// use std::path::Path;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = MockBackend::with_files([
///     ("series/issue-01.cbz", b"PK\x03\x04"),
/// ]);
/// assert_eq!(backend.stat(Path::new("series/issue-01.cbz")).await?.size, 4);
/// # Ok(())
/// # }
/// ```
pub struct MockBackend {
    name: String,
    storage: RwLock<HashMap<PathBuf, (UtcDateTime, Arc<[u8]>)>>,
    epoch: Arc<AtomicU64>,
    offline: Arc<AtomicBool>,
}

impl MockBackend {
    /// Create a mock backend pre-populated with files.
    ///
    /// Panics if any path fails validation (e.g. path traversal). If test
    /// setup is wrong, then test should not pass.
    pub fn with_files(files: impl IntoIterator<Item = (impl Into<PathBuf>, impl Into<Vec<u8>>)>) -> Self {
        let mut map = HashMap::new();
        let now = UtcDateTime::now();
        for (path, data) in files {
            let path = path.into();
            let Ok(validated) = validate_path(&path) else {
                panic!("MockBackend::with_files: invalid path {}", path.display());
            };
            let data: Vec<u8> = data.into();
            map.insert(validated, (now, Arc::from(data)));
        }
        Self {
            name: "mock".to_string(),
            storage: RwLock::new(map),
            epoch: Arc::new(AtomicU64::new(0)),
            offline: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Break every reader handed out so far.
    pub fn disconnect_readers(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }

    /// Fail every operation (and every outstanding reader) while `true`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
        if offline {
            self.disconnect_readers();
        }
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            exn::bail!(ErrorKind::Io(std::io::Error::new(std::io::ErrorKind::NotConnected, "mock backend offline")));
        }
        Ok(())
    }

    async fn get(&self, path: &Path) -> Result<(UtcDateTime, Arc<[u8]>)> {
        self.check_online()?;
        let validated = validate_path(path)?;
        let guard = self.storage.read().await;
        match guard.get(&validated) {
            Some((modified, data)) => Ok((*modified, Arc::clone(data))),
            None => exn::bail!(ErrorKind::NotFound(validated)),
        }
    }
}
impl Default for MockBackend {
    fn default() -> Self {
        let files: [(&str, &str); 0] = [];
        Self::with_files(files)
    }
}

/// Reader over a snapshot of a mock file that stops working once the
/// backend disconnects it.
struct MockReader {
    cursor: Cursor<Arc<[u8]>>,
    opened_at: u64,
    epoch: Arc<AtomicU64>,
}

impl MockReader {
    fn check(&self) -> std::io::Result<()> {
        if self.epoch.load(Ordering::SeqCst) != self.opened_at {
            return Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "mock reader disconnected"));
        }
        Ok(())
    }
}

impl Read for MockReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.check()?;
        self.cursor.read(buf)
    }
}

impl Seek for MockReader {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.check()?;
        self.cursor.seek(pos)
    }
}

#[async_trait]
impl StorageBackend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>) -> FileInfoStream<'a> {
        let validated_prefix = match prefix.map(validate_path).transpose() {
            Ok(pfx) => pfx,
            Err(e) => return Box::pin(futures::stream::once(async { Err(e) })),
        };

        Box::pin(stream! {
            // Snapshot under the read lock, then drop it before yielding.
            let entries: Vec<(PathBuf, UtcDateTime, u64)> = {
                let guard = self.storage.read().await;
                guard
                    .iter()
                    .filter(|(path, _)| validated_prefix.as_ref().is_none_or(|pfx| path.starts_with(pfx)))
                    .map(|(path, (modified, data))| (path.clone(), *modified, data.len() as u64))
                    .collect()
            };
            for (path, modified, size) in entries {
                yield Ok(FileInfo::new(path, size, modified));
            }
        })
    }

    async fn read_head(&self, path: &Path, bytes: usize) -> Result<Vec<u8>> {
        let (_, data) = self.get(path).await?;
        Ok(data[..bytes.min(data.len())].to_vec())
    }

    async fn reader(&self, path: &Path) -> Result<BoxReadSeek> {
        let (_, data) = self.get(path).await?;
        Ok(Box::new(MockReader {
            cursor: Cursor::new(data),
            opened_at: self.epoch.load(Ordering::SeqCst),
            epoch: Arc::clone(&self.epoch),
        }))
    }

    async fn stat(&self, path: &Path) -> Result<FileInfo> {
        let (modified, data) = self.get(path).await?;
        Ok(FileInfo::new(validate_path(path)?, data.len() as u64, modified))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_container::ContainerFormat;

    #[tokio::test]
    async fn test_reader_reads_snapshot() {
        let backend = MockBackend::with_files([("issue.cbz", b"0123456789")]);
        let mut reader = backend.reader(Path::new("issue.cbz")).await.unwrap();
        reader.seek(SeekFrom::Start(7)).unwrap();
        let mut tail = Vec::new();
        reader.read_to_end(&mut tail).unwrap();
        assert_eq!(tail, b"789");
    }

    #[tokio::test]
    async fn test_not_found() {
        let backend = MockBackend::default();
        let err = backend.stat(Path::new("missing.cbz")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_read_head() {
        let backend = MockBackend::with_files([("issue.cbz", b"PK\x03\x04rest")]);
        assert_eq!(backend.read_head(Path::new("issue.cbz"), 4).await.unwrap(), b"PK\x03\x04");
        assert_eq!(backend.read_head(Path::new("issue.cbz"), 64).await.unwrap().len(), 8);
    }

    #[tokio::test]
    async fn test_stat() {
        let backend = MockBackend::with_files([("series/issue.cb7", b"0123")]);
        let info = backend.stat(Path::new("series/./issue.cb7")).await.unwrap();
        assert_eq!(info.path, PathBuf::from("series/issue.cb7"));
        assert_eq!(info.size, 4);
        assert_eq!(info.format, Some(ContainerFormat::SevenZip));
    }

    #[tokio::test]
    async fn test_list_with_prefix() {
        let backend = MockBackend::with_files([("a/1.cbz", b"x"), ("a/2.cbz", b"x"), ("b/3.cbz", b"x")]);
        assert_eq!(backend.list(None).await.unwrap().len(), 3);
        assert_eq!(backend.list(Some(Path::new("a"))).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_disconnected_reader_fails_but_fresh_reader_works() {
        let backend = MockBackend::with_files([("issue.cbz", b"0123456789")]);
        let mut stale = backend.reader(Path::new("issue.cbz")).await.unwrap();
        backend.disconnect_readers();
        let mut buf = Vec::new();
        assert!(stale.read_to_end(&mut buf).is_err());
        let mut fresh = backend.reader(Path::new("issue.cbz")).await.unwrap();
        fresh.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"0123456789");
    }

    #[tokio::test]
    async fn test_offline() {
        let backend = MockBackend::with_files([("issue.cbz", b"0123456789")]);
        backend.set_offline(true);
        let err = backend.reader(Path::new("issue.cbz")).await.err().unwrap();
        assert!(err.is_retryable());
        backend.set_offline(false);
        assert!(backend.reader(Path::new("issue.cbz")).await.is_ok());
    }

    #[test]
    #[should_panic(expected = "invalid path")]
    fn test_with_files_panics_on_bad_path() {
        let _ = MockBackend::with_files([("../escape.cbz", b"x")]);
    }
}
