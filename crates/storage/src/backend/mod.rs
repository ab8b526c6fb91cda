//! Storage backend trait and implementations.
//!
//! This module defines the `StorageBackend` trait, which provides a unified
//! interface for locating and reading comic archives, whether they live on
//! the local filesystem or in memory for tests.

mod local;
#[cfg(feature = "mock")]
mod mock;

pub use self::local::LocalBackend;
#[cfg(feature = "mock")]
pub use self::mock::MockBackend;
use crate::FileInfo;
use crate::error::Result;
use async_trait::async_trait;
use folio_container::ReadSeek;
use futures::{Stream, TryStreamExt};
use std::path::Path;
use std::pin::Pin;

pub(crate) type FileInfoStream<'a> = Pin<Box<dyn Stream<Item = Result<FileInfo>> + Send + 'a>>;
pub type BoxReadSeek = Box<dyn ReadSeek + 'static>;

/// Unified interface for storage backends.
///
/// # Path Handling
/// All paths are relative to the storage root and must be validated using
/// [`validate_path`](crate::validate_path) before use. Implementations should
/// enforce this validation.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use folio_container::{ContainerFormat, DETECT_WINDOW};
/// use folio_storage::{backend::StorageBackend, error::Result};
///
/// async fn sniff(backend: &dyn StorageBackend, path: &Path) -> Result<Option<ContainerFormat>> {
///     let head = backend.read_head(path, DETECT_WINDOW).await?;
///     Ok(ContainerFormat::detect(&head, path))
/// }
/// ```
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Name of the configured backend, used for logging only.
    fn name(&self) -> &str;

    /// List all files matching an optional prefix.
    ///
    /// Default implementation of this method is to collect all the results
    /// from [`list_stream()`](Self::list_stream) into a [`Vec`] before
    /// returning.
    async fn list(&self, prefix: Option<&Path>) -> Result<Vec<FileInfo>> {
        self.list_stream(prefix).try_collect().await
    }

    /// Stream file metadata matching an optional prefix.
    ///
    /// Yields results incrementally. If a prefix is provided, only files
    /// whose paths start with the prefix (component-wise) are returned. Every
    /// file is listed; callers wanting archives only can filter on
    /// [`FileInfo::is_archive`].
    ///
    /// # Examples
    ///
    /// ```
    /// use futures::TryStreamExt;
    /// # use folio_storage::{backend::StorageBackend, error::Result};
    /// # async fn example(backend: &dyn StorageBackend) -> Result<()> {
    /// let mut stream = backend.list_stream(None);
    /// while let Some(info) = stream.try_next().await? {
    ///     if info.is_archive() {
    ///         println!("{}: {} bytes", info.path.display(), info.size);
    ///     }
    /// }
    /// # Ok(())
    /// # }
    /// ```
    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>) -> FileInfoStream<'a>;

    /// Read only the first N bytes (for magic byte detection).
    ///
    /// If the file is smaller than `bytes`, returns the entire file.
    async fn read_head(&self, path: &Path, bytes: usize) -> Result<Vec<u8>>;

    /// Open a file for seekable reads.
    ///
    /// Returns a `'static` boxed reader suitable for use inside
    /// [`spawn_blocking`](tokio::task::spawn_blocking); archive readers own
    /// it for as long as the archive stays open. The async setup happens
    /// before returning.
    async fn reader(&self, path: &Path) -> Result<BoxReadSeek>;

    /// Get file metadata without reading contents.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the file
    /// does not exist.
    async fn stat(&self, path: &Path) -> Result<FileInfo>;
}
