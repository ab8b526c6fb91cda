//! Local filesystem storage backend.
//!
//! Archives live under a configured library directory and are accessed with
//! `tokio::fs`. Readers handed to the archive layer are plain blocking
//! [`std::fs::File`]s, since archive parsing happens on blocking threads.

use crate::backend::{BoxReadSeek, FileInfoStream};
use crate::error::ErrorKind;
use crate::{FileInfo, StorageBackend, error::Result, path::validate as validate_path};
use async_stream::stream;
use async_trait::async_trait;
use exn::ResultExt;
use std::fs::{Metadata, create_dir_all as sync_create_dir};
use std::path::{Path, PathBuf};
use time::UtcDateTime;
use tokio::fs::{self, DirEntry};
use tokio::io::AsyncReadExt;

enum WalkEntry {
    File(FileInfo),
    Descend(PathBuf),
    Skip,
}

/// Local filesystem storage backend.
///
/// # Examples
///
/// ```no_run
/// use folio_storage::backend::LocalBackend;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = LocalBackend::new("comics", "/home/reader/Comics")?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct LocalBackend {
    name: String,
    /// Library root directory
    root: PathBuf,
}
impl LocalBackend {
    /// Create a new local filesystem backend rooted at an absolute path.
    ///
    /// The directory is created if missing; an existing non-directory is
    /// rejected.
    pub fn new(name: impl Into<String>, root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_absolute() {
            exn::bail!(ErrorKind::InvalidPath(root));
        }
        if root.exists() {
            if !root.is_dir() {
                exn::bail!(ErrorKind::InvalidPath(root));
            }
        } else {
            // Only happens once on start-up, not worth an async constructor.
            sync_create_dir(&root).map_err(|e| Self::map_io_error(e, &root))?;
        }
        Ok(Self { name: name.into(), root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn absolute_path(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        let validated = validate_path(path.as_ref())?;
        Ok(self.root.join(validated))
    }

    fn relative_path(&self, absolute: impl AsRef<Path>) -> Result<PathBuf> {
        let absolute = absolute.as_ref();
        let relative = absolute.strip_prefix(&self.root).or_raise(|| {
            ErrorKind::BackendError(format!("path `{}` is not within root `{}`", absolute.display(), self.root.display()))
        })?;
        validate_path(relative)
    }

    fn file_info(path: &Path, metadata: &Metadata) -> Result<FileInfo> {
        let modified = metadata.modified().map_err(ErrorKind::Io)?;
        Ok(FileInfo::new(path, metadata.len(), UtcDateTime::from(modified)))
    }

    fn map_io_error(e: std::io::Error, path: &Path) -> ErrorKind {
        match e.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound(path.to_path_buf()),
            std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied(path.to_path_buf()),
            _ => ErrorKind::Io(e),
        }
    }

    // Errors can't be `?`-ed inside the stream loop, so each entry is
    // resolved here and the loop only has to yield.
    async fn process_entry(&self, entry: DirEntry, prefix: Option<&Path>) -> Result<WalkEntry> {
        let path = entry.path();
        let metadata = entry.metadata().await.map_err(|e| Self::map_io_error(e, &path))?;
        let relative = self.relative_path(&path)?;
        if metadata.is_dir() {
            // Keep descending towards a deeper prefix.
            return match prefix {
                Some(pfx) if !relative.starts_with(pfx) && !pfx.starts_with(&relative) => Ok(WalkEntry::Skip),
                _ => Ok(WalkEntry::Descend(path)),
            };
        }
        if let Some(pfx) = prefix
            && !relative.starts_with(pfx)
        {
            return Ok(WalkEntry::Skip);
        }
        if metadata.is_file() {
            return Ok(WalkEntry::File(Self::file_info(&relative, &metadata)?));
        }
        // Most likely a broken symlink.
        Ok(WalkEntry::Skip)
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>) -> FileInfoStream<'a> {
        let validated_prefix = match prefix.map(validate_path).transpose() {
            Ok(pfx) => pfx,
            Err(e) => return Box::pin(futures::stream::once(async { Result::Err(e) })),
        };
        let mut stack = vec![self.root.clone()];

        Box::pin(stream! {
            'dirs: while let Some(current) = stack.pop() {
                let mut entries = match fs::read_dir(&current).await {
                    Ok(entries) => entries,
                    // A directory that vanished mid-walk lists as empty.
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                    Err(err) => {
                        yield Err(exn::Exn::from(Self::map_io_error(err, &current)));
                        continue 'dirs;
                    }
                };

                'entries: loop {
                    let entry = match entries.next_entry().await {
                        Ok(Some(entry)) => entry,
                        Ok(None) => break 'entries,
                        Err(e) => { yield Err(exn::Exn::from(Self::map_io_error(e, &current))); continue 'entries; },
                    };
                    match self.process_entry(entry, validated_prefix.as_deref()).await {
                        Ok(WalkEntry::File(f)) => yield Ok(f),
                        Ok(WalkEntry::Descend(d)) => stack.push(d),
                        Ok(WalkEntry::Skip) => {},
                        Err(e) => yield Err(e),
                    };
                }
            }
        })
    }

    async fn read_head(&self, path: &Path, bytes: usize) -> Result<Vec<u8>> {
        let abs_path = self.absolute_path(path)?;
        let file = fs::File::open(&abs_path).await.map_err(|e| Self::map_io_error(e, path))?;
        let mut buffer = Vec::with_capacity(bytes);
        file.take(bytes as u64).read_to_end(&mut buffer).await.map_err(ErrorKind::Io)?;
        Ok(buffer)
    }

    async fn reader(&self, path: &Path) -> Result<BoxReadSeek> {
        let abs_path = self.absolute_path(path)?;
        let file = fs::File::open(&abs_path).await.map_err(|e| Self::map_io_error(e, path))?;
        Ok(Box::new(file.into_std().await))
    }

    async fn stat(&self, path: &Path) -> Result<FileInfo> {
        let abs_path = self.absolute_path(path)?;
        let metadata = fs::metadata(&abs_path).await.map_err(|e| Self::map_io_error(e, path))?;
        if !metadata.is_file() {
            exn::bail!(ErrorKind::NotFound(path.to_path_buf()));
        }
        Self::file_info(&validate_path(path)?, &metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_container::ContainerFormat;
    use std::io::{Read, Seek, SeekFrom};

    fn backend() -> (tempfile::TempDir, LocalBackend) {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new("local", temp_dir.path()).unwrap();
        (temp_dir, backend)
    }

    fn put(temp_dir: &tempfile::TempDir, path: &str, data: &[u8]) {
        let path = temp_dir.path().join(path);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, data).unwrap();
    }

    #[test]
    fn test_new_requires_absolute_path() {
        let temp_dir = tempfile::tempdir().unwrap();
        assert!(LocalBackend::new("local", temp_dir.path()).is_ok());
        assert!(LocalBackend::new("local", "relative/path").is_err());
    }

    #[test]
    fn test_new_rejects_file_root() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file = temp_dir.path().join("not-a-dir");
        std::fs::write(&file, b"x").unwrap();
        assert!(LocalBackend::new("local", &file).is_err());
    }

    #[test]
    fn test_absolute_path_is_confined() {
        let (temp_dir, backend) = backend();
        let expected = temp_dir.path().join("Series/issue-01.cbz");
        assert_eq!(backend.absolute_path("Series/issue-01.cbz").unwrap(), expected);
        assert!(backend.absolute_path("../etc/passwd").is_err());
    }

    #[tokio::test]
    async fn test_reader_is_seekable() {
        let (temp_dir, backend) = backend();
        put(&temp_dir, "issue.cbz", b"0123456789");
        let mut reader = backend.reader(Path::new("issue.cbz")).await.unwrap();
        reader.seek(SeekFrom::Start(6)).unwrap();
        let mut tail = String::new();
        reader.read_to_string(&mut tail).unwrap();
        assert_eq!(tail, "6789");
    }

    #[tokio::test]
    async fn test_reader_not_found() {
        let (_temp_dir, backend) = backend();
        let err = backend.reader(Path::new("missing.cbz")).await.err().unwrap();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_read_head() {
        let (temp_dir, backend) = backend();
        put(&temp_dir, "issue.cb7", b"7z\xBC\xAF\x27\x1Cpayload");
        let head = backend.read_head(Path::new("issue.cb7"), 6).await.unwrap();
        assert_eq!(head, b"7z\xBC\xAF\x27\x1C");
        let all = backend.read_head(Path::new("issue.cb7"), 100).await.unwrap();
        assert_eq!(all.len(), 13);
    }

    #[tokio::test]
    async fn test_stat() {
        let (temp_dir, backend) = backend();
        put(&temp_dir, "Series/./issue-01.cbz", b"PK\x03\x04");
        let info = backend.stat(Path::new("Series/issue-01.cbz")).await.unwrap();
        assert_eq!(info.path, PathBuf::from("Series/issue-01.cbz"));
        assert_eq!(info.size, 4);
        assert_eq!(info.format, Some(ContainerFormat::Zip));
    }

    #[tokio::test]
    async fn test_stat_directory_is_not_found() {
        let (temp_dir, backend) = backend();
        put(&temp_dir, "Series/issue-01.cbz", b"data");
        let err = backend.stat(Path::new("Series")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_list_returns_all_files() {
        let (temp_dir, backend) = backend();
        put(&temp_dir, "a.cbz", b"data");
        put(&temp_dir, "b.cb7", b"data");
        put(&temp_dir, "notes.txt", b"data");
        let files = backend.list(None).await.unwrap();
        assert_eq!(files.len(), 3);
        assert_eq!(files.iter().filter(|f| f.is_archive()).count(), 2);
    }

    #[tokio::test]
    async fn test_list_with_prefix() {
        let (temp_dir, backend) = backend();
        put(&temp_dir, "SeriesA/vol1/issue-01.cbz", b"data");
        put(&temp_dir, "SeriesA/vol1/issue-02.cbz", b"data");
        put(&temp_dir, "SeriesA/vol10/issue-01.cbz", b"data");
        put(&temp_dir, "SeriesB/issue-01.cbz", b"data");
        let mut files: Vec<PathBuf> =
            backend.list(Some(Path::new("SeriesA/vol1"))).await.unwrap().into_iter().map(|f| f.path).collect();
        files.sort();
        assert_eq!(files, [PathBuf::from("SeriesA/vol1/issue-01.cbz"), PathBuf::from("SeriesA/vol1/issue-02.cbz")]);
    }

    #[tokio::test]
    async fn test_list_nonexistent_prefix() {
        let (_temp_dir, backend) = backend();
        let files = backend.list(Some(Path::new("nowhere/"))).await.unwrap();
        assert!(files.is_empty());
    }

    #[tokio::test]
    async fn test_path_security() {
        let (_temp_dir, backend) = backend();
        assert!(backend.read_head(Path::new("../etc/passwd"), 4).await.is_err());
        assert!(backend.reader(Path::new("a/../../passwd")).await.is_err());
        assert!(backend.stat(Path::new("../escape.cbz")).await.is_err());
    }
}
