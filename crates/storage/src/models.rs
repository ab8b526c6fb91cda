use folio_container::ContainerFormat;
use std::path::PathBuf;
use time::UtcDateTime;

/// File metadata returned by storage backends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Relative path from storage root
    pub path: PathBuf,
    /// File size in bytes
    pub size: u64,
    /// Last modified timestamp
    pub modified: UtcDateTime,
    /// Container format guessed from the file extension
    pub format: Option<ContainerFormat>,
}
impl FileInfo {
    pub fn new(path: impl Into<PathBuf>, size: u64, modified: UtcDateTime) -> Self {
        let path = path.into();
        let format = ContainerFormat::from_path(&path);
        Self { path, size, modified, format }
    }

    /// Whether the extension names a supported comic archive.
    pub fn is_archive(&self) -> bool {
        self.format.is_some()
    }
}
