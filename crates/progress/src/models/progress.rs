use crate::error::{Error, ErrorKind};
use exn::{OptionExt, ResultExt};
use folio_storage::ArchiveIdentity;
use std::path::PathBuf;
use time::UtcDateTime;

/// Where a reader left off in one archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadingProgress {
    pub identity: ArchiveIdentity,
    /// Storage locator the archive was last opened from.
    pub path: PathBuf,
    /// Zero-based index of the last committed page.
    pub page_index: usize,
    pub page_count: usize,
    pub updated_at: UtcDateTime,
}

impl ReadingProgress {
    pub fn new(identity: ArchiveIdentity, path: impl Into<PathBuf>, page_index: usize, page_count: usize) -> Self {
        Self { identity, path: path.into(), page_index, page_count, updated_at: UtcDateTime::now() }
    }

    /// The stored page, if it still exists in an archive of `page_count` pages.
    pub fn resume_index(&self, page_count: usize) -> Option<usize> {
        (self.page_index < page_count).then_some(self.page_index)
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct ProgressRow {
    pub(crate) identity: String,
    pub(crate) path: String,
    pub(crate) page_index: i64,
    pub(crate) page_count: i64,
    pub(crate) updated_at: i64,
}

impl TryFrom<&ReadingProgress> for ProgressRow {
    type Error = Error;
    fn try_from(progress: &ReadingProgress) -> Result<Self, Self::Error> {
        if progress.page_count == 0 || progress.page_index >= progress.page_count {
            exn::bail!(ErrorKind::InvalidData("page index out of range"));
        }
        Ok(Self {
            identity: progress.identity.as_str().to_string(),
            path: progress.path.to_str().ok_or_raise(|| ErrorKind::InvalidData("path"))?.to_string(),
            page_index: i64::try_from(progress.page_index).or_raise(|| ErrorKind::InvalidData("page index"))?,
            page_count: i64::try_from(progress.page_count).or_raise(|| ErrorKind::InvalidData("page count"))?,
            updated_at: progress.updated_at.unix_timestamp(),
        })
    }
}

impl TryFrom<ProgressRow> for ReadingProgress {
    type Error = Error;
    fn try_from(row: ProgressRow) -> Result<Self, Self::Error> {
        Ok(Self {
            identity: ArchiveIdentity::new(row.identity),
            path: PathBuf::from(row.path),
            page_index: usize::try_from(row.page_index).or_raise(|| ErrorKind::InvalidData("page index"))?,
            page_count: usize::try_from(row.page_count).or_raise(|| ErrorKind::InvalidData("page count"))?,
            updated_at: UtcDateTime::from_unix_timestamp(row.updated_at)
                .or_raise(|| ErrorKind::InvalidData("update time"))?,
        })
    }
}
