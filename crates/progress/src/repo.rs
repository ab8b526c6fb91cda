use crate::Database;
use crate::error::{ErrorKind, Result};
use crate::models::{ProgressRow, ReadingProgress};
use exn::{OptionExt, ResultExt};
use folio_storage::ArchiveIdentity;
use sqlx::SqlitePool;
use std::path::Path;
use tracing::instrument;

/// Reading progress, one row per archive identity.
///
/// Rows are created on first open, rewritten on every committed page turn,
/// and removed only when an archive leaves the library
/// ([`delete`](Self::delete), [`delete_by_path`](Self::delete_by_path)) or
/// the recent list is cleared ([`clear`](Self::clear)).
#[derive(Debug, Clone)]
pub struct Repository {
    pool: SqlitePool,
}
impl From<&Database> for Repository {
    fn from(db: &Database) -> Self {
        Self { pool: db.pool().clone() }
    }
}
impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn sqlx_hates_paths(path: &Path) -> Result<&str> {
        path.to_str().ok_or_raise(|| ErrorKind::InvalidData("path"))
    }

    pub async fn load(&self, identity: &ArchiveIdentity) -> Result<Option<ReadingProgress>> {
        let row: Option<ProgressRow> = sqlx::query_as(include_str!("../queries/load_progress.sql"))
            .bind(identity.as_str())
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(ReadingProgress::try_from).transpose()
    }

    /// Insert or replace the progress row for `progress.identity`.
    #[instrument(skip(self, progress), fields(identity = %progress.identity, page = progress.page_index))]
    pub async fn save(&self, progress: &ReadingProgress) -> Result<()> {
        let row = ProgressRow::try_from(progress)?;
        sqlx::query(include_str!("../queries/upsert_progress.sql"))
            .bind(row.identity)
            .bind(row.path)
            .bind(row.page_index)
            .bind(row.page_count)
            .bind(row.updated_at)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    /// Forget one archive. Returns whether a row existed.
    pub async fn delete(&self, identity: &ArchiveIdentity) -> Result<bool> {
        let result = sqlx::query(include_str!("../queries/delete_progress.sql"))
            .bind(identity.as_str())
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(result.rows_affected() > 0)
    }

    /// Forget every identity last opened from `path`.
    ///
    /// Used when a file is removed from the library and its identity can no
    /// longer be derived from storage metadata.
    pub async fn delete_by_path(&self, path: impl AsRef<Path>) -> Result<u64> {
        let result = sqlx::query(include_str!("../queries/delete_progress_by_path.sql"))
            .bind(Self::sqlx_hates_paths(path.as_ref())?)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(result.rows_affected())
    }

    /// Clear the whole recent list. Returns the number of rows removed.
    #[instrument(skip(self))]
    pub async fn clear(&self) -> Result<u64> {
        let result = sqlx::query(include_str!("../queries/clear_progress.sql"))
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        tracing::info!(removed = result.rows_affected(), "cleared reading progress");
        Ok(result.rows_affected())
    }

    /// Most recently updated archives first. Saves within the same second
    /// keep their write order.
    pub async fn list_recent(&self, limit: u32) -> Result<Vec<ReadingProgress>> {
        let rows: Vec<ProgressRow> = sqlx::query_as(include_str!("../queries/list_recent.sql"))
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(ReadingProgress::try_from).collect()
    }
}
