use crate::error::{ErrorKind, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const MIB: u64 = 1024 * 1024;
const DATABASE_FILENAME: &str = "progress.sqlite3";

/// Complete configuration for the reader.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub library: LibraryConfig,
    pub engine: EngineConfig,
}

impl Config {
    /// Reject values that would leave the engine unable to show a page.
    pub fn validate(&self) -> Result<()> {
        self.engine.validate()
    }
}

/// Where archives and the progress database live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LibraryConfig {
    /// Root directory archive locators are resolved against.
    pub root: PathBuf,
    /// SQLite database holding reading progress.
    pub database: PathBuf,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        let database = crate::project_dirs()
            .map(|dirs| dirs.data_dir().join(DATABASE_FILENAME))
            .unwrap_or_else(|| PathBuf::from(DATABASE_FILENAME));
        Self { root: PathBuf::from("."), database }
    }
}

/// How an archive is recognised across sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IdentityStrategy {
    /// Hash of the storage path, size and modification time. Cheap, but a
    /// moved or touched file starts over.
    #[default]
    Metadata,
    /// Hash of the full archive content. Survives renames at the cost of
    /// reading the whole file on open.
    ContentHash,
}

/// Page streaming engine tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Budget for decoded pages held in memory, shared by every open archive.
    pub max_cache_bytes: u64,
    /// Longest side, in pixels, a decoded page is scaled down to.
    pub max_page_dimension: u32,
    /// Ceiling on the raster a page may need when it cannot be decoded
    /// straight to its scaled size (WebP, GIF, BMP, interlaced PNG).
    pub max_decode_bytes: u64,
    /// Pages after the current one to decode in the background. Zero turns
    /// read-ahead off.
    pub read_ahead_count: usize,
    /// Upper bound on concurrent decodes across all sessions.
    pub decode_workers: usize,
    /// Reopen an archive at the last page read.
    pub resume_progress: bool,
    /// Longest side of cover thumbnails.
    pub thumbnail_dimension: u32,
    pub identity: IdentityStrategy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_cache_bytes: 256 * MIB,
            max_page_dimension: 4096,
            max_decode_bytes: 256 * MIB,
            read_ahead_count: 2,
            decode_workers: 2,
            resume_progress: true,
            thumbnail_dimension: 320,
            identity: IdentityStrategy::default(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_cache_bytes == 0 {
            exn::bail!(ErrorKind::Invalid("engine.max_cache_bytes"));
        }
        if self.max_page_dimension == 0 {
            exn::bail!(ErrorKind::Invalid("engine.max_page_dimension"));
        }
        if self.max_decode_bytes == 0 {
            exn::bail!(ErrorKind::Invalid("engine.max_decode_bytes"));
        }
        if self.decode_workers == 0 {
            exn::bail!(ErrorKind::Invalid("engine.decode_workers"));
        }
        if self.thumbnail_dimension == 0 {
            exn::bail!(ErrorKind::Invalid("engine.thumbnail_dimension"));
        }
        Ok(())
    }
}
