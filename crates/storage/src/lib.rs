//! Byte sources for comic archives.
//!
//! A [`StorageBackend`] hands out metadata, leading bytes for format
//! detection, and seekable readers the container crate can open. Archives are
//! keyed by an [`ArchiveIdentity`] derived from that metadata.

pub mod backend;
pub mod error;
mod identity;
mod models;
mod path;

pub use crate::backend::StorageBackend;
pub use crate::identity::ArchiveIdentity;
pub use crate::models::FileInfo;
pub use crate::path::validate as validate_path;
use std::sync::Arc;

pub type BackendHandle = Arc<dyn StorageBackend + Send + Sync>;
