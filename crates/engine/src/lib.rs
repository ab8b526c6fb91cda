//! Page streaming for comic archives.
//!
//! An [`Engine`] opens archives from a storage backend into
//! [`ArchiveSession`]s. A session walks the archive's pages in natural name
//! order, decodes the page under its cursor on demand and a few neighbours in
//! the background, and remembers the last page read through a
//! [`ProgressStore`]. Decoded pages of every session share one
//! byte-budgeted [`PageCache`].
//!
//! ```no_run
//! use folio_config::EngineConfig;
//! use folio_engine::{Engine, MemoryProgressStore};
//! use folio_storage::backend::LocalBackend;
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = Arc::new(LocalBackend::new("comics", "/srv/comics")?);
//! let engine = Engine::new(EngineConfig::default(), backend, Arc::new(MemoryProgressStore::new()));
//! let session = engine.open(Path::new("Saga/Saga 001.cbz")).await?;
//! let page = session.current_page().await?;
//! println!("{}x{}", page.width(), page.height());
//! session.next().await?;
//! session.close().await?;
//! # Ok(())
//! # }
//! ```

mod cache;
mod engine;
pub mod error;
mod progress;
mod session;

pub use crate::cache::{CacheKey, PageCache};
pub use crate::engine::Engine;
pub use crate::progress::{MemoryProgressStore, ProgressStore};
pub use crate::session::{ArchiveSession, Navigation, SessionState};
pub use folio_decode::DecodedPage;
