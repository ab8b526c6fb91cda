//! SQLite store for reading progress.
//!
//! Remembers the last page read per archive so a reopened archive resumes
//! where the reader left off, and backs the "recently read" list. The
//! database is a convenience, not a source of truth: deleting it only loses
//! bookmarks.

mod db;
pub mod error;
mod models;
mod repo;

pub use crate::db::Database;
pub use crate::models::ReadingProgress;
pub use crate::repo::Repository;
