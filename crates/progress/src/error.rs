//! Progress Store Error Types

use derive_more::{Display, Error};

/// A progress store error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for progress store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The database could not be reached, or a query failed.
    #[display("database error")]
    Database,
    #[display("database migration error")]
    Migration,
    /// A stored row, or a model about to be stored, does not fit the schema.
    #[display("invalid progress data: {_0}")]
    InvalidData(#[error(not(source))] &'static str),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    ///
    /// A locked or briefly unavailable database is worth another attempt on
    /// the next page turn; bad data never is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Database)
    }
}
