//! Configuration Error Types

use derive_more::{Display, Error};

/// A configuration error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for configuration operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// A configuration source could not be read or did not match the schema.
    #[display("failed to load configuration")]
    Load,
    /// An explicitly requested configuration file does not exist, or has an
    /// extension no provider understands.
    #[display("unusable configuration file: {_0}")]
    File(#[error(not(source))] String),
    /// A value parsed but is out of range.
    #[display("invalid configuration value for {_0}")]
    Invalid(#[error(not(source))] &'static str),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    ///
    /// Configuration errors need a human to edit a file or variable first.
    pub fn is_retryable(&self) -> bool {
        false
    }
}
