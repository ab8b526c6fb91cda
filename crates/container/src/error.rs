//! Container Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// A container error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for container operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
/// The first three are open-time failures for the whole archive; the entry
/// variants only ever affect a single page.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The byte source could not be read. The storage may have gone away.
    #[display("I/O error")]
    Io,
    /// The archive structure is corrupt or does not match the detected format.
    #[display("invalid or corrupted archive")]
    InvalidArchive,
    /// The archive opened, but contains no image members.
    #[display("archive contains no pages")]
    NoPages,
    /// The locator does not refer to a member of this container.
    #[display("no entry at container index {_0}")]
    EntryNotFound(#[error(not(source))] usize),
    /// A single member is corrupt, truncated or fails its checksum.
    #[display("corrupt entry: {_0}")]
    CorruptEntry(#[error(not(source))] String),
    /// The requested format is not supported.
    #[display("unsupported format: {_0}")]
    UnsupportedFormat(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Io)
    }

    /// Classify an I/O error raised while decompressing a member: checksum
    /// and truncation errors belong to the entry, anything else to the
    /// underlying storage.
    pub(crate) fn from_entry_io(name: &str, err: &std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::InvalidData | std::io::ErrorKind::UnexpectedEof | std::io::ErrorKind::Other => {
                ErrorKind::CorruptEntry(name.to_string())
            },
            _ => ErrorKind::Io,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exn::ResultExt;

    #[test]
    fn error_kind_display() {
        assert_eq!(ErrorKind::InvalidArchive.to_string(), "invalid or corrupted archive");
        assert_eq!(ErrorKind::CorruptEntry("07.png".to_string()).to_string(), "corrupt entry: 07.png");
        assert_eq!(ErrorKind::EntryNotFound(3).to_string(), "no entry at container index 3");
    }

    #[test]
    fn error_kind_retryable() {
        assert!(ErrorKind::Io.is_retryable());
        assert!(!ErrorKind::InvalidArchive.is_retryable());
        assert!(!ErrorKind::CorruptEntry("x".to_string()).is_retryable());
    }

    #[test]
    fn entry_io_classification() {
        let crc = std::io::Error::new(std::io::ErrorKind::InvalidData, "Invalid checksum");
        assert_eq!(ErrorKind::from_entry_io("a.png", &crc), ErrorKind::CorruptEntry("a.png".to_string()));
        let gone = std::io::Error::new(std::io::ErrorKind::NotFound, "ejected");
        assert_eq!(ErrorKind::from_entry_io("a.png", &gone), ErrorKind::Io);
    }

    #[test]
    fn error_from_result() {
        let result: std::result::Result<(), std::io::Error> =
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"));
        let err: Result<()> = result.or_raise(|| ErrorKind::Io);
        // Exn<E> implements Deref<Target = E>
        assert_eq!(*err.unwrap_err(), ErrorKind::Io);
    }
}
