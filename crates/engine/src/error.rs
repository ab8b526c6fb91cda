//! Engine Error Types
//!
//! Page-level failures ([`ErrorKind::EntryReadFailed`],
//! [`ErrorKind::DecodeFailed`], [`ErrorKind::PageOutOfRange`]) never affect
//! the rest of a session. Open-level failures abort the open. Storage loss is
//! retried once, after which the session is [`Failed`](crate::SessionState::Failed).

use derive_more::{Display, Error};
use folio_container::error::{Error as ContainerError, ErrorKind as ContainerErrorKind};
use folio_storage::error::{Error as StorageError, ErrorKind as StorageErrorKind};
use std::ops::Deref;

/// An engine error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Neither the leading bytes nor the file name identify a supported
    /// container.
    #[display("unsupported format")]
    DetectionFailed,
    /// The archive is missing, unreadable as its detected format, or has no
    /// pages.
    #[display("corrupt file")]
    OpenFailed,
    /// One page's member is corrupt or truncated.
    #[display("page {_0} could not be read")]
    EntryReadFailed(#[error(not(source))] usize),
    /// One page's bytes are not a supported image.
    #[display("page {_0} could not be decoded")]
    DecodeFailed(#[error(not(source))] usize),
    /// The byte source went away.
    #[display("storage unavailable")]
    StorageUnavailable,
    #[display("page {index} out of range for {count} pages")]
    PageOutOfRange { index: usize, count: usize },
    #[display("session is closed")]
    SessionClosed,
    /// Storage stayed unavailable after a reconnect; close and reopen.
    #[display("session failed")]
    SessionFailed,
    /// The progress store could not be read or written.
    #[display("reading progress unavailable")]
    Progress,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::StorageUnavailable | ErrorKind::Progress)
    }

    /// Errors that concern a single page and leave the session usable.
    pub fn is_page_level(&self) -> bool {
        matches!(
            self,
            ErrorKind::EntryReadFailed(_) | ErrorKind::DecodeFailed(_) | ErrorKind::PageOutOfRange { .. }
        )
    }
}

/// A byte source failure while opening: connectivity problems are worth a
/// retry, anything else means this locator cannot be opened.
#[track_caller]
pub(crate) fn from_storage(err: StorageError) -> Error {
    let kind = match err.deref() {
        StorageErrorKind::Io(_) | StorageErrorKind::BackendError(_) => ErrorKind::StorageUnavailable,
        _ => ErrorKind::OpenFailed,
    };
    err.raise(kind)
}

#[track_caller]
pub(crate) fn from_container_open(err: ContainerError) -> Error {
    let kind = match err.deref() {
        ContainerErrorKind::Io => ErrorKind::StorageUnavailable,
        ContainerErrorKind::UnsupportedFormat(_) => ErrorKind::DetectionFailed,
        _ => ErrorKind::OpenFailed,
    };
    err.raise(kind)
}

#[track_caller]
pub(crate) fn from_container_read(err: ContainerError, index: usize) -> Error {
    let kind = match err.deref() {
        ContainerErrorKind::Io => ErrorKind::StorageUnavailable,
        _ => ErrorKind::EntryReadFailed(index),
    };
    err.raise(kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ErrorKind::DetectionFailed, "unsupported format")]
    #[case(ErrorKind::OpenFailed, "corrupt file")]
    #[case(ErrorKind::StorageUnavailable, "storage unavailable")]
    #[case(ErrorKind::PageOutOfRange { index: 12, count: 10 }, "page 12 out of range for 10 pages")]
    fn test_display(#[case] kind: ErrorKind, #[case] expected: &str) {
        assert_eq!(kind.to_string(), expected);
    }

    #[test]
    fn test_container_read_classification() {
        let gone = from_container_read(exn::Exn::from(ContainerErrorKind::Io), 4);
        assert_eq!(*gone, ErrorKind::StorageUnavailable);
        let corrupt = from_container_read(exn::Exn::from(ContainerErrorKind::CorruptEntry("5.jpg".into())), 4);
        assert_eq!(*corrupt, ErrorKind::EntryReadFailed(4));
        assert!(corrupt.is_page_level());
    }

    #[test]
    fn test_retryable() {
        assert!(ErrorKind::StorageUnavailable.is_retryable());
        assert!(ErrorKind::Progress.is_retryable());
        assert!(!ErrorKind::SessionFailed.is_retryable());
        assert!(!ErrorKind::DecodeFailed(3).is_retryable());
    }
}
