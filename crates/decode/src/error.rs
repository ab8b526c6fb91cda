//! Decode Error Types

use derive_more::{Display, Error};

/// A decode error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for decode operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Why a page could not be turned into pixels. Always page-level.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The bytes are not in any raster format we can decode.
    #[display("unsupported image format")]
    Unsupported,
    /// The format was recognised, but the data is damaged or truncated.
    #[display("corrupt image data")]
    Corrupt,
    /// Decoding at full resolution would exceed the memory ceiling.
    #[display("image too large to decode")]
    TooLarge,
    /// A decoded page could not be re-encoded for output.
    #[display("failed to encode image")]
    Encode,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed. Never, for the same bytes.
    pub fn is_retryable(&self) -> bool {
        false
    }
}
