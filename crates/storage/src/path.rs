//! Locator validation.
//!
//! Archive locators come from callers (library listings, command-line
//! arguments), so every backend funnels them through [`validate`] before
//! touching storage.

use crate::error::{ErrorKind, Result};
use std::path::{Component, Path, PathBuf};

/// Normalise a locator relative to the storage root.
///
/// `.` components and repeated or trailing separators disappear, and `..`
/// is resolved lexically. Anything that would climb above the root, carries a
/// Windows prefix, contains a NUL byte, or normalises to nothing is rejected
/// with [`InvalidPath`](crate::error::ErrorKind::InvalidPath).
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use folio_storage::validate_path;
///
/// assert_eq!(validate_path("Series/./vol1//issue-01.cbz").unwrap(), Path::new("Series/vol1/issue-01.cbz"));
/// assert!(validate_path("../outside.cbz").is_err());
/// ```
pub fn validate(path: impl AsRef<Path>) -> Result<PathBuf> {
    let original = path.as_ref();
    let reject = || ErrorKind::InvalidPath(original.to_path_buf());
    let mut normalised: Vec<&std::ffi::OsStr> = Vec::new();
    for component in original.components() {
        match component {
            Component::CurDir | Component::RootDir => {},
            Component::Prefix(_) => exn::bail!(reject()),
            Component::ParentDir => {
                if normalised.pop().is_none() {
                    exn::bail!(reject());
                }
            },
            // Path::components() lets NUL through on Unix, but syscalls truncate at it.
            Component::Normal(part) if part.as_encoded_bytes().contains(&0) => exn::bail!(reject()),
            Component::Normal(part) => normalised.push(part),
        }
    }
    if normalised.is_empty() {
        exn::bail!(reject());
    }
    Ok(normalised.into_iter().collect())
}
