//! Comic archive containers with automatic format detection.
//!
//! This crate wraps the supported archive libraries behind a unified
//! [`ContainerFormat`] enum and a closed [`Container`] reader, providing:
//!
//! - **Format detection** from magic bytes ([`ContainerFormat::from_magic_bytes`])
//!   with a file extension fallback ([`ContainerFormat::detect`])
//! - **Page enumeration** without decompressing page data, filtered to image
//!   members and sorted in natural (numeric-aware) order ([`natural_cmp`])
//! - **Random access** to individual pages via [`Container::read_entry`]
//!
//! Zip archives support cheap random access through the central directory.
//! 7z archives may be solid, in which case a page can only be reached by
//! decompressing every member before it in the same block; the
//! [`SevenZipReader`] hides this by restarting the block decode and keeping a
//! small forward buffer of the pages that follow the requested one. RAR
//! archives are always walked header by header; [`RarReader`] spools the
//! source to a temporary file for the RAR library and buffers the same way.

mod construct;
mod container;
mod entry;
pub mod error;
mod rar;
mod sevenz;
mod util;
mod zip;

pub use crate::construct::DETECT_WINDOW;
pub use crate::container::{Container, ReadSeek};
pub use crate::entry::{EntryLocator, PageEntry, is_image_name, natural_cmp};
pub use crate::rar::RarReader;
pub use crate::sevenz::SevenZipReader;
pub use crate::zip::ZipReader;

/// A supported archive container format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ContainerFormat {
    /// Deflate-based zip container (.cbz, .zip)
    Zip,
    /// Solid-capable 7-Zip container (.cb7, .7z)
    SevenZip,
    /// RAR 4 or RAR 5 container (.cbr, .rar)
    Rar,
}
