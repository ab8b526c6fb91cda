use crate::ContainerFormat;
use crate::error::{Error, ErrorKind};
use std::{path::Path, str::FromStr};

/// Number of leading bytes needed for [`ContainerFormat::detect`].
pub const DETECT_WINDOW: usize = 16;

const ZIP_LOCAL_MAGIC: [u8; 4] = [0x50, 0x4B, 0x03, 0x04];
const ZIP_EMPTY_MAGIC: [u8; 4] = [0x50, 0x4B, 0x05, 0x06];
const ZIP_SPANNED_MAGIC: [u8; 4] = [0x50, 0x4B, 0x07, 0x08];
const SEVENZ_MAGIC: [u8; 6] = [0x37, 0x7A, 0xBC, 0xAF, 0x27, 0x1C];
// "Rar!\x1A\x07" followed by 0x00 (RAR 1.5 to 4) or 0x01 0x00 (RAR 5).
const RAR_MAGIC: [u8; 6] = [0x52, 0x61, 0x72, 0x21, 0x1A, 0x07];

impl FromStr for ContainerFormat {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "zip" | "cbz" => Ok(ContainerFormat::Zip),
            "7z" | "cb7" | "sevenzip" => Ok(ContainerFormat::SevenZip),
            "rar" | "cbr" => Ok(ContainerFormat::Rar),
            _ => exn::bail!(ErrorKind::UnsupportedFormat(s.to_string())),
        }
    }
}

impl ContainerFormat {
    /// Detect the container from a file extension.
    #[must_use]
    pub fn from_path(path: impl AsRef<Path>) -> Option<Self> {
        path.as_ref().extension().and_then(|ext| ext.to_str()).and_then(|ext| match ext.to_lowercase().as_str() {
            "cbz" | "zip" => Some(ContainerFormat::Zip),
            "cb7" | "7z" => Some(ContainerFormat::SevenZip),
            "cbr" | "rar" => Some(ContainerFormat::Rar),
            _ => None,
        })
    }

    /// Detect the container from magic bytes.
    ///
    /// Returns `None` if no signature matches or if the input is too short.
    #[must_use]
    pub fn from_magic_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(&ZIP_LOCAL_MAGIC) || bytes.starts_with(&ZIP_EMPTY_MAGIC) || bytes.starts_with(&ZIP_SPANNED_MAGIC) {
            return Some(ContainerFormat::Zip);
        }
        if bytes.starts_with(&SEVENZ_MAGIC) {
            return Some(ContainerFormat::SevenZip);
        }
        match bytes.strip_prefix(&RAR_MAGIC) {
            Some([0x00, ..] | [0x01, 0x00, ..]) => Some(ContainerFormat::Rar),
            _ => None,
        }
    }

    /// Select a container for a byte source.
    ///
    /// The signature in `head` (the first [`DETECT_WINDOW`] bytes of the
    /// source) wins; the extension of `name` is only consulted when the
    /// signature is inconclusive. Returns `None` when neither matches, which
    /// callers should treat as "cannot open this file" rather than a failure.
    #[must_use]
    pub fn detect(head: &[u8], name: impl AsRef<Path>) -> Option<Self> {
        let name = name.as_ref();
        if let Some(format) = Self::from_magic_bytes(head) {
            return Some(format);
        }
        let fallback = Self::from_path(name);
        if fallback.is_some() {
            tracing::debug!(path = %name.display(), "no container signature found; trusting file extension");
        }
        fallback
    }
}
