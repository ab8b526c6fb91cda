use std::fmt::{Display, Formatter, Result as FmtResult};
use std::io::Read;
use std::path::Path;
use time::UtcDateTime;

/// Stable key for one logical archive.
///
/// Namespaces both cached pages and stored reading progress. Usually a
/// lowercase hex BLAKE3 digest, either of the archive's location and
/// metadata ([`from_metadata`](Self::from_metadata)) or of its bytes
/// ([`from_content`](Self::from_content)).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArchiveIdentity(String);

impl ArchiveIdentity {
    /// Wrap an externally supplied identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Identity from location, size and modification time.
    ///
    /// Replacing the file in place (new size or mtime) yields a new identity,
    /// so stale pages and progress from the old content are never reused.
    pub fn from_metadata(path: &Path, size: u64, modified: UtcDateTime) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(path.as_os_str().as_encoded_bytes());
        // Separator so ("a", 1..) and ("a\x01", ..) can never collide.
        hasher.update(&[0]);
        hasher.update(&size.to_le_bytes());
        hasher.update(&modified.unix_timestamp_nanos().to_le_bytes());
        Self(hasher.finalize().to_hex().to_string())
    }

    /// Identity from the archive bytes; survives renames and moves.
    pub fn from_content(bytes: &[u8]) -> Self {
        Self(blake3::hash(bytes).to_hex().to_string())
    }

    /// [`from_content`](Self::from_content), streaming the bytes from
    /// `reader` instead of holding them all in memory. Blocking.
    pub fn from_reader(reader: impl Read) -> std::io::Result<Self> {
        let mut hasher = blake3::Hasher::new();
        hasher.update_reader(reader)?;
        Ok(Self(hasher.finalize().to_hex().to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ArchiveIdentity {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ArchiveIdentity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<String> for ArchiveIdentity {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(seconds: i64) -> UtcDateTime {
        UtcDateTime::from_unix_timestamp(seconds).unwrap()
    }

    #[test]
    fn metadata_identity_is_stable() {
        let a = ArchiveIdentity::from_metadata(Path::new("x/issue.cbz"), 1024, at(1_700_000_000));
        let b = ArchiveIdentity::from_metadata(Path::new("x/issue.cbz"), 1024, at(1_700_000_000));
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn metadata_identity_changes_with_content_hints() {
        let base = ArchiveIdentity::from_metadata(Path::new("issue.cbz"), 1024, at(1_700_000_000));
        assert_ne!(base, ArchiveIdentity::from_metadata(Path::new("issue.cbz"), 1025, at(1_700_000_000)));
        assert_ne!(base, ArchiveIdentity::from_metadata(Path::new("issue.cbz"), 1024, at(1_700_000_001)));
        assert_ne!(base, ArchiveIdentity::from_metadata(Path::new("other.cbz"), 1024, at(1_700_000_000)));
    }

    #[test]
    fn content_identity_ignores_location() {
        assert_eq!(ArchiveIdentity::from_content(b"PK\x03\x04"), ArchiveIdentity::from_content(b"PK\x03\x04"));
        assert_ne!(ArchiveIdentity::from_content(b"PK\x03\x04"), ArchiveIdentity::from_content(b"PK\x05\x06"));
    }

    #[test]
    fn streamed_content_identity_matches() {
        let bytes: Vec<u8> = (0..200_000u32).map(|n| (n % 251) as u8).collect();
        let streamed = ArchiveIdentity::from_reader(std::io::Cursor::new(&bytes)).unwrap();
        assert_eq!(streamed, ArchiveIdentity::from_content(&bytes));
    }

    #[test]
    fn external_identity_round_trips() {
        let id = ArchiveIdentity::new("content://comics/42");
        assert_eq!(id.to_string(), "content://comics/42");
    }
}
