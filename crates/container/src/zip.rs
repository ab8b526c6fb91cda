use crate::container::ReadSeek;
use crate::entry::collect_pages;
use crate::error::{ErrorKind, Result};
use crate::{EntryLocator, PageEntry};
use exn::ResultExt;
use std::io::Read;
use tracing::instrument;
use ::zip::ZipArchive;
use ::zip::result::ZipError;

/// Random-access reader over a zip (CBZ) archive.
pub struct ZipReader {
    archive: ZipArchive<Box<dyn ReadSeek>>,
    entries: Vec<PageEntry>,
}

impl ZipReader {
    /// Parse the central directory and list image members.
    #[instrument(skip(source))]
    pub fn new(source: Box<dyn ReadSeek>) -> Result<Self> {
        let mut archive = ZipArchive::new(source).map_err(|err| match err {
            ZipError::Io(_) => ErrorKind::Io,
            _ => ErrorKind::InvalidArchive,
        })?;
        let mut members = Vec::with_capacity(archive.len());
        for index in 0..archive.len() {
            let file = archive.by_index_raw(index).or_raise(|| ErrorKind::InvalidArchive)?;
            if file.is_dir() {
                continue;
            }
            members.push(PageEntry { name: file.name().to_string(), size: file.size(), locator: EntryLocator(index) });
        }
        let entries = collect_pages(members);
        tracing::debug!(members = archive.len(), pages = entries.len(), "listed zip archive");
        Ok(Self { archive, entries })
    }

    pub fn entries(&self) -> &[PageEntry] {
        &self.entries
    }

    #[instrument(skip(self), fields(name))]
    pub fn read_entry(&mut self, locator: EntryLocator) -> Result<Vec<u8>> {
        let EntryLocator(index) = locator;
        if index >= self.archive.len() {
            exn::bail!(ErrorKind::EntryNotFound(index));
        }
        let mut file = match self.archive.by_index(index) {
            Ok(file) => file,
            Err(ZipError::Io(err)) => exn::bail!(ErrorKind::from_entry_io(&format!("#{index}"), &err)),
            Err(_) => exn::bail!(ErrorKind::CorruptEntry(format!("#{index}"))),
        };
        let name = file.name().to_string();
        tracing::Span::current().record("name", name.as_str());
        let mut data = Vec::with_capacity(usize::try_from(file.size()).unwrap_or(0));
        if let Err(err) = file.read_to_end(&mut data) {
            exn::bail!(ErrorKind::from_entry_io(&name, &err));
        }
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use std::io::Cursor;

    fn reader(members: &[(&str, &[u8])]) -> ZipReader {
        ZipReader::new(Box::new(Cursor::new(fixtures::zip(members)))).unwrap()
    }

    #[test]
    fn skips_directories_and_resource_forks() {
        let reader = reader(&[("pages/", b""), ("pages/01.jpg", b"a"), ("__MACOSX/pages/._01.jpg", b"junk")]);
        let names: Vec<&str> = reader.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["pages/01.jpg"]);
        assert_eq!(reader.entries()[0].size, 1);
    }

    #[test]
    fn read_unknown_locator() {
        let mut reader = reader(&[("01.jpg", b"a")]);
        let err = reader.read_entry(EntryLocator(7)).unwrap_err();
        assert_eq!(*err, ErrorKind::EntryNotFound(7));
    }

    #[test]
    fn corrupt_member_is_isolated() {
        let payload = b"the quick brown fox jumps over the lazy dog";
        let mut bytes = fixtures::zip(&[("01.jpg", b"first page"), ("02.jpg", payload), ("03.jpg", b"third page")]);
        let offset = memchr::memmem::find(&bytes, payload).unwrap();
        bytes[offset + 4] ^= 0xFF;

        let mut reader = ZipReader::new(Box::new(Cursor::new(bytes))).unwrap();
        let locators: Vec<EntryLocator> = reader.entries().iter().map(|e| e.locator).collect();
        assert_eq!(reader.read_entry(locators[0]).unwrap(), b"first page");
        let err = reader.read_entry(locators[1]).unwrap_err();
        assert!(matches!(&*err, ErrorKind::CorruptEntry(_)));
        assert_eq!(reader.read_entry(locators[2]).unwrap(), b"third page");
    }

    #[test]
    fn garbage_is_invalid_archive() {
        let mut bytes = b"PK\x03\x04".to_vec();
        bytes.resize(256, b' ');
        let err = ZipReader::new(Box::new(Cursor::new(bytes))).err().unwrap();
        assert_eq!(*err, ErrorKind::InvalidArchive);
    }
}
