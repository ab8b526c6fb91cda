use crate::error::{ErrorKind, Result};
use crate::{ContainerFormat, EntryLocator, PageEntry, RarReader, SevenZipReader, ZipReader};
use std::io::{Read, Seek};

/// A seekable byte source an archive can be read from.
pub trait ReadSeek: Read + Seek + Send {}
impl<T: Read + Seek + Send> ReadSeek for T {}

/// An opened archive of one of the supported formats.
///
/// A closed set of variants: detection picks one, and every variant exposes
/// the same listing and read operations.
pub enum Container {
    Zip(ZipReader),
    SevenZip(SevenZipReader),
    Rar(RarReader),
}

impl Container {
    /// Open `source` as the given format and list its pages.
    ///
    /// Fails with [`ErrorKind::InvalidArchive`] when the structure cannot be
    /// parsed, and with [`ErrorKind::NoPages`] when nothing inside is an image.
    pub fn open(format: ContainerFormat, source: Box<dyn ReadSeek>) -> Result<Self> {
        let container = match format {
            ContainerFormat::Zip => Container::Zip(ZipReader::new(source)?),
            ContainerFormat::SevenZip => Container::SevenZip(SevenZipReader::new(source)?),
            ContainerFormat::Rar => Container::Rar(RarReader::new(source)?),
        };
        if container.entries().is_empty() {
            exn::bail!(ErrorKind::NoPages);
        }
        Ok(container)
    }

    pub fn format(&self) -> ContainerFormat {
        match self {
            Container::Zip(_) => ContainerFormat::Zip,
            Container::SevenZip(_) => ContainerFormat::SevenZip,
            Container::Rar(_) => ContainerFormat::Rar,
        }
    }

    /// Pages in reading order.
    pub fn entries(&self) -> &[PageEntry] {
        match self {
            Container::Zip(reader) => reader.entries(),
            Container::SevenZip(reader) => reader.entries(),
            Container::Rar(reader) => reader.entries(),
        }
    }

    /// Fully decompress one page.
    pub fn read_entry(&mut self, locator: EntryLocator) -> Result<Vec<u8>> {
        match self {
            Container::Zip(reader) => reader.read_entry(locator),
            Container::SevenZip(reader) => reader.read_entry(locator),
            Container::Rar(reader) => reader.read_entry(locator),
        }
    }

    /// Whether random reads may cost a decompression of earlier pages.
    pub fn is_sequential(&self) -> bool {
        match self {
            Container::Zip(_) => false,
            Container::SevenZip(reader) => reader.is_solid(),
            Container::Rar(_) => true,
        }
    }
}
