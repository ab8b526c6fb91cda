use crate::container::ReadSeek;
use crate::entry::collect_pages;
use crate::error::{ErrorKind, Result};
use crate::{EntryLocator, PageEntry};
use sevenz_rust2::{ArchiveReader, Password};
use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::instrument;

/// Pages kept decoded ahead of the last solid read.
pub const SOLID_LOOKAHEAD: usize = 4;

/// Reader over a 7z (CB7) archive.
///
/// Solid archives compress many members as one stream, so reaching page `n`
/// means decompressing everything before it. Each solid read therefore walks
/// the block from the start and keeps the next [`SOLID_LOOKAHEAD`] pages in
/// reading order, which makes the common forward page turn free.
pub struct SevenZipReader {
    archive: ArchiveReader<Watched>,
    entries: Vec<PageEntry>,
    io_failed: Arc<AtomicBool>,
    lookahead: VecDeque<(EntryLocator, Vec<u8>)>,
}

impl SevenZipReader {
    #[instrument(skip(source))]
    pub fn new(source: Box<dyn ReadSeek>) -> Result<Self> {
        let io_failed = Arc::new(AtomicBool::new(false));
        let watched = Watched { inner: source, failed: Arc::clone(&io_failed) };
        let archive = match ArchiveReader::new(watched, Password::empty()) {
            Ok(archive) => archive,
            Err(_) if io_failed.swap(false, Ordering::Relaxed) => exn::bail!(ErrorKind::Io),
            Err(err) => {
                tracing::debug!(error = %err, "failed to parse 7z header");
                exn::bail!(ErrorKind::InvalidArchive);
            },
        };
        let members = archive.archive().files.iter().enumerate().filter(|(_, file)| !file.is_directory()).map(
            |(index, file)| PageEntry { name: file.name().to_string(), size: file.size, locator: EntryLocator(index) },
        );
        let entries = collect_pages(members);
        tracing::debug!(solid = archive.archive().is_solid, pages = entries.len(), "listed 7z archive");
        Ok(Self { archive, entries, io_failed, lookahead: VecDeque::with_capacity(SOLID_LOOKAHEAD) })
    }

    pub fn entries(&self) -> &[PageEntry] {
        &self.entries
    }

    pub fn is_solid(&self) -> bool {
        self.archive.archive().is_solid
    }

    #[instrument(skip(self), fields(solid = self.is_solid()))]
    pub fn read_entry(&mut self, locator: EntryLocator) -> Result<Vec<u8>> {
        let EntryLocator(index) = locator;
        let Some(file) = self.archive.archive().files.get(index) else {
            exn::bail!(ErrorKind::EntryNotFound(index));
        };
        let name = file.name().to_string();
        if let Some(position) = self.lookahead.iter().position(|(buffered, _)| *buffered == locator) {
            tracing::trace!(%name, "served from solid lookahead");
            if let Some((_, data)) = self.lookahead.remove(position) {
                return Ok(data);
            }
        }
        if self.is_solid() {
            return self.read_solid(locator, name);
        }
        match self.archive.read_file(&name) {
            Ok(data) => Ok(data),
            Err(err) => exn::bail!(self.classify(&name, &err)),
        }
    }

    fn read_solid(&mut self, locator: EntryLocator, name: String) -> Result<Vec<u8>> {
        // Reading order, not storage order, decides what is worth keeping.
        let start = self.entries.iter().position(|entry| entry.locator == locator).unwrap_or(self.entries.len());
        let mut wanted: HashMap<String, EntryLocator> = self
            .entries
            .iter()
            .skip(start)
            .take(SOLID_LOOKAHEAD + 1)
            .map(|entry| (entry.name.clone(), entry.locator))
            .collect();
        wanted.insert(name.clone(), locator);

        let mut decoded: HashMap<EntryLocator, Option<Vec<u8>>> = HashMap::with_capacity(wanted.len());
        let walk = self.archive.for_each_entries(|entry, reader| {
            if decoded.len() == wanted.len() {
                return Ok(false);
            }
            match wanted.get(entry.name()) {
                Some(found) if !decoded.contains_key(found) => {
                    let mut data = Vec::with_capacity(usize::try_from(entry.size).unwrap_or(0));
                    // A bad checksum only spoils this member; the stream
                    // position is still correct for the next one.
                    let outcome = reader.read_to_end(&mut data).ok().map(|_| data);
                    decoded.insert(*found, outcome);
                },
                _ => {
                    let _ = io::copy(reader, &mut io::sink());
                },
            }
            Ok(decoded.len() < wanted.len())
        });
        if let Err(err) = walk {
            exn::bail!(self.classify(&name, &err));
        }
        if self.io_failed.swap(false, Ordering::Relaxed) {
            exn::bail!(ErrorKind::Io);
        }

        let target = decoded.remove(&locator).flatten();
        self.lookahead.clear();
        for entry in self.entries.iter().skip(start + 1).take(SOLID_LOOKAHEAD) {
            if let Some(Some(data)) = decoded.remove(&entry.locator) {
                self.lookahead.push_back((entry.locator, data));
            }
        }
        match target {
            Some(data) => Ok(data),
            None => exn::bail!(ErrorKind::CorruptEntry(name)),
        }
    }

    fn classify(&self, name: &str, err: &sevenz_rust2::Error) -> ErrorKind {
        if self.io_failed.swap(false, Ordering::Relaxed) {
            return ErrorKind::Io;
        }
        tracing::debug!(%name, error = %err, "7z member failed to decompress");
        ErrorKind::CorruptEntry(name.to_string())
    }
}

/// Remembers whether the underlying source failed, so a vanished file can be
/// told apart from a corrupt member.
struct Watched {
    inner: Box<dyn ReadSeek>,
    failed: Arc<AtomicBool>,
}

impl Read for Watched {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf).inspect_err(|_| self.failed.store(true, Ordering::Relaxed))
    }
}

impl Seek for Watched {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner.seek(pos).inspect_err(|_| self.failed.store(true, Ordering::Relaxed))
    }
}
