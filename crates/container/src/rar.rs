use crate::container::ReadSeek;
use crate::entry::collect_pages;
use crate::error::{ErrorKind, Result};
use crate::sevenz::SOLID_LOOKAHEAD;
use crate::{EntryLocator, PageEntry};
use exn::ResultExt;
use std::collections::{HashMap, HashSet, VecDeque};
use std::io::{self, Seek, SeekFrom};
use tempfile::NamedTempFile;
use tracing::instrument;
use unrar::error::{Code, UnrarError};

/// Reader over a RAR (CBR) archive.
///
/// The RAR library only opens archives by path, so the byte source is spooled
/// into a temporary file that lives as long as the reader. Members can only be
/// reached by walking the headers from the start (and, for solid archives,
/// decompressing everything on the way), so every read also keeps the next
/// [`SOLID_LOOKAHEAD`] pages in reading order.
pub struct RarReader {
    spool: NamedTempFile,
    entries: Vec<PageEntry>,
    lookahead: VecDeque<(EntryLocator, Vec<u8>)>,
}

/// Outcome of one header walk: the members it decoded, and the error that
/// stopped it early, if any.
struct Walk {
    decoded: HashMap<EntryLocator, Vec<u8>>,
    failure: Option<UnrarError>,
}

impl RarReader {
    #[instrument(skip(source))]
    pub fn new(mut source: Box<dyn ReadSeek>) -> Result<Self> {
        let mut spool = tempfile::Builder::new().prefix("folio-").suffix(".rar").tempfile().or_raise(|| ErrorKind::Io)?;
        source.seek(SeekFrom::Start(0)).or_raise(|| ErrorKind::Io)?;
        let spooled = io::copy(&mut source, spool.as_file_mut()).or_raise(|| ErrorKind::Io)?;

        let listing = unrar::Archive::new(spool.path())
            .open_for_listing()
            .map_err(|err| exn::Exn::from(Self::classify(&err, ErrorKind::InvalidArchive)))?;
        let mut members = Vec::new();
        for (ordinal, header) in listing.enumerate() {
            let header = header.map_err(|err| exn::Exn::from(Self::classify(&err, ErrorKind::InvalidArchive)))?;
            if header.is_directory() {
                continue;
            }
            members.push(PageEntry {
                name: header.filename.to_string_lossy().replace('\\', "/"),
                size: header.unpacked_size,
                locator: EntryLocator(ordinal),
            });
        }
        let entries = collect_pages(members);
        tracing::debug!(bytes = spooled, pages = entries.len(), "listed RAR archive");
        Ok(Self { spool, entries, lookahead: VecDeque::with_capacity(SOLID_LOOKAHEAD) })
    }

    pub fn entries(&self) -> &[PageEntry] {
        &self.entries
    }

    #[instrument(skip(self))]
    pub fn read_entry(&mut self, locator: EntryLocator) -> Result<Vec<u8>> {
        let Some(start) = self.entries.iter().position(|entry| entry.locator == locator) else {
            exn::bail!(ErrorKind::EntryNotFound(locator.0));
        };
        let name = self.entries[start].name.clone();
        if let Some(position) = self.lookahead.iter().position(|(buffered, _)| *buffered == locator) {
            tracing::trace!(%name, "served from RAR lookahead");
            if let Some((_, data)) = self.lookahead.remove(position) {
                return Ok(data);
            }
        }

        let wanted: HashSet<EntryLocator> =
            self.entries.iter().skip(start).take(SOLID_LOOKAHEAD + 1).map(|entry| entry.locator).collect();
        let mut walk = self.walk(&wanted)?;
        if !walk.decoded.contains_key(&locator) && walk.failure.is_some() && wanted.len() > 1 {
            // A broken neighbour stored before the page stopped the walk;
            // try again for the page alone.
            walk = self.walk(&HashSet::from([locator]))?;
        }

        let target = walk.decoded.remove(&locator);
        self.lookahead.clear();
        for entry in self.entries.iter().skip(start + 1).take(SOLID_LOOKAHEAD) {
            if let Some(data) = walk.decoded.remove(&entry.locator) {
                self.lookahead.push_back((entry.locator, data));
            }
        }
        match (target, walk.failure) {
            (Some(data), _) => Ok(data),
            (None, Some(err)) => {
                tracing::debug!(%name, error = %err, "RAR member failed to extract");
                exn::bail!(Self::classify(&err, ErrorKind::CorruptEntry(name)))
            },
            (None, None) => exn::bail!(ErrorKind::CorruptEntry(name)),
        }
    }

    /// Walk the archive headers once, extracting the `wanted` members and
    /// skipping the rest. Stops when everything wanted has been read.
    fn walk(&self, wanted: &HashSet<EntryLocator>) -> Result<Walk> {
        let mut cursor = unrar::Archive::new(self.spool.path())
            .open_for_processing()
            .map_err(|err| exn::Exn::from(Self::classify(&err, ErrorKind::Io)))?;
        let mut decoded = HashMap::with_capacity(wanted.len());
        let mut failure = None;
        let mut ordinal = 0;
        while decoded.len() < wanted.len() {
            let header = match cursor.read_header() {
                Ok(Some(header)) => header,
                Ok(None) => break,
                Err(err) => {
                    failure = Some(err);
                    break;
                },
            };
            let here = EntryLocator(ordinal);
            ordinal += 1;
            let step = if wanted.contains(&here) {
                header.read().map(|(data, next)| {
                    decoded.insert(here, data);
                    next
                })
            } else {
                header.skip()
            };
            match step {
                Ok(next) => cursor = next,
                Err(err) => {
                    failure = Some(err);
                    break;
                },
            }
        }
        Ok(Walk { decoded, failure })
    }

    /// The spool is a local file we own, so open and read failures mean the
    /// temporary directory went away; everything else is the archive's fault.
    fn classify(err: &UnrarError, otherwise: ErrorKind) -> ErrorKind {
        match err.code {
            Code::EOpen | Code::ERead => ErrorKind::Io,
            _ => otherwise,
        }
    }
}
