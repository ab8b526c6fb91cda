//! User-facing errors, rendered by `miette`.

use derive_more::{Display, Error};
use folio_engine::error::{Error as EngineError, ErrorKind as EngineErrorKind};
use miette::Diagnostic;
use std::ops::Deref;
use std::path::PathBuf;

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Diagnostic, Clone)]
pub enum ErrorKind {
    #[display("could not load configuration")]
    #[diagnostic(code(folio::config), help("check folio.toml and the FOLIO_* environment variables"))]
    Config,
    #[display("could not open the library at {}", _0.display())]
    #[diagnostic(code(folio::library), help("library.root must be a directory"))]
    Library(#[error(not(source))] PathBuf),
    #[display("{} is outside the library root", _0.display())]
    #[diagnostic(code(folio::locator), help("pass archive paths relative to the library root"))]
    Locator(#[error(not(source))] PathBuf),
    #[display("could not use the reading progress database")]
    #[diagnostic(code(folio::progress))]
    Progress,
    #[display("unsupported format")]
    #[diagnostic(code(folio::unsupported), help("only zip (.cbz), 7-Zip (.cb7) and RAR (.cbr) comic archives can be read"))]
    Unsupported,
    #[display("corrupt file")]
    #[diagnostic(code(folio::corrupt), help("the archive is missing, damaged, or contains no images"))]
    Corrupt,
    #[display("storage unavailable")]
    #[diagnostic(code(folio::storage), help("check that the library location is still reachable"))]
    StorageUnavailable,
    #[display("page {_0} could not be shown")]
    #[diagnostic(code(folio::page), help("pass --placeholder to write the broken-page placeholder instead"))]
    Page(#[error(not(source))] usize),
    #[display("page {index} does not exist, the archive has {count} pages")]
    #[diagnostic(code(folio::page))]
    NoSuchPage { index: usize, count: usize },
    #[display("could not write {}", _0.display())]
    #[diagnostic(code(folio::output))]
    Output(#[error(not(source))] PathBuf),
}

/// Translate an engine error into what the reader should be told, keeping
/// the engine's error tree underneath.
#[track_caller]
pub fn engine(err: EngineError) -> Error {
    let kind = match err.deref() {
        EngineErrorKind::DetectionFailed => ErrorKind::Unsupported,
        EngineErrorKind::OpenFailed | EngineErrorKind::SessionClosed => ErrorKind::Corrupt,
        EngineErrorKind::StorageUnavailable | EngineErrorKind::SessionFailed => ErrorKind::StorageUnavailable,
        EngineErrorKind::EntryReadFailed(index) | EngineErrorKind::DecodeFailed(index) => ErrorKind::Page(index + 1),
        EngineErrorKind::PageOutOfRange { index, count } => ErrorKind::NoSuchPage { index: index + 1, count: *count },
        EngineErrorKind::Progress => ErrorKind::Progress,
    };
    err.raise(kind)
}
