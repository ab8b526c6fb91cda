use crate::cli::{Cli, Command, RecentCommand};
use crate::error::{self, ErrorKind, Result};
use exn::ResultExt;
use folio_config::Config;
use folio_engine::{ArchiveSession, DecodedPage, Engine, error::ErrorKind as EngineErrorKind};
use folio_progress::{Database, Repository};
use folio_storage::backend::LocalBackend;
use folio_storage::{BackendHandle, FileInfo, StorageBackend};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load(cli.config.as_deref()).or_raise(|| ErrorKind::Config)?;
    if let Some(root) = cli.root {
        config.library.root = root;
    }
    let root = std::path::absolute(&config.library.root).or_raise(|| ErrorKind::Library(config.library.root.clone()))?;
    tracing::debug!(root = %root.display(), database = %config.library.database.display(), "configuration loaded");

    match cli.command {
        Command::List { prefix } => {
            let backend = backend(&root)?;
            let prefix = prefix.map(|prefix| locator(&root, &prefix)).transpose()?;
            list(backend.as_ref(), prefix.as_deref()).await
        },
        Command::Pages { archive } => {
            let locator = locator(&root, &archive)?;
            let (engine, db) = engine(&config, &root).await?;
            let result = pages(&engine, &locator).await;
            db.close().await;
            result
        },
        Command::Page { archive, number, output, placeholder } => {
            let locator = locator(&root, &archive)?;
            let (engine, db) = engine(&config, &root).await?;
            let result = page(&engine, &locator, number as usize, &output, placeholder).await;
            engine.shutdown();
            db.close().await;
            result
        },
        Command::Thumbnail { archive, output } => {
            let locator = locator(&root, &archive)?;
            let (engine, db) = engine(&config, &root).await?;
            let thumbnail = engine.thumbnail(&locator).await.map_err(error::engine)?;
            db.close().await;
            write_png(&thumbnail, &output).await
        },
        Command::Recent { action } => {
            let db = Database::connect(&config.library.database).await.or_raise(|| ErrorKind::Progress)?;
            let repo = Repository::from(&db);
            let result = recent(&repo, &root, action).await;
            db.close().await;
            result
        },
    }
}

fn backend(root: &Path) -> Result<BackendHandle> {
    let backend = LocalBackend::new("library", root).or_raise(|| ErrorKind::Library(root.to_path_buf()))?;
    Ok(Arc::new(backend))
}

async fn engine(config: &Config, root: &Path) -> Result<(Engine, Database)> {
    let backend = backend(root)?;
    let db = Database::connect(&config.library.database).await.or_raise(|| ErrorKind::Progress)?;
    let store = Arc::new(Repository::from(&db));
    Ok((Engine::new(config.engine.clone(), backend, store), db))
}

/// Archive arguments may be given relative to the library root or as an
/// absolute path inside it.
fn locator(root: &Path, archive: &Path) -> Result<PathBuf> {
    if !archive.is_absolute() {
        return Ok(archive.to_path_buf());
    }
    match archive.strip_prefix(root) {
        Ok(relative) => Ok(relative.to_path_buf()),
        Err(_) => exn::bail!(ErrorKind::Locator(archive.to_path_buf())),
    }
}

async fn list(backend: &dyn StorageBackend, prefix: Option<&Path>) -> Result<()> {
    let mut archives = backend.list(prefix).await.or_raise(|| ErrorKind::StorageUnavailable)?;
    archives.retain(FileInfo::is_archive);
    archives.sort_by(|a, b| a.path.cmp(&b.path));
    for info in archives {
        println!("{:>12}  {}", info.size, info.path.display());
    }
    Ok(())
}

async fn pages(engine: &Engine, locator: &Path) -> Result<()> {
    let session = engine.open(locator).await.map_err(error::engine)?;
    println!(
        "{} ({}, {} pages, resuming at page {})",
        session.path().display(),
        session.format(),
        session.page_count(),
        session.current_index() + 1,
    );
    for (index, entry) in session.entries().iter().enumerate() {
        println!("{:>5}  {:>10}  {}", index + 1, entry.size, entry.name);
    }
    session.close().await.map_err(error::engine)
}

async fn page(engine: &Engine, locator: &Path, number: usize, output: &Path, placeholder: bool) -> Result<()> {
    let session = engine.open(locator).await.map_err(error::engine)?;
    let result = seek_and_read(&session, number - 1).await;
    session.close().await.map_err(error::engine)?;
    let page = match result {
        Ok(page) => page,
        Err(err) if placeholder && matches!(*err, EngineErrorKind::EntryReadFailed(_) | EngineErrorKind::DecodeFailed(_)) => {
            tracing::warn!(error = %err, page = number, "writing placeholder for unreadable page");
            Arc::new(DecodedPage::placeholder())
        },
        Err(err) => return Err(error::engine(err)),
    };
    write_png(&page, output).await
}

async fn seek_and_read(session: &ArchiveSession, index: usize) -> folio_engine::error::Result<Arc<DecodedPage>> {
    session.seek(index).await?;
    session.current_page().await
}

async fn write_png(page: &DecodedPage, output: &Path) -> Result<()> {
    let encoded = page.encode_png().or_raise(|| ErrorKind::Output(output.to_path_buf()))?;
    tokio::fs::write(output, encoded).await.or_raise(|| ErrorKind::Output(output.to_path_buf()))?;
    tracing::info!(path = %output.display(), width = page.width(), height = page.height(), "page written");
    Ok(())
}

async fn recent(repo: &Repository, root: &Path, action: RecentCommand) -> Result<()> {
    match action {
        RecentCommand::List { limit } => {
            for progress in repo.list_recent(limit).await.or_raise(|| ErrorKind::Progress)? {
                println!(
                    "{}  {:>4}/{:<4}  {}",
                    progress.updated_at.date(),
                    progress.page_index + 1,
                    progress.page_count,
                    progress.path.display(),
                );
            }
        },
        RecentCommand::Clear => {
            let removed = repo.clear().await.or_raise(|| ErrorKind::Progress)?;
            println!("forgot {removed} archives");
        },
        RecentCommand::Forget { archive } => {
            let locator = locator(root, &archive)?;
            let removed = repo.delete_by_path(&locator).await.or_raise(|| ErrorKind::Progress)?;
            if removed == 0 {
                tracing::warn!(path = %locator.display(), "no reading progress recorded");
            }
        },
    }
    Ok(())
}
