//! Layered configuration for folio.
//!
//! Sources, lowest priority first:
//!
//! 1. built-in defaults,
//! 2. `folio.toml`, `folio.yaml` or `folio.json` in the platform config
//!    directory,
//! 3. an explicitly requested file (`--config`),
//! 4. `FOLIO_` environment variables, with `__` separating nested keys
//!    (`FOLIO_ENGINE__MAX_CACHE_BYTES=67108864`).

pub mod error;
mod model;

pub use crate::model::{Config, EngineConfig, IdentityStrategy, LibraryConfig};
use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use std::path::Path;
use tracing::instrument;

pub const ENV_PREFIX: &str = "FOLIO_";
const FILE_STEM: &str = "folio";

pub(crate) fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "folio")
}

impl Config {
    /// Load from every source, using the platform config directory.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let dirs = project_dirs();
        Self::load_from(dirs.as_ref().map(ProjectDirs::config_dir), file)
    }

    /// Load with an explicit config directory instead of the platform one.
    #[instrument(level = "debug")]
    pub fn load_from(config_dir: Option<&Path>, file: Option<&Path>) -> Result<Self> {
        let config: Config = Self::figment(config_dir, file)?.extract().or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        Ok(config)
    }

    fn figment(config_dir: Option<&Path>, file: Option<&Path>) -> Result<Figment> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(dir) = config_dir {
            figment = figment
                .merge(Toml::file(dir.join(format!("{FILE_STEM}.toml"))))
                .merge(Yaml::file(dir.join(format!("{FILE_STEM}.yaml"))))
                .merge(Json::file(dir.join(format!("{FILE_STEM}.json"))));
        }
        if let Some(file) = file {
            if !file.is_file() {
                exn::bail!(ErrorKind::File(file.display().to_string()));
            }
            let extension = file.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase);
            figment = match extension.as_deref() {
                Some("toml") => figment.merge(Toml::file_exact(file)),
                Some("yaml" | "yml") => figment.merge(Yaml::file_exact(file)),
                Some("json") => figment.merge(Json::file_exact(file)),
                _ => exn::bail!(ErrorKind::File(file.display().to_string())),
            };
            tracing::debug!(file = %file.display(), "merged explicit configuration file");
        }
        Ok(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }
}
