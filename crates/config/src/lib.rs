//! Configuration loading and validation.
//!
//! Sources are merged in increasing order of precedence:
//!
//! 1. Built-in defaults ([`Settings::default`]).
//! 2. `config.toml` in the platform configuration directory, if present.
//! 3. An explicit file passed by the caller (TOML, or JSON by extension).
//! 4. Environment variables prefixed with `MODVAULT_`, with `__` separating
//!    nested keys (e.g. `MODVAULT_SYNC__CONCURRENCY=8`).

pub mod error;
mod settings;

pub use crate::settings::{
    CacheSettings, DEFAULT_APP_ID, DownloadSettings, ScriptSettings, Settings, SyncSettings,
};
use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml};
use std::path::{Path, PathBuf};

pub const ENV_PREFIX: &str = "MODVAULT_";

/// Location of the platform-specific configuration file, whether or not it
/// exists.
pub fn default_config_file() -> Option<PathBuf> {
    ProjectDirs::from("", "", "modvault").map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Build the layered provider without extracting it.
pub fn figment(explicit: Option<&Path>) -> Figment {
    layered(default_config_file().as_deref(), explicit)
}

fn layered(platform: Option<&Path>, explicit: Option<&Path>) -> Figment {
    let mut figment = Figment::from(Serialized::defaults(Settings::default()));
    if let Some(path) = platform {
        figment = figment.merge(Toml::file(path));
    }
    if let Some(path) = explicit {
        figment = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => figment.merge(Json::file(path)),
            _ => figment.merge(Toml::file(path)),
        };
    }
    figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
}

/// Load and validate settings from every source.
pub fn load(explicit: Option<&Path>) -> Result<Settings> {
    if let Some(path) = explicit
        && !path.is_file()
    {
        tracing::warn!(path = %path.display(), "Configuration file does not exist; ignoring");
    }
    extract(figment(explicit))
}

fn extract(figment: Figment) -> Result<Settings> {
    let settings: Settings = figment.extract().or_raise(|| ErrorKind::Load)?;
    settings.validate()?;
    tracing::debug!(mods_root = %settings.mods_root.display(), app_id = settings.app_id, "Loaded configuration");
    Ok(settings)
}
