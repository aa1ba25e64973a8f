use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Workshop app id of the game whose mods are mirrored by default.
pub const DEFAULT_APP_ID: u32 = 322_330;

/// Everything modvault can be configured with.
///
/// Every field has a default, so an empty configuration is a valid one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Directory holding one sub-directory per artifact. Must be absolute.
    pub mods_root: PathBuf,
    /// App id used for catalog queries and depot lookups.
    pub app_id: u32,
    pub cache: CacheSettings,
    pub sync: SyncSettings,
    pub download: DownloadSettings,
    pub script: ScriptSettings,
    /// Maximum number of distinct strings kept in the intern pool.
    pub intern_capacity: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// How long a refreshed record is served without asking the remote
    /// catalog again.
    pub ttl_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Items refreshed at the same time during a bulk synchronization.
    pub concurrency: usize,
    /// Attempts per catalog page and per item download.
    pub attempts: u32,
    /// Page size requested when probing the catalog; the remote may answer
    /// with fewer items per page.
    pub page_probe_size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadSettings {
    /// Fixed part of the package download timeout.
    pub base_timeout_ms: u64,
    /// Additional timeout per KiB of declared package size.
    pub timeout_per_kib_ms: u64,
    /// Downloads larger than this are buffered in a temporary file.
    pub spool_threshold: u64,
    /// Download every file of a UGC artifact, not only the tracked ones.
    pub include_all_files: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptSettings {
    /// Locale exposed to info scripts.
    pub locale: String,
}

impl Default for Settings {
    fn default() -> Self {
        let mods_root = ProjectDirs::from("", "", "modvault")
            .map(|dirs| dirs.data_dir().join("mods"))
            .unwrap_or_else(|| std::env::temp_dir().join("modvault").join("mods"));
        Self {
            mods_root,
            app_id: DEFAULT_APP_ID,
            cache: CacheSettings::default(),
            sync: SyncSettings::default(),
            download: DownloadSettings::default(),
            script: ScriptSettings::default(),
            intern_capacity: 16 * 1024,
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self { ttl_secs: 60 }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self { concurrency: 5, attempts: 3, page_probe_size: 1000 }
    }
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            base_timeout_ms: 10_000,
            // ~200 KiB/s.
            timeout_per_kib_ms: 5,
            spool_threshold: 8 * 1024 * 1024,
            include_all_files: false,
        }
    }
}

impl Default for ScriptSettings {
    fn default() -> Self {
        Self { locale: "en".to_string() }
    }
}

impl Settings {
    /// Reject values that would make modvault misbehave rather than fail.
    pub fn validate(&self) -> Result<()> {
        let invalid = |field, reason| ErrorKind::Invalid { field, reason };
        if !self.mods_root.is_absolute() {
            exn::bail!(invalid("mods_root", "must be an absolute path"));
        }
        if self.sync.concurrency == 0 {
            exn::bail!(invalid("sync.concurrency", "must be at least 1"));
        }
        if self.sync.attempts == 0 {
            exn::bail!(invalid("sync.attempts", "must be at least 1"));
        }
        if self.sync.page_probe_size == 0 {
            exn::bail!(invalid("sync.page_probe_size", "must be at least 1"));
        }
        if self.script.locale.trim().is_empty() {
            exn::bail!(invalid("script.locale", "must not be blank"));
        }
        Ok(())
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_secs)
    }
}

impl DownloadSettings {
    /// Timeout for downloading a package of `declared_size` bytes.
    pub fn package_timeout(&self, declared_size: u64) -> Duration {
        let per_kib = (declared_size / 1024).saturating_mul(self.timeout_per_kib_ms);
        Duration::from_millis(self.base_timeout_ms.saturating_add(per_kib))
    }
}
