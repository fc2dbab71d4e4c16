//! Paths and user configuration.
//!
//! Helios keeps everything it owns under one per-user data directory: the
//! per-source cache partitions, the managed-state file, and the generated
//! cover directory. Where the *sources* live (Steam root, Epic manifests,
//! the external store's `apps.json`) comes from a JSON config file with
//! per-platform defaults, overridable per invocation by CLI flags.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::app::Source;

/// Layout of the Helios-owned data directory.
#[derive(Debug, Clone)]
pub struct HeliosPaths {
    pub data_dir: PathBuf,
}

impl HeliosPaths {
    pub fn new(data_dir: PathBuf) -> Self {
        HeliosPaths { data_dir }
    }

    /// Conventional per-user location (`<local data dir>/Helios`).
    pub fn default_user() -> Result<Self> {
        let base = dirs::data_local_dir()
            .context("could not determine the per-user data directory")?;
        Ok(HeliosPaths::new(base.join("Helios")))
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.data_dir.join("cache")
    }

    /// Cache partition file for one source.
    pub fn partition_file(&self, source: Source) -> PathBuf {
        self.cache_dir().join(format!("{}.json", source.tag()))
    }

    pub fn managed_file(&self) -> PathBuf {
        self.data_dir.join("managed.json")
    }

    pub fn covers_dir(&self) -> PathBuf {
        self.data_dir.join("covers")
    }

    /// Creates the directory tree. Failure here is fatal to the caller:
    /// nothing can be cached, managed, or generated without it.
    pub fn ensure(&self) -> Result<()> {
        for dir in [self.data_dir.clone(), self.cache_dir(), self.covers_dir()] {
            fs::create_dir_all(&dir)
                .context(format!("Failed to create data directory: {:?}", dir))?;
        }
        Ok(())
    }
}

/// User configuration. Absent fields fall back to per-platform defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub steam_root: Option<PathBuf>,
    pub epic_manifests_dir: Option<PathBuf>,
    pub epic_catalog_cache: Option<PathBuf>,
    /// The external store's `apps.json`. No sensible default exists; it must
    /// be configured before add/remove/status can talk to the store.
    pub apollo_apps_file: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            steam_root: default_steam_root(),
            epic_manifests_dir: default_epic_manifests(),
            epic_catalog_cache: default_epic_catalog(),
            apollo_apps_file: None,
            data_dir: None,
        }
    }
}

impl Config {
    pub fn config_path() -> Result<PathBuf> {
        let base = dirs::config_dir().context("could not determine the config directory")?;
        Ok(base.join("helios").join("config.json"))
    }

    /// Loads the config file, falling back to defaults when it does not
    /// exist. A present-but-unreadable file is an error rather than a silent
    /// reset.
    pub fn load() -> Result<Config> {
        let path = Self::config_path()?;
        if !path.exists() {
            return Ok(Config::default());
        }
        let content = fs::read_to_string(&path)
            .context(format!("Failed to read config file: {:?}", path))?;
        let config: Config = serde_json::from_str(&content)
            .context(format!("Failed to parse config file: {:?}", path))?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .context(format!("Failed to create config directory: {:?}", parent))?;
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(&path, content).context(format!("Failed to write config file: {:?}", path))?;
        Ok(())
    }

    pub fn paths(&self) -> Result<HeliosPaths> {
        match &self.data_dir {
            Some(dir) => Ok(HeliosPaths::new(dir.clone())),
            None => HeliosPaths::default_user(),
        }
    }
}

fn default_steam_root() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        Some(PathBuf::from(r"C:\Program Files (x86)\Steam"))
    }

    #[cfg(target_os = "macos")]
    {
        dirs::home_dir().map(|home| home.join("Library/Application Support/Steam"))
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        let home = dirs::home_dir()?;
        let candidates = [home.join(".steam/steam"), home.join(".local/share/Steam")];
        candidates
            .iter()
            .find(|p| p.exists())
            .cloned()
            .or_else(|| Some(candidates[0].clone()))
    }
}

fn default_epic_manifests() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        Some(PathBuf::from(
            r"C:\ProgramData\Epic\EpicGamesLauncher\Data\Manifests",
        ))
    }

    #[cfg(not(target_os = "windows"))]
    {
        None
    }
}

fn default_epic_catalog() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        Some(PathBuf::from(
            r"C:\ProgramData\Epic\EpicGamesLauncher\Data\Catalog\catcache.bin",
        ))
    }

    #[cfg(not(target_os = "windows"))]
    {
        None
    }
}
