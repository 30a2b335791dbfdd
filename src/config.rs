//! Configuration management.
//!
//! Settings are layered with figment, lowest priority first:
//!
//! 1. Built-in defaults
//! 2. A TOML file (`--config`, or `config.toml` in the platform config dir)
//! 3. `THUMBSTORE_*` environment variables, nested with `__`
//!    (e.g. `THUMBSTORE_STORE__NAMESPACE=MyApp`)
//!
//! # Example
//!
//! ```toml
//! [store]
//! cache_dir = "Cache"
//! namespace = "AssetBrowser"
//! file_name = "gallery_thumbnails.bin"
//! sync_writes = false
//!
//! [keys]
//! package_extensions = [".var"]
//! package_roots = ["AddonPackages", "AllPackages"]
//!
//! [pool]
//! max_retained = 32
//! ```

use anyhow::{Context, Result};
use directories::ProjectDirs;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::cache::database::StoreOptions;
use crate::cache::{KeyRules, PoolConfig};

/// Prefix of environment variable overrides.
pub const ENV_PREFIX: &str = "THUMBSTORE_";

/// Where the store file lives and how it is written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// Cache directory, relative to the application's working directory.
    pub cache_dir: PathBuf,
    /// Per-application subdirectory of the cache directory.
    pub namespace: String,
    /// Store file name.
    pub file_name: String,
    /// `fsync` after every append instead of only flushing.
    pub sync_writes: bool,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("Cache"),
            namespace: "AssetBrowser".to_string(),
            file_name: "gallery_thumbnails.bin".to_string(),
            sync_writes: false,
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Store file location and write policy.
    pub store: StoreSettings,
    /// Cache key rules.
    pub keys: KeyRules,
    /// Payload buffer pool limits.
    pub pool: PoolConfig,
}

impl Config {
    /// Load the layered configuration, falling back to defaults on error.
    pub fn load(path: Option<&Path>) -> Self {
        match Self::try_load(path) {
            Ok(config) => config,
            Err(e) => {
                log::debug!("Failed to load config, using defaults: {:#}", e);
                Self::default()
            }
        }
    }

    /// Load the layered configuration.
    ///
    /// An explicit `path` must exist; the default path is optional.
    pub fn try_load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            if !path.exists() {
                anyhow::bail!("Config file not found: {}", path.display());
            }
        }
        Self::figment(path)
            .extract()
            .context("Failed to parse configuration")
    }

    /// The figment used by [`Config::try_load`].
    #[must_use]
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(file) = path.map(Path::to_path_buf).or_else(Self::default_config_path) {
            figment = figment.merge(Toml::file(file));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Save the configuration as TOML.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;
        Ok(())
    }

    /// The platform-specific configuration file path.
    #[must_use]
    pub fn default_config_path() -> Option<PathBuf> {
        ProjectDirs::from("com", "thumbstore", "thumbstore")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Store file path under the application directory `base`.
    #[must_use]
    pub fn store_path(&self, base: &Path) -> PathBuf {
        base.join(&self.store.cache_dir)
            .join(&self.store.namespace)
            .join(&self.store.file_name)
    }

    /// Options for opening a [`ThumbnailStore`](crate::cache::ThumbnailStore).
    #[must_use]
    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            keys: self.keys.clone(),
            pool: self.pool,
            sync_writes: self.store.sync_writes,
        }
    }
}
