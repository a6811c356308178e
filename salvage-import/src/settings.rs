//! Persistent settings, read from `~/.config/salvage/settings.toml`.

use std::path::{Path, PathBuf};

use salvage_core::LegacyHosts;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Settings {
    #[serde(default)]
    pub hosts: HostSettings,
    #[serde(default)]
    pub import: ImportSettings,
    #[serde(default)]
    pub fixup: FixupSettings,
}

/// Hostnames the legacy site served content and media from.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct HostSettings {
    #[serde(default)]
    pub link: Vec<String>,
    #[serde(default)]
    pub media: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImportSettings {
    #[serde(default)]
    pub resilient: bool,
    #[serde(default = "default_page_size")]
    pub page_size: u64,
    #[serde(default = "default_checkpoint_ttl_hours")]
    pub checkpoint_ttl_hours: i64,
}

fn default_page_size() -> u64 {
    500
}

fn default_checkpoint_ttl_hours() -> i64 {
    24
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self {
            resilient: false,
            page_size: default_page_size(),
            checkpoint_ttl_hours: default_checkpoint_ttl_hours(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FixupSettings {
    /// Parent lookups cached before the fixup finder's cache is cleared.
    #[serde(default = "default_cache_limit")]
    pub cache_limit: usize,
}

fn default_cache_limit() -> usize {
    250
}

impl Default for FixupSettings {
    fn default() -> Self {
        Self {
            cache_limit: default_cache_limit(),
        }
    }
}

impl Settings {
    /// The legacy hosts URL lookups bind to.
    pub fn legacy_hosts(&self) -> LegacyHosts {
        LegacyHosts::new(&self.hosts.link, &self.hosts.media)
    }

    pub fn checkpoint_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.import.checkpoint_ttl_hours.max(1))
    }
}

/// Returns `~/.config/salvage/settings.toml`.
pub fn settings_path() -> PathBuf {
    let config = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    config.join("salvage").join("settings.toml")
}

/// Load settings from the default location.
pub fn load_settings() -> Settings {
    load_settings_from(&settings_path())
}

/// Load settings from `path`, returning defaults if missing or corrupt.
pub fn load_settings_from(path: &Path) -> Settings {
    match std::fs::read_to_string(path) {
        Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
            log::warn!("Failed to parse settings at {}: {}", path.display(), e);
            Settings::default()
        }),
        Err(_) => Settings::default(),
    }
}

/// Save settings to the default location.
pub fn save_settings(settings: &Settings) -> std::io::Result<()> {
    save_settings_to(settings, &settings_path())
}

/// Save settings atomically (write to temp, then rename).
pub fn save_settings_to(settings: &Settings, path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let contents = toml::to_string_pretty(settings).map_err(std::io::Error::other)?;
    let tmp = path.with_extension("toml.tmp");
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
