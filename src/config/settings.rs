//! Configuration file support for the channels CLI

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::applyset::{ApplySetOptions, DEFAULT_FIELD_MANAGER, DEFAULT_LEGACY_MANAGERS};

/// Main configuration structure
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct Settings {
    #[serde(default)]
    pub apply: ApplySettings,

    #[serde(default)]
    pub channels: ChannelSettings,
}

/// How manifests reach the cluster
#[derive(Debug, Deserialize, Serialize, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ApplyStrategy {
    /// Server-side apply through the API, with field-manager migration
    #[default]
    ServerSide,
    /// `kubectl apply --server-side`
    Kubectl,
}

/// Apply settings
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ApplySettings {
    /// Field manager that owns every applied field. Part of the on-cluster
    /// contract: changing it orphans existing ownership.
    #[serde(default = "default_field_manager")]
    pub field_manager: String,

    /// Client-side managers whose fields are handed over to `field_manager`
    #[serde(default = "default_legacy_managers")]
    pub legacy_managers: Vec<String>,

    #[serde(default)]
    pub strategy: ApplyStrategy,

    /// Forces re-apply of installed addons when bumped. 0 is never recorded.
    #[serde(default)]
    pub system_generation: u64,

    #[serde(default = "default_true")]
    pub force: bool,
}

/// Channel resolution settings
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ChannelSettings {
    /// Base URL for bare well-known channel names
    #[serde(default = "default_well_known_base")]
    pub well_known_base: String,
}

// Default value functions
fn default_field_manager() -> String {
    DEFAULT_FIELD_MANAGER.to_string()
}

fn default_legacy_managers() -> Vec<String> {
    DEFAULT_LEGACY_MANAGERS.iter().map(|m| m.to_string()).collect()
}

fn default_true() -> bool {
    true
}

fn default_well_known_base() -> String {
    "https://raw.githubusercontent.com/kubernetes/kops/master/addons/".to_string()
}

impl Default for ApplySettings {
    fn default() -> Self {
        Self {
            field_manager: default_field_manager(),
            legacy_managers: default_legacy_managers(),
            strategy: ApplyStrategy::default(),
            system_generation: 0,
            force: default_true(),
        }
    }
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            well_known_base: default_well_known_base(),
        }
    }
}

impl ApplySettings {
    pub fn apply_set_options(&self) -> ApplySetOptions {
        ApplySetOptions {
            field_manager: self.field_manager.clone(),
            force: self.force,
            legacy_managers: self.legacy_managers.clone(),
        }
    }
}

impl Settings {
    /// Load settings from file or return defaults
    pub fn load() -> Self {
        match Self::find_config_file() {
            Some(path) => Self::load_from_file(&path).unwrap_or_else(|err| {
                tracing::warn!(path = %path.display(), error = %format!("{:#}", err), "ignoring config file");
                Self::default()
            }),
            None => Self::default(),
        }
    }

    /// Load settings from a specific file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let settings: Settings = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(settings)
    }

    /// Find config file in standard locations
    /// Priority:
    /// 1. .channels.toml in current directory
    /// 2. ~/.config/channels/config.toml (XDG config directory)
    fn find_config_file() -> Option<PathBuf> {
        let local_config = PathBuf::from(".channels.toml");
        if local_config.exists() {
            return Some(local_config);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let xdg_config = config_dir.join("channels").join("config.toml");
            if xdg_config.exists() {
                return Some(xdg_config);
            }
        }

        None
    }

    /// Generate example config file content
    pub fn example_config() -> Result<String> {
        let header = "# channels configuration file\n\
                      # Place this file at ~/.config/channels/config.toml or .channels.toml in your project\n\n";
        let body = toml::to_string_pretty(&Settings::default()).context("Failed to serialize settings")?;
        Ok(format!("{}{}", header, body))
    }
}
