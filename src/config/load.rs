//! Loading and layering configuration files

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

use super::merge::merge_layers;
use super::Config;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid TOML in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Validation(String),
}

/// Where a configuration layer came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigOrigin {
    Builtin,
    User,
    Explicit,
    Cli,
}

/// A contributing layer with provenance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSource {
    pub origin: ConfigOrigin,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// SHA-256 of the raw file bytes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

/// Effective configuration plus the layers that produced it
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: Config,
    pub sources: Vec<ConfigSource>,
}

impl LoadedConfig {
    /// Load using the user config location from the environment.
    pub fn load(
        explicit: Option<&Path>,
        cli_overrides: Option<toml::Table>,
    ) -> Result<Self, ConfigError> {
        let user = user_config_path();
        Self::load_from(user.as_deref(), explicit, cli_overrides)
    }

    /// Load from explicit locations.
    ///
    /// A missing user config is skipped; a missing explicit config is an
    /// error.
    pub fn load_from(
        user: Option<&Path>,
        explicit: Option<&Path>,
        cli_overrides: Option<toml::Table>,
    ) -> Result<Self, ConfigError> {
        let mut layers = Vec::new();
        let mut sources = Vec::new();

        let builtin = toml::Value::try_from(Config::default())
            .map_err(|e| ConfigError::Validation(format!("built-in defaults: {}", e)))?;
        layers.push(builtin);
        sources.push(ConfigSource {
            origin: ConfigOrigin::Builtin,
            path: None,
            digest: None,
        });

        if let Some(path) = user.filter(|p| p.exists()) {
            let (table, digest) = read_table(path)?;
            layers.push(toml::Value::Table(table));
            sources.push(ConfigSource {
                origin: ConfigOrigin::User,
                path: Some(path.to_path_buf()),
                digest: Some(digest),
            });
        }

        if let Some(path) = explicit {
            let (table, digest) = read_table(path)?;
            layers.push(toml::Value::Table(table));
            sources.push(ConfigSource {
                origin: ConfigOrigin::Explicit,
                path: Some(path.to_path_buf()),
                digest: Some(digest),
            });
        }

        if let Some(table) = cli_overrides.filter(|t| !t.is_empty()) {
            layers.push(toml::Value::Table(table));
            sources.push(ConfigSource {
                origin: ConfigOrigin::Cli,
                path: None,
                digest: None,
            });
        }

        let merged = merge_layers(layers);
        let config: Config = merged
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::Validation(e.to_string()))?;
        config.validate()?;

        debug!(layers = sources.len(), "configuration loaded");
        Ok(Self { config, sources })
    }
}

/// `$XDG_CONFIG_HOME/rpmtool/config.toml`, falling back to
/// `$HOME/.config/rpmtool/config.toml`.
pub fn user_config_path() -> Option<PathBuf> {
    let base = std::env::var_os("XDG_CONFIG_HOME")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))?;
    Some(base.join("rpmtool").join("config.toml"))
}

fn read_table(path: &Path) -> Result<(toml::Table, String), ConfigError> {
    let bytes = fs::read(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let digest = hex::encode(Sha256::digest(&bytes));

    let text = String::from_utf8(bytes).map_err(|e| {
        ConfigError::Validation(format!("{} is not UTF-8: {}", path.display(), e))
    })?;
    let table = text.parse::<toml::Table>().map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    Ok((table, digest))
}
