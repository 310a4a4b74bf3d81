//! rpmtool configuration
//!
//! Configuration is merged from up to four layers (later wins):
//! 1. Built-in defaults
//! 2. User config (`$XDG_CONFIG_HOME/rpmtool/config.toml`)
//! 3. An explicit `--config` file
//! 4. CLI overrides

mod load;
mod merge;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub use load::{user_config_path, ConfigError, ConfigOrigin, ConfigSource, LoadedConfig};
pub use merge::{deep_merge, merge_layers};

/// Upper bound for `fetch.timeout_seconds`
pub const MAX_FETCH_TIMEOUT_SECONDS: u64 = 3600;

/// External tool locations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub rpm: String,
    pub rpmspec: String,
    pub rpmbuild: String,
    pub rpmsign: String,
    pub dnf: String,
    pub sudo: String,
    pub sq: String,
    pub gpg: String,
    pub gpgconf: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            rpm: "rpm".to_string(),
            rpmspec: "rpmspec".to_string(),
            rpmbuild: "rpmbuild".to_string(),
            rpmsign: "rpmsign".to_string(),
            dnf: "dnf".to_string(),
            sudo: "sudo".to_string(),
            sq: "sq".to_string(),
            gpg: "gpg".to_string(),
            gpgconf: "gpgconf".to_string(),
        }
    }
}

/// Remote source download settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Per-request timeout in seconds
    pub timeout_seconds: u64,
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 300,
            user_agent: concat!("rpmtool/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Signing settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SigningConfig {
    /// Parent directory for ephemeral keyring homes (system temp dir if unset)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyring_parent: Option<PathBuf>,
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}

/// Effective configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub tools: ToolsConfig,
    pub fetch: FetchConfig,
    pub signing: SigningConfig,
    pub log: LogConfig,
}

impl Config {
    /// Parent directory for ephemeral keyring homes
    pub fn keyring_parent(&self) -> PathBuf {
        self.signing
            .keyring_parent
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.fetch.timeout_seconds == 0 || self.fetch.timeout_seconds > MAX_FETCH_TIMEOUT_SECONDS
        {
            return Err(ConfigError::Validation(format!(
                "fetch.timeout_seconds must be in (0, {}]",
                MAX_FETCH_TIMEOUT_SECONDS
            )));
        }

        let tools = [
            ("tools.rpm", &self.tools.rpm),
            ("tools.rpmspec", &self.tools.rpmspec),
            ("tools.rpmbuild", &self.tools.rpmbuild),
            ("tools.rpmsign", &self.tools.rpmsign),
            ("tools.dnf", &self.tools.dnf),
            ("tools.sudo", &self.tools.sudo),
            ("tools.sq", &self.tools.sq),
            ("tools.gpg", &self.tools.gpg),
            ("tools.gpgconf", &self.tools.gpgconf),
        ];
        if let Some((key, _)) = tools.iter().find(|(_, value)| value.trim().is_empty()) {
            return Err(ConfigError::Validation(format!("{} must not be empty", key)));
        }

        match self.log.level.to_ascii_lowercase().as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => Ok(()),
            other => Err(ConfigError::Validation(format!(
                "log.level must be one of error, warn, info, debug, trace (got {:?})",
                other
            ))),
        }
    }
}
