//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/appmirror/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/appmirror/` (~/.config/appmirror/)
//! - Data: `$XDG_DATA_HOME/appmirror/` (~/.local/share/appmirror/)
//! - State/Logs: `$XDG_STATE_HOME/appmirror/` (~/.local/state/appmirror/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Local tree location
    #[serde(default)]
    pub store: StoreConfig,

    /// Remote gateway behaviour
    #[serde(default)]
    pub remote: RemoteConfig,

    /// Knowledge document reconstruction
    #[serde(default)]
    pub knowledge: KnowledgeConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where the mirrored tree lives
#[derive(Debug, Deserialize, Default, Clone)]
pub struct StoreConfig {
    /// Tree root; defaults to `$XDG_DATA_HOME/appmirror/tree`
    pub root: Option<PathBuf>,

    /// Key used to encrypt account secrets; defaults to `$XDG_DATA_HOME/appmirror/secret.key`
    pub key_path: Option<PathBuf>,
}

/// HTTP settings for talking to a platform
#[derive(Debug, Deserialize, Clone)]
pub struct RemoteConfig {
    /// HTTP request timeout in seconds
    #[serde(default = "default_remote_timeout")]
    pub timeout_secs: u64,

    /// Max retry attempts for transient failures
    #[serde(default = "default_remote_max_retries")]
    pub max_retries: usize,

    /// Page size for listing endpoints
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_remote_timeout(),
            max_retries: default_remote_max_retries(),
            page_size: default_page_size(),
        }
    }
}

fn default_remote_timeout() -> u64 {
    30
}

fn default_remote_max_retries() -> usize {
    3
}

fn default_page_size() -> usize {
    100
}

/// Segment stitching parameters
#[derive(Debug, Deserialize, Clone)]
pub struct KnowledgeConfig {
    /// Overlap the remote uses between adjacent segments, in characters.
    /// The stitcher searches a tail window of twice this size.
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            overlap_chars: default_overlap_chars(),
        }
    }
}

fn default_overlap_chars() -> usize {
    50
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values the reconcilers cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.remote.page_size == 0 {
            return Err(Error::Config(
                "remote.page_size must be greater than 0".to_string(),
            ));
        }
        if self.knowledge.overlap_chars == 0 {
            return Err(Error::Config(
                "knowledge.overlap_chars must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/appmirror/config.toml` (~/.config/appmirror/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("appmirror").join("config.toml")
    }

    /// Returns the data directory path
    ///
    /// `$XDG_DATA_HOME/appmirror/` (~/.local/share/appmirror/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("appmirror")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/appmirror/` (~/.local/state/appmirror/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("appmirror")
    }

    /// Root of the mirrored tree
    pub fn store_root(&self) -> PathBuf {
        self.store
            .root
            .clone()
            .unwrap_or_else(|| Self::data_dir().join("tree"))
    }

    /// Location of the secret encryption key (kept outside the tree)
    pub fn key_path(&self) -> PathBuf {
        self.store
            .key_path
            .clone()
            .unwrap_or_else(|| Self::data_dir().join("secret.key"))
    }

    /// Ensure XDG base directory environment variables are set.
    pub fn ensure_xdg_env() {
        let home = home_dir();

        if std::env::var("XDG_DATA_HOME").is_err() {
            std::env::set_var("XDG_DATA_HOME", home.join(".local/share"));
        }

        if std::env::var("XDG_STATE_HOME").is_err() {
            std::env::set_var("XDG_STATE_HOME", home.join(".local/state"));
        }

        if std::env::var("XDG_CONFIG_HOME").is_err() {
            std::env::set_var("XDG_CONFIG_HOME", home.join(".config"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.store.root.is_none());
        assert_eq!(config.remote.timeout_secs, 30);
        assert_eq!(config.remote.max_retries, 3);
        assert_eq!(config.remote.page_size, 100);
        assert_eq!(config.knowledge.overlap_chars, 50);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[store]
root = "/tmp/mirror"

[remote]
timeout_secs = 10
page_size = 50

[knowledge]
overlap_chars = 20

[logging]
level = "debug"
"#;
        let config: Config = toml::from_str(toml).unwrap();

        assert_eq!(config.store_root(), PathBuf::from("/tmp/mirror"));
        assert_eq!(config.remote.timeout_secs, 10);
        assert_eq!(config.remote.max_retries, 3);
        assert_eq!(config.remote.page_size, 50);
        assert_eq!(config.knowledge.overlap_chars, 20);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_validation_rejects_zero_page_size() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.remote.page_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[knowledge]\noverlap_chars = 0\n").unwrap();
        assert!(matches!(Config::load_from(&path), Err(Error::Config(_))));

        std::fs::write(&path, "[knowledge]\noverlap_chars = 64\n").unwrap();
        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.knowledge.overlap_chars, 64);
    }
}
