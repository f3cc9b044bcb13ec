use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Top-level configuration, read from `config.toml` in the working directory.
/// Every section and key has a default, so a missing file is not an error.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub hub: HubConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_root")]
    pub data_root: PathBuf,
    #[serde(default = "default_journal_file")]
    pub journal_file: String,
    #[serde(default = "default_index_file")]
    pub index_file: String,
}

fn default_data_root() -> PathBuf {
    PathBuf::from("data")
}
fn default_journal_file() -> String {
    "audit.journal".to_string()
}
fn default_index_file() -> String {
    "audit_index.db".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_root: default_data_root(),
            journal_file: default_journal_file(),
            index_file: default_index_file(),
        }
    }
}

impl StorageConfig {
    pub fn journal_path(&self) -> PathBuf {
        self.data_root.join(&self.journal_file)
    }

    pub fn index_path(&self) -> PathBuf {
        self.data_root.join(&self.index_file)
    }

    /// Storage rooted at an arbitrary directory, used by tests and the
    /// `--data-root` override.
    pub fn at_root<P: AsRef<Path>>(root: P) -> Self {
        Self {
            data_root: root.as_ref().to_path_buf(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HubConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    8080
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

impl Config {
    /// Load `config.toml` if present, otherwise fall back to defaults.
    pub fn load() -> Result<Self> {
        let config_path = "config.toml";
        if !Path::new(config_path).exists() {
            return Ok(Self::default());
        }
        let config_content = fs::read_to_string(config_path)?;
        let config: Config = toml::from_str(&config_content)?;
        Ok(config)
    }
}
