//! Configuration for the `mudstore` CLI.
//!
//! The library itself takes its wiring through [`crate::WorldStoreBuilder`];
//! this TOML config exists for the operator binary, which needs a stable
//! place to find the data directory and a default log level.
//!
//! ```toml
//! [storage]
//! data_dir = "data/world"
//!
//! [logging]
//! level = "info"
//! ```

use std::path::Path;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the sled database.
    pub data_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// One of "error", "warn", "info", "debug", "trace".
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageConfig {
                data_dir: "data/world".to_string(),
            },
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load and validate a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: Config = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Write a starter config, refusing to clobber an existing one.
    pub fn create_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            return Err(anyhow!("config file {} already exists", path.display()));
        }
        let config = Config::default();
        std::fs::write(path, toml::to_string_pretty(&config)?)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.storage.data_dir.trim().is_empty() {
            return Err(anyhow!("storage.data_dir must not be empty"));
        }
        match self.logging.level.as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => Ok(()),
            other => Err(anyhow!("unknown logging.level {:?}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_round_trips() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("mudstore.toml");
        let written = Config::create_default(&path).expect("create");
        let loaded = Config::load(&path).expect("load");
        assert_eq!(loaded.storage.data_dir, written.storage.data_dir);
        assert_eq!(loaded.logging.level, "info");
    }

    #[test]
    fn create_default_refuses_to_clobber() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("mudstore.toml");
        Config::create_default(&path).expect("create");
        assert!(Config::create_default(&path).is_err());
    }

    #[test]
    fn bad_level_is_rejected() {
        let config: Config = toml::from_str(
            "[storage]\ndata_dir = \"data\"\n[logging]\nlevel = \"loud\"\n",
        )
        .expect("parse");
        assert!(config.validate().is_err());
    }
}
