//! Configuration file support for the oxsafe CLI.
//!
//! Configuration is stored at `~/.config/oxsafe/config.toml` (XDG standard)
//! or `~/Library/Application Support/com.oxidized.oxsafe/config.toml` on macOS.
//! `OXSAFE_CONFIG_DIR` overrides the directory.
//!
//! # Example configuration
//!
//! ```toml
//! [engine]
//! hash_iterations = 100000
//! lock_backend = "marker"
//! truncate_oversized_reads = false
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use oxsafe_core::EngineConfig;

/// Main configuration structure
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    /// Engine settings passed to the core library
    #[serde(default)]
    pub engine: EngineConfig,
}

impl Config {
    /// Load configuration from the default path, or return defaults if not found.
    pub fn load() -> Result<Self> {
        let path = config_path()?;

        if !path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config
            .engine
            .validate()
            .with_context(|| format!("Invalid [engine] settings in {}", path.display()))?;

        Ok(config)
    }
}

/// Get the path to the configuration file.
///
/// Uses XDG config directory on Linux, Application Support on macOS.
pub fn config_path() -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os("OXSAFE_CONFIG_DIR") {
        return Ok(PathBuf::from(dir).join("config.toml"));
    }

    let base_dirs = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("Could not determine home directory"))?;

    #[cfg(target_os = "macos")]
    {
        let config_dir = base_dirs
            .home_dir()
            .join("Library/Application Support/com.oxidized.oxsafe");
        Ok(config_dir.join("config.toml"))
    }

    #[cfg(not(target_os = "macos"))]
    {
        let config_dir = base_dirs.config_dir().join("oxsafe");
        Ok(config_dir.join("config.toml"))
    }
}
