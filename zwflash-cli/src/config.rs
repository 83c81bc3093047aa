//! Configuration file support for zwflash.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (ZWFLASH_*)
//! 3. Local config file (./zwflash.toml)
//! 4. Global config file (~/.config/zwflash/config.toml)

use directories::ProjectDirs;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use zwflash::UpdateConfig;

/// Local configuration file name.
pub const LOCAL_CONFIG_FILE: &str = "zwflash.toml";

/// Serial port used when nothing else names one.
#[cfg(windows)]
pub const DEFAULT_PORT: &str = "COM3";

/// Serial port used when nothing else names one.
#[cfg(not(windows))]
pub const DEFAULT_PORT: &str = "/dev/ttyAMA0";

/// Serial port configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortConfig {
    /// Preferred serial port (e.g., "/dev/ttyACM0" or "COM3").
    pub serial: Option<String>,
    /// Baud rate.
    pub baud: Option<u32>,
}

/// Update pacing configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateSection {
    /// Pause between block writes in milliseconds.
    pub block_delay_ms: Option<u64>,
    /// Wait for the controller after the final reset in seconds.
    pub reboot_wait_secs: Option<u64>,
    /// Turn the radio receiver off during the transfer.
    pub quiesce_radio: Option<bool>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Port configuration.
    #[serde(default)]
    pub port: PortConfig,
    /// Update configuration.
    #[serde(default)]
    pub update: UpdateSection,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        // Load global config
        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Load local config (overrides global)
        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG_FILE)) {
            debug!("Loaded local config from {LOCAL_CONFIG_FILE}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "zwflash").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one.
    fn merge(&mut self, other: Self) {
        if other.port.serial.is_some() {
            self.port.serial = other.port.serial;
        }
        if other.port.baud.is_some() {
            self.port.baud = other.port.baud;
        }

        if other.update.block_delay_ms.is_some() {
            self.update.block_delay_ms = other.update.block_delay_ms;
        }
        if other.update.reboot_wait_secs.is_some() {
            self.update.reboot_wait_secs = other.update.reboot_wait_secs;
        }
        if other.update.quiesce_radio.is_some() {
            self.update.quiesce_radio = other.update.quiesce_radio;
        }
    }

    /// Update settings from the file, on top of the library defaults.
    pub fn update_config(&self) -> UpdateConfig {
        let mut update = UpdateConfig::default();
        if let Some(ms) = self.update.block_delay_ms {
            update = update.with_block_delay(Duration::from_millis(ms));
        }
        if let Some(secs) = self.update.reboot_wait_secs {
            update = update.with_reboot_wait(Duration::from_secs(secs));
        }
        if let Some(quiesce) = self.update.quiesce_radio {
            update = update.with_quiesce_radio(quiesce);
        }
        update
    }
}
