//! Link configuration, stored as JSON under the starcom home directory

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Key baked into the reference peripheral firmware
pub const DEFAULT_DEVICE_KEY: [u8; 16] = [
    0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0x0C, 0x0D, 0x0E, 0x0F, 0x10,
];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(PathBuf),
    #[error("failed to read or write config: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid device key: {0}")]
    InvalidKey(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Shared secret, hex encoded
    pub device_key: String,
    /// How long the BLE transport scans while resolving an address
    pub resolve_timeout_secs: u64,
    /// Which local adapter to use
    pub adapter_index: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            device_key: data_encoding::HEXLOWER.encode(&DEFAULT_DEVICE_KEY),
            resolve_timeout_secs: 5,
            adapter_index: 0,
        }
    }
}

impl LinkConfig {
    /// Read config from `path`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let data = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&data)?;
        config.device_key()?;
        Ok(config)
    }

    /// Read config from `path`, writing defaults there first if it is missing
    pub fn load_or_create(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            return Self::load(path);
        }
        let config = Self::default();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(&config)?)?;
        log::info!("wrote default config to {}", path.display());
        Ok(config)
    }

    /// Decoded shared secret
    pub fn device_key(&self) -> Result<Vec<u8>, ConfigError> {
        let key = data_encoding::HEXLOWER_PERMISSIVE
            .decode(self.device_key.trim().as_bytes())
            .map_err(|e| ConfigError::InvalidKey(e.to_string()))?;
        if key.is_empty() {
            return Err(ConfigError::InvalidKey("key is empty".into()));
        }
        Ok(key)
    }

    pub fn resolve_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.resolve_timeout_secs)
    }
}

/// `$STARCOM_HOME`, falling back to `~/.starcom`
pub fn starcom_home() -> PathBuf {
    if let Ok(home) = std::env::var("STARCOM_HOME") {
        return PathBuf::from(home);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".starcom")
}

pub fn default_config_path() -> PathBuf {
    starcom_home().join("config.json")
}
