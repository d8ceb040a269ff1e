//! Daemon settings.
//! Loaded from ~/.config/capsheet/settings.toml

use std::fs;
use std::path::{Path, PathBuf};

use capsheet_oracle::OracleConfig;
use serde::{Deserialize, Serialize};

/// Environment variable checked for the oracle API key when settings.toml
/// carries none. Keys in env take precedence over keys on disk.
pub const ORACLE_KEY_ENV: &str = "CAPSHEET_ORACLE_KEY";

/// Default TCP port for the daemon.
pub const DEFAULT_PORT: u16 = 4650;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub port: u16,
    pub oracle: OracleSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleSettings {
    /// OpenAI-compatible chat completions endpoint.
    pub endpoint: String,
    pub model: String,
    /// Prefer [`ORACLE_KEY_ENV`]; keys on disk are for local setups only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings { port: DEFAULT_PORT, oracle: OracleSettings::default() }
    }
}

impl Default for OracleSettings {
    fn default() -> Self {
        OracleSettings {
            endpoint: "http://localhost:11434/v1/chat/completions".to_string(),
            model: "llama3:8b".to_string(),
            api_key: None,
        }
    }
}

impl Settings {
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("capsheet")
            .join("settings.toml")
    }

    /// Load settings from disk, falling back to defaults.
    /// A missing file is the default configuration, not an error.
    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(settings) => settings,
                Err(e) => {
                    log::warn!("Error parsing {}: {}, using defaults", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                log::warn!("Error reading {}: {}, using defaults", path.display(), e);
                Self::default()
            }
        }
    }

    /// Resolve the oracle client configuration, filling the API key from the
    /// environment when the file has none.
    pub fn oracle_config(&self) -> OracleConfig {
        let api_key = std::env::var(ORACLE_KEY_ENV)
            .ok()
            .filter(|k| !k.is_empty())
            .or_else(|| self.oracle.api_key.clone());

        OracleConfig {
            endpoint: self.oracle.endpoint.clone(),
            model: self.oracle.model.clone(),
            api_key,
        }
    }
}
