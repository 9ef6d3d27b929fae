//! Configuration loaded from `~/.reflect/config.json`.
//!
//! Every field has a default, so an empty object (or a missing file, for
//! callers that choose to fall back) yields a working setup.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::db::DEFAULT_BUSY_TIMEOUT_MS;
use crate::signals::record::ValidationPolicy;
use crate::signals::versioning::BatchMode;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// SQLite file path. Defaults to `~/.reflect/signals.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<String>,
    #[serde(default)]
    pub batch_mode: BatchMode,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// Inclusive `[min, max]` accepted for confidence. Unset means any finite value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_range: Option<[f64; 2]>,
}

fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: None,
            batch_mode: BatchMode::default(),
            busy_timeout_ms: default_busy_timeout_ms(),
            confidence_range: None,
        }
    }
}

impl Config {
    pub fn validation_policy(&self) -> ValidationPolicy {
        ValidationPolicy {
            confidence_range: self.confidence_range.map(|[min, max]| (min, max)),
        }
    }

    fn check(&self) -> Result<(), String> {
        if let Some([min, max]) = self.confidence_range {
            if !min.is_finite() || !max.is_finite() || min > max {
                return Err(format!("Invalid confidenceRange [{min}, {max}]"));
            }
        }
        Ok(())
    }
}

/// Get the canonical config file path (~/.reflect/config.json)
pub fn config_path() -> Result<PathBuf, String> {
    let home = dirs::home_dir().ok_or("Could not find home directory")?;
    Ok(home.join(".reflect").join("config.json"))
}

/// Load configuration from ~/.reflect/config.json
pub fn load_config() -> Result<Config, String> {
    load_config_from(&config_path()?)
}

/// Load configuration from an explicit path.
pub fn load_config_from(path: &Path) -> Result<Config, String> {
    if !path.exists() {
        return Err(format!(
            "Config file not found at {}. Create it with: {{ \"databasePath\": \"signals.db\" }}",
            path.display()
        ));
    }

    let content = fs::read_to_string(path).map_err(|e| format!("Failed to read config: {}", e))?;
    let config: Config =
        serde_json::from_str(&content).map_err(|e| format!("Failed to parse config: {}", e))?;
    config.check()?;
    Ok(config)
}
