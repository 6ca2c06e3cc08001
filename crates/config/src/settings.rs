use std::env;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Harness settings, normally read from `config/default.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub logging: LoggingConfig,
    pub run: RunConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` still wins when set.
    pub level: String,
    /// Rolling log file.  Empty disables the file sink.
    pub file: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Directory holding `config.json`, `workspace/` and `cloud_disk/`.
    pub task_root: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            task_root: "tasks/example".to_string(),
        }
    }
}

impl HarnessConfig {
    /// Load settings from `path`.  A missing file yields the defaults;
    /// `TRAINEE_LOG_LEVEL` and `TRAINEE_LOG_FILE` override the file.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let mut config = Self::default();
        if let Ok(raw) = fs::read_to_string(path) {
            config = toml::from_str(&raw).map_err(|source| ConfigError::Settings {
                path: path.to_path_buf(),
                source,
            })?;
        }

        if let Ok(level) = env::var("TRAINEE_LOG_LEVEL") {
            if !level.is_empty() {
                config.logging.level = level;
            }
        }
        if let Ok(file) = env::var("TRAINEE_LOG_FILE") {
            config.logging.file = file;
        }

        Ok(config)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }
}
