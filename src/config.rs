use crate::error::{PermissionError, Result};
use crate::storage::{StoreSettings, DEFAULT_MAPPING};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const CONFIG_DIR_NAME: &str = ".permstore";
const CONFIG_FILE_NAME: &str = "config.json";

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "snake_case")]
pub struct ElasticsearchConfig {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    10
}

impl Default for ElasticsearchConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:9200".to_string(),
            username: None,
            password: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "snake_case")]
pub struct IndexConfig {
    pub name: String,
    #[serde(default = "default_type_name")]
    pub type_name: String,
    /// File holding the index mapping; the built-in mapping is used when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapping_file: Option<PathBuf>,
}

fn default_type_name() -> String {
    "_doc".to_string()
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            name: ".permissions".to_string(),
            type_name: default_type_name(),
            mapping_file: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "snake_case")]
pub struct LoggingSettings {
    pub level: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_name: None,
            dir: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(rename_all = "snake_case")]
pub struct AppConfig {
    #[serde(default)]
    pub elasticsearch: ElasticsearchConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// `~/.permstore`
pub fn config_dir() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(CONFIG_DIR_NAME))
        .ok_or_else(|| PermissionError::ConfigError("Could not find home directory".to_string()))
}

impl AppConfig {
    pub fn default_path() -> Result<PathBuf> {
        Ok(config_dir()?.join(CONFIG_FILE_NAME))
    }

    /// Load from the default location, falling back to defaults when no file exists.
    pub fn load() -> Result<Self> {
        Self::load_from(Self::default_path()?)
    }

    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!("No config file at {:?}, using defaults", path);
            let config = AppConfig::default();
            config.validate()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            PermissionError::ConfigError(format!("Failed to read config file: {}", e))
        })?;

        let config = serde_json::from_str::<AppConfig>(&content).map_err(|e| {
            PermissionError::ConfigError(format!(
                "Failed to parse config file {:?}: {}. Please fix the config file or delete it to use defaults.",
                path, e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                PermissionError::ConfigError(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = serde_json::to_string_pretty(self).map_err(|e| {
            PermissionError::ConfigError(format!("Failed to serialize config: {}", e))
        })?;

        std::fs::write(path, content).map_err(|e| {
            PermissionError::ConfigError(format!("Failed to write config file: {}", e))
        })?;

        tracing::info!("Configuration saved to: {:?}", path);
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        reqwest::Url::parse(&self.elasticsearch.url).map_err(|e| {
            PermissionError::ConfigError(format!(
                "Invalid elasticsearch.url '{}': {}",
                self.elasticsearch.url, e
            ))
        })?;

        if self.elasticsearch.timeout_secs == 0 {
            return Err(PermissionError::ConfigError(
                "elasticsearch.timeout_secs must be greater than zero".to_string(),
            ));
        }

        if self.index.name.trim().is_empty() {
            return Err(PermissionError::ConfigError(
                "index.name must not be empty".to_string(),
            ));
        }

        if self.index.type_name.trim().is_empty() {
            return Err(PermissionError::ConfigError(
                "index.type_name must not be empty".to_string(),
            ));
        }

        self.logging
            .level
            .parse::<tracing::level_filters::LevelFilter>()
            .map_err(|_| {
                PermissionError::ConfigError(format!(
                    "Unknown logging.level '{}'",
                    self.logging.level
                ))
            })?;

        Ok(())
    }

    /// Mapping text used when the index has to be created.
    pub fn mapping(&self) -> Result<String> {
        match self.index.mapping_file {
            Some(ref path) => std::fs::read_to_string(path).map_err(|e| {
                PermissionError::ConfigError(format!(
                    "Failed to read mapping file {:?}: {}",
                    path, e
                ))
            }),
            None => Ok(DEFAULT_MAPPING.to_string()),
        }
    }

    pub fn store_settings(&self) -> Result<StoreSettings> {
        Ok(StoreSettings {
            index: self.index.name.clone(),
            doc_type: self.index.type_name.clone(),
            mapping: self.mapping()?,
        })
    }
}
