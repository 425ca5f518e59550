use std::path::PathBuf;

use serde::Deserialize;

use crate::infrastructure::services::EngineConfig;
use crate::infrastructure::store::StoreConfig;

/// Where experiment declarations are read from when not configured
pub const DEFAULT_EXPERIMENTS_FILE: &str = "config/experiments.toml";

/// Application configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub store: StoreConfig,
    pub engine: EngineConfig,
    /// TOML or JSON file declaring the experiments
    pub experiments_file: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
    /// Single-line records
    #[default]
    Compact,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    pub fn experiments_path(&self) -> PathBuf {
        PathBuf::from(
            self.experiments_file
                .as_deref()
                .unwrap_or(DEFAULT_EXPERIMENTS_FILE),
        )
    }
}
