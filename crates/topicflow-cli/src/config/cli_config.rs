//! CLI configuration file support
//!
//! Loads configuration from ~/.config/topicflow/config.toml

use serde::Deserialize;
use std::path::{Path, PathBuf};
use topicflow_ai::RetryPolicy;
use topicflow_core::FlowConfig;

/// CLI configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CliConfig {
    /// Default settings
    #[serde(default)]
    pub default: DefaultConfig,
    /// API key settings
    #[serde(default)]
    pub api_keys: ApiKeysConfig,
    /// Orchestration limits
    #[serde(default)]
    pub flow: FlowConfig,
    /// HTTP retry policy for the model client
    #[serde(default)]
    pub retry: RetryPolicy,
}

/// Default configuration values
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DefaultConfig {
    /// Default model
    pub model: Option<String>,
    /// OpenAI-compatible endpoint
    pub base_url: Option<String>,
}

/// API key configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiKeysConfig {
    /// OpenAI API key
    pub openai: Option<String>,
}

impl CliConfig {
    /// Load configuration from default path
    pub fn load() -> Self {
        Self::load_from_path(Self::default_path())
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: Option<PathBuf>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(&path) {
            Ok(content) => Self::parse(&path, &content),
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "Failed to read config");
                Self::default()
            }
        }
    }

    fn parse(path: &Path, content: &str) -> Self {
        toml::from_str(content).unwrap_or_else(|err| {
            tracing::warn!(path = %path.display(), error = %err, "Ignoring invalid config");
            Self::default()
        })
    }

    /// Get the default configuration file path
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("topicflow").join("config.toml"))
    }

    /// API key from the file, falling back to `OPENAI_API_KEY`.
    pub fn openai_api_key(&self) -> Option<String> {
        self.api_keys
            .openai
            .clone()
            .filter(|key| !key.trim().is_empty())
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .filter(|key| !key.trim().is_empty())
    }
}
