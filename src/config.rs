use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub ai_provider: String,
    pub api_key: Option<String>,
    pub model: String,
    #[serde(default)]
    pub ollama_base_url: Option<String>,
    #[serde(default)]
    pub openai_base_url: Option<String>,
    #[serde(default = "default_max_response_tokens")]
    pub max_response_tokens: u32,
    #[serde(default = "default_provider_max_retries")]
    pub provider_max_retries: u32,
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
}

fn default_max_response_tokens() -> u32 {
    4096
}

fn default_provider_max_retries() -> u32 {
    3
}

fn default_listen_port() -> u16 {
    8000
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            ai_provider: "claude".to_string(),
            api_key: None,
            model: "claude-sonnet-4-5-20250929".to_string(),
            ollama_base_url: None,
            openai_base_url: None,
            max_response_tokens: default_max_response_tokens(),
            provider_max_retries: default_provider_max_retries(),
            listen_port: default_listen_port(),
        }
    }
}

impl AppConfig {
    /// Get the path to the config file in the user config dir
    pub fn config_path() -> Result<PathBuf, AppError> {
        let data_dir = dirs::config_dir()
            .ok_or_else(|| AppError::ConfigError("Cannot find config directory".into()))?;
        Ok(data_dir.join("sheetsmith").join("config.json"))
    }

    /// Load config from disk, or return default if not found.
    /// The API key may also come from the environment (SHEETSMITH_API_KEY).
    pub fn load() -> Result<Self, AppError> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            serde_json::from_str::<AppConfig>(&contents)
                .map_err(|e| AppError::ConfigError(e.to_string()))?
        } else {
            Self::default()
        };

        if config.api_key.is_none() {
            if let Ok(key) = std::env::var("SHEETSMITH_API_KEY") {
                if !key.is_empty() {
                    config.api_key = Some(key);
                }
            }
        }

        Ok(config)
    }

    /// Save config to disk
    pub fn save(&self) -> Result<(), AppError> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json)?;
        Ok(())
    }
}
