pub mod claude;
pub mod message;
pub mod ollama;
pub mod openai;
pub mod provider;
pub mod retry;

use crate::ai::claude::ClaudeProvider;
use crate::ai::ollama::OllamaProvider;
use crate::ai::openai::OpenAiProvider;
use crate::ai::provider::AiProvider;
use crate::config::AppConfig;
use crate::error::AppError;

/// Create an AI provider based on the current configuration.
pub fn create_provider(config: &AppConfig) -> Result<Box<dyn AiProvider>, AppError> {
    match config.ai_provider.as_str() {
        "openai" => {
            let api_key = config
                .api_key
                .clone()
                .ok_or_else(|| AppError::ConfigError("OpenAI API key not set".into()))?;
            Ok(Box::new(OpenAiProvider::new(
                api_key,
                config.model.clone(),
                config.openai_base_url.clone(),
                config.provider_max_retries,
            )))
        }
        "deepseek" => {
            let api_key = config
                .api_key
                .clone()
                .ok_or_else(|| AppError::ConfigError("DeepSeek API key not set".into()))?;
            Ok(Box::new(OpenAiProvider::new(
                api_key,
                config.model.clone(),
                Some("https://api.deepseek.com/v1".to_string()),
                config.provider_max_retries,
            )))
        }
        "ollama" => Ok(Box::new(OllamaProvider::new(
            config.ollama_base_url.clone(),
            config.model.clone(),
            config.provider_max_retries,
        ))),
        _ => {
            // Default to Claude.
            let api_key = config
                .api_key
                .clone()
                .ok_or_else(|| AppError::ConfigError("Anthropic API key not set".into()))?;
            Ok(Box::new(ClaudeProvider::new(
                api_key,
                config.model.clone(),
                config.provider_max_retries,
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_provider_requires_api_key() {
        let config = AppConfig {
            api_key: None,
            ..AppConfig::default()
        };
        assert!(create_provider(&config).is_err());
    }

    #[test]
    fn test_create_provider_ollama_no_key_needed() {
        let config = AppConfig {
            ai_provider: "ollama".to_string(),
            api_key: None,
            model: "llama3".to_string(),
            ..AppConfig::default()
        };
        assert!(create_provider(&config).is_ok());
    }
}
