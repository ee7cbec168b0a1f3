//! Code generation seam between the build machine and the AI layer.
//!
//! The machine only ever talks to `ChunkGenerator`, so tests can script
//! chunk code without a network and the provider wiring stays in one place.

use async_trait::async_trait;

use crate::ai::message::ChatMessage;
use crate::ai::provider::{AiProvider, TokenUsage};
use crate::builder::prompts;
use crate::error::AppError;

/// Everything the generator needs to produce the next chunk.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub session_id: String,
    pub model_kind: String,
    /// Assembled progress context (stage, history, document summary).
    pub build_context: String,
    /// Errors from recent failed chunks, most recent last.
    pub previous_errors: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct GeneratedChunk {
    pub code: String,
    pub token_usage: Option<TokenUsage>,
}

#[async_trait]
pub trait ChunkGenerator: Send + Sync {
    async fn generate(&self, request: &GenerateRequest) -> Result<GeneratedChunk, AppError>;
}

/// Production generator backed by a configured AI provider.
pub struct ProviderGenerator {
    provider: Box<dyn AiProvider>,
    max_tokens: Option<u32>,
}

impl ProviderGenerator {
    pub fn new(provider: Box<dyn AiProvider>, max_tokens: Option<u32>) -> Self {
        Self {
            provider,
            max_tokens,
        }
    }
}

#[async_trait]
impl ChunkGenerator for ProviderGenerator {
    async fn generate(&self, request: &GenerateRequest) -> Result<GeneratedChunk, AppError> {
        let messages = vec![
            ChatMessage::system(prompts::SYSTEM_PROMPT),
            ChatMessage::user(prompts::chunk_request(request)),
        ];
        let (text, token_usage) = self.provider.complete(&messages, self.max_tokens).await?;
        if text.trim().is_empty() {
            return Err(AppError::GeneratorError(
                "provider returned an empty completion".to_string(),
            ));
        }
        Ok(GeneratedChunk {
            code: text,
            token_usage,
        })
    }
}
