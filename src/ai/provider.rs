use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::ai::message::ChatMessage;
use crate::error::AppError;

/// Token usage from an AI provider call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TokenUsage {
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }

    pub fn add(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

#[async_trait]
pub trait AiProvider: Send + Sync {
    /// Send messages and get a complete response.
    /// If `max_tokens` is `Some(n)`, cap the response length; otherwise use the provider default.
    async fn complete(
        &self,
        messages: &[ChatMessage],
        max_tokens: Option<u32>,
    ) -> Result<(String, Option<TokenUsage>), AppError>;
}
