use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::ai::message::ChatMessage;
use crate::ai::provider::{AiProvider, TokenUsage};
use crate::ai::retry::send_with_retry;
use crate::error::AppError;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

pub struct ClaudeProvider {
    client: Client,
    api_key: String,
    model: String,
    max_retries: u32,
}

impl ClaudeProvider {
    pub fn new(api_key: String, model: String, max_retries: u32) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model,
            max_retries,
        }
    }

    /// Separate system messages from the conversation.
    /// Anthropic uses a top-level `system` parameter rather than a system role message.
    fn split_system(&self, messages: &[ChatMessage]) -> (Option<String>, Vec<ClaudeMessage>) {
        let mut system_text: Option<String> = None;
        let mut claude_messages = Vec::new();

        for msg in messages {
            if msg.role == "system" {
                match &mut system_text {
                    Some(existing) => {
                        existing.push_str("\n\n");
                        existing.push_str(&msg.content);
                    }
                    None => {
                        system_text = Some(msg.content.clone());
                    }
                }
            } else {
                claude_messages.push(ClaudeMessage {
                    role: msg.role.clone(),
                    content: msg.content.clone(),
                });
            }
        }

        (system_text, claude_messages)
    }
}

// --- Request / Response types for the Anthropic Messages API ---

#[derive(Serialize)]
struct ClaudeRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<ClaudeMessage>,
}

#[derive(Serialize)]
struct ClaudeMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ClaudeResponse {
    content: Vec<ClaudeContentBlock>,
    usage: Option<ClaudeUsage>,
}

#[derive(Deserialize)]
struct ClaudeContentBlock {
    text: Option<String>,
}

#[derive(Deserialize)]
struct ClaudeUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[async_trait]
impl AiProvider for ClaudeProvider {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        max_tokens: Option<u32>,
    ) -> Result<(String, Option<TokenUsage>), AppError> {
        let (system, claude_messages) = self.split_system(messages);

        let body = ClaudeRequest {
            model: self.model.clone(),
            max_tokens: max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            system,
            messages: claude_messages,
        };

        let response = send_with_retry(
            || {
                self.client
                    .post(ANTHROPIC_API_URL)
                    .header("x-api-key", &self.api_key)
                    .header("anthropic-version", ANTHROPIC_VERSION)
                    .header("content-type", "application/json")
                    .json(&body)
            },
            "Anthropic",
            self.max_retries,
        )
        .await?;

        let resp: ClaudeResponse = response
            .json()
            .await
            .map_err(|e| AppError::GeneratorError(format!("Failed to parse response: {}", e)))?;

        let text = resp
            .content
            .first()
            .and_then(|b| b.text.clone())
            .unwrap_or_default();

        let usage = resp.usage.map(|u| TokenUsage {
            input_tokens: u.input_tokens,
            output_tokens: u.output_tokens,
        });

        Ok((text, usage))
    }
}
