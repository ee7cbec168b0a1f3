use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::ai::message::ChatMessage;
use crate::ai::provider::{AiProvider, TokenUsage};
use crate::ai::retry::send_with_retry;
use crate::error::AppError;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI Chat Completions provider. Also serves OpenAI-compatible hosts
/// (DeepSeek, Qwen, local gateways) via a custom base URL.
pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    max_retries: u32,
}

impl OpenAiProvider {
    pub fn new(api_key: String, model: String, base_url: Option<String>, max_retries: u32) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            max_retries,
        }
    }

    fn chat_endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

// --- Request / Response types for the OpenAI Chat Completions API ---

#[derive(Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Serialize)]
struct OpenAiMessage {
    role: String,
    content: String,
}

impl From<&ChatMessage> for OpenAiMessage {
    fn from(msg: &ChatMessage) -> Self {
        Self {
            role: msg.role.clone(),
            content: msg.content.clone(),
        }
    }
}

#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: Option<OpenAiMessageContent>,
}

#[derive(Deserialize)]
struct OpenAiMessageContent {
    content: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[async_trait]
impl AiProvider for OpenAiProvider {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        max_tokens: Option<u32>,
    ) -> Result<(String, Option<TokenUsage>), AppError> {
        let openai_messages: Vec<OpenAiMessage> =
            messages.iter().map(OpenAiMessage::from).collect();

        let body = OpenAiRequest {
            model: self.model.clone(),
            messages: openai_messages,
            max_tokens,
        };

        let response = send_with_retry(
            || {
                self.client
                    .post(self.chat_endpoint())
                    .bearer_auth(&self.api_key)
                    .header("Content-Type", "application/json")
                    .json(&body)
            },
            "OpenAI",
            self.max_retries,
        )
        .await?;

        let resp: OpenAiResponse = response
            .json()
            .await
            .map_err(|e| AppError::GeneratorError(format!("Failed to parse response: {}", e)))?;

        let text = resp
            .choices
            .first()
            .and_then(|c| c.message.as_ref())
            .and_then(|m| m.content.clone())
            .unwrap_or_default();

        let usage = resp.usage.map(|u| TokenUsage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
        });

        Ok((text, usage))
    }
}
