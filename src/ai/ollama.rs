use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::ai::message::ChatMessage;
use crate::ai::provider::{AiProvider, TokenUsage};
use crate::ai::retry::send_with_retry;
use crate::error::AppError;

const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

pub struct OllamaProvider {
    client: Client,
    base_url: String,
    model: String,
    max_retries: u32,
}

impl OllamaProvider {
    pub fn new(base_url: Option<String>, model: String, max_retries: u32) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string()),
            model,
            max_retries,
        }
    }

    fn chat_endpoint(&self) -> String {
        format!("{}/api/chat", self.base_url)
    }
}

// --- Request / Response types for the Ollama Chat API ---

#[derive(Serialize)]
struct OllamaRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
}

#[derive(Serialize)]
struct OllamaMessage {
    role: String,
    content: String,
}

impl From<&ChatMessage> for OllamaMessage {
    fn from(msg: &ChatMessage) -> Self {
        Self {
            role: msg.role.clone(),
            content: msg.content.clone(),
        }
    }
}

#[derive(Deserialize)]
struct OllamaResponse {
    message: Option<OllamaResponseMessage>,
    prompt_eval_count: Option<u32>,
    eval_count: Option<u32>,
}

#[derive(Deserialize)]
struct OllamaResponseMessage {
    content: Option<String>,
}

#[async_trait]
impl AiProvider for OllamaProvider {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        _max_tokens: Option<u32>,
    ) -> Result<(String, Option<TokenUsage>), AppError> {
        let ollama_messages: Vec<OllamaMessage> =
            messages.iter().map(OllamaMessage::from).collect();

        let body = OllamaRequest {
            model: self.model.clone(),
            messages: ollama_messages,
            stream: false,
        };

        let response = send_with_retry(
            || {
                self.client
                    .post(self.chat_endpoint())
                    .header("Content-Type", "application/json")
                    .json(&body)
            },
            "Ollama",
            self.max_retries,
        )
        .await?;

        let resp: OllamaResponse = response
            .json()
            .await
            .map_err(|e| AppError::GeneratorError(format!("Failed to parse response: {}", e)))?;

        let text = resp
            .message
            .and_then(|m| m.content)
            .unwrap_or_default();

        let usage = match (resp.prompt_eval_count, resp.eval_count) {
            (Some(input), Some(output)) => Some(TokenUsage {
                input_tokens: input,
                output_tokens: output,
            }),
            _ => None,
        };

        Ok((text, usage))
    }
}
