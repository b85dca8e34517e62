//! Chat client implementations

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use voice_gateway_core::Turn;

use crate::LlmError;

/// Generate the next assistant utterance from a turn log.
#[async_trait]
pub trait ChatCompleter: Send + Sync {
    async fn complete(&self, turns: &[Turn]) -> Result<String, LlmError>;
}

/// Chat client configuration.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Total budget for one completion.
    pub timeout: Duration,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com".to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            temperature: 0.7,
            max_tokens: 150,
            timeout: Duration::from_secs(30),
        }
    }
}

/// OpenAI-style chat-completions client.
pub struct OpenAiChat {
    client: reqwest::Client,
    config: ChatConfig,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

impl OpenAiChat {
    pub fn new(config: ChatConfig) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::Unavailable(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn map_request_error(err: reqwest::Error) -> LlmError {
        if err.is_timeout() {
            LlmError::Timeout
        } else {
            LlmError::Unavailable(err.to_string())
        }
    }
}

#[async_trait]
impl ChatCompleter for OpenAiChat {
    async fn complete(&self, turns: &[Turn]) -> Result<String, LlmError> {
        let messages: Vec<serde_json::Value> = turns
            .iter()
            .map(|turn| {
                serde_json::json!({
                    "role": turn.role.as_str(),
                    "content": turn.content,
                })
            })
            .collect();

        let body = serde_json::json!({
            "model": self.config.model,
            "messages": messages,
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
        });

        let url = format!("{}/v1/chat/completions", self.config.base_url);
        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        tracing::debug!(model = %self.config.model, turns = turns.len(), "requesting completion");

        let response = request.send().await.map_err(Self::map_request_error)?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            tracing::warn!(status = %status, "chat provider rejected request");
            return Err(LlmError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let body: CompletionResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Malformed(e.to_string()))?;

        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| LlmError::Malformed("completion has no content".to_string()))?;

        Ok(content.trim().to_string())
    }
}

/// Fixed-reply chat client for tests and local bring-up.
pub struct CannedChat {
    reply: Result<String, LlmError>,
    delay: Duration,
}

impl CannedChat {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: Ok(reply.into()),
            delay: Duration::ZERO,
        }
    }

    pub fn failing(error: LlmError) -> Self {
        Self {
            reply: Err(error),
            delay: Duration::ZERO,
        }
    }

    /// Simulate provider latency.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl ChatCompleter for CannedChat {
    async fn complete(&self, _turns: &[Turn]) -> Result<String, LlmError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.reply.clone()
    }
}
