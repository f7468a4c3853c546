//! Language-model client
//!
//! Single-shot text completion behind the [`LlmClient`] capability trait.
//! The production implementation speaks an OpenAI-compatible chat endpoint;
//! tests pass stubs. The model is a refinement layer everywhere it is used,
//! never a hard dependency: callers treat any [`LlmError`] as "fall back".

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::Settings;
use crate::http_client;

/// Transport or validation failure against the language model.
/// Always non-fatal; the affected stage falls back.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("LLM request failed: {0}")]
    Http(String),

    #[error("LLM API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("LLM returned an empty response")]
    EmptyResponse,

    #[error("No language model configured")]
    Unavailable,
}

/// Single-shot completion capability: one prompt in, one string out
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError>;
}

// OpenAI-compatible API structures
#[derive(Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: Message,
}

/// Chat-completions client for any OpenAI-compatible endpoint
#[derive(Clone)]
pub struct ChatCompletionClient {
    api_token: String,
    base_url: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    client: reqwest::Client,
}

impl ChatCompletionClient {
    pub fn new(
        api_token: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            api_token: api_token.into(),
            base_url: base_url.into(),
            model: model.into(),
            max_tokens: 2048,
            temperature: 0.7,
            client: http_client::llm_client(),
        }
    }

    /// Build from settings; `None` when no LLM token is configured
    pub fn from_settings(settings: &Settings) -> Option<Self> {
        settings.llm_api_token.as_ref().map(|token| {
            Self::new(
                token.clone(),
                settings.llm_base_url.clone(),
                settings.llm_model.clone(),
            )
        })
    }
}

#[async_trait]
impl LlmClient for ChatCompletionClient {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![Message {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            stream: false,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_token)
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::Http(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(LlmError::Api { status, message });
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Http(format!("Failed to parse response: {e}")))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or(LlmError::EmptyResponse)?;

        if content.trim().is_empty() {
            return Err(LlmError::EmptyResponse);
        }

        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_construction() {
        let client =
            ChatCompletionClient::new("sk-test", "https://llm.example.com/v1", "test-model");
        assert_eq!(client.base_url, "https://llm.example.com/v1");
        assert_eq!(client.model, "test-model");
    }

    #[test]
    fn test_from_settings_requires_token() {
        let settings = Settings {
            ebird_api_token: "ebird".to_string(),
            ebird_base_url: "https://api.ebird.org/v2".to_string(),
            llm_api_token: None,
            llm_base_url: "https://api.openai.com/v1".to_string(),
            llm_model: "gpt-4o-mini".to_string(),
        };
        assert!(ChatCompletionClient::from_settings(&settings).is_none());

        let with_token = Settings {
            llm_api_token: Some("sk-test".to_string()),
            ..settings
        };
        assert!(ChatCompletionClient::from_settings(&with_token).is_some());
    }

    #[test]
    fn test_response_parsing() {
        let json = r#"{
            "id": "cmpl-1",
            "object": "chat.completion",
            "created": 0,
            "model": "test",
            "choices": [
                {"index": 0, "message": {"role": "assistant", "content": "Northern Cardinal"}, "finish_reason": "stop"}
            ],
            "usage": {"prompt_tokens": 10, "completion_tokens": 3, "total_tokens": 13}
        }"#;
        let parsed: ChatCompletionResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.choices[0].message.content, "Northern Cardinal");
    }
}
