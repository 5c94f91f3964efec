use std::time::Duration;

use reqwest_eventsource::{retry, EventSource};
use serde::{Deserialize, Serialize};
use tokenburn_core::{EndpointConfig, Result, TokenBurnError};
use tracing::debug;

/// Thin client for an OpenAI-compatible chat completions server.
#[derive(Debug, Clone)]
pub struct ChatClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamOptions {
    pub include_usage: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
    pub seed: u64,
    pub stream: bool,
    pub stream_options: StreamOptions,
}

/// One decoded `data:` payload of a streamed completion.
#[derive(Debug, Default, Deserialize)]
pub struct ChatChunk {
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
    #[serde(default)]
    pub usage: Option<Usage>,
    #[serde(default)]
    pub error: Option<serde_json::Value>,
}

impl ChatChunk {
    /// Content carried by the first choice's delta, if any.
    pub fn content(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|c| c.delta.as_ref())
            .and_then(|d| d.content.as_deref())
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub delta: Option<Delta>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Delta {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: Option<u32>,
    #[serde(default)]
    pub completion_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<LocalModel>,
}

/// Model installed on an Ollama server, from `/api/tags`.
#[derive(Debug, Clone, Deserialize)]
pub struct LocalModel {
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub details: Option<LocalModelDetails>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocalModelDetails {
    pub parameter_size: Option<String>,
    pub quantization_level: Option<String>,
}

impl ChatClient {
    pub fn new(config: &EndpointConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| TokenBurnError::Http(e.to_string()))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Server root without the OpenAI `/v1` suffix, for Ollama-native routes.
    pub fn native_base(&self) -> &str {
        self.base_url.strip_suffix("/v1").unwrap_or(&self.base_url)
    }

    /// Open an event stream for a completion. Nothing is sent until it is polled.
    pub fn stream_chat(&self, request: &ChatCompletionRequest) -> Result<EventSource> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!(url = %url, model = %request.model, "Sending chat completion");

        let builder = self.client.post(&url).bearer_auth(&self.api_key).json(request);
        let mut source = EventSource::new(builder).map_err(|e| TokenBurnError::Http(e.to_string()))?;
        // One attempt per measurement; a reconnect would restart generation.
        source.set_retry_policy(Box::new(retry::Never));
        Ok(source)
    }

    /// Model ids served by the OpenAI-compatible `/models` route.
    pub async fn list_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/models", self.base_url);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| TokenBurnError::Http(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(TokenBurnError::Api { status, body });
        }

        let models: ModelsResponse = resp
            .json()
            .await
            .map_err(|e| TokenBurnError::Protocol(e.to_string()))?;
        Ok(models.data.into_iter().map(|m| m.id).collect())
    }

    /// Models installed locally, via Ollama's `/api/tags`.
    pub async fn list_local_models(&self) -> Result<Vec<LocalModel>> {
        let url = format!("{}/api/tags", self.native_base());
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| TokenBurnError::Http(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(TokenBurnError::Api { status, body });
        }

        let tags: TagsResponse = resp
            .json()
            .await
            .map_err(|e| TokenBurnError::Protocol(e.to_string()))?;
        Ok(tags.models)
    }
}
