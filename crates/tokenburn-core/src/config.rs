use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Result, TokenBurnError};

pub const BASE_URL_ENV: &str = "TOKENBURN_BASE_URL";
pub const API_KEY_ENV: &str = "TOKENBURN_API_KEY";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenBurnConfig {
    #[serde(default)]
    pub endpoint: EndpointConfig,
    #[serde(default)]
    pub sampling: SamplingConfig,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub prompts: PromptConfig,
    #[serde(default)]
    pub gpu: GpuConfig,
}

impl TokenBurnConfig {
    /// Defaults, overlaid with a JSON file when one is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let raw = std::fs::read_to_string(path).map_err(|e| {
            TokenBurnError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&raw)?;
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(BASE_URL_ENV) {
            self.endpoint.base_url = url;
        }
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            self.endpoint.api_key = key;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.endpoint.base_url.trim().is_empty() {
            return Err(TokenBurnError::Config("base_url is empty".to_string()));
        }
        if self.run.system_prompts[0] == self.run.system_prompts[1] {
            return Err(TokenBurnError::Config(
                "the two rotating system prompts must differ".to_string(),
            ));
        }
        if self.prompts.count == 0 {
            return Err(TokenBurnError::Config("prompt count must be at least 1".to_string()));
        }
        if self.sampling.max_tokens == 0 {
            return Err(TokenBurnError::Config("max_tokens must be positive".to_string()));
        }
        if !(self.sampling.top_p > 0.0 && self.sampling.top_p <= 1.0) {
            return Err(TokenBurnError::Config(format!(
                "top_p must be in (0, 1], got {}",
                self.sampling.top_p
            )));
        }
        if self.sampling.temperature < 0.0 {
            return Err(TokenBurnError::Config(format!(
                "temperature must not be negative, got {}",
                self.sampling.temperature
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// OpenAI-compatible API root, e.g. Ollama's `/v1/` endpoint.
    pub base_url: String,
    pub api_key: String,
    pub connect_timeout_secs: u64,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434/v1/".to_string(),
            api_key: "ollama".to_string(),
            connect_timeout_secs: 10,
        }
    }
}

/// Sampling parameters sent with every request so runs stay comparable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
    pub seed: u64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.8,
            max_tokens: 2000,
            seed: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub cooling_secs: u64,
    /// Alternated before every measured request to defeat prefix caching.
    pub system_prompts: [String; 2],
    pub warmup_system_prompt: String,
    pub warmup_prompt: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            cooling_secs: 10,
            system_prompts: [
                "You are a helpful assistant. Provide a summary as well as a detail analysis of the following. /no_think".to_string(),
                "Provide a summary as well as a detail analysis of the following. You are a helpful assistant. /no_think".to_string(),
            ],
            warmup_system_prompt: "Act as a system admin.".to_string(),
            warmup_prompt: "This is test.".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    pub source_file: PathBuf,
    pub prompts_dir: PathBuf,
    pub count: usize,
    /// Slice suffixes instead of prefixes so every prompt ends at the same point.
    pub reverse: bool,
    pub context_dir: PathBuf,
    pub synthetic_seed: u64,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            source_file: PathBuf::from("prompt.txt"),
            prompts_dir: PathBuf::from("prompts"),
            count: 10,
            reverse: true,
            context_dir: PathBuf::from("context_prompts"),
            synthetic_seed: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GpuConfig {
    pub smi_command: String,
    pub poll_interval_ms: u64,
    pub memory_sample_interval_ms: u64,
}

impl Default for GpuConfig {
    fn default() -> Self {
        Self {
            smi_command: "nvidia-smi".to_string(),
            poll_interval_ms: 250,
            memory_sample_interval_ms: 500,
        }
    }
}
