//! AI provider integrations

mod gemini;
mod openai_compat;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::LlmConfig;
use crate::core::Turn;

pub use gemini::{GeminiConfig, GeminiProvider};
pub use openai_compat::{OpenAICompatConfig, OpenAICompatProvider};

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("API error: {0}")]
    Api(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// A stateless completion service: prior turns plus one new prompt in, reply text out
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, history: &[Turn], prompt: &str) -> Result<String, ProviderError>;

    /// Model names the upstream service offers
    async fn list_models(&self) -> Result<Vec<String>, ProviderError>;
}

pub enum Provider {
    Gemini(GeminiProvider),
    OpenAICompat(OpenAICompatProvider),
}

impl Provider {
    pub fn from_config(config: &LlmConfig, system_prompt: &str) -> Result<Self, ProviderError> {
        let name = config.provider.to_lowercase();
        match name.as_str() {
            "gemini" | "google" => {
                let mut gemini = GeminiConfig {
                    api_key: config.api_key.clone(),
                    model: config.model.clone(),
                    system_instruction: system_prompt.to_string(),
                    max_output_tokens: config.max_output_tokens,
                    timeout_secs: config.timeout_secs,
                    ..GeminiConfig::default()
                };
                if let Some(endpoint) = &config.endpoint {
                    gemini.base_url = endpoint.clone();
                }
                Ok(Provider::Gemini(GeminiProvider::new(gemini)?))
            }
            "openai" | "groq" | "ollama" | "local" => {
                let base_url = match (&config.endpoint, name.as_str()) {
                    (Some(endpoint), _) => endpoint.clone(),
                    (None, "groq") => "https://api.groq.com/openai/v1".to_string(),
                    (None, "ollama") | (None, "local") => "http://localhost:11434/v1".to_string(),
                    (None, _) => "https://api.openai.com/v1".to_string(),
                };
                let compat = OpenAICompatConfig {
                    base_url,
                    api_key: config.api_key.clone(),
                    model: config.model.clone(),
                    system_prompt: system_prompt.to_string(),
                    max_tokens: config.max_output_tokens,
                    timeout_secs: config.timeout_secs,
                };
                Ok(Provider::OpenAICompat(OpenAICompatProvider::new(compat)?))
            }
            _ => Err(ProviderError::UnknownProvider(config.provider.clone())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Provider::Gemini(_) => "gemini",
            Provider::OpenAICompat(_) => "openai-compatible",
        }
    }
}

#[async_trait]
impl CompletionClient for Provider {
    async fn complete(&self, history: &[Turn], prompt: &str) -> Result<String, ProviderError> {
        match self {
            Provider::Gemini(p) => p.complete(history, prompt).await,
            Provider::OpenAICompat(p) => p.complete(history, prompt).await,
        }
    }

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        match self {
            Provider::Gemini(p) => p.list_models().await,
            Provider::OpenAICompat(p) => p.list_models().await,
        }
    }
}
