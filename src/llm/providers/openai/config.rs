//! Configuration for chat-completions compatible providers

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::llm::LLMProviderType;

/// Connection settings for one OpenAI-compatible provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAICompatibleConfig {
    /// Which provider these settings describe
    pub provider: LLMProviderType,
    /// API key for bearer authentication
    pub api_key: String,
    /// Base URL, without the trailing `/chat/completions`
    pub base_url: String,
    /// Model used when a request does not name one
    pub default_model: String,
    /// Transport timeout in seconds
    pub timeout_seconds: u64,
    /// Extra headers sent on every request
    pub custom_headers: HashMap<String, String>,
}

impl OpenAICompatibleConfig {
    /// Defaults for a known provider
    pub fn for_provider(provider: LLMProviderType, api_key: impl Into<String>) -> Self {
        let mut custom_headers = HashMap::new();
        let (base_url, default_model) = match &provider {
            LLMProviderType::OpenRouter => {
                custom_headers.insert(
                    "HTTP-Referer".to_string(),
                    "https://github.com/llm-monitor".to_string(),
                );
                custom_headers.insert("X-Title".to_string(), "LLM Monitor".to_string());
                ("https://openrouter.ai/api/v1", "openai/gpt-3.5-turbo")
            }
            LLMProviderType::Mistral => ("https://api.mistral.ai/v1", "mistral-small"),
            LLMProviderType::Grok => ("https://api.grok.x.ai/v1", "grok-1"),
            _ => ("https://api.openai.com/v1", "gpt-3.5-turbo"),
        };

        Self {
            provider,
            api_key: api_key.into(),
            base_url: base_url.to_string(),
            default_model: default_model.to_string(),
            timeout_seconds: 60,
            custom_headers,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Environment variable conventionally holding this provider's key
    pub fn api_key_env_var(provider: &LLMProviderType) -> String {
        format!("{}_API_KEY", provider.as_str().to_ascii_uppercase())
    }
}

impl Default for OpenAICompatibleConfig {
    fn default() -> Self {
        Self::for_provider(LLMProviderType::OpenAI, String::new())
    }
}
