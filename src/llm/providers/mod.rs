//! LLM Providers Module
//!
//! This module contains the concrete `ProviderAdapter` implementations,
//! organized by wire format with each having its own subdirectory containing:
//! - client.rs: The adapter itself
//! - config.rs: Connection settings and defaults
//! - types.rs: Request/response wire types
//! - mod.rs: Module exports

pub mod ollama;
pub mod openai;

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::ProvidersConfig;
use crate::llm::{
    traits::{PriceLookup, ProviderAdapter, TokenCounter},
    LLMError, LLMProviderType, LLMResult,
};

pub use ollama::{OllamaAdapter, OllamaConfig};
pub use openai::{OpenAICompatibleAdapter, OpenAICompatibleConfig};

/// Registry of configured provider adapters
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    adapters: HashMap<LLMProviderType, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its own provider type
    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        let provider_type = adapter.provider_type();
        debug!("Registering provider adapter: {}", provider_type);
        self.adapters.insert(provider_type, adapter);
    }

    /// Get a provider adapter
    pub fn get(&self, provider_type: &LLMProviderType) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(provider_type).cloned()
    }

    /// Look up an adapter by provider name
    pub fn resolve(&self, name: &str) -> LLMResult<Arc<dyn ProviderAdapter>> {
        self.get(&LLMProviderType::from(name))
            .ok_or_else(|| LLMError::ProviderNotFound(name.to_string()))
    }

    /// All registered providers, built-ins first in their canonical order
    pub fn providers(&self) -> Vec<LLMProviderType> {
        let mut providers: Vec<LLMProviderType> = self.adapters.keys().cloned().collect();
        providers.sort_by_key(|p| {
            let rank = LLMProviderType::BUILT_IN
                .iter()
                .position(|b| b == p)
                .unwrap_or(usize::MAX);
            (rank, p.to_string())
        });
        providers
    }

    pub fn is_provider_available(&self, provider_type: &LLMProviderType) -> bool {
        self.adapters.contains_key(provider_type)
    }

    /// Build adapters for every provider that has credentials configured
    ///
    /// Ollama needs no key and is always registered.
    pub fn from_config(
        config: &ProvidersConfig,
        token_counter: Arc<dyn TokenCounter>,
        price_lookup: Arc<dyn PriceLookup>,
    ) -> LLMResult<Self> {
        let mut registry = Self::new();

        for (provider, endpoint) in [
            (LLMProviderType::OpenAI, &config.openai),
            (LLMProviderType::OpenRouter, &config.openrouter),
            (LLMProviderType::Mistral, &config.mistral),
            (LLMProviderType::Grok, &config.grok),
        ] {
            let Some(api_key) = endpoint.api_key.as_ref().filter(|k| !k.is_empty()) else {
                debug!("Skipping {}: no API key configured", provider);
                continue;
            };

            let mut adapter_config = OpenAICompatibleConfig::for_provider(provider, api_key.clone());
            if let Some(base_url) = &endpoint.base_url {
                adapter_config = adapter_config.with_base_url(base_url.clone());
            }
            if let Some(model) = &endpoint.default_model {
                adapter_config.default_model = model.clone();
            }
            if let Some(timeout) = endpoint.timeout_seconds {
                adapter_config.timeout_seconds = timeout;
            }

            registry.register(Arc::new(OpenAICompatibleAdapter::new(
                adapter_config,
                token_counter.clone(),
                price_lookup.clone(),
            )?));
        }

        let mut ollama_config = OllamaConfig::default();
        if let Some(base_url) = &config.ollama.base_url {
            ollama_config = ollama_config.with_base_url(base_url.clone());
        }
        if let Some(model) = &config.ollama.default_model {
            ollama_config.default_model = model.clone();
        }
        if let Some(timeout) = config.ollama.timeout_seconds {
            ollama_config.timeout_seconds = timeout;
        }
        registry.register(Arc::new(OllamaAdapter::new(
            ollama_config,
            token_counter,
            price_lookup,
        )?));

        info!("Provider registry ready: {:?}", registry.providers());
        Ok(registry)
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.providers())
            .finish()
    }
}
