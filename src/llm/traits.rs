//! Common traits for LLM providers and their collaborators
//! This module defines the interfaces the resilience and logging layers depend on

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{LLMProviderType, LLMResult, PromptRequest, PromptResponse};
use crate::models::CostBreakdown;

/// Core trait that all provider adapters must implement
///
/// One call to `send_prompt` is exactly one outbound attempt. Retrying and
/// circuit breaking are layered on top by `ResilienceContext`, so adapters
/// never retry on their own.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Get the provider type
    fn provider_type(&self) -> LLMProviderType;

    /// Send a single prompt and normalize the provider's answer
    async fn send_prompt(&self, request: &PromptRequest) -> LLMResult<PromptResponse>;

    /// Models currently offered by the provider
    async fn list_models(&self) -> LLMResult<Vec<ModelInfo>>;

    /// Cheap reachability probe
    async fn test_connection(&self) -> bool;
}

/// Model information structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    /// Model identifier
    pub id: String,
    /// Human-readable model name
    pub name: String,
    /// Provider that hosts this model
    pub provider: LLMProviderType,
}

impl ModelInfo {
    pub fn new(id: impl Into<String>, provider: LLMProviderType) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            provider,
        }
    }
}

/// Per-provider token counting capability
pub trait TokenCounter: Send + Sync {
    fn count_tokens(&self, text: &str, provider: &str, model: &str) -> u32;
}

/// Price lookup capability
pub trait PriceLookup: Send + Sync {
    fn calculate_cost(
        &self,
        provider: &str,
        model: &str,
        prompt_tokens: u32,
        completion_tokens: u32,
    ) -> CostBreakdown;
}
