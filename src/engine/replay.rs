// Replay service - re-execute stored or ad hoc prompts

//! # Replay Service
//!
//! Re-runs a prompt against any registered provider, either from an explicit
//! request or from a stored [`LogRecord`](crate::models::LogRecord) with
//! optional provider/model/parameter overrides. Every call goes through the
//! resilience context. Also answers the model listing, connection test and
//! cost estimate queries of the HTTP surface.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::storage::LogStore;
use crate::llm::providers::ProviderRegistry;
use crate::llm::traits::ModelInfo;
use crate::llm::{
    LLMProviderType, PriceLookup, PromptRequest, PromptResponse, ProviderAdapter, TokenCounter,
};
use crate::models::{CostBreakdown, RequestParameters, TokenUsage};
use crate::resilience::ResilienceContext;
use crate::{MonitorError, Result};

/// Body of `POST /api/replay`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReplayRequest {
    pub prompt: String,
    pub provider: String,
    pub model: String,
    pub system_message: String,
    pub parameters: RequestParameters,
    pub original_log_id: Option<String>,
}

/// Overrides applied when replaying a stored log
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReplayOverrides {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub parameters: RequestParameters,
}

/// A provider response tagged as a replay
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayResponse {
    #[serde(flatten)]
    pub response: PromptResponse,
    pub is_replay: bool,
    pub original_log_id: Option<String>,
    pub replayed_at: DateTime<Utc>,
}

/// Body of `POST /api/providers/:provider/complete`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompletionRequest {
    pub prompt: String,
    pub model: String,
    pub system_message: String,
    pub parameters: RequestParameters,
}

/// Body of `POST /api/cost-estimate`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostEstimateRequest {
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub model: String,
    #[serde(default = "default_completion_length")]
    pub estimated_completion_length: usize,
}

fn default_completion_length() -> usize {
    100
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostEstimate {
    /// First 100 characters of the prompt
    pub prompt: String,
    pub provider: String,
    pub model: String,
    pub token_estimate: TokenUsage,
    pub cost_estimate: CostBreakdown,
}

pub struct ReplayService {
    registry: Arc<ProviderRegistry>,
    resilience: Arc<ResilienceContext>,
    store: Arc<dyn LogStore>,
    token_counter: Arc<dyn TokenCounter>,
    price_lookup: Arc<dyn PriceLookup>,
}

impl ReplayService {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        resilience: Arc<ResilienceContext>,
        store: Arc<dyn LogStore>,
        token_counter: Arc<dyn TokenCounter>,
        price_lookup: Arc<dyn PriceLookup>,
    ) -> Self {
        Self {
            registry,
            resilience,
            store,
            token_counter,
            price_lookup,
        }
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    fn adapter(&self, provider: &str) -> Result<Arc<dyn ProviderAdapter>> {
        self.registry
            .get(&LLMProviderType::from(provider))
            .ok_or_else(|| MonitorError::UnsupportedProvider(provider.to_string()))
    }

    /// One resilient completion against a named provider
    pub async fn complete(&self, provider: &str, request: CompletionRequest) -> Result<PromptResponse> {
        if request.prompt.is_empty() || request.model.is_empty() {
            return Err(MonitorError::Validation(
                "Missing required fields: prompt, model".to_string(),
            ));
        }
        let adapter = self.adapter(provider)?;
        let prompt = PromptRequest {
            request_id: Uuid::new_v4().to_string(),
            prompt: request.prompt,
            model: request.model,
            system_message: request.system_message,
            parameters: request.parameters,
        };
        Ok(self.resilience.call_provider(adapter.as_ref(), &prompt).await?)
    }

    pub async fn replay(&self, request: ReplayRequest) -> Result<ReplayResponse> {
        if request.prompt.is_empty() || request.provider.is_empty() || request.model.is_empty() {
            return Err(MonitorError::Validation(
                "Missing required fields: prompt, provider, model".to_string(),
            ));
        }

        info!(
            "Replaying prompt on {}/{}{}",
            request.provider,
            request.model,
            request
                .original_log_id
                .as_deref()
                .map(|id| format!(" (from log {})", id))
                .unwrap_or_default()
        );

        let response = self
            .complete(
                &request.provider,
                CompletionRequest {
                    prompt: request.prompt,
                    model: request.model,
                    system_message: request.system_message,
                    parameters: request.parameters,
                },
            )
            .await?;

        Ok(ReplayResponse {
            response,
            is_replay: true,
            original_log_id: request.original_log_id,
            replayed_at: Utc::now(),
        })
    }

    /// Replay a stored log, optionally on another provider or model
    pub async fn replay_from_log(&self, request_id: &str, overrides: ReplayOverrides) -> Result<ReplayResponse> {
        let original = self
            .store
            .get(request_id)
            .await?
            .ok_or_else(|| MonitorError::NotFound(format!("Original log not found: {}", request_id)))?;

        self.replay(ReplayRequest {
            prompt: original.prompt,
            provider: overrides.provider.unwrap_or(original.provider),
            model: overrides.model.unwrap_or(original.model),
            system_message: original.system_message,
            parameters: original.parameters.merged_with(&overrides.parameters),
            original_log_id: Some(request_id.to_string()),
        })
        .await
    }

    /// Models of one provider, or of every provider keyed by name
    ///
    /// When listing all providers, a failing provider contributes an empty
    /// list instead of failing the whole query.
    pub async fn available_models(&self, provider: Option<&str>) -> Result<BTreeMap<String, Vec<ModelInfo>>> {
        if let Some(provider) = provider {
            let models = self.adapter(provider)?.list_models().await?;
            return Ok(BTreeMap::from([(provider.to_string(), models)]));
        }

        let providers = self.registry.providers();
        let listings = join_all(providers.iter().map(|provider| async move {
            match self.registry.get(provider) {
                Some(adapter) => adapter.list_models().await.unwrap_or_else(|e| {
                    warn!("Failed to get models for {}: {}", provider, e);
                    Vec::new()
                }),
                None => Vec::new(),
            }
        }))
        .await;

        Ok(providers
            .iter()
            .map(ToString::to_string)
            .zip(listings)
            .collect())
    }

    pub async fn test_connection(&self, provider: &str) -> Result<bool> {
        Ok(self.adapter(provider)?.test_connection().await)
    }

    pub fn estimate_cost(&self, request: &CostEstimateRequest) -> Result<CostEstimate> {
        if request.prompt.is_empty() || request.provider.is_empty() || request.model.is_empty() {
            return Err(MonitorError::Validation(
                "Missing required fields: prompt, provider, model".to_string(),
            ));
        }
        self.adapter(&request.provider)?;

        let prompt_tokens =
            self.token_counter
                .count_tokens(&request.prompt, &request.provider, &request.model);
        let completion_tokens = request.estimated_completion_length.div_ceil(4).min(u32::MAX as usize) as u32;
        let cost_estimate = self.price_lookup.calculate_cost(
            &request.provider,
            &request.model,
            prompt_tokens,
            completion_tokens,
        );

        let mut preview: String = request.prompt.chars().take(100).collect();
        if request.prompt.chars().count() > 100 {
            preview.push_str("...");
        }

        Ok(CostEstimate {
            prompt: preview,
            provider: request.provider.clone(),
            model: request.model.clone(),
            token_estimate: TokenUsage::new(prompt_tokens, completion_tokens),
            cost_estimate,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::storage::test_support::record;
    use crate::engine::storage::InMemoryLogStore;
    use crate::llm::cost::{HeuristicTokenCounter, StaticPriceTable};
    use crate::llm::LLMError;
    use crate::resilience::context::test_support::FakeAdapter;

    async fn service(store: Arc<InMemoryLogStore>) -> (ReplayService, Arc<FakeAdapter>) {
        let adapter = Arc::new(FakeAdapter::new(LLMProviderType::OpenAI));
        let mut registry = ProviderRegistry::new();
        registry.register(adapter.clone());
        registry.register(Arc::new(FakeAdapter::new(LLMProviderType::Ollama)));
        (
            ReplayService::new(
                Arc::new(registry),
                Arc::new(ResilienceContext::default()),
                store,
                Arc::new(HeuristicTokenCounter),
                Arc::new(StaticPriceTable::default()),
            ),
            adapter,
        )
    }

    #[tokio::test]
    async fn test_replay_tags_response() {
        let (service, adapter) = service(Arc::new(InMemoryLogStore::new())).await;
        let response = service
            .replay(ReplayRequest {
                prompt: "again".to_string(),
                provider: "openai".to_string(),
                model: "gpt-4o".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();

        assert!(response.is_replay);
        assert!(response.original_log_id.is_none());
        assert_eq!(response.response.completion, "echo: again");
        assert_eq!(adapter.calls(), 1);

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["isReplay"], true);
        assert_eq!(json["completion"], "echo: again");
    }

    #[tokio::test]
    async fn test_replay_validation_and_unknown_provider() {
        let (service, _) = service(Arc::new(InMemoryLogStore::new())).await;
        let missing = service.replay(ReplayRequest::default()).await.unwrap_err();
        assert!(matches!(missing, MonitorError::Validation(_)));

        let unknown = service
            .replay(ReplayRequest {
                prompt: "p".to_string(),
                provider: "acme".to_string(),
                model: "m".to_string(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(unknown, MonitorError::UnsupportedProvider(p) if p == "acme"));
    }

    #[tokio::test]
    async fn test_replay_from_log_applies_overrides() {
        let store = Arc::new(InMemoryLogStore::new());
        let mut stored = record("log-1", Utc::now());
        stored.parameters.temperature = Some(0.9);
        stored.parameters.max_tokens = Some(64);
        store.append(stored).await.unwrap();

        let (service, _) = service(store).await;
        let response = service
            .replay_from_log(
                "log-1",
                ReplayOverrides {
                    provider: Some("ollama".to_string()),
                    model: None,
                    parameters: RequestParameters {
                        temperature: Some(0.1),
                        ..Default::default()
                    },
                },
            )
            .await
            .unwrap();

        assert_eq!(response.original_log_id.as_deref(), Some("log-1"));
        assert_eq!(response.response.provider, LLMProviderType::Ollama);
        assert_eq!(response.response.model, "gpt-4o-mini");

        let missing = service
            .replay_from_log("nope", ReplayOverrides::default())
            .await
            .unwrap_err();
        assert!(matches!(missing, MonitorError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_available_models_for_all_providers() {
        let (service, _) = service(Arc::new(InMemoryLogStore::new())).await;
        let all = service.available_models(None).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all["openai"][0].id, "fake-model");

        let one = service.available_models(Some("ollama")).await.unwrap();
        assert_eq!(one.keys().collect::<Vec<_>>(), vec!["ollama"]);
    }

    #[tokio::test]
    async fn test_cost_estimate() {
        let (service, _) = service(Arc::new(InMemoryLogStore::new())).await;
        let estimate = service
            .estimate_cost(&CostEstimateRequest {
                prompt: "a".repeat(150),
                provider: "openai".to_string(),
                model: "gpt-3.5-turbo".to_string(),
                estimated_completion_length: 100,
            })
            .unwrap();

        assert_eq!(estimate.token_estimate.prompt_tokens, 38);
        assert_eq!(estimate.token_estimate.completion_tokens, 25);
        assert_eq!(estimate.prompt.len(), 103);
        assert!(estimate.cost_estimate.total_cost > 0.0);
    }

    #[tokio::test]
    async fn test_provider_failure_surfaces_as_llm_error() {
        let adapter = FakeAdapter::new(LLMProviderType::OpenAI).with_script(vec![Err(
            LLMError::Http {
                status: 400,
                message: "bad request".to_string(),
            },
        )]);
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(adapter));
        let service = ReplayService::new(
            Arc::new(registry),
            Arc::new(ResilienceContext::default()),
            Arc::new(InMemoryLogStore::new()),
            Arc::new(HeuristicTokenCounter),
            Arc::new(StaticPriceTable::default()),
        );

        let err = service
            .complete(
                "openai",
                CompletionRequest {
                    prompt: "p".to_string(),
                    model: "gpt-4o".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, MonitorError::Llm(LLMError::RetriesExhausted { .. })));
    }
}
