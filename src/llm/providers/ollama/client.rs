//! Ollama provider adapter
//!
//! Talks to a local or self-hosted Ollama instance through its native
//! `/api/generate` and `/api/tags` endpoints. Ollama is free to run, but cost
//! still goes through the price lookup so a custom table can assign a rate.

use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error};

use crate::llm::{
    elapsed_ms,
    traits::{ModelInfo, PriceLookup, ProviderAdapter, TokenCounter},
    LLMError, LLMProviderType, LLMResult, PromptRequest, PromptResponse,
};
use crate::models::{LogStatus, TokenUsage};

use super::config::OllamaConfig;
use super::types::{OllamaGenerateRequest, OllamaGenerateResponse, OllamaModelsResponse, OllamaOptions};

/// Ollama provider adapter
pub struct OllamaAdapter {
    client: Client,
    config: OllamaConfig,
    token_counter: Arc<dyn TokenCounter>,
    price_lookup: Arc<dyn PriceLookup>,
}

impl OllamaAdapter {
    pub fn new(
        config: OllamaConfig,
        token_counter: Arc<dyn TokenCounter>,
        price_lookup: Arc<dyn PriceLookup>,
    ) -> LLMResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent("llm-monitor/0.1")
            .build()
            .map_err(|e| LLMError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            config,
            token_counter,
            price_lookup,
        })
    }

    pub fn config(&self) -> &OllamaConfig {
        &self.config
    }

    fn convert_request(&self, request: &PromptRequest) -> OllamaGenerateRequest {
        let params = &request.parameters;
        let options = OllamaOptions {
            temperature: params.temperature,
            top_p: params.top_p,
            num_predict: params.max_tokens,
            stop: params.stop.clone(),
        };

        OllamaGenerateRequest {
            model: if request.model.is_empty() {
                self.config.default_model.clone()
            } else {
                request.model.clone()
            },
            prompt: request.prompt.clone(),
            system: (!request.system_message.is_empty()).then(|| request.system_message.clone()),
            stream: false,
            options: (!options.is_empty()).then_some(options),
        }
    }

    async fn error_from_response(response: reqwest::Response) -> LLMError {
        let status = response.status().as_u16();
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        error!("Ollama API Error: {} - {}", status, error_text);
        LLMError::from_response_body(status, &error_text)
    }
}

#[async_trait]
impl ProviderAdapter for OllamaAdapter {
    fn provider_type(&self) -> LLMProviderType {
        LLMProviderType::Ollama
    }

    async fn send_prompt(&self, request: &PromptRequest) -> LLMResult<PromptResponse> {
        let start = Instant::now();
        let body = self.convert_request(request);
        let url = format!("{}/api/generate", self.config.base_url);

        debug!("Ollama API Request: URL={}, Model={}", url, body.model);

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| LLMError::from_transport(&e))?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let raw: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LLMError::Serialization(e.to_string()))?;
        let parsed: OllamaGenerateResponse = serde_json::from_value(raw.clone())
            .map_err(|e| LLMError::Serialization(e.to_string()))?;

        let provider = LLMProviderType::Ollama;
        let model = body.model;
        let prompt_tokens = parsed.prompt_eval_count.unwrap_or_else(|| {
            self.token_counter
                .count_tokens(&request.system_message, provider.as_str(), &model)
                + self
                    .token_counter
                    .count_tokens(&request.prompt, provider.as_str(), &model)
        });
        let completion_tokens = parsed.eval_count.unwrap_or_else(|| {
            self.token_counter
                .count_tokens(&parsed.response, provider.as_str(), &model)
        });
        let token_usage = TokenUsage::new(prompt_tokens, completion_tokens);
        let cost = self.price_lookup.calculate_cost(
            provider.as_str(),
            &model,
            token_usage.prompt_tokens,
            token_usage.completion_tokens,
        );

        Ok(PromptResponse {
            request_id: request.request_id.clone(),
            provider,
            model,
            finish_reason: Some(parsed.finish_reason()),
            completion: parsed.response,
            token_usage,
            cost,
            latency_ms: elapsed_ms(start),
            status: LogStatus::Success,
            error: None,
            retry_attempts: 0,
            retry_history: Vec::new(),
            raw_response: raw,
        })
    }

    async fn list_models(&self) -> LLMResult<Vec<ModelInfo>> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.config.base_url))
            .send()
            .await
            .map_err(|e| LLMError::from_transport(&e))?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let tags: OllamaModelsResponse = response
            .json()
            .await
            .map_err(|e| LLMError::Serialization(e.to_string()))?;

        Ok(tags
            .models
            .into_iter()
            .map(|model| ModelInfo::new(model.name, LLMProviderType::Ollama))
            .collect())
    }

    async fn test_connection(&self) -> bool {
        match self.list_models().await {
            Ok(_) => true,
            Err(e) => {
                debug!("Ollama connection test failed: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::cost::{HeuristicTokenCounter, StaticPriceTable};
    use crate::llm::providers::test_support::spawn_upstream;
    use crate::models::RequestParameters;
    use axum::{routing::get, routing::post, Json, Router};
    use serde_json::json;

    fn adapter(base_url: &str) -> OllamaAdapter {
        OllamaAdapter::new(
            OllamaConfig::default().with_base_url(base_url),
            Arc::new(HeuristicTokenCounter),
            Arc::new(StaticPriceTable::default()),
        )
        .unwrap()
    }

    fn prompt() -> PromptRequest {
        PromptRequest {
            request_id: "req-ollama".to_string(),
            prompt: "Why is the sky blue?".to_string(),
            model: "llama2".to_string(),
            system_message: String::new(),
            parameters: RequestParameters {
                max_tokens: Some(32),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_convert_request_maps_max_tokens() {
        let body = adapter("http://127.0.0.1:1").convert_request(&prompt());
        assert_eq!(body.options.and_then(|o| o.num_predict), Some(32));
        assert!(body.system.is_none());
        assert!(!body.stream);
    }

    #[tokio::test]
    async fn test_generate_counts_tokens_when_not_reported() {
        let router = Router::new().route(
            "/api/generate",
            post(|| async { Json(json!({"model": "llama2", "response": "Rayleigh", "done": true})) }),
        );
        let base = spawn_upstream(router).await;

        let response = adapter(&base).send_prompt(&prompt()).await.unwrap();
        assert_eq!(response.completion, "Rayleigh");
        assert_eq!(response.finish_reason.as_deref(), Some("stop"));
        // "Why is the sky blue?" is 20 chars, "Rayleigh" is 8
        assert_eq!(response.token_usage.prompt_tokens, 5);
        assert_eq!(response.token_usage.completion_tokens, 2);
        assert_eq!(response.cost.total_cost, 0.0);
    }

    #[tokio::test]
    async fn test_list_models_from_tags() {
        let router = Router::new().route(
            "/api/tags",
            get(|| async { Json(json!({"models": [{"name": "llama2:latest"}]})) }),
        );
        let base = spawn_upstream(router).await;

        let models = adapter(&base).list_models().await.unwrap();
        assert_eq!(models, vec![ModelInfo::new("llama2:latest", LLMProviderType::Ollama)]);
    }
}
