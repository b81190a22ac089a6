//! OpenAI-compatible provider adapter
//! One adapter type serves every provider that speaks the chat-completions API

use async_trait::async_trait;
use reqwest::{header::HeaderMap, header::HeaderValue, header::CONTENT_TYPE, Client};
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

use super::config::OpenAICompatibleConfig;
use super::types::{ChatCompletionRequest, ChatCompletionResponse, ChatMessage, ModelsResponse};

/// Adapter for OpenAI, OpenRouter, Mistral and Grok
pub struct OpenAICompatibleAdapter {
    client: Client,
    config: OpenAICompatibleConfig,
    token_counter: Arc<dyn TokenCounter>,
    price_lookup: Arc<dyn PriceLookup>,
}

impl OpenAICompatibleAdapter {
    pub fn new(
        config: OpenAICompatibleConfig,
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

    pub fn config(&self) -> &OpenAICompatibleConfig {
        &self.config
    }

    /// Build HTTP headers for requests
    fn build_headers(&self) -> LLMResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if !self.config.api_key.is_empty() {
            headers.insert(
                "Authorization",
                HeaderValue::from_str(&format!("Bearer {}", self.config.api_key))
                    .map_err(|e| LLMError::Internal(format!("Invalid API key format: {}", e)))?,
            );
        }

        for (key, value) in &self.config.custom_headers {
            let header_name = reqwest::header::HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| LLMError::Internal(format!("Invalid header key: {}", e)))?;
            headers.insert(
                header_name,
                HeaderValue::from_str(value)
                    .map_err(|e| LLMError::Internal(format!("Invalid header value: {}", e)))?,
            );
        }

        Ok(headers)
    }

    fn resolve_model<'a>(&'a self, request: &'a PromptRequest) -> &'a str {
        if request.model.is_empty() {
            &self.config.default_model
        } else {
            &request.model
        }
    }

    /// Convert a prompt into the chat-completions body
    fn convert_request(&self, request: &PromptRequest) -> ChatCompletionRequest {
        let mut messages = Vec::with_capacity(2);
        if !request.system_message.is_empty() {
            messages.push(ChatMessage::system(&request.system_message));
        }
        messages.push(ChatMessage::user(&request.prompt));

        let params = &request.parameters;
        ChatCompletionRequest {
            model: self.resolve_model(request).to_string(),
            messages,
            temperature: params.temperature,
            max_tokens: params.max_tokens,
            top_p: params.top_p,
            frequency_penalty: params.frequency_penalty,
            presence_penalty: params.presence_penalty,
            stop: params.stop.clone(),
            stream: false,
        }
    }

    async fn error_from_response(&self, response: reqwest::Response) -> LLMError {
        let status = response.status().as_u16();
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        error!("{} API Error: {} - {}", self.config.provider, status, error_text);
        LLMError::from_response_body(status, &error_text)
    }
}

#[async_trait]
impl ProviderAdapter for OpenAICompatibleAdapter {
    fn provider_type(&self) -> LLMProviderType {
        self.config.provider.clone()
    }

    async fn send_prompt(&self, request: &PromptRequest) -> LLMResult<PromptResponse> {
        let start = Instant::now();
        let headers = self.build_headers()?;
        let body = self.convert_request(request);
        let request_url = format!("{}/chat/completions", self.config.base_url);

        debug!(
            "{} API Request: URL={}, Model={}",
            self.config.provider, request_url, body.model
        );

        let response = self
            .client
            .post(&request_url)
            .headers(headers)
            .json(&body)
            .send()
            .await
            .map_err(|e| LLMError::from_transport(&e))?;

        if !response.status().is_success() {
            return Err(self.error_from_response(response).await);
        }

        let raw: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LLMError::Serialization(e.to_string()))?;
        let parsed: ChatCompletionResponse = serde_json::from_value(raw.clone())
            .map_err(|e| LLMError::Serialization(e.to_string()))?;

        let first = parsed.choices.first();
        let completion = first
            .and_then(|choice| choice.content())
            .unwrap_or_default()
            .to_string();
        let finish_reason = first.and_then(|choice| choice.finish_reason.clone());

        let provider = self.config.provider.as_str();
        let model = body.model;
        let reported = parsed.usage;
        let prompt_tokens = reported
            .and_then(|u| u.prompt_tokens)
            .unwrap_or_else(|| {
                self.token_counter.count_tokens(&request.system_message, provider, &model)
                    + self.token_counter.count_tokens(&request.prompt, provider, &model)
            });
        let completion_tokens = reported
            .and_then(|u| u.completion_tokens)
            .unwrap_or_else(|| self.token_counter.count_tokens(&completion, provider, &model));
        let token_usage = TokenUsage::new(prompt_tokens, completion_tokens);
        let cost = self.price_lookup.calculate_cost(
            provider,
            &model,
            token_usage.prompt_tokens,
            token_usage.completion_tokens,
        );

        Ok(PromptResponse {
            request_id: request.request_id.clone(),
            provider: self.config.provider.clone(),
            model,
            completion,
            token_usage,
            cost,
            latency_ms: elapsed_ms(start),
            status: LogStatus::Success,
            error: None,
            finish_reason,
            retry_attempts: 0,
            retry_history: Vec::new(),
            raw_response: raw,
        })
    }

    async fn list_models(&self) -> LLMResult<Vec<ModelInfo>> {
        let headers = self.build_headers()?;
        let response = self
            .client
            .get(format!("{}/models", self.config.base_url))
            .headers(headers)
            .send()
            .await
            .map_err(|e| LLMError::from_transport(&e))?;

        if !response.status().is_success() {
            return Err(self.error_from_response(response).await);
        }

        let models: ModelsResponse = response
            .json()
            .await
            .map_err(|e| LLMError::Serialization(e.to_string()))?;

        Ok(models
            .data
            .into_iter()
            .map(|entry| {
                let mut info = ModelInfo::new(entry.id, self.config.provider.clone());
                if let Some(name) = entry.name {
                    info.name = name;
                }
                info
            })
            .collect())
    }

    async fn test_connection(&self) -> bool {
        match self.list_models().await {
            Ok(_) => true,
            Err(e) => {
                debug!("{} connection test failed: {}", self.config.provider, e);
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

    fn adapter(base_url: &str) -> OpenAICompatibleAdapter {
        let config = OpenAICompatibleConfig::for_provider(LLMProviderType::OpenAI, "test-key")
            .with_base_url(base_url);
        OpenAICompatibleAdapter::new(
            config,
            Arc::new(HeuristicTokenCounter),
            Arc::new(StaticPriceTable::default()),
        )
        .unwrap()
    }

    fn prompt(model: &str) -> PromptRequest {
        PromptRequest {
            request_id: "req-1".to_string(),
            prompt: "Hello".to_string(),
            model: model.to_string(),
            system_message: "Be brief".to_string(),
            parameters: RequestParameters {
                temperature: Some(0.2),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_convert_request_includes_system_turn() {
        let adapter = adapter("http://127.0.0.1:1");
        let body = adapter.convert_request(&prompt(""));
        assert_eq!(body.model, "gpt-3.5-turbo");
        assert_eq!(body.messages.len(), 2);
        assert_eq!(body.messages[0].role, "system");
        assert_eq!(body.messages[1].content.as_deref(), Some("Hello"));
        assert_eq!(body.temperature, Some(0.2));
        assert!(!body.stream);
    }

    #[tokio::test]
    async fn test_send_prompt_uses_reported_usage() {
        let router = Router::new().route(
            "/chat/completions",
            post(|| async {
                Json(json!({
                    "id": "chatcmpl-1",
                    "choices": [{"message": {"role": "assistant", "content": "Hi!"}, "finish_reason": "stop"}],
                    "usage": {"prompt_tokens": 1000, "completion_tokens": 500, "total_tokens": 1500}
                }))
            }),
        );
        let base = spawn_upstream(router).await;

        let response = adapter(&base).send_prompt(&prompt("gpt-4")).await.unwrap();
        assert_eq!(response.completion, "Hi!");
        assert_eq!(response.finish_reason.as_deref(), Some("stop"));
        assert_eq!(response.token_usage.total_tokens, 1500);
        assert_eq!(response.cost.prompt_cost, 0.03);
        assert_eq!(response.status, LogStatus::Success);
        assert_eq!(response.request_id, "req-1");
    }

    #[tokio::test]
    async fn test_send_prompt_maps_http_errors() {
        let router = Router::new().route(
            "/chat/completions",
            post(|| async {
                (
                    axum::http::StatusCode::UNAUTHORIZED,
                    Json(json!({"error": {"message": "Invalid API key"}})),
                )
            }),
        );
        let base = spawn_upstream(router).await;

        let err = adapter(&base).send_prompt(&prompt("gpt-4")).await.unwrap_err();
        assert_eq!(err.status_code(), Some(401));
        assert!(err.to_string().contains("Invalid API key"));
    }

    #[tokio::test]
    async fn test_list_models_and_connection() {
        let router = Router::new().route(
            "/models",
            get(|| async { Json(json!({"data": [{"id": "gpt-4"}, {"id": "gpt-4o"}]})) }),
        );
        let base = spawn_upstream(router).await;
        let adapter = adapter(&base);

        let models = adapter.list_models().await.unwrap();
        assert_eq!(models.len(), 2);
        assert_eq!(models[0].id, "gpt-4");
        assert!(adapter.test_connection().await);
    }

    #[tokio::test]
    async fn test_unreachable_upstream_is_network_error() {
        let adapter = adapter("http://127.0.0.1:1");
        let err = adapter.send_prompt(&prompt("gpt-4")).await.unwrap_err();
        assert!(matches!(err, LLMError::Network { .. } | LLMError::Timeout(_)));
        assert!(!adapter.test_connection().await);
    }
}
