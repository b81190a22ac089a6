//! Resilience context
//!
//! Owns the state shared by every resilient provider call: the circuit
//! breaker registry and the active-request table. One context is built at
//! startup and handed to the components that need it.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use super::circuit::{CircuitBreakerConfig, CircuitBreakerRegistry};
use super::retry::{RetryConfig, RetryExecutor};
use crate::engine::active::ActiveRequests;
use crate::llm::{LLMProviderType, LLMResult, PromptRequest, PromptResponse, ProviderAdapter};

#[derive(Debug)]
pub struct ResilienceContext {
    breakers: CircuitBreakerRegistry,
    active_requests: Arc<ActiveRequests>,
    retry_overrides: HashMap<LLMProviderType, RetryConfig>,
}

impl ResilienceContext {
    pub fn new(breaker_config: CircuitBreakerConfig, active_requests: Arc<ActiveRequests>) -> Self {
        Self {
            breakers: CircuitBreakerRegistry::new(breaker_config),
            active_requests,
            retry_overrides: HashMap::new(),
        }
    }

    /// Replace the built-in retry profile for one provider
    #[must_use]
    pub fn with_retry_override(mut self, provider: LLMProviderType, config: RetryConfig) -> Self {
        self.retry_overrides.insert(provider, config);
        self
    }

    pub fn retry_config_for(&self, provider: &LLMProviderType) -> RetryConfig {
        self.retry_overrides
            .get(provider)
            .cloned()
            .unwrap_or_else(|| RetryConfig::for_provider(provider))
    }

    pub fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    pub fn active_requests(&self) -> &Arc<ActiveRequests> {
        &self.active_requests
    }

    /// Breaker key for an adapter's prompt call
    pub fn call_site(provider: &LLMProviderType) -> String {
        format!("{}:send_prompt", provider)
    }

    /// Send one prompt with retry, each attempt guarded by the provider's breaker
    ///
    /// The returned response carries the retry metadata of this call.
    pub async fn call_provider(
        &self,
        adapter: &dyn ProviderAdapter,
        request: &PromptRequest,
    ) -> LLMResult<PromptResponse> {
        let provider = adapter.provider_type();
        let executor = RetryExecutor::new(self.retry_config_for(&provider));
        let breaker = self.breakers.get_or_create(&Self::call_site(&provider));

        debug!(
            "Calling {} model {} for request {}",
            provider, request.model, request.request_id
        );

        let outcome = executor
            .execute(|| breaker.execute(|| adapter.send_prompt(request)))
            .await?;

        let mut response = outcome.result;
        response.retry_attempts = outcome.total_attempts.saturating_sub(1);
        response.retry_history = outcome.retry_history;
        Ok(response)
    }
}

impl Default for ResilienceContext {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default(), Arc::new(ActiveRequests::new()))
    }
}
