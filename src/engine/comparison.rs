// Comparison orchestration - one prompt, several provider/model configurations

//! # Comparison Orchestrator
//!
//! Runs the same prompt against up to five provider/model configurations and
//! ranks the successful ones. Calls are dispatched through a
//! [`BoundedPool`]: at most `concurrency_limit` run at once, each window is
//! settled in full before the next one starts, and results keep their
//! original index whatever order they complete in.
//!
//! Each call goes through [`ResilienceContext::call_provider`], so it is
//! retried with its own provider's retry profile and guarded by that
//! provider's circuit breaker. One failing configuration never aborts the
//! others.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::llm::providers::ProviderRegistry;
use crate::llm::{LLMError, LLMResult, PromptRequest, PromptResponse};
use crate::models::{
    ComparisonBatch, ComparisonConfig, ComparisonMetrics, ComparisonReport, ComparisonResult,
    ComparisonStatus, RankingEntry,
};
use crate::resilience::{BoundedPool, ResilienceContext};
use crate::{MonitorError, Result};

/// Limits applied to comparison requests
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComparisonSettings {
    pub max_configs: usize,
    pub concurrency_limit: usize,
    pub window_delay_ms: u64,
}

impl Default for ComparisonSettings {
    fn default() -> Self {
        Self {
            max_configs: 5,
            concurrency_limit: 3,
            window_delay_ms: 100,
        }
    }
}

pub struct ComparisonOrchestrator {
    registry: Arc<ProviderRegistry>,
    resilience: Arc<ResilienceContext>,
    pool: BoundedPool,
    max_configs: usize,
}

impl ComparisonOrchestrator {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        resilience: Arc<ResilienceContext>,
        settings: &ComparisonSettings,
    ) -> Self {
        Self {
            registry,
            resilience,
            pool: BoundedPool::new(
                settings.concurrency_limit,
                Duration::from_millis(settings.window_delay_ms),
            ),
            max_configs: settings.max_configs,
        }
    }

    /// Reject a batch before any provider is called
    pub fn validate(&self, batch: &ComparisonBatch) -> Result<()> {
        if batch.prompt.trim().is_empty() || batch.configs.is_empty() {
            return Err(MonitorError::Validation(
                "Missing required fields: prompt and configurations/providers array".to_string(),
            ));
        }
        if batch.configs.len() > self.max_configs {
            return Err(MonitorError::Validation(format!(
                "Maximum {} configurations allowed for comparison",
                self.max_configs
            )));
        }
        Ok(())
    }

    async fn run_one(&self, batch: &ComparisonBatch, index: usize, config: &ComparisonConfig) -> LLMResult<PromptResponse> {
        let adapter = self.registry.resolve(&config.provider)?;
        let request = PromptRequest {
            request_id: format!("compare_{}_{}", Uuid::new_v4(), index),
            prompt: batch.prompt.clone(),
            model: config.model.clone(),
            system_message: batch.system_message.clone(),
            parameters: batch.defaults.merged_with(&config.parameters),
        };
        self.resilience.call_provider(adapter.as_ref(), &request).await
    }

    /// Run every configuration and rank the ones that succeeded
    pub async fn compare(&self, batch: ComparisonBatch) -> Result<ComparisonReport> {
        self.validate(&batch)?;
        info!(
            "Comparing {} configuration(s) with concurrency limit {}",
            batch.configs.len(),
            self.pool.concurrency_limit()
        );

        let tasks: Vec<_> = batch
            .configs
            .iter()
            .enumerate()
            .map(|(index, config)| self.run_one(&batch, index, config))
            .collect();
        let outcomes = self.pool.settle_all(tasks).await;

        let results: Vec<ComparisonResult> = outcomes
            .into_iter()
            .zip(batch.configs.iter())
            .enumerate()
            .map(|(index, (outcome, config))| settle(index, config, outcome))
            .collect();

        let metrics = rank(&results);
        Ok(ComparisonReport {
            prompt: batch.prompt,
            system_message: batch.system_message,
            timestamp: Utc::now(),
            results,
            metrics,
        })
    }
}

fn settle(index: usize, config: &ComparisonConfig, outcome: LLMResult<PromptResponse>) -> ComparisonResult {
    match outcome {
        Ok(response) => ComparisonResult {
            config_index: index,
            configuration: config.clone(),
            status: ComparisonStatus::Fulfilled,
            data: Some(response),
            error: None,
        },
        Err(e) => {
            warn!("Comparison config {} ({}) failed: {}", index, config.label(), e);
            let message = match e {
                LLMError::ProviderNotFound(provider) => format!("Unsupported provider: {}", provider),
                other => other.to_string(),
            };
            ComparisonResult {
                config_index: index,
                configuration: config.clone(),
                status: ComparisonStatus::Rejected,
                data: None,
                error: Some(message),
            }
        }
    }
}

fn projection<F>(fulfilled: &[(&ComparisonResult, &PromptResponse)], value: F, descending: bool) -> Vec<RankingEntry>
where
    F: Fn(&PromptResponse) -> f64,
{
    let mut entries: Vec<RankingEntry> = fulfilled
        .iter()
        .map(|(result, response)| RankingEntry {
            config: result.configuration.label(),
            config_index: result.config_index,
            value: value(response),
        })
        .collect();
    entries.sort_by(|a, b| {
        let ordering = a.value.partial_cmp(&b.value).unwrap_or(Ordering::Equal);
        if descending {
            ordering.reverse()
        } else {
            ordering
        }
    });
    entries
}

/// Four independent rankings, only when more than one config succeeded
pub fn rank(results: &[ComparisonResult]) -> Option<ComparisonMetrics> {
    let fulfilled: Vec<(&ComparisonResult, &PromptResponse)> = results
        .iter()
        .filter(|r| r.status == ComparisonStatus::Fulfilled)
        .filter_map(|r| r.data.as_ref().map(|data| (r, data)))
        .collect();

    if fulfilled.len() < 2 {
        return None;
    }

    Some(ComparisonMetrics {
        latency_comparison: projection(&fulfilled, |r| r.latency_ms as f64, false),
        cost_comparison: projection(&fulfilled, |r| r.cost.total_cost, false),
        token_comparison: projection(&fulfilled, |r| r.token_usage.total_tokens as f64, false),
        response_length: projection(&fulfilled, |r| r.completion.chars().count() as f64, true),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::active::ActiveRequests;
    use crate::llm::LLMProviderType;
    use crate::models::RequestParameters;
    use crate::resilience::context::test_support::FakeAdapter;
    use crate::resilience::{CircuitBreakerConfig, RetryConfig};

    fn config(provider: &str, model: &str) -> ComparisonConfig {
        ComparisonConfig {
            provider: provider.to_string(),
            model: model.to_string(),
            parameters: RequestParameters::default(),
        }
    }

    fn batch(configs: Vec<ComparisonConfig>) -> ComparisonBatch {
        ComparisonBatch {
            prompt: "Explain backoff".to_string(),
            system_message: String::new(),
            configs,
            defaults: RequestParameters::default(),
        }
    }

    fn orchestrator(adapters: Vec<FakeAdapter>) -> (ComparisonOrchestrator, Vec<Arc<FakeAdapter>>) {
        let mut registry = ProviderRegistry::new();
        let adapters: Vec<Arc<FakeAdapter>> = adapters.into_iter().map(Arc::new).collect();
        for adapter in &adapters {
            registry.register(adapter.clone());
        }
        let resilience = ResilienceContext::new(CircuitBreakerConfig::default(), Arc::new(ActiveRequests::new()))
            .with_retry_override(LLMProviderType::Mistral, RetryConfig::new(0, 10, 10));
        (
            ComparisonOrchestrator::new(
                Arc::new(registry),
                Arc::new(resilience),
                &ComparisonSettings::default(),
            ),
            adapters,
        )
    }

    #[tokio::test]
    async fn test_six_configs_rejected_before_any_call() {
        let (orchestrator, adapters) = orchestrator(vec![FakeAdapter::new(LLMProviderType::OpenAI)]);
        let configs = (0..6).map(|i| config("openai", &format!("m{}", i))).collect();

        let err = orchestrator.compare(batch(configs)).await.unwrap_err();
        assert!(matches!(err, MonitorError::Validation(_)));
        assert_eq!(adapters[0].calls(), 0);
    }

    #[tokio::test]
    async fn test_empty_configs_rejected() {
        let (orchestrator, _) = orchestrator(vec![]);
        assert!(matches!(
            orchestrator.compare(batch(vec![])).await,
            Err(MonitorError::Validation(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_results_keep_index_and_failures_are_isolated() {
        let (orchestrator, _) = orchestrator(vec![
            FakeAdapter::new(LLMProviderType::OpenAI)
                .with_latency(Duration::from_millis(300))
                .with_cost(0.02),
            FakeAdapter::new(LLMProviderType::Ollama)
                .with_latency(Duration::from_millis(50))
                .with_cost(0.0),
            FakeAdapter::new(LLMProviderType::Mistral).with_script(vec![Err(LLMError::Http {
                status: 401,
                message: "bad key".to_string(),
            })]),
        ]);

        let report = orchestrator
            .compare(batch(vec![
                config("openai", "gpt-4o"),
                config("mistral", "mistral-small"),
                config("ollama", "llama2"),
                config("gemini", "gemini-pro"),
                config("ollama", "mistral"),
            ]))
            .await
            .unwrap();

        let statuses: Vec<ComparisonStatus> = report.results.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![
                ComparisonStatus::Fulfilled,
                ComparisonStatus::Rejected,
                ComparisonStatus::Fulfilled,
                ComparisonStatus::Rejected,
                ComparisonStatus::Fulfilled,
            ]
        );
        for (index, result) in report.results.iter().enumerate() {
            assert_eq!(result.config_index, index);
        }
        assert_eq!(
            report.results[3].error.as_deref(),
            Some("Unsupported provider: gemini")
        );

        let metrics = report.metrics.unwrap();
        assert_eq!(metrics.latency_comparison.len(), 3);
        assert_eq!(metrics.latency_comparison[0].config, "ollama/llama2");
        assert_eq!(metrics.latency_comparison[2].config, "openai/gpt-4o");
        assert_eq!(metrics.cost_comparison[2].config_index, 0);
    }

    #[tokio::test]
    async fn test_request_ids_and_parameter_defaults() {
        let (orchestrator, _) = orchestrator(vec![FakeAdapter::new(LLMProviderType::OpenAI)]);
        let mut request = batch(vec![config("openai", "gpt-4o")]);
        request.defaults.temperature = Some(0.4);

        let report = orchestrator.compare(request).await.unwrap();
        let data = report.results[0].data.as_ref().unwrap();
        assert!(data.request_id.starts_with("compare_"));
        assert!(data.request_id.ends_with("_0"));
        // a single success produces no rankings
        assert!(report.metrics.is_none());
    }

    #[test]
    fn test_response_length_ranking_is_descending() {
        let make = |index: usize, completion: &str| {
            let mut response = serde_json::from_value::<PromptResponse>(serde_json::json!({
                "requestId": format!("r{}", index),
                "provider": "openai",
                "model": "m",
                "completion": completion,
                "tokenUsage": {"promptTokens": 1, "completionTokens": 1, "totalTokens": 2},
                "cost": {"promptCost": 0.0, "completionCost": 0.0, "totalCost": 0.0, "currency": "USD"},
                "latencyMs": 5,
                "status": "success"
            }))
            .unwrap();
            response.completion = completion.to_string();
            ComparisonResult {
                config_index: index,
                configuration: config("openai", &format!("m{}", index)),
                status: ComparisonStatus::Fulfilled,
                data: Some(response),
                error: None,
            }
        };

        let metrics = rank(&[make(0, "short"), make(1, "much longer answer")]).unwrap();
        assert_eq!(metrics.response_length[0].config_index, 1);
        assert_eq!(metrics.response_length[0].value, 18.0);
        assert_eq!(metrics.token_comparison.len(), 2);
    }
}
