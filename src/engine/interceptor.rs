// Log synthesis for intercepted LLM exchanges

//! # Response Interceptor / Log Synthesizer
//!
//! Turns one intercepted HTTP exchange into a [`LogRecord`] and persists it.
//! The HTTP side (capturing bodies, forwarding the response untouched) lives
//! in `api::middleware`; everything here works on plain values so it can be
//! tested without a server.
//!
//! ## Pipeline
//!
//! 1. [`Interceptor::begin`] registers an active-request handle
//! 2. The request body is normalized into a [`CanonicalRequest`]
//! 3. The response body is classified into a [`ProviderExchange`] and reduced
//!    to a [`CanonicalEnvelope`]
//! 4. Prompt and completion are truncated, provider identity is resolved,
//!    token usage and cost are computed
//! 5. The record is appended to the [`LogStore`]. A storage failure is logged
//!    and swallowed.
//! 6. The active-request handle is removed

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error};

use super::active::ActiveRequests;
use super::exchange::{parse_body, CanonicalEnvelope, CanonicalRequest, ProviderExchange};
use super::storage::LogStore;
use crate::llm::{LLMProviderType, PriceLookup, TokenCounter};
use crate::models::{LogError, LogRecord, LogStatus, RequestParameters, TokenUsage};

/// Appended to truncated prompts and completions
pub const TRUNCATION_MARKER: &str = "... [TRUNCATED]";

/// Stored in place of redacted text
pub const REDACTED: &str = "[REDACTED]";

/// Path fragments of LLM-call-shaped endpoints
pub const LLM_PATHS: &[&str] = &[
    "/api/replay",
    "/chat/completions",
    "/completions",
    "/api/generate",
    "/complete",
];

/// Upstream hosts and the provider they belong to
const PROVIDER_HOSTS: &[(&str, &str)] = &[
    ("openai.com", "openai"),
    ("openrouter.ai", "openrouter"),
    ("mistral.ai", "mistral"),
    ("api.x.ai", "grok"),
    ("generativelanguage.googleapis.com", "gemini"),
    (":11434", "ollama"),
];

const PROVIDER_ROUTE_PREFIX: &str = "/api/providers/";

/// What to capture for each intercepted exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterceptorOptions {
    pub enabled: bool,
    pub log_prompt: bool,
    pub log_completion: bool,
    pub log_parameters: bool,
    pub max_prompt_length: usize,
    pub max_completion_length: usize,
}

impl Default for InterceptorOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            log_prompt: true,
            log_completion: true,
            log_parameters: true,
            max_prompt_length: 10_000,
            max_completion_length: 10_000,
        }
    }
}

/// Whether a request path is one the interceptor should log
pub fn is_llm_path(path: &str) -> bool {
    LLM_PATHS.iter().any(|endpoint| path.contains(endpoint))
}

/// Cut `text` to `max_chars` characters, appending the truncation marker
pub fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => format!("{}{}", &text[..byte_index], TRUNCATION_MARKER),
        None => text.to_string(),
    }
}

/// Resolve the provider of an exchange
///
/// Checked in order: upstream host, request path, the segment after
/// `/api/providers/`, an explicit `provider` in a replay body, the provider
/// reported by a monitor envelope. Falls back to `"unknown"`.
pub fn detect_provider(
    host: &str,
    path: &str,
    request: &CanonicalRequest,
    envelope_provider: Option<&str>,
) -> String {
    let host = host.to_ascii_lowercase();
    if let Some((_, provider)) = PROVIDER_HOSTS.iter().find(|(needle, _)| host.contains(needle)) {
        return provider.to_string();
    }

    let lowered_path = path.to_ascii_lowercase();
    if let Some(provider) = LLMProviderType::BUILT_IN
        .iter()
        .find(|provider| lowered_path.contains(provider.as_str()))
    {
        return provider.to_string();
    }
    if lowered_path.contains("/api/generate") {
        return LLMProviderType::Ollama.to_string();
    }

    if let Some(rest) = path.split(PROVIDER_ROUTE_PREFIX).nth(1) {
        if let Some(segment) = rest.split('/').next().filter(|s| !s.is_empty()) {
            return segment.to_string();
        }
    }

    if path.contains("/api/replay") {
        if let Some(provider) = &request.provider {
            return provider.clone();
        }
    }

    envelope_provider
        .map(str::to_string)
        .unwrap_or_else(|| "unknown".to_string())
}

/// Error details of an unsuccessful response
fn extract_error(status: u16, body: &Value) -> LogError {
    let message = body
        .pointer("/error/message")
        .and_then(Value::as_str)
        .or_else(|| body.get("error").and_then(Value::as_str))
        .or_else(|| body.get("details").and_then(Value::as_str))
        .map(str::to_string)
        .unwrap_or_else(|| format!("HTTP {}", status));

    LogError {
        message,
        code: status.to_string(),
        details: body.get("details").cloned(),
    }
}

/// One completed exchange as seen by the HTTP layer
#[derive(Debug, Clone)]
pub struct InterceptedExchange {
    pub request_id: String,
    pub host: String,
    pub path: String,
    pub user_agent: Option<String>,
    pub request_body: Value,
    pub status: u16,
    /// Raw bytes exactly as they were sent to the caller
    pub response_body: bytes::Bytes,
    pub latency_ms: u64,
}

/// Builds and persists log records
pub struct LogSynthesizer {
    store: Arc<dyn LogStore>,
    token_counter: Arc<dyn TokenCounter>,
    price_lookup: Arc<dyn PriceLookup>,
    options: InterceptorOptions,
}

impl LogSynthesizer {
    pub fn new(
        store: Arc<dyn LogStore>,
        token_counter: Arc<dyn TokenCounter>,
        price_lookup: Arc<dyn PriceLookup>,
        options: InterceptorOptions,
    ) -> Self {
        Self {
            store,
            token_counter,
            price_lookup,
            options,
        }
    }

    pub fn options(&self) -> &InterceptorOptions {
        &self.options
    }

    /// Assemble the record for an exchange without persisting it
    pub fn synthesize(&self, exchange: &InterceptedExchange) -> LogRecord {
        let request = CanonicalRequest::from_body(&exchange.request_body);
        let response_body = parse_body(&exchange.response_body);
        let envelope: CanonicalEnvelope = ProviderExchange::classify(&response_body).into_envelope();

        let provider = detect_provider(
            &exchange.host,
            &exchange.path,
            &request,
            envelope.provider.as_deref(),
        );
        let model = request
            .model
            .clone()
            .or_else(|| envelope.model.clone())
            .unwrap_or_else(|| "unknown".to_string());

        let token_usage = envelope.token_usage.unwrap_or_else(|| {
            TokenUsage::new(
                self.token_counter.count_tokens(&request.prompt, &provider, &model),
                self.token_counter.count_tokens(&envelope.completion, &provider, &model),
            )
        });
        let cost = self.price_lookup.calculate_cost(
            &provider,
            &model,
            token_usage.prompt_tokens,
            token_usage.completion_tokens,
        );

        let status = LogStatus::from_http_status(exchange.status);
        let error = (!status.is_success()).then(|| extract_error(exchange.status, &response_body));

        let prompt = if self.options.log_prompt {
            truncate(&request.prompt, self.options.max_prompt_length)
        } else {
            REDACTED.to_string()
        };
        let completion = if self.options.log_completion {
            truncate(&envelope.completion, self.options.max_completion_length)
        } else {
            REDACTED.to_string()
        };
        let parameters = if self.options.log_parameters {
            request.parameters
        } else {
            RequestParameters::default()
        };

        LogRecord {
            request_id: exchange.request_id.clone(),
            provider,
            model,
            prompt,
            completion,
            system_message: request.system_message,
            parameters,
            token_usage,
            cost,
            latency_ms: exchange.latency_ms,
            status,
            error,
            finish_reason: envelope.finish_reason,
            retry_attempts: envelope.retry_attempts,
            retry_history: envelope.retry_history,
            user_agent: exchange.user_agent.clone(),
            created_at: Utc::now(),
        }
    }

    /// Synthesize and persist; returns the record when it was stored
    pub async fn record(&self, exchange: &InterceptedExchange) -> Option<LogRecord> {
        let record = self.synthesize(exchange);
        match self.store.append(record.clone()).await {
            Ok(()) => {
                debug!(
                    "Logged {} request {} ({}, {}ms)",
                    record.provider, record.request_id, record.status, record.latency_ms
                );
                Some(record)
            }
            Err(e) => {
                error!("Failed to save log {}: {}", record.request_id, e);
                None
            }
        }
    }
}

/// Interception entry point used by the HTTP middleware
#[derive(Clone)]
pub struct Interceptor {
    synthesizer: Arc<LogSynthesizer>,
    active: Arc<ActiveRequests>,
}

impl Interceptor {
    pub fn new(synthesizer: Arc<LogSynthesizer>, active: Arc<ActiveRequests>) -> Self {
        Self { synthesizer, active }
    }

    pub fn options(&self) -> &InterceptorOptions {
        self.synthesizer.options()
    }

    /// Whether this request should be intercepted at all
    pub fn should_intercept(&self, path: &str) -> bool {
        self.options().enabled && is_llm_path(path)
    }

    /// Register the exchange as active and return its request id
    pub fn begin(&self, host: &str, path: &str, request_body: &Value) -> String {
        let request_id = uuid::Uuid::new_v4().to_string();
        let request = CanonicalRequest::from_body(request_body);
        let provider = detect_provider(host, path, &request, None);
        let model = request.model.as_deref().unwrap_or("unknown");

        self.active.begin(&request_id);
        self.active.update(&request_id, &provider, model);
        request_id
    }

    /// Record the finished exchange and drop its active handle
    pub async fn finish(&self, exchange: InterceptedExchange) -> Option<LogRecord> {
        let record = self.synthesizer.record(&exchange).await;
        self.active.complete(&exchange.request_id);
        record
    }

    pub fn active_requests(&self) -> &Arc<ActiveRequests> {
        &self.active
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::storage::test_support::FlakyLogStore;
    use crate::engine::storage::InMemoryLogStore;
    use crate::llm::cost::{HeuristicTokenCounter, StaticPriceTable};
    use serde_json::json;

    fn synthesizer(store: Arc<dyn LogStore>, options: InterceptorOptions) -> LogSynthesizer {
        LogSynthesizer::new(
            store,
            Arc::new(HeuristicTokenCounter),
            Arc::new(StaticPriceTable::default()),
            options,
        )
    }

    fn exchange(path: &str, request_body: Value, status: u16, response: Value) -> InterceptedExchange {
        InterceptedExchange {
            request_id: "req-test".to_string(),
            host: "localhost:3000".to_string(),
            path: path.to_string(),
            user_agent: Some("test-agent".to_string()),
            request_body,
            status,
            response_body: bytes::Bytes::from(response.to_string()),
            latency_ms: 42,
        }
    }

    #[test]
    fn test_chat_exchange_is_synthesized() {
        let synth = synthesizer(Arc::new(InMemoryLogStore::new()), InterceptorOptions::default());
        let record = synth.synthesize(&exchange(
            "/proxy/openai/v1/chat/completions",
            json!({
                "model": "gpt-3.5-turbo",
                "messages": [
                    {"role": "system", "content": "S"},
                    {"role": "user", "content": "P"}
                ]
            }),
            200,
            json!({"choices": [{"message": {"content": "C"}}]}),
        ));

        assert_eq!(record.prompt, "P");
        assert_eq!(record.system_message, "S");
        assert_eq!(record.completion, "C");
        assert_eq!(record.provider, "openai");
        assert_eq!(record.model, "gpt-3.5-turbo");
        assert_eq!(record.status, LogStatus::Success);
        assert_eq!(record.latency_ms, 42);
        // no usage in the response, so both sides were counted
        assert_eq!(record.token_usage, TokenUsage::new(1, 1));
        assert_eq!(
            record.cost.total_cost,
            record.cost.prompt_cost + record.cost.completion_cost
        );
        assert!(record.error.is_none());
    }

    #[test]
    fn test_long_prompt_is_truncated_exactly() {
        let synth = synthesizer(Arc::new(InMemoryLogStore::new()), InterceptorOptions::default());
        let prompt = "x".repeat(12_000);
        let record = synth.synthesize(&exchange(
            "/api/generate",
            json!({"model": "llama2", "prompt": prompt}),
            200,
            json!({"response": "ok", "done": true}),
        ));

        assert_eq!(record.prompt.chars().count(), 10_000 + TRUNCATION_MARKER.len());
        assert!(record.prompt.ends_with(TRUNCATION_MARKER));
        assert_eq!(record.provider, "ollama");
        // usage is counted on the full prompt
        assert_eq!(record.token_usage.prompt_tokens, 3_000);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), format!("hé{}", TRUNCATION_MARKER));
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("exact", 5), "exact");
    }

    #[test]
    fn test_provider_detection_order() {
        let empty = CanonicalRequest::default();
        assert_eq!(detect_provider("api.openai.com", "/v1/chat/completions", &empty, None), "openai");
        assert_eq!(detect_provider("localhost", "/proxy/mistral/v1/chat/completions", &empty, None), "mistral");
        assert_eq!(detect_provider("localhost", "/api/providers/acme/complete", &empty, None), "acme");

        let replay = CanonicalRequest {
            provider: Some("openrouter".to_string()),
            ..Default::default()
        };
        assert_eq!(detect_provider("localhost", "/api/replay", &replay, None), "openrouter");
        assert_eq!(detect_provider("localhost", "/api/replay/log/abc", &empty, Some("grok")), "grok");
        assert_eq!(detect_provider("localhost", "/completions", &empty, None), "unknown");
    }

    #[test]
    fn test_llm_path_allow_list() {
        assert!(is_llm_path("/api/replay"));
        assert!(is_llm_path("/api/providers/openai/complete"));
        assert!(is_llm_path("/proxy/ollama/api/generate"));
        assert!(!is_llm_path("/api/models"));
        assert!(!is_llm_path("/health"));
    }

    #[test]
    fn test_status_and_error_details() {
        let synth = synthesizer(Arc::new(InMemoryLogStore::new()), InterceptorOptions::default());
        let record = synth.synthesize(&exchange(
            "/api/providers/openai/complete",
            json!({"prompt": "hi", "model": "gpt-4"}),
            429,
            json!({"error": {"message": "slow down"}}),
        ));
        assert_eq!(record.status, LogStatus::RateLimited);
        let error = record.error.unwrap();
        assert_eq!(error.message, "slow down");
        assert_eq!(error.code, "429");

        let timeout = synth.synthesize(&exchange(
            "/api/replay",
            json!({"prompt": "hi"}),
            504,
            json!({"success": false, "error": "Gateway timeout", "details": "upstream"}),
        ));
        assert_eq!(timeout.status, LogStatus::Timeout);
        let error = timeout.error.unwrap();
        assert_eq!(error.message, "Gateway timeout");
        assert_eq!(error.details, Some(json!("upstream")));
    }

    #[test]
    fn test_redaction_toggles() {
        let options = InterceptorOptions {
            log_prompt: false,
            log_completion: false,
            log_parameters: false,
            ..Default::default()
        };
        let synth = synthesizer(Arc::new(InMemoryLogStore::new()), options);
        let record = synth.synthesize(&exchange(
            "/chat/completions",
            json!({"messages": [{"role": "user", "content": "secret"}], "temperature": 0.9}),
            200,
            json!({"choices": [{"text": "also secret"}]}),
        ));
        assert_eq!(record.prompt, REDACTED);
        assert_eq!(record.completion, REDACTED);
        assert_eq!(record.parameters, RequestParameters::default());
    }

    #[test]
    fn test_monitor_envelope_usage_and_retries() {
        let synth = synthesizer(Arc::new(InMemoryLogStore::new()), InterceptorOptions::default());
        let record = synth.synthesize(&exchange(
            "/api/replay",
            json!({"prompt": "hi", "provider": "mistral", "model": "mistral-small"}),
            200,
            json!({
                "success": true,
                "data": {
                    "completion": "hello",
                    "provider": "mistral",
                    "tokenUsage": {"promptTokens": 3, "completionTokens": 4},
                    "retryAttempts": 2
                }
            }),
        ));
        assert_eq!(record.provider, "mistral");
        assert_eq!(record.token_usage, TokenUsage::new(3, 4));
        assert_eq!(record.retry_attempts, 2);
    }

    #[test]
    fn test_exhausted_retries_are_recorded_on_error() {
        let synth = synthesizer(Arc::new(InMemoryLogStore::new()), InterceptorOptions::default());
        let record = synth.synthesize(&exchange(
            "/api/providers/openai/complete",
            json!({"prompt": "hi", "model": "gpt-4"}),
            502,
            json!({
                "success": false,
                "error": "Retries exhausted after 3 attempts: HTTP 503: down",
                "details": {
                    "lastError": "HTTP 503: down",
                    "code": null,
                    "statusCode": 503,
                    "totalAttempts": 3,
                    "retryHistory": [
                        {"attemptNumber": 2, "timestamp": "2024-01-01T00:00:00Z", "succeeded": false, "errorCode": "503", "latencyMs": 5},
                        {"attemptNumber": 3, "timestamp": "2024-01-01T00:00:01Z", "succeeded": false, "errorCode": "503", "latencyMs": 7}
                    ]
                }
            }),
        ));

        assert_eq!(record.status, LogStatus::Error);
        assert_eq!(record.retry_attempts, 2);
        assert_eq!(record.retry_history.len(), 2);
        assert_eq!(record.retry_history[1].attempt_number, 3);
        let error = record.error.unwrap();
        assert_eq!(error.code, "502");
        assert!(error.message.starts_with("Retries exhausted"));
    }

    #[tokio::test]
    async fn test_persistence_failure_is_swallowed() {
        let store = Arc::new(FlakyLogStore::new(true));
        let synth = Arc::new(synthesizer(store.clone(), InterceptorOptions::default()));
        let active = Arc::new(ActiveRequests::new());
        let interceptor = Interceptor::new(synth, active.clone());

        let body = json!({"prompt": "hi", "model": "llama2"});
        let request_id = interceptor.begin("localhost", "/api/generate", &body);
        assert_eq!(active.get(&request_id).unwrap().provider, "ollama");

        let mut completed = exchange("/api/generate", body, 200, json!({"response": "yo"}));
        completed.request_id = request_id.clone();

        assert!(interceptor.finish(completed).await.is_none());
        assert!(active.is_empty());
        assert!(store.inner.is_empty());
    }

    #[tokio::test]
    async fn test_record_is_persisted() {
        let store = Arc::new(InMemoryLogStore::new());
        let synth = synthesizer(store.clone(), InterceptorOptions::default());
        let stored = synth
            .record(&exchange("/api/generate", json!({"prompt": "a"}), 200, json!({"response": "b"})))
            .await
            .unwrap();
        assert_eq!(stored.completion, "b");
        assert!(store.get("req-test").await.unwrap().is_some());
    }
}
