// Provider exchange parsing - wire shapes in, canonical envelope out

//! # Provider Exchanges
//!
//! An intercepted exchange can carry any of several wire shapes. Each shape
//! is a variant of [`ProviderExchange`] with its own parser, and every
//! variant reduces to the same [`CanonicalEnvelope`]. The log synthesizer
//! only ever looks at the envelope.
//!
//! Response shapes are recognized in this order, first match wins:
//! 1. Chat completions: a `choices` array (OpenAI, OpenRouter, Mistral, Grok)
//! 2. Monitor envelope: `data.completion` (this service's own endpoints)
//! 3. Monitor error: `success: false` with retry `details` (same endpoints,
//!    after retries ran out)
//! 4. Ollama generate: a flat `response` field
//! 5. A flat `result` field
//!
//! The request side is handled by [`CanonicalRequest::from_body`].

use serde::Deserialize;
use serde_json::{json, Value};

use crate::llm::providers::ollama::OllamaGenerateResponse;
use crate::llm::providers::openai::types::{ChatChoice, ChatCompletionResponse, ChatMessage};
use crate::models::{RequestParameters, RetryAttempt, TokenUsage};

/// Decode a captured body into JSON
///
/// Bodies that are not JSON are kept as `{"rawData": "<text>"}`. A JSON
/// string that itself holds JSON is decoded once more.
pub fn parse_body(bytes: &[u8]) -> Value {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return json!({});
    }
    match serde_json::from_slice::<Value>(bytes) {
        Ok(Value::String(text)) => {
            serde_json::from_str(&text).unwrap_or_else(|_| json!({ "rawData": text }))
        }
        Ok(value) => value,
        Err(_) => json!({ "rawData": String::from_utf8_lossy(bytes) }),
    }
}

/// Normalized view of an inbound request body
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CanonicalRequest {
    pub prompt: String,
    pub system_message: String,
    pub model: Option<String>,
    /// Explicit `provider` field, as sent by replay-shaped bodies
    pub provider: Option<String>,
    pub parameters: RequestParameters,
}

impl CanonicalRequest {
    pub fn from_body(body: &Value) -> Self {
        let messages = body.get("messages").and_then(Value::as_array);

        let prompt = match messages {
            Some(messages) => turn_content(messages, "user"),
            None => non_empty_str(body, "prompt").or_else(|| non_empty_str(body, "input")),
        }
        .unwrap_or_default();

        let system_message = match messages {
            Some(messages) => turn_content(messages, "system"),
            None => non_empty_str(body, "system").or_else(|| non_empty_str(body, "systemMessage")),
        }
        .unwrap_or_default();

        Self {
            prompt,
            system_message,
            model: non_empty_str(body, "model"),
            provider: non_empty_str(body, "provider"),
            parameters: extract_parameters(body),
        }
    }
}

fn non_empty_str(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn turn_content(messages: &[Value], role: &str) -> Option<String> {
    messages
        .iter()
        .find(|m| m.get("role").and_then(Value::as_str) == Some(role))
        .and_then(|m| non_empty_str(m, "content"))
}

fn first_f64(body: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|key| body.get(*key).and_then(Value::as_f64))
}

/// Sampling parameters, each read on its own so one malformed field does
/// not discard the rest
fn extract_parameters(body: &Value) -> RequestParameters {
    let stop = match body.get("stop") {
        Some(Value::String(sequence)) => Some(vec![sequence.clone()]),
        Some(Value::Array(items)) => Some(
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
        ),
        _ => None,
    };

    RequestParameters {
        temperature: first_f64(body, &["temperature"]),
        max_tokens: ["max_tokens", "maxTokens"]
            .iter()
            .find_map(|key| body.get(*key).and_then(Value::as_u64))
            .map(|n| n.min(u32::MAX as u64) as u32),
        top_p: first_f64(body, &["top_p", "topP"]),
        frequency_penalty: first_f64(body, &["frequency_penalty", "frequencyPenalty"]),
        presence_penalty: first_f64(body, &["presence_penalty", "presencePenalty"]),
        stop,
    }
}

/// The normalized completion side of an exchange
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CanonicalEnvelope {
    pub completion: String,
    /// Usage reported by the provider, if the shape carries it
    pub token_usage: Option<TokenUsage>,
    pub finish_reason: Option<String>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub retry_attempts: u32,
    pub retry_history: Vec<RetryAttempt>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EnvelopeUsage {
    #[serde(default)]
    prompt_tokens: Option<u32>,
    #[serde(default)]
    completion_tokens: Option<u32>,
    #[serde(default)]
    total_tokens: Option<u32>,
}

/// `data` payload of the monitor's own `{success, data}` responses
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorEnvelope {
    #[serde(default)]
    completion: String,
    #[serde(default)]
    provider: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    token_usage: Option<EnvelopeUsage>,
    #[serde(default)]
    finish_reason: Option<String>,
    #[serde(default)]
    retry_attempts: u32,
    #[serde(default)]
    retry_history: Vec<RetryAttempt>,
}

/// `details` of the monitor's own `{success: false, error, details}` responses
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorErrorDetails {
    #[serde(default)]
    total_attempts: Option<u32>,
    #[serde(default)]
    retry_history: Vec<RetryAttempt>,
}

impl MonitorErrorDetails {
    fn from_body(body: &Value) -> Option<Self> {
        if body.get("success").and_then(Value::as_bool) != Some(false) {
            return None;
        }
        let details = body.get("details").filter(|d| {
            d.get("totalAttempts").is_some() || d.get("retryHistory").is_some()
        })?;
        MonitorErrorDetails::deserialize(details).ok()
    }
}

/// Field-by-field read of a choices body the typed parse rejected
fn loose_chat_response(body: &Value, choices: &[Value]) -> ChatCompletionResponse {
    let first = choices.first();
    let content = first
        .and_then(|choice| choice.get("message"))
        .and_then(|message| message.get("content"))
        .and_then(Value::as_str)
        .map(str::to_string);
    let choice = ChatChoice {
        message: content.map(|content| ChatMessage {
            role: String::new(),
            content: Some(content),
        }),
        text: first
            .and_then(|choice| choice.get("text"))
            .and_then(Value::as_str)
            .map(str::to_string),
        finish_reason: first
            .and_then(|choice| choice.get("finish_reason"))
            .and_then(Value::as_str)
            .map(str::to_string),
    };

    ChatCompletionResponse {
        id: None,
        model: non_empty_str(body, "model"),
        choices: vec![choice],
        usage: None,
    }
}

/// Recognized response shapes
#[derive(Debug, Clone)]
pub enum ProviderExchange {
    ChatCompletions(ChatCompletionResponse),
    MonitorEnvelope(MonitorEnvelope),
    MonitorError(MonitorErrorDetails),
    OllamaGenerate(OllamaGenerateResponse),
    ResultField(String),
    Unrecognized,
}

impl ProviderExchange {
    /// Identify the shape of a decoded response body
    pub fn classify(body: &Value) -> Self {
        if let Some(choices) = body.get("choices").and_then(Value::as_array) {
            let response = ChatCompletionResponse::deserialize(body)
                .unwrap_or_else(|_| loose_chat_response(body, choices));
            return ProviderExchange::ChatCompletions(response);
        }

        if let Some(data) = body.get("data") {
            if let Some(completion) = non_empty_str(data, "completion") {
                let envelope = MonitorEnvelope::deserialize(data).unwrap_or_else(|_| MonitorEnvelope {
                    completion,
                    ..Default::default()
                });
                return ProviderExchange::MonitorEnvelope(envelope);
            }
        }

        if let Some(details) = MonitorErrorDetails::from_body(body) {
            return ProviderExchange::MonitorError(details);
        }

        if non_empty_str(body, "response").is_some() {
            if let Ok(response) = OllamaGenerateResponse::deserialize(body) {
                return ProviderExchange::OllamaGenerate(response);
            }
        }

        if let Some(result) = non_empty_str(body, "result") {
            return ProviderExchange::ResultField(result);
        }

        ProviderExchange::Unrecognized
    }

    pub fn into_envelope(self) -> CanonicalEnvelope {
        match self {
            ProviderExchange::ChatCompletions(response) => {
                let first = response.choices.first();
                CanonicalEnvelope {
                    completion: first
                        .and_then(|choice| choice.content())
                        .unwrap_or_default()
                        .to_string(),
                    token_usage: response.usage.map(|usage| {
                        TokenUsage::validated(
                            usage.prompt_tokens,
                            usage.completion_tokens,
                            usage.total_tokens,
                        )
                    }),
                    finish_reason: first.and_then(|choice| choice.finish_reason.clone()),
                    model: response.model,
                    ..Default::default()
                }
            }
            ProviderExchange::MonitorEnvelope(envelope) => CanonicalEnvelope {
                completion: envelope.completion,
                token_usage: envelope.token_usage.map(|usage| {
                    TokenUsage::validated(
                        usage.prompt_tokens,
                        usage.completion_tokens,
                        usage.total_tokens,
                    )
                }),
                finish_reason: envelope.finish_reason,
                provider: envelope.provider,
                model: envelope.model,
                retry_attempts: envelope.retry_attempts,
                retry_history: envelope.retry_history,
            },
            ProviderExchange::MonitorError(details) => CanonicalEnvelope {
                retry_attempts: details
                    .total_attempts
                    .map(|total| total.saturating_sub(1))
                    .unwrap_or(details.retry_history.len() as u32),
                retry_history: details.retry_history,
                ..Default::default()
            },
            ProviderExchange::OllamaGenerate(response) => {
                let token_usage = match (response.prompt_eval_count, response.eval_count) {
                    (None, None) => None,
                    (prompt, completion) => Some(TokenUsage::validated(prompt, completion, None)),
                };
                CanonicalEnvelope {
                    finish_reason: Some(response.finish_reason()),
                    completion: response.response,
                    token_usage,
                    model: response.model,
                    ..Default::default()
                }
            }
            ProviderExchange::ResultField(result) => CanonicalEnvelope {
                completion: result,
                ..Default::default()
            },
            ProviderExchange::Unrecognized => CanonicalEnvelope::default(),
        }
    }
}
