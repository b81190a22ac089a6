//! LLM Provider Contracts and Shared Types
//!
//! This module provides the provider-facing layer of the monitor: the
//! provider identities, the request/response envelope every adapter speaks,
//! the error type shared by adapters and the resilience layer, and the
//! collaborator contracts for token counting and price lookup.

pub mod cost;
pub mod providers;
pub mod traits;

use serde::{Deserialize, Serialize};

use crate::models::{CostBreakdown, LogStatus, RequestParameters, RetryAttempt, TokenUsage};

pub use traits::{PriceLookup, ProviderAdapter, TokenCounter};

/// LLM provider types known to the monitor
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum LLMProviderType {
    OpenAI,
    OpenRouter,
    Mistral,
    Ollama,
    Gemini,
    Grok,
    Custom(String),
}

impl LLMProviderType {
    /// All built-in providers, in the order they are probed
    pub const BUILT_IN: [LLMProviderType; 6] = [
        LLMProviderType::OpenAI,
        LLMProviderType::OpenRouter,
        LLMProviderType::Mistral,
        LLMProviderType::Ollama,
        LLMProviderType::Gemini,
        LLMProviderType::Grok,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            LLMProviderType::OpenAI => "openai",
            LLMProviderType::OpenRouter => "openrouter",
            LLMProviderType::Mistral => "mistral",
            LLMProviderType::Ollama => "ollama",
            LLMProviderType::Gemini => "gemini",
            LLMProviderType::Grok => "grok",
            LLMProviderType::Custom(name) => name,
        }
    }
}

impl std::fmt::Display for LLMProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<&str> for LLMProviderType {
    fn from(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "openai" => LLMProviderType::OpenAI,
            "openrouter" => LLMProviderType::OpenRouter,
            "mistral" => LLMProviderType::Mistral,
            "ollama" => LLMProviderType::Ollama,
            "gemini" => LLMProviderType::Gemini,
            "grok" => LLMProviderType::Grok,
            other => LLMProviderType::Custom(other.to_string()),
        }
    }
}

impl From<String> for LLMProviderType {
    fn from(name: String) -> Self {
        LLMProviderType::from(name.as_str())
    }
}

impl From<LLMProviderType> for String {
    fn from(provider: LLMProviderType) -> Self {
        provider.as_str().to_string()
    }
}

/// A prompt to send through a provider adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptRequest {
    pub request_id: String,
    pub prompt: String,
    pub model: String,
    #[serde(default)]
    pub system_message: String,
    #[serde(default)]
    pub parameters: RequestParameters,
}

/// Normalized adapter response
///
/// This is also the `data` payload of the monitor's own completion endpoints,
/// which is why the interceptor knows how to read it back.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptResponse {
    pub request_id: String,
    pub provider: LLMProviderType,
    pub model: String,
    pub completion: String,
    pub token_usage: TokenUsage,
    pub cost: CostBreakdown,
    #[serde(alias = "latency")]
    pub latency_ms: u64,
    pub status: LogStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    #[serde(default)]
    pub retry_attempts: u32,
    #[serde(default)]
    pub retry_history: Vec<RetryAttempt>,
    #[serde(default)]
    pub raw_response: serde_json::Value,
}

/// Error types for provider operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum LLMError {
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Network error: {message}")]
    Network { code: Option<String>, message: String },

    #[error("Request timeout: {0}")]
    Timeout(String),

    #[error("Circuit breaker is OPEN for {0} - too many recent failures")]
    CircuitOpen(String),

    #[error("Request failed after {total_attempts} attempts: {last_error}")]
    RetriesExhausted {
        last_error: Box<LLMError>,
        retry_history: Vec<RetryAttempt>,
        total_attempts: u32,
    },

    #[error("Provider not found: {0}")]
    ProviderNotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl LLMError {
    /// HTTP status carried by this error, if any
    pub fn status_code(&self) -> Option<u16> {
        match self {
            LLMError::Http { status, .. } => Some(*status),
            LLMError::RetriesExhausted { last_error, .. } => last_error.status_code(),
            _ => None,
        }
    }

    /// Transport-level error code (`ECONNRESET`, `ETIMEDOUT`, ...), if any
    pub fn error_code(&self) -> Option<&str> {
        match self {
            LLMError::Network { code, .. } => code.as_deref(),
            LLMError::Timeout(_) => Some("ETIMEDOUT"),
            LLMError::RetriesExhausted { last_error, .. } => last_error.error_code(),
            _ => None,
        }
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, LLMError::CircuitOpen(_))
    }

    /// Map a reqwest transport failure onto a coded network error
    pub fn from_transport(error: &reqwest::Error) -> Self {
        if error.is_timeout() {
            LLMError::Timeout(error.to_string())
        } else if error.is_connect() {
            LLMError::Network {
                code: Some("ECONNREFUSED".to_string()),
                message: error.to_string(),
            }
        } else if error.is_decode() {
            LLMError::Serialization(error.to_string())
        } else {
            LLMError::Network {
                code: None,
                message: error.to_string(),
            }
        }
    }

    /// Build an HTTP error from a non-2xx body, preferring `error.message`
    pub fn from_response_body(status: u16, body: &str) -> Self {
        let message = serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|value| {
                value
                    .pointer("/error/message")
                    .or_else(|| value.get("error"))
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| body.to_string());
        LLMError::Http { status, message }
    }
}

/// Result type for provider operations
pub type LLMResult<T> = Result<T, LLMError>;

/// Milliseconds elapsed since `start`, saturating
pub(crate) fn elapsed_ms(start: tokio::time::Instant) -> u64 {
    start.elapsed().as_millis().min(u64::MAX as u128) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_round_trips_through_strings() {
        assert_eq!(LLMProviderType::from("OpenAI"), LLMProviderType::OpenAI);
        assert_eq!(LLMProviderType::from("ollama").to_string(), "ollama");
        assert_eq!(
            LLMProviderType::from("acme"),
            LLMProviderType::Custom("acme".to_string())
        );

        let json = serde_json::to_value(LLMProviderType::OpenRouter).unwrap();
        assert_eq!(json, serde_json::json!("openrouter"));
    }

    #[test]
    fn test_error_message_extraction() {
        let err = LLMError::from_response_body(401, r#"{"error":{"message":"bad key"}}"#);
        assert_eq!(err.status_code(), Some(401));
        assert_eq!(err.to_string(), "HTTP 401: bad key");

        let plain = LLMError::from_response_body(502, "upstream down");
        assert_eq!(plain.to_string(), "HTTP 502: upstream down");
    }

    #[test]
    fn test_exhausted_error_exposes_inner_codes() {
        let err = LLMError::RetriesExhausted {
            last_error: Box::new(LLMError::Http {
                status: 503,
                message: "busy".to_string(),
            }),
            retry_history: Vec::new(),
            total_attempts: 3,
        };
        assert_eq!(err.status_code(), Some(503));
        assert!(err.to_string().contains("after 3 attempts"));
    }
}
