// Log record domain models - the canonical persisted artifact

//! # Log Record Models
//!
//! This module defines the canonical record synthesized for every intercepted
//! LLM exchange:
//! - `LogRecord`: The persisted record (one per exchange, immutable once stored)
//! - `TokenUsage` / `CostBreakdown`: Usage and spend attached to a record
//! - `RetryAttempt`: One entry of a retry history
//! - `RequestParameters`: The sampling parameters sent with the prompt
//!
//! ## Rust Learning Notes:
//!
//! ### Serde Field Renaming
//! The wire format uses camelCase (`requestId`, `tokenUsage`) while Rust code
//! uses snake_case. `#[serde(rename_all = "camelCase")]` bridges the two so
//! neither side has to compromise on naming conventions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of an intercepted exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    Success,
    Error,
    Timeout,
    RateLimited,
}

impl LogStatus {
    /// Map an HTTP status code onto a log status
    ///
    /// 2xx is success, 429 is rate limited, 408/504 are timeouts and anything
    /// else that is not successful is an error.
    pub fn from_http_status(status: u16) -> Self {
        match status {
            200..=299 => LogStatus::Success,
            429 => LogStatus::RateLimited,
            408 | 504 => LogStatus::Timeout,
            _ => LogStatus::Error,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, LogStatus::Success)
    }
}

impl std::fmt::Display for LogStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogStatus::Success => write!(f, "success"),
            LogStatus::Error => write!(f, "error"),
            LogStatus::Timeout => write!(f, "timeout"),
            LogStatus::RateLimited => write!(f, "rate_limited"),
        }
    }
}

/// Token usage for one exchange
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl TokenUsage {
    /// Build usage where the total is always the sum of both sides
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        }
    }

    /// Normalize usage reported by a provider envelope
    ///
    /// Missing sides count as zero. When both sides are known the total is
    /// recomputed so the record never carries an inconsistent sum.
    pub fn validated(
        prompt_tokens: Option<u32>,
        completion_tokens: Option<u32>,
        total_tokens: Option<u32>,
    ) -> Self {
        match (prompt_tokens, completion_tokens) {
            (Some(prompt), Some(completion)) => Self::new(prompt, completion),
            (prompt, completion) => {
                let prompt = prompt.unwrap_or(0);
                let completion = completion.unwrap_or(0);
                Self {
                    prompt_tokens: prompt,
                    completion_tokens: completion,
                    total_tokens: total_tokens.unwrap_or(prompt + completion),
                }
            }
        }
    }
}

/// Estimated spend for one exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostBreakdown {
    pub prompt_cost: f64,
    pub completion_cost: f64,
    pub total_cost: f64,
    pub currency: String,
}

impl CostBreakdown {
    /// Build a breakdown whose total is exactly the sum of its parts
    pub fn new(prompt_cost: f64, completion_cost: f64) -> Self {
        Self {
            prompt_cost,
            completion_cost,
            total_cost: prompt_cost + completion_cost,
            currency: "USD".to_string(),
        }
    }

    pub fn zero() -> Self {
        Self::new(0.0, 0.0)
    }
}

impl Default for CostBreakdown {
    fn default() -> Self {
        Self::zero()
    }
}

/// One entry of a retry history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryAttempt {
    /// 1-based attempt number within the retry budget
    pub attempt_number: u32,
    pub timestamp: DateTime<Utc>,
    pub succeeded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// HTTP status or transport error code of a failed attempt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    pub latency_ms: u64,
}

/// Sampling parameters sent along with a prompt
///
/// Every field is individually optional; inbound bodies may use either the
/// snake_case wire names or camelCase.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, alias = "max_tokens", skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, alias = "top_p", skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, alias = "frequency_penalty", skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    #[serde(default, alias = "presence_penalty", skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
    #[serde(
        default,
        deserialize_with = "deserialize_stop",
        skip_serializing_if = "Option::is_none"
    )]
    pub stop: Option<Vec<String>>,
}

/// Stop sequences arrive either as a single string or a list
#[derive(Deserialize)]
#[serde(untagged)]
enum StopSequences {
    One(String),
    Many(Vec<String>),
}

fn deserialize_stop<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let stop = Option::<StopSequences>::deserialize(deserializer)?;
    Ok(stop.map(|stop| match stop {
        StopSequences::One(sequence) => vec![sequence],
        StopSequences::Many(sequences) => sequences,
    }))
}

impl RequestParameters {
    /// Overlay `overrides` on top of `self`, field by field
    pub fn merged_with(&self, overrides: &RequestParameters) -> RequestParameters {
        RequestParameters {
            temperature: overrides.temperature.or(self.temperature),
            max_tokens: overrides.max_tokens.or(self.max_tokens),
            top_p: overrides.top_p.or(self.top_p),
            frequency_penalty: overrides.frequency_penalty.or(self.frequency_penalty),
            presence_penalty: overrides.presence_penalty.or(self.presence_penalty),
            stop: overrides.stop.clone().or_else(|| self.stop.clone()),
        }
    }
}

/// Error details attached to an unsuccessful record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogError {
    pub message: String,
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// The canonical, persisted record of one intercepted LLM exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    /// Unique per exchange
    pub request_id: String,
    pub provider: String,
    pub model: String,
    pub prompt: String,
    pub completion: String,
    pub system_message: String,
    pub parameters: RequestParameters,
    pub token_usage: TokenUsage,
    pub cost: CostBreakdown,
    pub latency_ms: u64,
    pub status: LogStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<LogError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    pub retry_attempts: u32,
    pub retry_history: Vec<RetryAttempt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}
