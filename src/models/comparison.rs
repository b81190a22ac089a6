// Comparison domain models - one prompt replayed across several configurations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::log_record::RequestParameters;
use crate::llm::PromptResponse;

/// One provider/model configuration to compare
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonConfig {
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub parameters: RequestParameters,
}

impl ComparisonConfig {
    /// Label used in rankings, e.g. `openai/gpt-4o-mini`
    pub fn label(&self) -> String {
        format!("{}/{}", self.provider, self.model)
    }
}

/// A comparison request as received over the API
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonBatch {
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub system_message: String,
    #[serde(default, alias = "configurations", alias = "providers")]
    pub configs: Vec<ComparisonConfig>,
    /// Defaults applied beneath each config's own parameters
    #[serde(flatten)]
    pub defaults: RequestParameters,
}

/// Settled state of one comparison item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComparisonStatus {
    Fulfilled,
    Rejected,
}

/// Per-config outcome, kept at its original index
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonResult {
    pub config_index: usize,
    pub configuration: ComparisonConfig,
    pub status: ComparisonStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<PromptResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One position in a ranking projection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankingEntry {
    pub config: String,
    pub config_index: usize,
    pub value: f64,
}

/// Four independent rankings over the fulfilled subset
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonMetrics {
    /// Ascending latency in milliseconds
    pub latency_comparison: Vec<RankingEntry>,
    /// Ascending total cost
    pub cost_comparison: Vec<RankingEntry>,
    /// Ascending total tokens
    pub token_comparison: Vec<RankingEntry>,
    /// Descending completion length in characters
    pub response_length: Vec<RankingEntry>,
}

/// Full outcome of a comparison request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonReport {
    pub prompt: String,
    pub system_message: String,
    pub timestamp: DateTime<Utc>,
    pub results: Vec<ComparisonResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<ComparisonMetrics>,
}
