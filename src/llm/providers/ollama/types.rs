//! Ollama-specific request and response types
//!
//! Ollama's native API is not chat-completions shaped: `/api/generate` takes a
//! flat prompt and answers with a flat `response` field.

use serde::{Deserialize, Serialize};

/// `POST /api/generate` request body
#[derive(Debug, Clone, Serialize)]
pub struct OllamaGenerateRequest {
    pub model: String,
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<OllamaOptions>,
}

/// Ollama model options/parameters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    /// Maximum number of tokens to generate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_predict: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
}

impl OllamaOptions {
    pub fn is_empty(&self) -> bool {
        self == &OllamaOptions::default()
    }
}

/// `POST /api/generate` response body (non-streaming)
#[derive(Debug, Clone, Deserialize)]
pub struct OllamaGenerateResponse {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub done_reason: Option<String>,
    /// Prompt tokens evaluated
    #[serde(default)]
    pub prompt_eval_count: Option<u32>,
    /// Completion tokens generated
    #[serde(default)]
    pub eval_count: Option<u32>,
}

impl OllamaGenerateResponse {
    pub fn finish_reason(&self) -> String {
        match &self.done_reason {
            Some(reason) => reason.clone(),
            None if self.done => "stop".to_string(),
            None => "length".to_string(),
        }
    }
}

/// Model entry of `GET /api/tags`
#[derive(Debug, Clone, Deserialize)]
pub struct OllamaModelInfo {
    pub name: String,
    #[serde(default)]
    pub size: Option<u64>,
}

/// `GET /api/tags` response
#[derive(Debug, Clone, Deserialize)]
pub struct OllamaModelsResponse {
    #[serde(default)]
    pub models: Vec<OllamaModelInfo>,
}
