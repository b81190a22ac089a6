// LLM Monitor - Rust Edition
// Observability and resilience for outbound large-language-model calls

//! # LLM Monitor Library
//!
//! This is the library root of LLM Monitor, a service that watches calls made
//! to LLM provider APIs. It intercepts requests, turns each exchange into a
//! structured log record with token usage and cost, persists it, and pushes
//! it to live viewers. It can also replay a stored prompt and compare several
//! provider/model configurations side by side.
//!
//! ## Core Components
//!
//! ### Resilience ([`resilience`])
//! - [`RetryExecutor`]: exponential backoff with jitter around one provider call
//! - [`CircuitBreaker`]: fast-fails a provider call-site after repeated failures
//! - [`BoundedPool`]: settle-all execution with a concurrency cap
//!
//! ### Engine ([`engine`])
//! - [`LogSynthesizer`]: builds a [`LogRecord`] from an intercepted exchange
//! - [`LogBroadcaster`]: fans new records out to the `logs` room
//! - [`ComparisonOrchestrator`] and [`ReplayService`]
//!
//! ### Providers ([`llm`])
//! - [`ProviderAdapter`] contract plus OpenAI-compatible and Ollama adapters
//!
//! ### HTTP surface ([`api`])
//! - axum router with interception middleware, REST handlers and a
//!   WebSocket endpoint for live logs
//!
//! ## Rust Learning Notes:
//!
//! ### Re-exports
//! `pub use` statements create shortcuts so users don't need to know the
//! internal module structure. Instead of
//! `use llm_monitor::engine::interceptor::LogSynthesizer`, users can write
//! `use llm_monitor::LogSynthesizer`.

// Domain models (log records, comparison types)
pub mod models;

// Provider contracts and adapters
pub mod llm;

// Retry, circuit breaking and bounded concurrency
pub mod resilience;

// Storage, interception, broadcast and orchestration
pub mod engine;

// HTTP server, handlers and middleware
pub mod api;

// Layered configuration
pub mod config;

pub use models::{
    ComparisonBatch, ComparisonConfig, ComparisonReport, ComparisonResult, CostBreakdown,
    LogRecord, LogStatus, RequestParameters, RetryAttempt, TokenUsage,
};

pub use llm::{
    providers::ProviderRegistry, LLMError, LLMProviderType, PriceLookup, PromptRequest,
    PromptResponse, ProviderAdapter, TokenCounter,
};

pub use resilience::{
    BoundedPool, CircuitBreaker, CircuitBreakerConfig, CircuitState, ResilienceContext,
    RetryConfig, RetryExecutor,
};

pub use engine::{
    ActiveRequests, BroadcastMode, ComparisonOrchestrator, InMemoryLogStore, Interceptor,
    LogBroadcaster, LogStore, LogSynthesizer, RealtimeHub, ReplayService,
};

pub use api::{MonitorApiServer, MonitorApiServerBuilder};

pub use config::AppConfig;

use thiserror::Error;

/// Crate-level error type
///
/// Provider and transport failures arrive as [`LLMError`] and are wrapped
/// unchanged so HTTP handlers can still tell a circuit-open rejection from a
/// provider failure.
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error(transparent)]
    Llm(#[from] LLMError),

    /// Error when invalid input is provided
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unsupported provider: {0}")]
    UnsupportedProvider(String),

    /// Log store failures
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for MonitorError {
    fn from(err: std::io::Error) -> Self {
        MonitorError::Internal(err.to_string())
    }
}

/// Type alias for Results that use our custom error type
pub type Result<T> = std::result::Result<T, MonitorError>;
