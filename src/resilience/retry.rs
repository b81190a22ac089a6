//! Retry Executor
//!
//! Runs one fallible async operation with exponential backoff and jitter.
//! Attempts are strictly sequential; the delay before the next attempt is
//! `min(base * multiplier^attempt, max)`, scaled into `[0.5, 1.0]` of itself
//! when jitter is enabled.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::llm::{elapsed_ms, LLMError, LLMProviderType, LLMResult};
use crate::models::RetryAttempt;

/// Retryable HTTP status codes for hosted APIs
pub const RETRYABLE_STATUS_CODES: &[u16] = &[408, 429, 500, 502, 503, 504];

/// Local servers have no rate limiting, so only server errors are retried
pub const LOCAL_RETRYABLE_STATUS_CODES: &[u16] = &[500, 502, 503, 504];

/// Retryable transport error codes
pub const RETRYABLE_ERROR_CODES: &[&str] = &[
    "ECONNRESET",
    "ENOTFOUND",
    "ECONNREFUSED",
    "ETIMEDOUT",
    "TIMEOUT",
    "RATE_LIMITED",
    "SERVER_ERROR",
];

/// Message fragments that mark an otherwise unclassified error as transient
const RETRYABLE_PATTERNS: &[&str] = &[
    "timeout",
    "network error",
    "connection reset",
    "connection refused",
    "rate limit",
    "server error",
    "service unavailable",
    "too many requests",
    "internal server error",
    "bad gateway",
    "gateway timeout",
];

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter: bool,
    pub retryable_status_codes: Vec<u16>,
    pub retryable_error_codes: Vec<String>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30000,
            backoff_multiplier: 2.0,
            jitter: true,
            retryable_status_codes: RETRYABLE_STATUS_CODES.to_vec(),
            retryable_error_codes: RETRYABLE_ERROR_CODES.iter().map(|c| c.to_string()).collect(),
        }
    }
}

impl RetryConfig {
    pub fn new(max_retries: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_retries,
            base_delay_ms,
            max_delay_ms,
            ..Default::default()
        }
    }

    /// Per-provider retry profile
    pub fn for_provider(provider: &LLMProviderType) -> Self {
        match provider {
            LLMProviderType::OpenAI => Self::new(3, 1000, 30000),
            LLMProviderType::OpenRouter => Self::new(2, 2000, 20000),
            LLMProviderType::Mistral => Self::new(3, 1500, 25000),
            LLMProviderType::Ollama => Self {
                retryable_status_codes: LOCAL_RETRYABLE_STATUS_CODES.to_vec(),
                ..Self::new(2, 500, 10000)
            },
            _ => Self::default(),
        }
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Total attempts allowed, the first one included
    pub fn retry_budget(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Classify an error: status code, then transport code, then message
    pub fn is_retryable(&self, error: &LLMError) -> bool {
        if error.is_circuit_open() {
            return false;
        }
        if let Some(status) = error.status_code() {
            return self.retryable_status_codes.contains(&status);
        }
        if let Some(code) = error.error_code() {
            return self.retryable_error_codes.iter().any(|c| c == code);
        }
        let message = error.to_string().to_lowercase();
        RETRYABLE_PATTERNS.iter().any(|pattern| message.contains(pattern))
    }

    /// Backoff bound before jitter for the given 0-based attempt
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponential =
            self.base_delay_ms as f64 * self.backoff_multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        let capped = exponential.min(self.max_delay_ms as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }

    /// Delay scaled by an explicit jitter factor, clamped to `[0.5, 1.0]`
    ///
    /// Returns the bound unchanged when jitter is disabled.
    pub fn compute_delay(&self, attempt: u32, jitter_factor: f64) -> Duration {
        let bound = self.base_delay(attempt);
        if !self.jitter {
            return bound;
        }
        let factor = jitter_factor.clamp(0.5, 1.0);
        let bound_ms = bound.as_millis() as u64;
        let scaled = (bound_ms as f64 * factor).floor() as u64;
        // Never below half the bound, rounded up for odd bounds
        Duration::from_millis(scaled.clamp(bound_ms.div_ceil(2), bound_ms))
    }

    fn next_delay(&self, attempt: u32) -> Duration {
        let factor = if self.jitter {
            rand::thread_rng().gen_range(0.5..=1.0)
        } else {
            1.0
        };
        self.compute_delay(attempt, factor)
    }
}

/// Successful result of a retried operation
#[derive(Debug, Clone)]
pub struct RetryOutcome<T> {
    pub result: T,
    /// One entry per retry, the initial attempt excluded
    pub retry_history: Vec<RetryAttempt>,
    pub total_attempts: u32,
}

/// Retry executor
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn for_provider(provider: &LLMProviderType) -> Self {
        Self::new(RetryConfig::for_provider(provider))
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Execute an async operation with retry
    ///
    /// The operation runs at most `max_retries + 1` times. When the budget is
    /// spent, or an error is not retryable, the last error is returned wrapped
    /// in `LLMError::RetriesExhausted` along with the history. A circuit-open
    /// error is returned as is so callers can tell it apart from a provider
    /// failure.
    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> LLMResult<RetryOutcome<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = LLMResult<T>>,
    {
        let mut retry_history = Vec::new();
        let mut attempt: u32 = 0;

        loop {
            let started_at = chrono::Utc::now();
            let start = Instant::now();
            let outcome = operation().await;
            let latency_ms = elapsed_ms(start);

            match outcome {
                Ok(result) => {
                    if attempt > 0 {
                        retry_history.push(RetryAttempt {
                            attempt_number: attempt + 1,
                            timestamp: started_at,
                            succeeded: true,
                            error: None,
                            error_code: None,
                            latency_ms,
                        });
                        debug!("Operation succeeded on attempt {}", attempt + 1);
                    }
                    return Ok(RetryOutcome {
                        result,
                        retry_history,
                        total_attempts: attempt + 1,
                    });
                }
                Err(error) => {
                    if error.is_circuit_open() {
                        return Err(error);
                    }

                    if attempt > 0 {
                        retry_history.push(RetryAttempt {
                            attempt_number: attempt + 1,
                            timestamp: started_at,
                            succeeded: false,
                            error: Some(error.to_string()),
                            error_code: error
                                .status_code()
                                .map(|s| s.to_string())
                                .or_else(|| error.error_code().map(str::to_string)),
                            latency_ms,
                        });
                    }

                    if attempt >= self.config.max_retries || !self.config.is_retryable(&error) {
                        return Err(LLMError::RetriesExhausted {
                            last_error: Box::new(error),
                            retry_history,
                            total_attempts: attempt + 1,
                        });
                    }

                    let delay = self.config.next_delay(attempt);
                    warn!(
                        "Retry attempt {}/{} after {}ms delay. Error: {}",
                        attempt + 1,
                        self.config.max_retries,
                        delay.as_millis(),
                        error
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn http(status: u16) -> LLMError {
        LLMError::Http {
            status,
            message: format!("status {}", status),
        }
    }

    #[test]
    fn test_default_config() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.base_delay_ms, 1000);
        assert_eq!(config.max_delay_ms, 30000);
        assert_eq!(config.backoff_multiplier, 2.0);
        assert!(config.jitter);
    }

    #[test]
    fn test_provider_profiles() {
        let ollama = RetryConfig::for_provider(&LLMProviderType::Ollama);
        assert_eq!((ollama.max_retries, ollama.base_delay_ms), (2, 500));
        assert!(!ollama.retryable_status_codes.contains(&429));

        let openrouter = RetryConfig::for_provider(&LLMProviderType::OpenRouter);
        assert_eq!((openrouter.max_retries, openrouter.base_delay_ms), (2, 2000));
        assert!(openrouter.retryable_status_codes.contains(&429));

        let custom = RetryConfig::for_provider(&LLMProviderType::Custom("acme".into()));
        assert_eq!(custom, RetryConfig::default());
    }

    #[test]
    fn test_classification_order() {
        let config = RetryConfig::default();
        assert!(config.is_retryable(&http(503)));
        assert!(config.is_retryable(&http(429)));
        assert!(!config.is_retryable(&http(401)));
        assert!(!config.is_retryable(&http(404)));

        assert!(config.is_retryable(&LLMError::Network {
            code: Some("ECONNRESET".into()),
            message: "socket hang up".into(),
        }));
        assert!(!config.is_retryable(&LLMError::Network {
            code: Some("EPROTO".into()),
            message: "bad gateway".into(),
        }));

        assert!(config.is_retryable(&LLMError::Internal("upstream said: Too Many Requests".into())));
        assert!(!config.is_retryable(&LLMError::InvalidRequest("missing prompt".into())));
        assert!(!config.is_retryable(&LLMError::CircuitOpen("openai".into())));
    }

    #[test]
    fn test_delay_bounds() {
        let config = RetryConfig::new(5, 1000, 5000);
        assert_eq!(config.compute_delay(0, 1.0), Duration::from_millis(1000));
        assert_eq!(config.compute_delay(0, 0.5), Duration::from_millis(500));
        assert_eq!(config.compute_delay(2, 1.0), Duration::from_millis(4000));
        assert_eq!(config.compute_delay(3, 1.0), Duration::from_millis(5000));
        // factors outside the jitter window are clamped
        assert_eq!(config.compute_delay(1, 0.1), Duration::from_millis(1000));

        let odd = RetryConfig::new(5, 1001, 5000);
        assert_eq!(odd.compute_delay(0, 0.5), Duration::from_millis(501));
        assert_eq!(odd.compute_delay(0, 1.0), Duration::from_millis(1001));

        let exact = config.clone().without_jitter();
        assert_eq!(exact.compute_delay(1, 0.5), Duration::from_millis(2000));

        for attempt in 0..6 {
            let bound = config.base_delay(attempt);
            let delay = config.next_delay(attempt);
            assert!(delay <= bound);
            assert!(delay.as_millis() * 2 >= bound.as_millis());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_two_failures() {
        let executor = RetryExecutor::new(RetryConfig::new(2, 100, 30000));
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let outcome = executor
            .execute(move || {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 3 {
                        Err(http(503))
                    } else {
                        Ok("done")
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(outcome.result, "done");
        assert_eq!(outcome.retry_history.len(), 2);
        assert_eq!(outcome.total_attempts, 3);
        assert!(!outcome.retry_history[0].succeeded);
        assert_eq!(outcome.retry_history[0].error_code.as_deref(), Some("503"));
        assert!(outcome.retry_history[1].succeeded);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_exceeds_budget() {
        let executor = RetryExecutor::new(RetryConfig::new(3, 10, 100));
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let err = executor
            .execute(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(http(500))
                }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        match err {
            LLMError::RetriesExhausted {
                total_attempts,
                retry_history,
                last_error,
            } => {
                assert_eq!(total_attempts, 4);
                assert_eq!(retry_history.len(), 3);
                assert_eq!(last_error.status_code(), Some(500));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_stops_after_one_attempt() {
        let executor = RetryExecutor::new(RetryConfig::new(5, 10, 100));
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let err = executor
            .execute(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(http(401))
                }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, LLMError::RetriesExhausted { total_attempts: 1, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_without_jitter_sleeps_exact_bounds() {
        let executor = RetryExecutor::new(RetryConfig::new(2, 100, 30000).without_jitter());
        let start = Instant::now();

        let _ = executor
            .execute(|| async { Err::<(), _>(http(502)) })
            .await;

        // 100ms before attempt 2, 200ms before attempt 3
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(300));
        assert!(elapsed < Duration::from_millis(310));
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_open_is_passed_through() {
        let executor = RetryExecutor::default();
        let err = executor
            .execute(|| async { Err::<(), _>(LLMError::CircuitOpen("openai".into())) })
            .await
            .unwrap_err();
        assert!(err.is_circuit_open());
    }
}
