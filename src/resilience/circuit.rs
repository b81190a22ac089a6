//! Circuit Breaker
//!
//! Guards one provider call-site. The breaker has three states:
//! - Closed: Normal operation, calls pass through
//! - Open: Failure threshold reached, calls fail fast with `LLMError::CircuitOpen`
//! - HalfOpen: Reset timeout elapsed, exactly one trial call is let through
//!
//! All state lives behind one mutex and every transition is a single
//! read-modify-write, so concurrent calls through the same breaker never lose
//! a failure count. The lock is never held across the wrapped call.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::llm::{LLMError, LLMResult};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Configuration for circuit breaker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit
    pub failure_threshold: u32,
    /// Time after the last failure before a trial call is allowed
    pub reset_timeout_ms: u64,
    /// Failures older than this are forgotten
    pub monitoring_period_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_ms: 60_000,
            monitoring_period_ms: 300_000,
        }
    }
}

impl CircuitBreakerConfig {
    #[must_use]
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    #[must_use]
    pub fn with_reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout_ms = timeout.as_millis() as u64;
        self
    }

    #[must_use]
    pub fn with_monitoring_period(mut self, period: Duration) -> Self {
        self.monitoring_period_ms = period.as_millis() as u64;
        self
    }

    fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }

    fn monitoring_period(&self) -> Duration {
        Duration::from_millis(self.monitoring_period_ms)
    }
}

#[derive(Debug, Default)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    last_failure_at: Option<DateTime<Utc>>,
    trial_in_flight: bool,
}

/// Point-in-time view of a breaker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failure_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Trial,
}

/// Circuit breaker for one provider call-site
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerState::default()),
        }
    }

    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::new(name, CircuitBreakerConfig::default())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().consecutive_failures
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.lock();
        CircuitSnapshot {
            name: self.name.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            last_failure_at: inner.last_failure_at,
        }
    }

    /// Force the breaker back to closed
    pub fn reset(&self) {
        let mut inner = self.lock();
        *inner = BreakerState::default();
        info!(name = %self.name, "Circuit breaker reset");
    }

    /// Run `operation` under the breaker
    ///
    /// Fails with `LLMError::CircuitOpen` without invoking `operation` while
    /// the circuit is open, or while a half-open trial is already in flight.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> LLMResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = LLMResult<T>>,
    {
        let mut permit = self.admit()?;
        let outcome = operation().await;
        match &outcome {
            Ok(_) => permit.succeed(),
            Err(_) => permit.fail(),
        }
        outcome
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        // Counters stay consistent even if a holder panicked
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn admit(&self) -> LLMResult<Permit<'_>> {
        let mut inner = self.lock();
        let now = Instant::now();

        if let Some(last) = inner.last_failure {
            if now.duration_since(last) > self.config.monitoring_period() && inner.consecutive_failures > 0 {
                debug!(name = %self.name, "Clearing stale circuit breaker failures");
                inner.consecutive_failures = 0;
            }
        }

        let admission = match inner.state {
            CircuitState::Closed => Admission::Normal,
            CircuitState::Open => {
                let elapsed = inner
                    .last_failure
                    .map(|last| now.duration_since(last))
                    .unwrap_or(Duration::MAX);
                if elapsed < self.config.reset_timeout() {
                    return Err(LLMError::CircuitOpen(self.name.clone()));
                }
                info!(name = %self.name, "Circuit breaker entering half-open state");
                inner.state = CircuitState::HalfOpen;
                inner.trial_in_flight = true;
                Admission::Trial
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    return Err(LLMError::CircuitOpen(self.name.clone()));
                }
                inner.trial_in_flight = true;
                Admission::Trial
            }
        };

        Ok(Permit {
            breaker: self,
            admission,
            settled: false,
        })
    }

    fn record_success(&self, admission: Admission) {
        let mut inner = self.lock();
        match (admission, inner.state) {
            (Admission::Trial, CircuitState::HalfOpen) => {
                info!(name = %self.name, "Circuit breaker closed");
                inner.state = CircuitState::Closed;
                inner.consecutive_failures = 0;
                inner.trial_in_flight = false;
            }
            (Admission::Normal, CircuitState::Closed) => {
                inner.consecutive_failures = 0;
            }
            // Admitted before the circuit opened; the newer failures win
            _ => {}
        }
    }

    fn record_failure(&self, admission: Admission) {
        let mut inner = self.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        inner.last_failure = Some(Instant::now());
        inner.last_failure_at = Some(Utc::now());

        match (admission, inner.state) {
            (Admission::Trial, _) => {
                warn!(name = %self.name, "Circuit breaker trial failed, reopening");
                inner.state = CircuitState::Open;
                inner.trial_in_flight = false;
            }
            (Admission::Normal, CircuitState::Closed) => {
                debug!(
                    name = %self.name,
                    failures = inner.consecutive_failures,
                    threshold = self.config.failure_threshold,
                    "Circuit breaker failure recorded"
                );
                if inner.consecutive_failures >= self.config.failure_threshold {
                    warn!(
                        name = %self.name,
                        failures = inner.consecutive_failures,
                        "Circuit breaker opened"
                    );
                    inner.state = CircuitState::Open;
                }
            }
            _ => {}
        }
    }

    fn release_trial(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.trial_in_flight = false;
        }
    }
}

/// Admission ticket for one call
///
/// Dropping an unsettled trial permit (the caller's future was cancelled)
/// frees the half-open slot for the next caller.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    admission: Admission,
    settled: bool,
}

impl Permit<'_> {
    fn succeed(&mut self) {
        self.settled = true;
        self.breaker.record_success(self.admission);
    }

    fn fail(&mut self) {
        self.settled = true;
        self.breaker.record_failure(self.admission);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.admission == Admission::Trial {
            self.breaker.release_trial();
        }
    }
}

/// Breakers keyed by provider call-site
#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
        }
    }

    /// Get the breaker for a call-site, creating it on first use
    pub fn get_or_create(&self, call_site: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(call_site.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(call_site, self.config.clone())))
            .clone()
    }

    pub fn get(&self, call_site: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(call_site).map(|entry| entry.value().clone())
    }

    /// Snapshots of every breaker, sorted by call-site
    pub fn snapshot(&self) -> Vec<CircuitSnapshot> {
        let mut snapshots: Vec<CircuitSnapshot> =
            self.breakers.iter().map(|entry| entry.value().snapshot()).collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    pub fn reset(&self, call_site: &str) -> bool {
        match self.get(call_site) {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }
}
