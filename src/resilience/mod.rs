//! # Resilience Layer
//!
//! Failure-handling primitives for outbound provider calls:
//!
//! - [`RetryExecutor`]: exponential backoff with jitter and error classification
//! - [`CircuitBreaker`]: per call-site fast-fail after repeated failures
//! - [`BoundedPool`]: settle-all execution with a concurrency cap
//! - [`ResilienceContext`]: owns the breaker registry and active-request table
//!
//! The retry loop sits outside the breaker, so every attempt is admitted (or
//! rejected) individually and an open circuit stops a retry sequence early.

pub mod circuit;
pub mod context;
pub mod pool;
pub mod retry;

pub use circuit::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitSnapshot, CircuitState,
};
pub use context::ResilienceContext;
pub use pool::BoundedPool;
pub use retry::{RetryConfig, RetryExecutor, RetryOutcome};
