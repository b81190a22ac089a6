// Core domain models for the LLM monitor
// These are the records and batches that flow through the pipeline

//! # Domain Models Module
//!
//! This module contains the data structures shared by the interception,
//! broadcast and comparison pipelines.
//!
//! ## Rust Learning Notes:
//!
//! ### Re-exports for Clean APIs
//! The `pub use` statements at the bottom create a clean, flat API.
//! Users can import `use llm_monitor::models::LogRecord` instead of
//! `use llm_monitor::models::log_record::LogRecord`.

// Contains LogRecord and the usage/cost/retry types attached to it
pub mod log_record;

// Contains the comparison batch, per-config results and rankings
pub mod comparison;

pub use log_record::{
    CostBreakdown, LogError, LogRecord, LogStatus, RequestParameters, RetryAttempt, TokenUsage,
};

pub use comparison::{
    ComparisonBatch, ComparisonConfig, ComparisonMetrics, ComparisonReport, ComparisonResult,
    ComparisonStatus, RankingEntry,
};
