//! OpenAI-compatible provider module
//! Serves OpenAI and the aggregators/hosts that mirror its chat-completions API

pub mod client;
pub mod config;
pub mod types;

pub use client::OpenAICompatibleAdapter;
pub use config::OpenAICompatibleConfig;
pub use types::{ChatChoice, ChatCompletionRequest, ChatCompletionResponse, ChatMessage, ChatUsage};
