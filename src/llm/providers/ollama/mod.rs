//! Ollama provider module
//! This module provides the adapter for local Ollama instances

pub mod client;
pub mod config;
pub mod types;

pub use client::OllamaAdapter;
pub use config::OllamaConfig;
pub use types::{OllamaGenerateRequest, OllamaGenerateResponse, OllamaOptions};
