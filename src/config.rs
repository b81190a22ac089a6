//! Configuration loading
//!
//! Sources, lowest priority first:
//! 1. Built-in defaults
//! 2. `config/monitor.toml` (or the file passed on the command line)
//! 3. `LLM_MONITOR_*` environment variables, `__` between nested keys,
//!    e.g. `LLM_MONITOR_BROADCAST__POLL_INTERVAL_MS=500`
//! 4. The conventional provider variables (`OPENAI_API_KEY`, ...), which
//!    only fill in what is still unset

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::engine::{BroadcastConfig, ComparisonSettings, InterceptorOptions};
use crate::resilience::CircuitBreakerConfig;

const DEFAULT_CONFIG_FILE: &str = "config/monitor";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_enabled: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            cors_enabled: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActiveRequestsConfig {
    pub sweep_interval_ms: u64,
    pub max_age_ms: u64,
}

impl Default for ActiveRequestsConfig {
    fn default() -> Self {
        Self {
            sweep_interval_ms: 60_000,
            max_age_ms: 300_000,
        }
    }
}

impl ActiveRequestsConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_millis(self.max_age_ms)
    }
}

/// Connection settings of one provider; unset fields use the adapter defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderEndpoint {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub default_model: Option<String>,
    pub timeout_seconds: Option<u64>,
}

impl ProviderEndpoint {
    pub fn with_key(api_key: impl Into<String>) -> Self {
        Self {
            api_key: Some(api_key.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub openai: ProviderEndpoint,
    pub openrouter: ProviderEndpoint,
    pub mistral: ProviderEndpoint,
    pub grok: ProviderEndpoint,
    pub ollama: ProviderEndpoint,
}

impl ProvidersConfig {
    /// Fill unset keys and URLs from the conventional provider variables
    pub fn apply_standard_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let fill = |slot: &mut Option<String>, var: &str| {
            if slot.as_deref().map_or(true, str::is_empty) {
                if let Some(value) = lookup(var).filter(|v| !v.is_empty()) {
                    *slot = Some(value);
                }
            }
        };

        fill(&mut self.openai.api_key, "OPENAI_API_KEY");
        fill(&mut self.openai.base_url, "OPENAI_BASE_URL");
        fill(&mut self.openrouter.api_key, "OPENROUTER_API_KEY");
        fill(&mut self.mistral.api_key, "MISTRAL_API_KEY");
        fill(&mut self.grok.api_key, "GROK_API_KEY");
        fill(&mut self.ollama.base_url, "OLLAMA_BASE_URL");
    }
}

/// Top-level monitor configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub interceptor: InterceptorOptions,
    pub broadcast: BroadcastConfig,
    pub comparison: ComparisonSettings,
    pub circuit_breaker: CircuitBreakerConfig,
    pub active_requests: ActiveRequestsConfig,
    pub providers: ProvidersConfig,
}

impl AppConfig {
    /// Load configuration from files and environment
    ///
    /// An explicitly named file must exist; the default one is optional.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let file = match path {
            Some(path) => File::with_name(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let mut config: AppConfig = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix("LLM_MONITOR")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config
            .providers
            .apply_standard_env(|var| std::env::var(var).ok());
        Ok(config)
    }
}
