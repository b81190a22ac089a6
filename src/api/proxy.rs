// Pass-through proxy to real provider endpoints
// Requests routed here are intercepted like any other LLM path, so pointing
// an SDK at the monitor logs its real traffic.

use axum::{
    body::{Body, Bytes},
    http::{header, HeaderMap, HeaderValue},
    response::Response,
};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::{ProviderEndpoint, ProvidersConfig};
use crate::llm::providers::{OllamaConfig, OpenAICompatibleConfig};
use crate::llm::{LLMError, LLMProviderType};
use crate::{MonitorError, Result};

const DEFAULT_PROXY_TIMEOUT_SECS: u64 = 120;

/// Where one provider's proxied traffic goes
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyUpstream {
    pub base_url: String,
    pub api_key: Option<String>,
}

pub struct ProxyClient {
    client: reqwest::Client,
    upstreams: HashMap<LLMProviderType, ProxyUpstream>,
}

impl ProxyClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MonitorError::Internal(format!("Failed to build proxy client: {}", e)))?;
        Ok(Self {
            client,
            upstreams: HashMap::new(),
        })
    }

    #[must_use]
    pub fn with_upstream(mut self, provider: LLMProviderType, upstream: ProxyUpstream) -> Self {
        self.upstreams.insert(provider, upstream);
        self
    }

    /// Upstreams for every built-in provider, keys optional
    ///
    /// Without a configured key the caller's own `Authorization` header is
    /// forwarded as is.
    pub fn from_config(config: &ProvidersConfig) -> Result<Self> {
        let mut proxy = Self::new(Duration::from_secs(DEFAULT_PROXY_TIMEOUT_SECS))?;

        for (provider, endpoint) in [
            (LLMProviderType::OpenAI, &config.openai),
            (LLMProviderType::OpenRouter, &config.openrouter),
            (LLMProviderType::Mistral, &config.mistral),
            (LLMProviderType::Grok, &config.grok),
        ] {
            let defaults = OpenAICompatibleConfig::for_provider(provider.clone(), String::new());
            proxy = proxy.with_upstream(provider, upstream_for(endpoint, defaults.base_url));
        }
        proxy = proxy.with_upstream(
            LLMProviderType::Ollama,
            upstream_for(&config.ollama, OllamaConfig::default().base_url),
        );

        Ok(proxy)
    }

    pub fn upstream(&self, provider: &LLMProviderType) -> Option<&ProxyUpstream> {
        self.upstreams.get(provider)
    }

    /// Forward a JSON body to `{base_url}{path}` and relay the answer unchanged
    pub async fn forward(
        &self,
        provider: &str,
        path: &str,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<Response> {
        let provider_type = LLMProviderType::from(provider);
        let upstream = self
            .upstream(&provider_type)
            .ok_or_else(|| MonitorError::UnsupportedProvider(provider.to_string()))?;
        let url = format!("{}{}", upstream.base_url, path);
        debug!("Proxying {} request to {}", provider_type, url);

        let mut request = self
            .client
            .post(&url)
            .header(header::CONTENT_TYPE, "application/json")
            .body(body);

        match (headers.get(header::AUTHORIZATION), &upstream.api_key) {
            (Some(authorization), _) => {
                request = request.header(header::AUTHORIZATION, authorization.clone());
            }
            (None, Some(api_key)) => request = request.bearer_auth(api_key),
            (None, None) => {}
        }

        let upstream_response = request.send().await.map_err(|e| {
            warn!("Proxy request to {} failed: {}", url, e);
            MonitorError::Llm(LLMError::from_transport(&e))
        })?;

        let status = upstream_response.status();
        let content_type = upstream_response
            .headers()
            .get(header::CONTENT_TYPE)
            .cloned()
            .unwrap_or_else(|| HeaderValue::from_static("application/json"));
        let bytes = upstream_response
            .bytes()
            .await
            .map_err(|e| MonitorError::Llm(LLMError::from_transport(&e)))?;

        Response::builder()
            .status(status)
            .header(header::CONTENT_TYPE, content_type)
            .body(Body::from(bytes))
            .map_err(|e| MonitorError::Internal(e.to_string()))
    }
}

fn upstream_for(endpoint: &ProviderEndpoint, default_base_url: String) -> ProxyUpstream {
    let base_url = endpoint
        .base_url
        .clone()
        .unwrap_or(default_base_url)
        .trim_end_matches('/')
        .to_string();
    ProxyUpstream {
        base_url,
        api_key: endpoint.api_key.clone().filter(|key| !key.is_empty()),
    }
}
