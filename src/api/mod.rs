// Monitor HTTP surface
// REST endpoints, live log WebSocket and provider pass-through, all behind
// the interception middleware

pub mod handlers;
pub mod middleware;
pub mod proxy;
pub mod state;
pub mod websocket;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::config::ServerConfig;
use crate::{MonitorError, Result};
use handlers::{
    active_requests, circuit_breakers, compare, complete, cost_estimate, health_check,
    list_models, not_found, proxy_chat_completions, proxy_ollama_generate, replay,
    replay_from_log, test_provider,
};
use middleware::intercept_llm_traffic;
use websocket::ws_handler;

pub use proxy::{ProxyClient, ProxyUpstream};
pub use state::AppState;

/// Monitor API server
pub struct MonitorApiServer {
    config: ServerConfig,
    state: AppState,
}

impl MonitorApiServer {
    pub fn new(config: ServerConfig, state: AppState) -> Self {
        Self { config, state }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Create the Axum router with all monitor routes
    pub fn create_router(&self) -> Router {
        let router = Router::new()
            .route("/health", get(health_check))
            // Resilient provider calls, all intercepted
            .route("/api/replay", post(replay))
            .route("/api/replay/log/:request_id", post(replay_from_log))
            .route("/api/providers/:provider/complete", post(complete))
            .route("/api/providers/:provider/test", get(test_provider))
            .route("/api/compare", post(compare))
            .route("/api/models", get(list_models))
            .route("/api/cost-estimate", post(cost_estimate))
            // Introspection
            .route("/api/active-requests", get(active_requests))
            .route("/api/circuit-breakers", get(circuit_breakers))
            // Pass-through to real providers
            .route(
                "/proxy/:provider/v1/chat/completions",
                post(proxy_chat_completions),
            )
            .route("/proxy/ollama/api/generate", post(proxy_ollama_generate))
            .route("/ws", get(ws_handler))
            .fallback(not_found)
            .layer(axum::middleware::from_fn_with_state(
                self.state.interceptor.clone(),
                intercept_llm_traffic,
            ))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone());

        if self.config.cors_enabled {
            router.layer(CorsLayer::permissive())
        } else {
            router
        }
    }

    /// Serve on an already bound listener
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let app = self.create_router();
        axum::serve(listener, app).await?;
        Ok(())
    }

    /// Bind the configured address and serve until shutdown
    pub async fn run(self) -> Result<()> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;

        info!("LLM monitor listening on http://{}", addr);
        info!("   POST http://{}/api/replay", addr);
        info!("   POST http://{}/api/compare", addr);
        info!("   POST http://{}/proxy/:provider/v1/chat/completions", addr);
        info!("   GET  ws://{}/ws", addr);
        info!("   CORS enabled: {}", self.config.cors_enabled);

        self.serve(listener).await
    }
}

/// Builder pattern for the monitor API server
#[derive(Default)]
pub struct MonitorApiServerBuilder {
    config: ServerConfig,
    state: Option<AppState>,
}

impl MonitorApiServerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn with_host(mut self, host: String) -> Self {
        self.config.host = host;
        self
    }

    pub fn with_cors(mut self, enabled: bool) -> Self {
        self.config.cors_enabled = enabled;
        self
    }

    pub fn with_state(mut self, state: AppState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn build(self) -> Result<MonitorApiServer> {
        let state = self
            .state
            .ok_or_else(|| MonitorError::Config("server state is required".to_string()))?;
        Ok(MonitorApiServer::new(self.config, state))
    }
}
