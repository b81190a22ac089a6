// LLM Monitor - Server
// Run with: cargo run --bin server

//! # LLM Monitor Server Binary
//!
//! Starts the monitor HTTP server with its background tasks.
//!
//! ```text
//! main()
//!   ↓ loads
//! AppConfig (file + LLM_MONITOR_* env + provider keys)
//!   ↓ builds
//! ProviderRegistry + ResilienceContext + InMemoryLogStore
//!   ↓ wires
//! AppState (interceptor, replay, comparison, broadcaster, proxy)
//!   ↓ spawns
//! LogBroadcaster + active-request sweeper
//!   ↓ serves
//! MonitorApiServer (Axum)
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use dotenv::dotenv;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use llm_monitor::api::{AppState, MonitorApiServer};
use llm_monitor::engine::{ActiveRequests, BroadcastMode, InMemoryLogStore};
use llm_monitor::llm::cost::{HeuristicTokenCounter, StaticPriceTable};
use llm_monitor::llm::providers::ProviderRegistry;
use llm_monitor::{AppConfig, ResilienceContext};

#[derive(Parser)]
#[command(name = "llm-monitor")]
#[command(about = "LLM Monitor - log, replay and compare LLM provider traffic")]
#[command(version)]
struct Cli {
    /// Address to bind
    #[arg(long, env = "HOST")]
    host: Option<String>,

    /// Port to listen on
    #[arg(long, env = "PORT")]
    port: Option<u16>,

    /// How new log records reach live viewers: auto, change-feed or polling
    #[arg(long, env = "BROADCAST_MODE")]
    broadcast_mode: Option<BroadcastMode>,

    /// Configuration file (without extension)
    #[arg(long, env = "LLM_MONITOR_CONFIG")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = dotenv() {
        eprintln!("Warning: Could not load .env file: {}", e);
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(mode) = cli.broadcast_mode {
        config.broadcast.mode = mode;
    }

    info!("🚀 Starting LLM Monitor...");
    info!("Broadcast mode: {:?}", config.broadcast.mode);
    info!(
        "Interception: {}",
        if config.interceptor.enabled { "enabled" } else { "disabled" }
    );

    let registry = ProviderRegistry::from_config(
        &config.providers,
        Arc::new(HeuristicTokenCounter),
        Arc::new(StaticPriceTable::default()),
    )
    .context("Failed to build provider adapters")?;
    if registry.providers().len() == 1 {
        warn!("No hosted provider API keys configured, only Ollama is available");
    }

    let resilience = Arc::new(ResilienceContext::new(
        config.circuit_breaker.clone(),
        Arc::new(ActiveRequests::new()),
    ));
    let state = AppState::new(
        &config,
        Arc::new(InMemoryLogStore::new()),
        Arc::new(registry),
        resilience,
    )?;
    let _background = state.spawn_background(&config);

    MonitorApiServer::new(config.server.clone(), state)
        .run()
        .await?;
    Ok(())
}
