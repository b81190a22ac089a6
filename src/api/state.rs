// Shared state for the monitor HTTP surface

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::info;

use super::proxy::ProxyClient;
use crate::config::AppConfig;
use crate::engine::{
    ActiveRequests, ComparisonOrchestrator, Interceptor, LogBroadcaster, LogStore, LogSynthesizer,
    RealtimeHub, ReplayService,
};
use crate::llm::cost::{HeuristicTokenCounter, StaticPriceTable};
use crate::llm::providers::ProviderRegistry;
use crate::llm::{PriceLookup, TokenCounter};
use crate::resilience::ResilienceContext;
use crate::Result;

/// Everything the handlers and the interception middleware share
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn LogStore>,
    pub hub: Arc<RealtimeHub>,
    pub resilience: Arc<ResilienceContext>,
    pub interceptor: Interceptor,
    pub replay: Arc<ReplayService>,
    pub comparison: Arc<ComparisonOrchestrator>,
    pub broadcaster: Arc<LogBroadcaster>,
    pub proxy: Arc<ProxyClient>,
}

impl AppState {
    /// Wire the engine components around one store, registry and resilience context
    ///
    /// Token counting and pricing use the built-in heuristic counter and
    /// static price table.
    pub fn new(
        config: &AppConfig,
        store: Arc<dyn LogStore>,
        registry: Arc<ProviderRegistry>,
        resilience: Arc<ResilienceContext>,
    ) -> Result<Self> {
        let token_counter: Arc<dyn TokenCounter> = Arc::new(HeuristicTokenCounter);
        let price_lookup: Arc<dyn PriceLookup> = Arc::new(StaticPriceTable::default());
        let hub = Arc::new(RealtimeHub::new());

        let synthesizer = Arc::new(LogSynthesizer::new(
            store.clone(),
            token_counter.clone(),
            price_lookup.clone(),
            config.interceptor.clone(),
        ));
        let interceptor = Interceptor::new(synthesizer, resilience.active_requests().clone());

        let replay = Arc::new(ReplayService::new(
            registry.clone(),
            resilience.clone(),
            store.clone(),
            token_counter,
            price_lookup,
        ));
        let comparison = Arc::new(ComparisonOrchestrator::new(
            registry,
            resilience.clone(),
            &config.comparison,
        ));
        let broadcaster = Arc::new(LogBroadcaster::new(
            store.clone(),
            hub.clone(),
            config.broadcast.clone(),
        ));
        let proxy = Arc::new(ProxyClient::from_config(&config.providers)?);

        Ok(Self {
            store,
            hub,
            resilience,
            interceptor,
            replay,
            comparison,
            broadcaster,
            proxy,
        })
    }

    pub fn active_requests(&self) -> &Arc<ActiveRequests> {
        self.resilience.active_requests()
    }

    /// Start the log broadcaster and the stale active-request sweeper
    pub fn spawn_background(&self, config: &AppConfig) -> Vec<JoinHandle<()>> {
        info!(
            "Starting background tasks (broadcast mode: {:?})",
            config.broadcast.mode
        );
        vec![
            self.broadcaster.clone().spawn(),
            self.active_requests().clone().spawn_sweeper(
                config.active_requests.sweep_interval(),
                config.active_requests.max_age(),
            ),
        ]
    }
}
