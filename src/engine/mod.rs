// Monitor engine
// Log synthesis, storage, broadcast and orchestration

//! # Monitor Engine
//!
//! The engine is the layer between the domain models and the HTTP surface.
//!
//! ## Engine Components
//!
//! ### Storage (`storage` module)
//! - `LogStore` append/query contract with an optional insert change feed
//! - `InMemoryLogStore` default backend
//!
//! ### Interception (`interceptor`, `exchange`, `active` modules)
//! - Normalizes provider-specific request/response shapes
//! - Synthesizes and persists one `LogRecord` per exchange
//! - Tracks in-flight exchanges and sweeps stale ones
//!
//! ### Broadcast (`broadcaster` module)
//! - Pushes new records to the `logs` room by change feed or polling
//!
//! ### Orchestration (`comparison`, `replay` modules)
//! - Bounded-concurrency comparison across provider/model configurations
//! - Replay of ad hoc prompts and stored logs

pub mod active;
pub mod broadcaster;
pub mod comparison;
pub mod exchange;
pub mod interceptor;
pub mod replay;
pub mod storage;

pub use active::{ActiveRequestHandle, ActiveRequestInfo, ActiveRequests};
pub use broadcaster::{
    BroadcastConfig, BroadcastEvent, BroadcastMode, LogBroadcaster, RealtimeHub, LOGS_CHANNEL,
};
pub use comparison::{ComparisonOrchestrator, ComparisonSettings};
pub use exchange::{CanonicalEnvelope, CanonicalRequest, ProviderExchange};
pub use interceptor::{
    InterceptedExchange, Interceptor, InterceptorOptions, LogSynthesizer, TRUNCATION_MARKER,
};
pub use replay::{
    CompletionRequest, CostEstimate, CostEstimateRequest, ReplayOverrides, ReplayRequest,
    ReplayResponse, ReplayService,
};
pub use storage::{InMemoryLogStore, LogCursor, LogStore, StoredLog};
