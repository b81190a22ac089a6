// In-flight request tracking for intercepted exchanges

//! # Active Requests
//!
//! Every intercepted exchange registers a handle here when it starts and
//! removes it when its log record has been synthesized. Handles are keyed by
//! a unique request id, so concurrent exchanges never touch each other's
//! entries.
//!
//! A background sweeper evicts handles older than a maximum age. It bounds
//! memory when an exchange never reaches completion (a dropped connection or
//! a panicking handler).

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, info};

/// One exchange currently being processed
#[derive(Debug, Clone)]
pub struct ActiveRequestHandle {
    pub request_id: String,
    pub provider: String,
    pub model: String,
    pub start: Instant,
    pub started_at: DateTime<Utc>,
}

/// Serializable view of a handle with its running duration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveRequestInfo {
    pub request_id: String,
    pub provider: String,
    pub model: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Table of in-flight exchanges
#[derive(Debug, Default)]
pub struct ActiveRequests {
    handles: DashMap<String, ActiveRequestHandle>,
}

impl ActiveRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new exchange; provider and model are filled in later
    pub fn begin(&self, request_id: &str) {
        self.handles.insert(
            request_id.to_string(),
            ActiveRequestHandle {
                request_id: request_id.to_string(),
                provider: "unknown".to_string(),
                model: "unknown".to_string(),
                start: Instant::now(),
                started_at: Utc::now(),
            },
        );
    }

    /// Record the provider and model once they are known
    pub fn update(&self, request_id: &str, provider: &str, model: &str) {
        if let Some(mut handle) = self.handles.get_mut(request_id) {
            handle.provider = provider.to_string();
            handle.model = model.to_string();
        }
    }

    /// Remove a handle, returning it if it was still present
    pub fn complete(&self, request_id: &str) -> Option<ActiveRequestHandle> {
        self.handles.remove(request_id).map(|(_, handle)| handle)
    }

    pub fn get(&self, request_id: &str) -> Option<ActiveRequestHandle> {
        self.handles.get(request_id).map(|entry| entry.value().clone())
    }

    /// Evict handles older than `max_age`, returning how many were removed
    pub fn sweep(&self, max_age: Duration) -> usize {
        let before = self.handles.len();
        self.handles
            .retain(|_, handle| handle.start.elapsed() <= max_age);
        let removed = before.saturating_sub(self.handles.len());
        if removed > 0 {
            info!("Evicted {} stale active request(s)", removed);
        }
        removed
    }

    /// Current handles, oldest first
    pub fn snapshot(&self) -> Vec<ActiveRequestInfo> {
        let mut infos: Vec<ActiveRequestInfo> = self
            .handles
            .iter()
            .map(|entry| {
                let handle = entry.value();
                ActiveRequestInfo {
                    request_id: handle.request_id.clone(),
                    provider: handle.provider.clone(),
                    model: handle.model.clone(),
                    started_at: handle.started_at,
                    duration_ms: crate::llm::elapsed_ms(handle.start),
                }
            })
            .collect();
        infos.sort_by(|a, b| b.duration_ms.cmp(&a.duration_ms));
        infos
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Start the periodic eviction task
    pub fn spawn_sweeper(self: Arc<Self>, interval: Duration, max_age: Duration) -> JoinHandle<()> {
        debug!(
            "Starting active request sweeper (every {:?}, max age {:?})",
            interval, max_age
        );
        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            // first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.sweep(max_age);
            }
        })
    }
}
