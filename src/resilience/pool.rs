//! Bounded-concurrency settle-all pool
//!
//! Runs a list of futures in consecutive windows of at most
//! `concurrency_limit`, waiting for every member of a window to finish before
//! the next window starts. Outputs come back in input order.

use futures::future::join_all;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundedPool {
    concurrency_limit: usize,
    window_delay: Duration,
}

impl BoundedPool {
    pub fn new(concurrency_limit: usize, window_delay: Duration) -> Self {
        Self {
            concurrency_limit: concurrency_limit.max(1),
            window_delay,
        }
    }

    pub fn concurrency_limit(&self) -> usize {
        self.concurrency_limit
    }

    pub fn window_delay(&self) -> Duration {
        self.window_delay
    }

    /// Drive every future to completion and return outputs by input index
    ///
    /// Futures are lazy, so nothing in a later window starts before the
    /// previous window has settled and the inter-window delay has passed.
    /// A failing member (an `Err` output) does not affect its siblings.
    pub async fn settle_all<Fut>(&self, tasks: Vec<Fut>) -> Vec<Fut::Output>
    where
        Fut: Future,
    {
        let total = tasks.len();
        let mut results = Vec::with_capacity(total);
        let mut pending = tasks.into_iter().peekable();
        let mut window = 0usize;

        while pending.peek().is_some() {
            if window > 0 && !self.window_delay.is_zero() {
                tokio::time::sleep(self.window_delay).await;
            }

            let batch: Vec<Fut> = pending.by_ref().take(self.concurrency_limit).collect();
            debug!(
                "Dispatching window {} with {} task(s) ({} total)",
                window + 1,
                batch.len(),
                total
            );
            results.extend(join_all(batch).await);
            window += 1;
        }

        results
    }
}

impl Default for BoundedPool {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(100))
    }
}
