// Real-time fan-out of newly persisted log records

//! # Realtime Broadcaster
//!
//! Pushes every newly persisted [`LogRecord`] onto the `logs` room of a
//! [`RealtimeHub`]. Delivery to individual WebSocket clients is the
//! transport's job; the broadcaster only emits.
//!
//! Two strategies:
//! - **Change feed**: follow the store's insert notifications, one event per
//!   insert
//! - **Polling**: on a fixed interval, read records past a watermark
//!   cursor (oldest first, bounded page), emit them in order and advance
//!   the cursor to the last one emitted. The cursor carries the store's
//!   sequence number next to the timestamp, so records sharing a timestamp
//!   are paged without gaps. A failed query leaves the cursor where it was,
//!   so the next tick retries the same window.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::storage::{LogCursor, LogStore};
use crate::models::LogRecord;
use crate::{MonitorError, Result};

/// Room that log viewers join
pub const LOGS_CHANNEL: &str = "logs";

/// Buffered events per room before slow receivers start lagging
const ROOM_CAPACITY: usize = 256;

/// Event pushed to subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BroadcastEvent {
    #[serde(rename = "new-log")]
    NewLog {
        data: LogRecord,
        timestamp: DateTime<Utc>,
    },
}

impl BroadcastEvent {
    pub fn new_log(record: LogRecord) -> Self {
        BroadcastEvent::NewLog {
            data: record,
            timestamp: Utc::now(),
        }
    }
}

/// Named broadcast rooms
#[derive(Debug, Default)]
pub struct RealtimeHub {
    rooms: DashMap<String, broadcast::Sender<BroadcastEvent>>,
}

impl RealtimeHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn room(&self, name: &str) -> broadcast::Sender<BroadcastEvent> {
        self.rooms
            .entry(name.to_string())
            .or_insert_with(|| broadcast::channel(ROOM_CAPACITY).0)
            .clone()
    }

    /// Join a room, creating it on first use
    pub fn subscribe(&self, room: &str) -> broadcast::Receiver<BroadcastEvent> {
        self.room(room).subscribe()
    }

    /// Emit to a room; returns how many subscribers received it
    pub fn emit(&self, room: &str, event: BroadcastEvent) -> usize {
        match self.rooms.get(room) {
            Some(sender) => sender.send(event).unwrap_or(0),
            None => 0,
        }
    }

    pub fn subscriber_count(&self, room: &str) -> usize {
        self.rooms
            .get(room)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }
}

/// How new records are discovered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BroadcastMode {
    /// Change feed when the store offers one, polling otherwise
    #[default]
    Auto,
    ChangeFeed,
    Polling,
}

impl FromStr for BroadcastMode {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "auto" => Ok(BroadcastMode::Auto),
            "change_feed" => Ok(BroadcastMode::ChangeFeed),
            "polling" => Ok(BroadcastMode::Polling),
            other => Err(MonitorError::Config(format!("unknown broadcast mode: {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    pub mode: BroadcastMode,
    pub poll_interval_ms: u64,
    pub page_size: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            mode: BroadcastMode::Auto,
            poll_interval_ms: 2000,
            page_size: 10,
        }
    }
}

pub struct LogBroadcaster {
    store: Arc<dyn LogStore>,
    hub: Arc<RealtimeHub>,
    config: BroadcastConfig,
    watermark: Mutex<LogCursor>,
}

impl LogBroadcaster {
    /// Polling starts from the moment of construction
    pub fn new(store: Arc<dyn LogStore>, hub: Arc<RealtimeHub>, config: BroadcastConfig) -> Self {
        Self {
            store,
            hub,
            config,
            watermark: Mutex::new(LogCursor::after(Utc::now())),
        }
    }

    #[must_use]
    pub fn with_watermark(self, watermark: DateTime<Utc>) -> Self {
        Self {
            watermark: Mutex::new(LogCursor::after(watermark)),
            ..self
        }
    }

    /// Creation time of the last emitted record
    pub fn watermark(&self) -> DateTime<Utc> {
        self.cursor().created_at
    }

    pub fn cursor(&self) -> LogCursor {
        *self.watermark.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn set_cursor(&self, cursor: LogCursor) {
        *self.watermark.lock().unwrap_or_else(|p| p.into_inner()) = cursor;
    }

    fn emit(&self, record: LogRecord) {
        let request_id = record.request_id.clone();
        let delivered = self.hub.emit(LOGS_CHANNEL, BroadcastEvent::new_log(record));
        debug!("Emitted new-log {} to {} subscriber(s)", request_id, delivered);
    }

    /// One polling tick; returns the number of records emitted
    pub async fn poll_once(&self) -> Result<usize> {
        let page = self
            .store
            .created_after(self.cursor(), self.config.page_size)
            .await?;

        let Some(last) = page.last().map(|stored| stored.cursor) else {
            return Ok(0);
        };
        let count = page.len();
        for stored in page {
            self.emit(stored.record);
        }
        self.set_cursor(last);
        Ok(count)
    }

    async fn run_polling(self: Arc<Self>) {
        info!(
            "Log broadcaster polling every {}ms",
            self.config.poll_interval_ms
        );
        let mut ticker = time::interval(Duration::from_millis(self.config.poll_interval_ms.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = self.poll_once().await {
                error!("Log broadcast poll failed: {}", e);
            }
        }
    }

    async fn run_change_feed(self: Arc<Self>, mut inserts: broadcast::Receiver<LogRecord>) {
        info!("Log broadcaster following the store change feed");
        loop {
            match inserts.recv().await {
                Ok(record) => self.emit(record),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Log change feed lagged, {} record(s) skipped", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    warn!("Log change feed closed, broadcaster stopping");
                    break;
                }
            }
        }
    }

    /// Start broadcasting in the background according to the configured mode
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        let inserts = match self.config.mode {
            BroadcastMode::Polling => None,
            BroadcastMode::Auto => self.store.subscribe_inserts(),
            BroadcastMode::ChangeFeed => {
                let inserts = self.store.subscribe_inserts();
                if inserts.is_none() {
                    warn!("Log store has no change feed, falling back to polling");
                }
                inserts
            }
        };

        match inserts {
            Some(inserts) => tokio::spawn(self.run_change_feed(inserts)),
            None => tokio::spawn(self.run_polling()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::storage::test_support::{record, FlakyLogStore};
    use crate::engine::storage::InMemoryLogStore;
    use chrono::Duration as ChronoDuration;

    fn next_log(rx: &mut broadcast::Receiver<BroadcastEvent>) -> LogRecord {
        match rx.try_recv().unwrap() {
            BroadcastEvent::NewLog { data, .. } => data,
        }
    }

    #[tokio::test]
    async fn test_poll_emits_in_creation_order_and_advances_watermark() {
        let store = Arc::new(InMemoryLogStore::without_change_feed());
        let hub = Arc::new(RealtimeHub::new());
        let mut rx = hub.subscribe(LOGS_CHANNEL);

        let w = Utc::now() - ChronoDuration::minutes(1);
        // at the watermark itself, already emitted
        store.append(record("old", w)).await.unwrap();
        store.append(record("first", w + ChronoDuration::seconds(1))).await.unwrap();
        store.append(record("second", w + ChronoDuration::seconds(2))).await.unwrap();
        store.append(record("third", w + ChronoDuration::seconds(3))).await.unwrap();

        let broadcaster = LogBroadcaster::new(store, hub, BroadcastConfig::default()).with_watermark(w);
        assert_eq!(broadcaster.poll_once().await.unwrap(), 3);

        assert_eq!(next_log(&mut rx).request_id, "first");
        assert_eq!(next_log(&mut rx).request_id, "second");
        assert_eq!(next_log(&mut rx).request_id, "third");
        assert!(rx.try_recv().is_err());
        assert_eq!(broadcaster.watermark(), w + ChronoDuration::seconds(3));

        // nothing new on the next tick
        assert_eq!(broadcaster.poll_once().await.unwrap(), 0);
        assert_eq!(broadcaster.watermark(), w + ChronoDuration::seconds(3));
    }

    #[tokio::test]
    async fn test_page_size_bounds_each_tick() {
        let store = Arc::new(InMemoryLogStore::without_change_feed());
        let w = Utc::now() - ChronoDuration::minutes(1);
        for i in 1..=5 {
            store
                .append(record(&format!("r{}", i), w + ChronoDuration::seconds(i)))
                .await
                .unwrap();
        }
        let config = BroadcastConfig {
            page_size: 2,
            ..Default::default()
        };
        let broadcaster = LogBroadcaster::new(store, Arc::new(RealtimeHub::new()), config).with_watermark(w);

        assert_eq!(broadcaster.poll_once().await.unwrap(), 2);
        assert_eq!(broadcaster.poll_once().await.unwrap(), 2);
        assert_eq!(broadcaster.poll_once().await.unwrap(), 1);
        assert_eq!(broadcaster.watermark(), w + ChronoDuration::seconds(5));
    }

    #[tokio::test]
    async fn test_shared_timestamps_across_page_boundary() {
        let store = Arc::new(InMemoryLogStore::without_change_feed());
        let hub = Arc::new(RealtimeHub::new());
        let mut rx = hub.subscribe(LOGS_CHANNEL);
        let w = Utc::now() - ChronoDuration::minutes(1);
        for id in ["a", "b", "c"] {
            store.append(record(id, w + ChronoDuration::seconds(1))).await.unwrap();
        }
        let config = BroadcastConfig {
            page_size: 2,
            ..Default::default()
        };
        let broadcaster = LogBroadcaster::new(store, hub, config).with_watermark(w);

        let mut emitted = 0;
        for _ in 0..5 {
            emitted += broadcaster.poll_once().await.unwrap();
        }
        assert_eq!(emitted, 3);
        assert_eq!(next_log(&mut rx).request_id, "a");
        assert_eq!(next_log(&mut rx).request_id, "b");
        assert_eq!(next_log(&mut rx).request_id, "c");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_late_append_behind_watermark_is_emitted() {
        let store = Arc::new(InMemoryLogStore::without_change_feed());
        let hub = Arc::new(RealtimeHub::new());
        let mut rx = hub.subscribe(LOGS_CHANNEL);
        let w = Utc::now() - ChronoDuration::minutes(1);
        let broadcaster =
            LogBroadcaster::new(store.clone(), hub, BroadcastConfig::default()).with_watermark(w);

        store.append(record("fast", w + ChronoDuration::seconds(2))).await.unwrap();
        assert_eq!(broadcaster.poll_once().await.unwrap(), 1);
        assert_eq!(next_log(&mut rx).request_id, "fast");

        // built earlier, persisted after the tick
        store.append(record("slow", w + ChronoDuration::seconds(1))).await.unwrap();
        assert_eq!(broadcaster.poll_once().await.unwrap(), 1);
        assert_eq!(next_log(&mut rx).request_id, "slow");
        assert_eq!(broadcaster.watermark(), w + ChronoDuration::seconds(2));
    }

    #[tokio::test]
    async fn test_failed_poll_keeps_watermark() {
        let store = Arc::new(FlakyLogStore::new(false));
        let w = Utc::now() - ChronoDuration::minutes(1);
        store.append(record("pending", w + ChronoDuration::seconds(1))).await.unwrap();
        store.set_failing(true);

        let hub = Arc::new(RealtimeHub::new());
        let mut rx = hub.subscribe(LOGS_CHANNEL);
        let broadcaster = LogBroadcaster::new(store.clone(), hub, BroadcastConfig::default()).with_watermark(w);

        assert!(broadcaster.poll_once().await.is_err());
        assert_eq!(broadcaster.watermark(), w);
        assert!(rx.try_recv().is_err());

        store.set_failing(false);
        assert_eq!(broadcaster.poll_once().await.unwrap(), 1);
        assert_eq!(next_log(&mut rx).request_id, "pending");
    }

    #[tokio::test]
    async fn test_change_feed_mode_emits_each_insert() {
        let store = Arc::new(InMemoryLogStore::new());
        let hub = Arc::new(RealtimeHub::new());
        let mut rx = hub.subscribe(LOGS_CHANNEL);

        let broadcaster = Arc::new(LogBroadcaster::new(
            store.clone(),
            hub,
            BroadcastConfig::default(),
        ));
        let task = broadcaster.spawn();

        store.append(record("live", Utc::now())).await.unwrap();

        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        let BroadcastEvent::NewLog { data, .. } = event;
        assert_eq!(data.request_id, "live");
        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_loop_survives_failures() {
        let store = Arc::new(FlakyLogStore::new(true));
        let hub = Arc::new(RealtimeHub::new());
        let mut rx = hub.subscribe(LOGS_CHANNEL);
        let config = BroadcastConfig {
            mode: BroadcastMode::ChangeFeed,
            ..Default::default()
        };
        let w = Utc::now() - ChronoDuration::minutes(1);
        let broadcaster = Arc::new(LogBroadcaster::new(store.clone(), hub, config).with_watermark(w));
        let task = broadcaster.clone().spawn();

        // a few failing ticks
        time::sleep(Duration::from_millis(4500)).await;
        assert_eq!(broadcaster.watermark(), w);

        store.set_failing(false);
        store.append(record("late", w + ChronoDuration::seconds(1))).await.unwrap();
        time::sleep(Duration::from_millis(2000)).await;

        assert_eq!(next_log(&mut rx).request_id, "late");
        task.abort();
    }

    #[test]
    fn test_emit_without_subscribers_is_not_an_error() {
        let hub = RealtimeHub::new();
        let event = BroadcastEvent::new_log(record("nobody", Utc::now()));
        assert_eq!(hub.emit(LOGS_CHANNEL, event.clone()), 0);

        let _rx = hub.subscribe(LOGS_CHANNEL);
        assert_eq!(hub.subscriber_count(LOGS_CHANNEL), 1);
        assert_eq!(hub.emit(LOGS_CHANNEL, event), 1);
    }

    #[test]
    fn test_event_wire_shape() {
        let event = BroadcastEvent::new_log(record("wire", Utc::now()));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "new-log");
        assert_eq!(json["data"]["requestId"], "wire");
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("change-feed".parse::<BroadcastMode>().unwrap(), BroadcastMode::ChangeFeed);
        assert_eq!("POLLING".parse::<BroadcastMode>().unwrap(), BroadcastMode::Polling);
        assert!("sometimes".parse::<BroadcastMode>().is_err());
    }
}
