// Storage abstraction for synthesized log records

//! # Log Storage Layer
//!
//! The monitor only ever appends log records and reads them back, so the
//! storage contract is small:
//! - **append**: persist one record (request ids are unique)
//! - **created_after**: page through records past a [`LogCursor`], oldest
//!   first, which is what the polling broadcaster needs
//! - **get**: look a record up by request id, used by replay
//! - **subscribe_inserts**: an optional insert-only change feed
//!
//! `InMemoryLogStore` is the default backend. It publishes every insert on a
//! `tokio::sync::broadcast` channel, so it supports both broadcaster
//! strategies.
//!
//! ## Ordering
//!
//! Records are stamped while they are built but persisted later, on a
//! separate task, so they can reach the store out of timestamp order. The
//! store fixes creation order at insert time: a record's `created_at` is
//! raised to the newest stored timestamp when it is older, and each insert
//! gets the next sequence number. Insert order, creation order and cursor
//! order are therefore the same, and a poller never skips a late insert or
//! one of several records sharing a timestamp.
//!
//! ## Rust Learning Notes:
//!
//! ### Optional Capabilities on a Trait
//! Not every backend can push change notifications. Instead of a second
//! trait, `subscribe_inserts` returns `Option<Receiver>`; `None` tells the
//! caller to fall back to polling.
//!
//! ### Derived Ordering
//! `LogCursor` derives `Ord`, which compares fields in declaration order:
//! timestamp first, then sequence number.

use chrono::{DateTime, Utc};
use std::sync::RwLock;
use tokio::sync::broadcast;

use crate::models::LogRecord;
use crate::{MonitorError, Result};

/// Capacity of the in-memory insert feed
const CHANGE_FEED_CAPACITY: usize = 1000;

/// Position of a stored record in creation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct LogCursor {
    pub created_at: DateTime<Utc>,
    pub sequence: u64,
}

impl LogCursor {
    /// Cursor past every record created at or before `timestamp`
    pub fn after(timestamp: DateTime<Utc>) -> Self {
        Self {
            created_at: timestamp,
            sequence: u64::MAX,
        }
    }
}

/// A persisted record with its position
#[derive(Debug, Clone, PartialEq)]
pub struct StoredLog {
    pub cursor: LogCursor,
    pub record: LogRecord,
}

/// Append/query contract for persisted log records
#[async_trait::async_trait]
pub trait LogStore: Send + Sync {
    /// Persist a record
    ///
    /// ## Errors
    /// - A record with the same request id already exists
    /// - The backend is unavailable
    async fn append(&self, record: LogRecord) -> Result<()>;

    /// Records strictly past `cursor`, ascending by creation order
    ///
    /// At most `limit` records are returned.
    async fn created_after(&self, cursor: LogCursor, limit: usize) -> Result<Vec<StoredLog>>;

    /// Look up a record by request id
    async fn get(&self, request_id: &str) -> Result<Option<LogRecord>>;

    /// Insert notifications, when the backend offers them
    fn subscribe_inserts(&self) -> Option<broadcast::Receiver<LogRecord>> {
        None
    }
}

/// In-memory log store with an insert change feed
///
/// ## Limitations
///
/// - **Not persistent**: Records are lost when the process restarts
/// - **Memory bound**: Nothing is ever evicted
pub struct InMemoryLogStore {
    /// Insert order, which is also cursor order
    records: RwLock<Vec<StoredLog>>,
    inserts: Option<broadcast::Sender<LogRecord>>,
}

impl InMemoryLogStore {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            records: RwLock::new(Vec::new()),
            inserts: Some(sender),
        }
    }

    /// A store that only supports polling
    pub fn without_change_feed() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            inserts: None,
        }
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|records| records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn poisoned() -> MonitorError {
        MonitorError::Storage("log store lock poisoned".to_string())
    }
}

impl Default for InMemoryLogStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryLogStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryLogStore")
            .field("records", &self.len())
            .field("change_feed", &self.inserts.is_some())
            .finish()
    }
}

#[async_trait::async_trait]
impl LogStore for InMemoryLogStore {
    async fn append(&self, mut record: LogRecord) -> Result<()> {
        {
            let mut records = self.records.write().map_err(|_| Self::poisoned())?;
            if records.iter().any(|r| r.record.request_id == record.request_id) {
                return Err(MonitorError::Storage(format!(
                    "duplicate request id: {}",
                    record.request_id
                )));
            }

            let (newest, sequence) = match records.last() {
                Some(last) => (Some(last.cursor.created_at), last.cursor.sequence + 1),
                None => (None, 0),
            };
            if let Some(newest) = newest.filter(|newest| *newest > record.created_at) {
                record.created_at = newest;
            }

            records.push(StoredLog {
                cursor: LogCursor {
                    created_at: record.created_at,
                    sequence,
                },
                record: record.clone(),
            });
        }

        if let Some(sender) = &self.inserts {
            // No receivers is fine
            let _ = sender.send(record);
        }
        Ok(())
    }

    async fn created_after(&self, cursor: LogCursor, limit: usize) -> Result<Vec<StoredLog>> {
        let records = self.records.read().map_err(|_| Self::poisoned())?;
        let start = records.partition_point(|r| r.cursor <= cursor);
        Ok(records[start..].iter().take(limit).cloned().collect())
    }

    async fn get(&self, request_id: &str) -> Result<Option<LogRecord>> {
        let records = self.records.read().map_err(|_| Self::poisoned())?;
        Ok(records
            .iter()
            .find(|r| r.record.request_id == request_id)
            .map(|r| r.record.clone()))
    }

    fn subscribe_inserts(&self) -> Option<broadcast::Receiver<LogRecord>> {
        self.inserts.as_ref().map(|sender| sender.subscribe())
    }
}
