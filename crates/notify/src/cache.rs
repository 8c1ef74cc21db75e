//! Bounded, persisted notification cache.
//!
//! A small rolling buffer of received alerts: newest first, oldest
//! evicted past capacity. Every mutation goes through the cache's own
//! methods, persists the full buffer wholesale, and broadcasts the new
//! snapshot to registered observers so multiple consumers stay consistent
//! without sharing an object reference.

use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};

use crate::record::NotificationRecord;
use crate::store::{NotificationStore, StoreError};

/// Maximum number of retained records.
pub const DEFAULT_CAPACITY: usize = 50;

/// Buffer capacity for the observer channel.
const OBSERVER_CAPACITY: usize = 16;

/// Bounded ring of [`NotificationRecord`]s with wholesale persistence.
pub struct NotificationCache {
    capacity: usize,
    store: Arc<dyn NotificationStore>,
    records: Mutex<Vec<NotificationRecord>>,
    changed: broadcast::Sender<Vec<NotificationRecord>>,
}

impl NotificationCache {
    /// Load the persisted buffer (truncated to `capacity`) and wrap it.
    pub async fn open(
        store: Arc<dyn NotificationStore>,
        capacity: usize,
    ) -> Result<Self, StoreError> {
        let mut records = store.load().await?;
        records.truncate(capacity);
        let (changed, _) = broadcast::channel(OBSERVER_CAPACITY);
        Ok(Self {
            capacity,
            store,
            records: Mutex::new(records),
            changed,
        })
    }

    /// Observe every mutation as a full snapshot, newest first.
    pub fn subscribe(&self) -> broadcast::Receiver<Vec<NotificationRecord>> {
        self.changed.subscribe()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Prepend a record, evicting the oldest past capacity.
    pub async fn add(&self, record: NotificationRecord) {
        let mut records = self.records.lock().await;
        records.insert(0, record);
        records.truncate(self.capacity);
        self.commit(&records).await;
    }

    /// Mark one record as read. Returns `false` for unknown ids.
    pub async fn mark_read(&self, id: &str) -> bool {
        let mut records = self.records.lock().await;
        match records.iter_mut().find(|r| r.id == id) {
            Some(record) => {
                if !record.read {
                    record.read = true;
                    self.commit(&records).await;
                }
                true
            }
            None => false,
        }
    }

    /// Mark every record as read.
    pub async fn mark_all_read(&self) {
        let mut records = self.records.lock().await;
        let mut changed = false;
        for record in records.iter_mut().filter(|r| !r.read) {
            record.read = true;
            changed = true;
        }
        if changed {
            self.commit(&records).await;
        }
    }

    /// Delete one record. Returns `false` for unknown ids.
    pub async fn remove(&self, id: &str) -> bool {
        let mut records = self.records.lock().await;
        let before = records.len();
        records.retain(|r| r.id != id);
        if records.len() == before {
            return false;
        }
        self.commit(&records).await;
        true
    }

    /// Delete every record.
    pub async fn clear(&self) {
        let mut records = self.records.lock().await;
        if records.is_empty() {
            return;
        }
        records.clear();
        self.commit(&records).await;
    }

    /// Delete records older than `days`. Returns how many were evicted.
    pub async fn clear_older_than(&self, days: i64) -> usize {
        let cutoff = chrono::Utc::now() - chrono::Duration::days(days);
        let mut records = self.records.lock().await;
        let before = records.len();
        records.retain(|r| r.received_at >= cutoff);
        let evicted = before - records.len();
        if evicted > 0 {
            self.commit(&records).await;
        }
        evicted
    }

    /// Current buffer contents, newest first.
    pub async fn snapshot(&self) -> Vec<NotificationRecord> {
        self.records.lock().await.clone()
    }

    /// Number of unread records.
    pub async fn unread_count(&self) -> usize {
        self.records.lock().await.iter().filter(|r| !r.read).count()
    }

    /// Persist the buffer wholesale and notify observers.
    ///
    /// A store failure keeps the in-memory state authoritative; it is
    /// logged, never surfaced.
    async fn commit(&self, records: &[NotificationRecord]) {
        if let Err(e) = self.store.save(records).await {
            tracing::error!(error = %e, "Failed to persist notification cache");
        }
        let _ = self.changed.send(records.to_vec());
    }
}
