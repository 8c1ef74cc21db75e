//! In-process alert bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`AlertBus`] is the publish/subscribe hub for foreground-delivered
//! [`NotificationRecord`]s. It is designed to be shared via
//! `Arc<AlertBus>` (or embedded in the bridge) across the application.

use tokio::sync::broadcast;

use crate::record::NotificationRecord;

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 64;

/// In-process fan-out hub for alerts.
///
/// Wraps a [`broadcast::Sender`] so that any number of subscribers can
/// independently receive every published record.
pub struct AlertBus {
    sender: broadcast::Sender<NotificationRecord>,
}

impl AlertBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full, the oldest un-consumed alerts are dropped
    /// and slow receivers observe a `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an alert to all current subscribers.
    ///
    /// With no active subscribers the alert is silently dropped; the
    /// cache already holds the durable copy.
    pub fn publish(&self, record: NotificationRecord) {
        let _ = self.sender.send(record);
    }

    /// Subscribe to all alerts published on this bus.
    pub fn subscribe(&self) -> broadcast::Receiver<NotificationRecord> {
        self.sender.subscribe()
    }
}

impl Default for AlertBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
