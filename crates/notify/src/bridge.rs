//! Provider push bridge.
//!
//! [`NotificationBridge`] turns asynchronous provider pushes -- alerts not
//! tied to any job -- into cache records and user-visible surfaces. Two
//! delivery paths exist: `Foreground` while an interactive consumer is
//! running, `Background` when only the persistent worker is. Both paths
//! append to the [`NotificationCache`] exactly once per push.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, Mutex};

use crate::bus::AlertBus;
use crate::cache::NotificationCache;
use crate::record::NotificationRecord;

/// How many provider message ids are remembered for deduplication.
const DEDUP_WINDOW: usize = 128;

/// Which runtime surface received the push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryPath {
    /// An interactive consumer is running; the alert bus is live.
    Foreground,
    /// Only the persistent worker is running; the OS notification is the
    /// sole way the user sees this push.
    Background,
}

/// OS-level notification permission, as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Granted,
    Denied,
    /// Not decided yet; the user can still be prompted.
    Prompt,
}

/// One push as handed over by the messaging provider.
#[derive(Debug, Clone)]
pub struct ProviderPush {
    /// Provider-assigned delivery id, when the provider supplies one.
    pub message_id: Option<String>,
    pub title: String,
    pub body: String,
    pub category: String,
    pub payload: serde_json::Value,
    pub path: DeliveryPath,
}

/// Seam over the platform's OS-notification surface.
#[async_trait]
pub trait SystemNotifier: Send + Sync {
    /// Current permission state.
    fn permission(&self) -> Permission;

    /// Prompt the user and report the resulting state.
    async fn request_permission(&self) -> Permission;

    /// Raise an OS-level notification for the record.
    async fn show(&self, record: &NotificationRecord);
}

/// Notifier for headless use: permission always granted, notifications
/// rendered as log lines.
pub struct LogNotifier;

#[async_trait]
impl SystemNotifier for LogNotifier {
    fn permission(&self) -> Permission {
        Permission::Granted
    }

    async fn request_permission(&self) -> Permission {
        Permission::Granted
    }

    async fn show(&self, record: &NotificationRecord) {
        tracing::info!(
            title = %record.title,
            body = %record.body,
            category = %record.category,
            "System notification",
        );
    }
}

/// Republishes provider pushes into the cache and the alert surfaces.
pub struct NotificationBridge {
    cache: Arc<NotificationCache>,
    notifier: Arc<dyn SystemNotifier>,
    alerts: AlertBus,
    /// Recently seen provider message ids, oldest first.
    seen: Mutex<VecDeque<String>>,
}

impl NotificationBridge {
    pub fn new(cache: Arc<NotificationCache>, notifier: Arc<dyn SystemNotifier>) -> Self {
        Self {
            cache,
            notifier,
            alerts: AlertBus::default(),
            seen: Mutex::new(VecDeque::with_capacity(DEDUP_WINDOW)),
        }
    }

    /// Observe foreground-delivered alerts.
    pub fn subscribe_alerts(&self) -> broadcast::Receiver<NotificationRecord> {
        self.alerts.subscribe()
    }

    /// Ask the platform for OS-notification permission.
    pub async fn request_permission(&self) -> Permission {
        self.notifier.request_permission().await
    }

    /// Process one provider push.
    ///
    /// Records it in the cache exactly once, then surfaces it according
    /// to the delivery path: foreground pushes go to the alert bus (plus
    /// an OS notification when permission was granted), background pushes
    /// go straight to the OS surface. Returns `false` when the push was a
    /// duplicate delivery and was dropped.
    pub async fn handle_push(&self, push: ProviderPush) -> bool {
        if let Some(id) = &push.message_id {
            let mut seen = self.seen.lock().await;
            if seen.contains(id) {
                tracing::debug!(message_id = %id, "Duplicate push delivery, ignoring");
                return false;
            }
            if seen.len() == DEDUP_WINDOW {
                seen.pop_front();
            }
            seen.push_back(id.clone());
        }
        // Without a provider id the platform exercises exactly one path
        // per delivery; there is nothing to deduplicate on.

        let mut record = NotificationRecord::new(push.title, push.body, push.category)
            .with_payload(push.payload);
        if let Some(id) = push.message_id {
            record = record.with_id(id);
        }

        self.cache.add(record.clone()).await;

        match push.path {
            DeliveryPath::Foreground => {
                if self.notifier.permission() == Permission::Granted {
                    self.notifier.show(&record).await;
                }
                self.alerts.publish(record);
            }
            DeliveryPath::Background => {
                // No interactive consumer is running; permission was
                // granted when the push subscription was created.
                self.notifier.show(&record).await;
            }
        }
        true
    }

    /// Drain provider pushes until the provider hangs up.
    pub async fn run(&self, mut pushes: mpsc::UnboundedReceiver<ProviderPush>) {
        while let Some(push) = pushes.recv().await {
            self.handle_push(push).await;
        }
        tracing::info!("Push provider stream closed, bridge shutting down");
    }
}
