//! The notification record retained by the local cache.

use serde::{Deserialize, Serialize};
use trafficlens_core::types::Timestamp;

/// One received alert.
///
/// Constructed via [`NotificationRecord::new`] and enriched with the
/// builder methods; mutated afterwards only by read-state toggles and
/// deletions in the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    /// Unique id: the provider-assigned message id when one was
    /// delivered, otherwise a generated UUID.
    pub id: String,

    pub title: String,

    pub body: String,

    /// Free-form grouping label, e.g. `"analysis"` or `"system"`.
    pub category: String,

    /// Provider payload carried through untouched.
    pub payload: serde_json::Value,

    /// When the push arrived (UTC).
    pub received_at: Timestamp,

    pub read: bool,
}

impl NotificationRecord {
    /// Create an unread record stamped with the current time and a
    /// generated id.
    pub fn new(
        title: impl Into<String>,
        body: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.into(),
            body: body.into(),
            category: category.into(),
            payload: serde_json::Value::Object(Default::default()),
            received_at: chrono::Utc::now(),
            read: false,
        }
    }

    /// Replace the generated id with a provider-assigned one.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Set the provider payload.
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}
