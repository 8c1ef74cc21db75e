//! Persisted notification store.
//!
//! The cache survives restarts through a [`NotificationStore`]: the whole
//! record buffer is written wholesale on every mutation and read back once
//! on startup. The shipped implementation is a single JSON document on
//! disk at a fixed path.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::record::NotificationRecord;

/// Default file name for the persisted buffer.
pub const DEFAULT_STORE_FILE: &str = "traffic_notifications.json";

/// Errors from reading or writing the persisted buffer.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The underlying read or write failed.
    #[error("notification store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// The stored document is not a valid record array.
    #[error("notification store is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Storage seam for the notification cache.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Read the persisted buffer; an absent store yields an empty buffer.
    async fn load(&self) -> Result<Vec<NotificationRecord>, StoreError>;

    /// Overwrite the persisted buffer with `records`, newest first.
    async fn save(&self, records: &[NotificationRecord]) -> Result<(), StoreError>;
}

/// Stores the record array as one JSON document at a fixed path.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl NotificationStore for FileStore {
    async fn load(&self) -> Result<Vec<NotificationRecord>, StoreError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, records: &[NotificationRecord]) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(records)?;
        tokio::fs::write(&self.path, bytes).await?;
        Ok(())
    }
}
