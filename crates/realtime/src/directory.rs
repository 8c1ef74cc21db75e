//! Process-wide session directory keyed by job id.
//!
//! Several UI surfaces may independently want updates for the same job;
//! the directory guarantees they share one underlying socket instead of
//! opening duplicates. It is an explicitly constructed service -- create
//! one [`SessionDirectory`], wrap it in an `Arc`, and pass it to whatever
//! needs job updates.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use trafficlens_core::types::JobId;

use crate::reconnect::ReconnectPolicy;
use crate::session::JobSession;

/// Connection settings shared by every session the directory creates.
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// WebSocket base URL of the analysis backend, e.g. `ws://host:8000`.
    pub ws_base_url: String,
    /// Reconnection policy applied to every session.
    pub reconnect: ReconnectPolicy,
}

impl RealtimeConfig {
    /// Config with the default reconnection policy.
    pub fn new(ws_base_url: impl Into<String>) -> Self {
        Self {
            ws_base_url: ws_base_url.into(),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// Hands out one [`JobSession`] per job id.
///
/// Invariant: at most one live session per id at any time. The map is
/// mutated only by [`get_or_create`](Self::get_or_create),
/// [`release`](Self::release) and [`shutdown`](Self::shutdown).
pub struct SessionDirectory {
    config: RealtimeConfig,
    sessions: RwLock<HashMap<JobId, Arc<JobSession>>>,
}

impl SessionDirectory {
    /// Create an empty directory.
    pub fn new(config: RealtimeConfig) -> Self {
        Self {
            config,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Return the session for `job_id`, creating and registering it if
    /// absent.
    ///
    /// A freshly created session is not yet connected; requesting a
    /// session without ever calling `connect` is valid and simply yields
    /// an unconnected one.
    pub async fn get_or_create(&self, job_id: JobId) -> Arc<JobSession> {
        if let Some(session) = self.sessions.read().await.get(&job_id) {
            return Arc::clone(session);
        }

        let mut sessions = self.sessions.write().await;
        // Another caller may have won the race between the two locks.
        let session = sessions.entry(job_id).or_insert_with(|| {
            tracing::debug!(job_id, "Creating session");
            Arc::new(JobSession::new(
                job_id,
                &self.config.ws_base_url,
                self.config.reconnect,
            ))
        });
        Arc::clone(session)
    }

    /// Look up an existing session without creating one.
    pub async fn get(&self, job_id: JobId) -> Option<Arc<JobSession>> {
        self.sessions.read().await.get(&job_id).map(Arc::clone)
    }

    /// Remove the session for `job_id` so a fresh one can later be
    /// created for the same id without state leakage.
    ///
    /// The session is disconnected on the way out; callers normally have
    /// done that already, and `disconnect` is idempotent. Returns `false`
    /// if the id had no session.
    pub async fn release(&self, job_id: JobId) -> bool {
        match self.sessions.write().await.remove(&job_id) {
            Some(session) => {
                session.disconnect();
                tracing::debug!(job_id, "Released session");
                true
            }
            None => false,
        }
    }

    /// Number of registered sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Disconnect and drop every session. Used on teardown.
    pub async fn shutdown(&self) {
        let mut sessions = self.sessions.write().await;
        let count = sessions.len();
        for (_, session) in sessions.drain() {
            session.disconnect();
        }
        if count > 0 {
            tracing::info!(count, "Disconnected all job sessions");
        }
    }
}
