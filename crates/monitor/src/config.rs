use std::path::PathBuf;

use trafficlens_core::types::JobId;

/// Monitor configuration loaded from environment variables.
///
/// All fields except `JOB_ID` have defaults suitable for a local
/// backend.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// WebSocket base URL of the analysis backend.
    pub ws_base_url: String,
    /// HTTP base URL of the analysis backend.
    pub api_base_url: String,
    /// Path of the persisted notification cache.
    pub notification_store: PathBuf,
    /// The analysis job to follow.
    pub job_id: JobId,
}

impl MonitorConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var              | Default                       |
    /// |----------------------|-------------------------------|
    /// | `WS_BASE_URL`        | `ws://localhost:8000`         |
    /// | `API_BASE_URL`       | `http://localhost:8000`       |
    /// | `NOTIFICATION_STORE` | `traffic_notifications.json`  |
    /// | `JOB_ID`             | (required)                    |
    pub fn from_env() -> Self {
        let ws_base_url =
            std::env::var("WS_BASE_URL").unwrap_or_else(|_| "ws://localhost:8000".into());

        let api_base_url =
            std::env::var("API_BASE_URL").unwrap_or_else(|_| "http://localhost:8000".into());

        let notification_store: PathBuf = std::env::var("NOTIFICATION_STORE")
            .unwrap_or_else(|_| "traffic_notifications.json".into())
            .into();

        let job_id: JobId = std::env::var("JOB_ID")
            .expect("JOB_ID must be set")
            .parse()
            .expect("JOB_ID must be an integer");

        Self {
            ws_base_url,
            api_base_url,
            notification_store,
            job_id,
        }
    }
}
