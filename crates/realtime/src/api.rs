//! REST client for the analysis job-control endpoints.
//!
//! Thin typed wrapper over the backend's HTTP API (job creation, start,
//! pause/resume, status). These endpoints are an opaque request/response
//! boundary consumed by UI-side callers; the session core never touches
//! them.

use serde::Deserialize;
use trafficlens_core::types::JobId;

/// HTTP client for the analysis backend.
pub struct JobsApi {
    client: reqwest::Client,
    api_url: String,
}

/// Response returned after successfully submitting an analysis job.
#[derive(Debug, Deserialize)]
pub struct CreateAnalysisResponse {
    /// Server-assigned job identifier; the key for the realtime session.
    pub analysis_id: JobId,
    pub status: String,
}

/// Current server-side state of a job.
#[derive(Debug, Deserialize)]
pub struct AnalysisStatus {
    pub analysis_id: JobId,
    pub status: String,
    #[serde(default)]
    pub percentage: f64,
    #[serde(default)]
    pub vehicles_detected: i64,
}

/// Errors from the job-control REST layer.
#[derive(Debug, thiserror::Error)]
pub enum JobsApiError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The backend returned a non-2xx status code.
    #[error("analysis API error ({status}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },
}

impl JobsApi {
    /// Create a new API client.
    ///
    /// * `api_url` - Base HTTP URL, e.g. `http://host:8000`.
    pub fn new(api_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url,
        }
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, api_url: String) -> Self {
        Self { client, api_url }
    }

    /// Submit a new analysis job.
    ///
    /// `source` describes the video source and analysis parameters; it is
    /// passed through untouched.
    pub async fn create_analysis(
        &self,
        source: &serde_json::Value,
    ) -> Result<CreateAnalysisResponse, JobsApiError> {
        let response = self
            .client
            .post(format!("{}/api/traffic/analysis/", self.api_url))
            .json(source)
            .send()
            .await?;
        let response = Self::check(response).await?;
        Ok(response.json().await?)
    }

    /// Start a previously created job.
    pub async fn start_analysis(&self, job_id: JobId) -> Result<AnalysisStatus, JobsApiError> {
        self.post_control(job_id, "start").await
    }

    /// Pause a running job.
    pub async fn pause_analysis(&self, job_id: JobId) -> Result<AnalysisStatus, JobsApiError> {
        self.post_control(job_id, "pause").await
    }

    /// Resume a paused job.
    pub async fn resume_analysis(&self, job_id: JobId) -> Result<AnalysisStatus, JobsApiError> {
        self.post_control(job_id, "resume").await
    }

    /// Poll the current status of a job.
    pub async fn analysis_status(&self, job_id: JobId) -> Result<AnalysisStatus, JobsApiError> {
        let response = self
            .client
            .get(format!(
                "{}/api/traffic/analysis/{job_id}/status/",
                self.api_url
            ))
            .send()
            .await?;
        let response = Self::check(response).await?;
        Ok(response.json().await?)
    }

    async fn post_control(
        &self,
        job_id: JobId,
        action: &str,
    ) -> Result<AnalysisStatus, JobsApiError> {
        let response = self
            .client
            .post(format!(
                "{}/api/traffic/analysis/{job_id}/{action}/",
                self.api_url
            ))
            .send()
            .await?;
        let response = Self::check(response).await?;
        Ok(response.json().await?)
    }

    /// Map non-2xx responses to [`JobsApiError::Api`] with the raw body.
    async fn check(response: reqwest::Response) -> Result<reqwest::Response, JobsApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(JobsApiError::Api {
            status: status.as_u16(),
            body,
        })
    }
}
