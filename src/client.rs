//! Client for the primary inference service's job endpoints.

use reqwest::Method;
use serde::Deserialize;

use crate::error::SiroccoError;
use crate::job::{GenerationRequest, Job};
use crate::transport::{Credentials, Transport};

/// Liveness snapshot from `GET /health`.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthStatus {
    #[serde(default)]
    pub available: bool,
    #[serde(default)]
    pub status: Option<String>,
}

impl HealthStatus {
    /// The service is usable if it says so explicitly or reports a healthy
    /// status string.
    pub fn is_available(&self) -> bool {
        self.available
            || self
                .status
                .as_deref()
                .is_some_and(|s| matches!(s, "healthy" | "ok"))
    }
}

/// Aggregate counters from `GET /stats`.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceStats {
    #[serde(default)]
    pub active_jobs: u64,
    #[serde(default)]
    pub success_rate: f64,
    #[serde(default)]
    pub models_loaded: u64,
}

pub struct JobClient {
    transport: Transport,
}

impl JobClient {
    pub fn new(base_url: impl Into<String>, credentials: Credentials, provider: impl Into<String>) -> Self {
        Self {
            transport: Transport::new(base_url, credentials, provider),
        }
    }

    pub fn provider(&self) -> &str {
        self.transport.provider()
    }

    fn parse_job(&self, data: serde_json::Value) -> Result<Job, SiroccoError> {
        serde_json::from_value(data).map_err(|e| SiroccoError::SchemaParse(format!("job: {e}")))
    }

    /// Submit a generation request. The returned job starts out `pending`
    /// with a provider-issued id.
    pub async fn submit(&self, request: &GenerationRequest) -> Result<Job, SiroccoError> {
        let path = format!("/inference/{}", request.modality().as_str());
        let body = serde_json::to_value(request)
            .map_err(|e| SiroccoError::SchemaParse(format!("request: {e}")))?;

        let data = self.transport.request(Method::POST, &path, Some(&body)).await?;
        let job = self.parse_job(data)?;

        tracing::info!(
            provider = self.provider(),
            model = request.model,
            modality = request.modality().as_str(),
            job_id = job.job_id,
            "generation job submitted"
        );

        Ok(job)
    }

    /// Idempotent read of the job's current state. No side effects.
    pub async fn get_job(&self, job_id: &str) -> Result<Job, SiroccoError> {
        let data = self
            .transport
            .request(Method::GET, &format!("/jobs/{job_id}"), None)
            .await?;
        self.parse_job(data)
    }

    /// Best-effort request to stop server-side work. The job may still run
    /// to completion; a cancel against an already-terminal job is a no-op.
    pub async fn cancel(&self, job_id: &str) -> Result<(), SiroccoError> {
        self.transport
            .request(Method::POST, &format!("/jobs/{job_id}/cancel"), None)
            .await?;
        Ok(())
    }

    /// Offset-paginated job listing, provider-default ordering (newest first).
    pub async fn list_jobs(&self, limit: u32, offset: u32) -> Result<Vec<Job>, SiroccoError> {
        let data = self
            .transport
            .request(Method::GET, &format!("/jobs?limit={limit}&offset={offset}"), None)
            .await?;

        // Some deployments wrap the page in {"jobs": [...]}, others return
        // the bare array.
        let jobs = match data {
            serde_json::Value::Array(_) => data,
            serde_json::Value::Object(mut map) => map
                .remove("jobs")
                .ok_or_else(|| SiroccoError::SchemaParse("job list missing 'jobs'".into()))?,
            _ => return Err(SiroccoError::SchemaParse("unexpected job list shape".into())),
        };

        serde_json::from_value(jobs).map_err(|e| SiroccoError::SchemaParse(format!("job list: {e}")))
    }

    pub async fn health(&self) -> Result<HealthStatus, SiroccoError> {
        let data = self.transport.request(Method::GET, "/health", None).await?;
        serde_json::from_value(data).map_err(|e| SiroccoError::SchemaParse(format!("health: {e}")))
    }

    pub async fn stats(&self) -> Result<ServiceStats, SiroccoError> {
        let data = self.transport.request(Method::GET, "/stats", None).await?;
        serde_json::from_value(data).map_err(|e| SiroccoError::SchemaParse(format!("stats: {e}")))
    }
}
