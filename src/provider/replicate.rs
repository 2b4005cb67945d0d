//! Legacy Replicate provider.
//!
//! Replicate tracks work as "predictions" with their own field names and
//! status vocabulary; this module translates both ways so only the uniform
//! [`Job`] contract leaves the provider seam.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;

use crate::error::SiroccoError;
use crate::job::{GenerationParams, GenerationRequest, Job, JobStatus, Modality};
use crate::provider::Provider;

pub const PROVIDER_ID: &str = "replicate";

const DEFAULT_BASE_URL: &str = "https://api.replicate.com";

const MAX_RESPONSE_BYTES: usize = 4 * 1024 * 1024; // 4MB

/// Cap on tracked prediction ids; oldest entries are dropped first.
const MAX_TRACKED_PREDICTIONS: usize = 256;

/// Insertion-ordered bounded index of prediction id to modality.
#[derive(Default)]
struct ModalityIndex {
    order: VecDeque<String>,
    by_id: HashMap<String, Modality>,
}

impl ModalityIndex {
    fn insert(&mut self, job_id: String, modality: Modality) {
        while self.by_id.len() >= MAX_TRACKED_PREDICTIONS {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.by_id.remove(&oldest);
        }
        self.order.push_back(job_id.clone());
        self.by_id.insert(job_id, modality);
    }

    fn get(&self, job_id: &str) -> Option<Modality> {
        self.by_id.get(job_id).copied()
    }
}

/// Map Replicate's status vocabulary onto the uniform one.
pub fn map_status(status: &str) -> Result<JobStatus, SiroccoError> {
    match status {
        "starting" => Ok(JobStatus::Pending),
        "processing" => Ok(JobStatus::Running),
        "succeeded" => Ok(JobStatus::Completed),
        "failed" => Ok(JobStatus::Failed),
        "canceled" => Ok(JobStatus::Cancelled),
        other => Err(SiroccoError::SchemaParse(format!(
            "unknown prediction status: {other}"
        ))),
    }
}

/// Translate the generic request into a prediction request body.
pub fn build_request_body(request: &GenerationRequest) -> Result<serde_json::Value, SiroccoError> {
    let mut input = serde_json::Map::new();
    input.insert("prompt".into(), request.prompt.clone().into());

    match &request.params {
        GenerationParams::Text(p) => {
            if let Some(max_tokens) = p.max_tokens {
                input.insert("max_tokens".into(), max_tokens.into());
            }
            if let Some(temperature) = p.temperature {
                input.insert("temperature".into(), temperature.into());
            }
            if let Some(top_p) = p.top_p {
                input.insert("top_p".into(), top_p.into());
            }
        }
        GenerationParams::Image(p) => {
            let (width, height) = p.dimensions()?;
            input.insert("width".into(), width.into());
            input.insert("height".into(), height.into());
            input.insert("num_inference_steps".into(), p.effective_steps().into());
            if let Some(guidance) = p.guidance {
                input.insert("guidance_scale".into(), guidance.into());
            }
        }
        GenerationParams::Audio(p) => {
            input.insert("duration".into(), f64::from(p.duration_secs).into());
            if let Some(rate) = p.sample_rate {
                input.insert("sample_rate".into(), rate.into());
            }
        }
    }

    if let Some(seed) = request.seed {
        input.insert("seed".into(), seed.into());
    }

    Ok(serde_json::json!({
        "version": request.model,
        "input": input,
    }))
}

fn parse_timestamp(value: Option<&serde_json::Value>) -> Option<DateTime<Utc>> {
    value
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Normalize one prediction body into a job snapshot.
pub fn parse_prediction(body: &serde_json::Value, modality: Modality) -> Result<Job, SiroccoError> {
    let job_id = body["id"]
        .as_str()
        .ok_or_else(|| SiroccoError::SchemaParse("prediction missing 'id'".into()))?
        .to_string();

    let status_str = body["status"]
        .as_str()
        .ok_or_else(|| SiroccoError::SchemaParse("prediction missing 'status'".into()))?;
    let status = map_status(status_str)?;

    let result = match status {
        JobStatus::Completed => Some(body["output"].clone()),
        _ => None,
    };
    let error = body["error"].as_str().map(|s| s.to_string());

    Ok(Job {
        job_id,
        status,
        modality,
        model: body["version"].as_str().map(|s| s.to_string()),
        created_at: parse_timestamp(body.get("created_at")).unwrap_or_else(Utc::now),
        started_at: parse_timestamp(body.get("started_at")),
        completed_at: parse_timestamp(body.get("completed_at")),
        // Predictions report no fractional progress.
        progress: None,
        result,
        error,
        metadata: serde_json::Map::new(),
    })
}

pub struct ReplicateProvider {
    client: Client,
    api_token: String,
    base_url: String,
    /// Modality per submitted prediction id; the prediction body doesn't
    /// carry one, and fetch_job must fill it in.
    modalities: Mutex<ModalityIndex>,
}

impl ReplicateProvider {
    pub fn new(api_token: impl Into<String>) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .expect("failed to build HTTP client");

        Self {
            client,
            api_token: api_token.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            modalities: Mutex::new(ModalityIndex::default()),
        }
    }

    /// Override the endpoint base, e.g. for tests.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn modality_of(&self, job_id: &str) -> Modality {
        self.modalities
            .lock()
            .expect("modalities lock poisoned")
            .get(job_id)
            .unwrap_or(Modality::Image)
    }

    async fn send(
        &self,
        req: reqwest::RequestBuilder,
    ) -> Result<serde_json::Value, SiroccoError> {
        let response = req
            .header("Authorization", format!("Token {}", self.api_token))
            .header("Content-Type", "application/json")
            .send()
            .await?;

        let status = response.status();

        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(SiroccoError::AuthFailed {
                provider: PROVIDER_ID.to_string(),
                message: format!("{status}"),
            });
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(SiroccoError::RateLimited {
                provider: PROVIDER_ID.to_string(),
            });
        }

        let bytes = response.bytes().await.map_err(SiroccoError::Network)?;

        if !status.is_success() {
            let truncated = &bytes[..bytes.len().min(MAX_RESPONSE_BYTES)];
            return Err(SiroccoError::Api {
                provider: PROVIDER_ID.to_string(),
                code: "prediction_error".to_string(),
                status: Some(status.as_u16()),
                message: String::from_utf8_lossy(truncated).into_owned(),
            });
        }

        if bytes.len() > MAX_RESPONSE_BYTES {
            return Err(SiroccoError::Api {
                provider: PROVIDER_ID.to_string(),
                code: "response_too_large".to_string(),
                status: None,
                message: format!("response too large: {} bytes", bytes.len()),
            });
        }

        serde_json::from_slice(&bytes)
            .map_err(|e| SiroccoError::SchemaParse(format!("prediction response: {e}")))
    }
}

#[async_trait]
impl Provider for ReplicateProvider {
    fn id(&self) -> &str {
        PROVIDER_ID
    }

    // Secondary: not probed by the router.
    async fn available(&self) -> bool {
        true
    }

    async fn submit(&self, request: &GenerationRequest) -> Result<Job, SiroccoError> {
        let body = build_request_body(request)?;
        let url = format!("{}/v1/predictions", self.base_url);

        let data = self.send(self.client.post(&url).json(&body)).await?;
        let job = parse_prediction(&data, request.modality())?;

        tracing::info!(
            provider = PROVIDER_ID,
            model = request.model,
            job_id = job.job_id,
            "prediction created"
        );

        self.modalities
            .lock()
            .expect("modalities lock poisoned")
            .insert(job.job_id.clone(), request.modality());

        Ok(job)
    }

    async fn fetch_job(&self, job_id: &str) -> Result<Job, SiroccoError> {
        let url = format!("{}/v1/predictions/{job_id}", self.base_url);
        let data = self.send(self.client.get(&url)).await?;
        parse_prediction(&data, self.modality_of(job_id))
    }

    async fn cancel_job(&self, job_id: &str) -> Result<(), SiroccoError> {
        let url = format!("{}/v1/predictions/{job_id}/cancel", self.base_url);
        self.send(self.client.post(&url)).await?;
        Ok(())
    }
}
