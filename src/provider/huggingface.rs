//! Legacy Hugging Face inference provider.
//!
//! The hosted inference API is synchronous: one POST returns the finished
//! asset. To satisfy the uniform job contract, a successful response is
//! normalized into an already-`completed` job with a locally-minted id, and
//! cached so later `fetch_job` calls serve the same snapshot.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;

use crate::error::SiroccoError;
use crate::job::{GenerationParams, GenerationRequest, Job, JobStatus};
use crate::provider::Provider;

pub const PROVIDER_ID: &str = "huggingface";

const DEFAULT_BASE_URL: &str = "https://api-inference.huggingface.co";

const MAX_RESPONSE_BYTES: usize = 8 * 1024 * 1024; // 8MB, image payloads

/// Counter for locally-minted job ids.
static JOB_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Cap on cached completed jobs. Result payloads can run to megabytes, so
/// the cache evicts oldest-first once full.
const MAX_CACHED_JOBS: usize = 64;

/// Insertion-ordered bounded cache of completed jobs.
#[derive(Default)]
struct CompletedCache {
    order: VecDeque<String>,
    jobs: HashMap<String, Job>,
}

impl CompletedCache {
    fn insert(&mut self, job: Job) {
        while self.jobs.len() >= MAX_CACHED_JOBS {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.jobs.remove(&oldest);
        }
        self.order.push_back(job.job_id.clone());
        self.jobs.insert(job.job_id.clone(), job);
    }

    fn get(&self, job_id: &str) -> Option<&Job> {
        self.jobs.get(job_id)
    }
}

/// Translate the generic request into the HF `inputs`/`parameters` shape.
pub fn build_request_body(request: &GenerationRequest) -> Result<serde_json::Value, SiroccoError> {
    let mut parameters = serde_json::Map::new();

    match &request.params {
        GenerationParams::Text(p) => {
            if let Some(max_tokens) = p.max_tokens {
                parameters.insert("max_new_tokens".into(), max_tokens.into());
            }
            if let Some(temperature) = p.temperature {
                parameters.insert("temperature".into(), temperature.into());
            }
            if let Some(top_p) = p.top_p {
                parameters.insert("top_p".into(), top_p.into());
            }
        }
        GenerationParams::Image(p) => {
            let (width, height) = p.dimensions()?;
            parameters.insert("width".into(), width.into());
            parameters.insert("height".into(), height.into());
            parameters.insert("num_inference_steps".into(), p.effective_steps().into());
            if let Some(guidance) = p.guidance {
                parameters.insert("guidance_scale".into(), guidance.into());
            }
        }
        GenerationParams::Audio(p) => {
            parameters.insert("duration".into(), f64::from(p.duration_secs).into());
            if let Some(rate) = p.sample_rate {
                parameters.insert("sample_rate".into(), rate.into());
            }
        }
    }

    if let Some(seed) = request.seed {
        parameters.insert("seed".into(), seed.into());
    }

    Ok(serde_json::json!({
        "inputs": request.prompt,
        "parameters": parameters,
    }))
}

/// Fold a synchronous HF response into a completed job snapshot.
pub fn normalize_response(request: &GenerationRequest, job_id: String, result: serde_json::Value) -> Job {
    let now = Utc::now();
    Job {
        job_id,
        status: JobStatus::Completed,
        modality: request.modality(),
        model: Some(request.model.clone()),
        created_at: now,
        started_at: Some(now),
        completed_at: Some(now),
        progress: Some(1.0),
        result: Some(result),
        error: None,
        metadata: serde_json::Map::new(),
    }
}

pub struct HuggingFaceProvider {
    client: Client,
    api_key: String,
    base_url: String,
    /// Completed jobs by id; the sync API has nothing to re-fetch from.
    completed: Mutex<CompletedCache>,
}

impl HuggingFaceProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .expect("failed to build HTTP client");

        Self {
            client,
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            completed: Mutex::new(CompletedCache::default()),
        }
    }

    /// Override the endpoint base, e.g. for tests.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn mint_job_id() -> String {
        let ts = Utc::now().timestamp_millis();
        let seq = JOB_COUNTER.fetch_add(1, Ordering::Relaxed);
        format!("hf-{ts}-{seq}")
    }
}

#[async_trait]
impl Provider for HuggingFaceProvider {
    fn id(&self) -> &str {
        PROVIDER_ID
    }

    // No cheap liveness endpoint; the router only probes the primary.
    async fn available(&self) -> bool {
        true
    }

    async fn submit(&self, request: &GenerationRequest) -> Result<Job, SiroccoError> {
        let body = build_request_body(request)?;
        let url = format!("{}/models/{}", self.base_url, request.model);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
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
            let message = String::from_utf8_lossy(truncated).into_owned();
            return Err(SiroccoError::Api {
                provider: PROVIDER_ID.to_string(),
                code: "inference_error".to_string(),
                status: Some(status.as_u16()),
                message,
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

        // Text-ish models return JSON; binary payloads are carried opaquely.
        let result = serde_json::from_slice::<serde_json::Value>(&bytes).unwrap_or_else(|_| {
            serde_json::json!({ "raw": String::from_utf8_lossy(&bytes).into_owned() })
        });

        let job_id = Self::mint_job_id();
        let job = normalize_response(request, job_id.clone(), result);

        tracing::info!(
            provider = PROVIDER_ID,
            model = request.model,
            job_id = job_id,
            "synchronous generation completed"
        );

        self.completed
            .lock()
            .expect("completed-jobs lock poisoned")
            .insert(job.clone());

        Ok(job)
    }

    async fn fetch_job(&self, job_id: &str) -> Result<Job, SiroccoError> {
        self.completed
            .lock()
            .expect("completed-jobs lock poisoned")
            .get(job_id)
            .cloned()
            // Evicted entries read as unknown; callers see the job as gone.
            .ok_or_else(|| SiroccoError::Api {
                provider: PROVIDER_ID.to_string(),
                code: "job_not_found".to_string(),
                status: Some(404),
                message: format!("no such job: {job_id}"),
            })
    }

    // Nothing to stop server-side; the work finished inside submit.
    async fn cancel_job(&self, _job_id: &str) -> Result<(), SiroccoError> {
        Ok(())
    }
}
