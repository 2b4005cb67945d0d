//! Per-caller bookkeeping of concurrently active jobs, completed results,
//! and failures.
//!
//! State lives behind one mutex that is never held across an await; each
//! update is a short lock-swap, so concurrent generate calls interleave
//! freely without races. A job id lives in at most one of {active, results}.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::error::SiroccoError;
use crate::job::{
    AudioParams, GenerationParams, GenerationRequest, ImageParams, Job, JobStatus, Modality,
    TextParams,
};
use crate::poller::Poller;
use crate::provider::Provider;
use crate::router::ProviderRouter;

/// Counter for minted error ids.
static ERROR_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Snapshot view of an in-flight generation, updated on every poll tick.
#[derive(Debug, Clone)]
pub struct ActiveJob {
    pub job_id: String,
    pub modality: Modality,
    pub provider_id: String,
    pub status: JobStatus,
    pub progress: Option<f32>,
    pub submitted_at: DateTime<Utc>,
}

struct ActiveEntry {
    view: ActiveJob,
    token: CancellationToken,
}

/// A recorded failure. Keyed by a freshly minted error id, not the job id —
/// a submission can fail before any job id exists.
#[derive(Debug, Clone)]
pub struct GenerationFailure {
    pub error_id: String,
    pub job_id: Option<String>,
    pub provider_id: Option<String>,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Default)]
struct RegistryState {
    active: HashMap<String, ActiveEntry>,
    results: HashMap<String, Job>,
    errors: HashMap<String, GenerationFailure>,
}

pub struct JobRegistry {
    router: Arc<ProviderRouter>,
    poller: Poller,
    state: Mutex<RegistryState>,
}

impl JobRegistry {
    pub fn new(router: Arc<ProviderRouter>, poller: Poller) -> Self {
        Self {
            router,
            poller,
            state: Mutex::new(RegistryState::default()),
        }
    }

    pub fn router(&self) -> &ProviderRouter {
        &self.router
    }

    fn mint_error_id() -> String {
        let ts = Utc::now().timestamp_millis();
        let seq = ERROR_COUNTER.fetch_add(1, Ordering::Relaxed);
        format!("err-{ts}-{seq}")
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryState> {
        self.state.lock().expect("registry lock poisoned")
    }

    fn record_failure(
        &self,
        job_id: Option<String>,
        provider_id: Option<String>,
        message: String,
    ) -> String {
        let error_id = Self::mint_error_id();
        tracing::warn!(
            error_id = error_id,
            job_id = job_id.as_deref().unwrap_or("-"),
            "generation failed: {message}"
        );
        self.lock().errors.insert(
            error_id.clone(),
            GenerationFailure {
                error_id: error_id.clone(),
                job_id,
                provider_id,
                message,
                occurred_at: Utc::now(),
            },
        );
        error_id
    }

    /// Move a terminal job out of the active set into the matching
    /// collection. Cancelled jobs are simply dropped from bookkeeping.
    fn finalize(&self, provider_id: &str, mut job: Job) -> Job {
        if job.provider().is_none() {
            job.metadata
                .insert("provider".to_string(), provider_id.to_string().into());
        }

        let mut state = self.lock();
        state.active.remove(&job.job_id);
        match job.status {
            JobStatus::Completed => {
                state.results.insert(job.job_id.clone(), job.clone());
            }
            JobStatus::Failed => {
                drop(state);
                let message = job
                    .error
                    .clone()
                    .unwrap_or_else(|| "generation failed".to_string());
                self.record_failure(
                    Some(job.job_id.clone()),
                    Some(provider_id.to_string()),
                    message,
                );
            }
            _ => {}
        }
        job
    }

    /// Submit a request, poll it to a terminal state, and record the
    /// outcome. A job the provider marks `failed` is returned Ok (with its
    /// failure captured in the errors collection); submission, auth, and
    /// polling-budget errors propagate after being recorded.
    pub async fn generate(
        &self,
        request: GenerationRequest,
        preference: Option<&str>,
    ) -> Result<Job, SiroccoError> {
        let job = match self.router.submit(&request, preference).await {
            Ok(job) => job,
            Err(e) => {
                if !matches!(e, SiroccoError::Cancelled { .. }) {
                    self.record_failure(None, None, e.user_message());
                }
                return Err(e);
            }
        };

        let provider_id = job
            .provider()
            .unwrap_or(self.router.primary_id())
            .to_string();
        let token = CancellationToken::new();

        self.lock().active.insert(
            job.job_id.clone(),
            ActiveEntry {
                view: ActiveJob {
                    job_id: job.job_id.clone(),
                    modality: job.modality,
                    provider_id: provider_id.clone(),
                    status: job.status,
                    progress: job.progress,
                    submitted_at: Utc::now(),
                },
                token: token.clone(),
            },
        );

        // Synchronous providers hand back an already-terminal job.
        if job.is_terminal() {
            return Ok(self.finalize(&provider_id, job));
        }

        let provider: &Arc<dyn Provider> = self.router.provider(&provider_id)?;
        let job_id = job.job_id.clone();

        let polled = self
            .poller
            .poll_until_complete(provider.as_ref(), &job_id, Some(&token), |snapshot| {
                let mut state = self.lock();
                if let Some(entry) = state.active.get_mut(&job_id) {
                    entry.view.status = snapshot.status;
                    entry.view.progress = snapshot.progress;
                }
            })
            .await;

        match polled {
            Ok(final_job) => Ok(self.finalize(&provider_id, final_job)),
            Err(e) => {
                self.lock().active.remove(&job_id);
                // A locally-cancelled poll was already handled by cancel().
                if !matches!(e, SiroccoError::Cancelled { .. }) {
                    self.record_failure(
                        Some(job_id),
                        Some(provider_id),
                        e.user_message(),
                    );
                }
                Err(e)
            }
        }
    }

    pub async fn generate_text(
        &self,
        model: impl Into<String>,
        prompt: impl Into<String>,
        params: TextParams,
    ) -> Result<Job, SiroccoError> {
        self.generate(
            GenerationRequest::new(model, prompt, GenerationParams::Text(params)),
            None,
        )
        .await
    }

    pub async fn generate_image(
        &self,
        model: impl Into<String>,
        prompt: impl Into<String>,
        params: ImageParams,
    ) -> Result<Job, SiroccoError> {
        self.generate(
            GenerationRequest::new(model, prompt, GenerationParams::Image(params)),
            None,
        )
        .await
    }

    pub async fn generate_audio(
        &self,
        model: impl Into<String>,
        prompt: impl Into<String>,
        params: AudioParams,
    ) -> Result<Job, SiroccoError> {
        self.generate(
            GenerationRequest::new(model, prompt, GenerationParams::Audio(params)),
            None,
        )
        .await
    }

    /// Cancel an active job: local bookkeeping is dropped immediately, the
    /// in-flight poll loop observes the token on its next iteration, and a
    /// best-effort remote cancel is issued. Unknown or already-terminal ids
    /// are a no-op — stored results are never touched.
    pub async fn cancel(&self, job_id: &str) -> Result<(), SiroccoError> {
        let entry = self.lock().active.remove(job_id);
        let Some(entry) = entry else {
            return Ok(());
        };

        entry.token.cancel();

        if let Err(e) = self
            .router
            .cancel_job(&entry.view.provider_id, job_id)
            .await
        {
            // Best-effort: the server may still run the job to completion.
            tracing::warn!(
                provider = entry.view.provider_id,
                job_id = job_id,
                "remote cancel failed: {e}"
            );
        }

        Ok(())
    }

    /// Remove a stored result. Returns whether anything was removed.
    pub fn clear_result(&self, job_id: &str) -> bool {
        self.lock().results.remove(job_id).is_some()
    }

    /// Remove a recorded failure. Returns whether anything was removed.
    pub fn clear_error(&self, error_id: &str) -> bool {
        self.lock().errors.remove(error_id).is_some()
    }

    pub fn active_jobs(&self) -> Vec<ActiveJob> {
        self.lock().active.values().map(|e| e.view.clone()).collect()
    }

    pub fn is_active(&self, job_id: &str) -> bool {
        self.lock().active.contains_key(job_id)
    }

    pub fn result(&self, job_id: &str) -> Option<Job> {
        self.lock().results.get(job_id).cloned()
    }

    pub fn results(&self) -> Vec<Job> {
        self.lock().results.values().cloned().collect()
    }

    pub fn failures(&self) -> Vec<GenerationFailure> {
        self.lock().errors.values().cloned().collect()
    }
}
