//! End-to-end tests for per-caller job bookkeeping: submit → poll → record,
//! cancellation, clearing, and the disjoint-sets invariant.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use sirocco::error::SiroccoError;
use sirocco::job::{
    GenerationParams, GenerationRequest, ImageParams, Job, JobStatus, Modality, TextParams,
};
use sirocco::poller::{PollConfig, Poller};
use sirocco::provider::Provider;
use sirocco::registry::JobRegistry;
use sirocco::router::ProviderRouter;

fn snapshot(provider: &str, status: JobStatus, progress: Option<f32>) -> Job {
    Job {
        job_id: format!("{provider}-j1"),
        status,
        modality: Modality::Image,
        model: Some("sdxl-base".to_string()),
        created_at: Utc::now(),
        started_at: Some(Utc::now()),
        completed_at: None,
        progress,
        result: None,
        error: None,
        metadata: serde_json::Map::new(),
    }
}

/// Scripted provider: submit returns a pending job, fetch_job pops one
/// snapshot per call (the last repeats).
struct ScriptedProvider {
    id: &'static str,
    healthy: bool,
    fail_submit: bool,
    script: Mutex<VecDeque<Job>>,
    cancel_calls: AtomicU32,
    cancel_fails: AtomicBool,
}

impl ScriptedProvider {
    fn new(id: &'static str, script: Vec<Job>) -> Self {
        Self {
            id,
            healthy: true,
            fail_submit: false,
            script: Mutex::new(script.into_iter().collect()),
            cancel_calls: AtomicU32::new(0),
            cancel_fails: AtomicBool::new(false),
        }
    }

    fn unhealthy(mut self) -> Self {
        self.healthy = false;
        self
    }

    fn failing_submit(mut self) -> Self {
        self.fail_submit = true;
        self
    }

    fn cancels(&self) -> u32 {
        self.cancel_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn id(&self) -> &str {
        self.id
    }

    async fn available(&self) -> bool {
        self.healthy
    }

    async fn submit(&self, request: &GenerationRequest) -> Result<Job, SiroccoError> {
        if self.fail_submit {
            return Err(SiroccoError::Api {
                provider: self.id.to_string(),
                code: "submit_rejected".to_string(),
                status: Some(503),
                message: "no capacity".to_string(),
            });
        }
        Ok(Job {
            modality: request.modality(),
            ..snapshot(self.id, JobStatus::Pending, None)
        })
    }

    async fn fetch_job(&self, _job_id: &str) -> Result<Job, SiroccoError> {
        let mut script = self.script.lock().unwrap();
        if script.len() > 1 {
            Ok(script.pop_front().unwrap())
        } else {
            Ok(script.front().expect("script must not be empty").clone())
        }
    }

    async fn cancel_job(&self, _job_id: &str) -> Result<(), SiroccoError> {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        if self.cancel_fails.load(Ordering::SeqCst) {
            return Err(SiroccoError::Api {
                provider: self.id.to_string(),
                code: "cancel_failed".to_string(),
                status: Some(500),
                message: "shrug".to_string(),
            });
        }
        Ok(())
    }
}

fn registry_with(
    primary: Arc<ScriptedProvider>,
    secondaries: Vec<Arc<ScriptedProvider>>,
    poll_interval_ms: u64,
    max_attempts: u32,
) -> JobRegistry {
    let router = Arc::new(ProviderRouter::new(
        primary as Arc<dyn Provider>,
        secondaries
            .into_iter()
            .map(|p| p as Arc<dyn Provider>)
            .collect(),
    ));
    JobRegistry::new(
        router,
        Poller::new(PollConfig {
            max_attempts,
            poll_interval: Duration::from_millis(poll_interval_ms),
        }),
    )
}

fn image_request() -> GenerationRequest {
    GenerationRequest::new(
        "sdxl-base",
        "a lighthouse at dusk",
        GenerationParams::Image(ImageParams::default()),
    )
}

// ---------------------------------------------------------------------------
// Completed flow
// ---------------------------------------------------------------------------

#[tokio::test]
async fn completed_job_moves_to_results() {
    let mut done = snapshot("local", JobStatus::Completed, Some(1.0));
    done.result = Some(serde_json::json!({"url": "https://x/y.png"}));

    let primary = Arc::new(ScriptedProvider::new(
        "local",
        vec![snapshot("local", JobStatus::Running, Some(0.3)), done],
    ));
    let registry = registry_with(primary, vec![], 5, 20);

    let job = registry.generate(image_request(), None).await.unwrap();

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.provider(), Some("local"));

    // Moved out of active, into results — never both.
    assert!(!registry.is_active("local-j1"));
    let stored = registry.result("local-j1").unwrap();
    assert_eq!(stored.result.unwrap()["url"], "https://x/y.png");
    assert!(registry.failures().is_empty());
}

#[tokio::test]
async fn generate_image_builds_image_modality() {
    let primary = Arc::new(ScriptedProvider::new(
        "local",
        vec![snapshot("local", JobStatus::Completed, Some(1.0))],
    ));
    let registry = registry_with(primary, vec![], 5, 20);

    let job = registry
        .generate_image("sdxl-base", "a lighthouse", ImageParams::default())
        .await
        .unwrap();

    assert_eq!(job.modality, Modality::Image);
}

// ---------------------------------------------------------------------------
// Failed flow
// ---------------------------------------------------------------------------

#[tokio::test]
async fn failed_job_is_returned_ok_and_recorded() {
    let mut failed = snapshot("local", JobStatus::Failed, None);
    failed.error = Some("OOM".to_string());

    let primary = Arc::new(ScriptedProvider::new(
        "local",
        vec![snapshot("local", JobStatus::Running, Some(0.5)), failed],
    ));
    let registry = registry_with(primary, vec![], 5, 20);

    // Polling succeeded; the job itself failed.
    let job = registry.generate(image_request(), None).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);

    assert!(registry.result("local-j1").is_none());
    assert!(!registry.is_active("local-j1"));

    let failures = registry.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].message, "OOM");
    assert_eq!(failures[0].job_id.as_deref(), Some("local-j1"));
    assert!(failures[0].error_id.starts_with("err-"));
    // Error ids are minted, not job ids.
    assert_ne!(failures[0].error_id, "local-j1");
}

#[tokio::test]
async fn submission_failure_is_recorded_without_job_id() {
    let primary = Arc::new(
        ScriptedProvider::new("local", vec![snapshot("local", JobStatus::Pending, None)])
            .failing_submit(),
    );
    let registry = registry_with(primary, vec![], 5, 20);

    let err = registry.generate(image_request(), None).await.unwrap_err();
    assert!(matches!(err, SiroccoError::Api { .. }));

    let failures = registry.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].job_id, None);
    assert!(registry.active_jobs().is_empty());
}

#[tokio::test]
async fn polling_timeout_is_recorded_and_propagated() {
    let primary = Arc::new(ScriptedProvider::new(
        "local",
        vec![snapshot("local", JobStatus::Running, Some(0.5))],
    ));
    let registry = registry_with(primary, vec![], 5, 3);

    let err = registry.generate(image_request(), None).await.unwrap_err();

    assert!(matches!(
        err,
        SiroccoError::PollingTimeout { attempts: 3, .. }
    ));
    assert!(!registry.is_active("local-j1"));

    let failures = registry.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].job_id.as_deref(), Some("local-j1"));
}

// ---------------------------------------------------------------------------
// Fallback flow
// ---------------------------------------------------------------------------

#[tokio::test]
async fn fallback_result_is_tagged_with_secondary() {
    let primary = Arc::new(
        ScriptedProvider::new("local", vec![snapshot("local", JobStatus::Pending, None)])
            .unhealthy(),
    );
    let secondary = Arc::new(ScriptedProvider::new(
        "huggingface",
        vec![snapshot("huggingface", JobStatus::Completed, Some(1.0))],
    ));
    let registry = registry_with(primary, vec![secondary], 5, 20);

    let job = registry.generate(image_request(), None).await.unwrap();

    assert_eq!(job.provider(), Some("huggingface"));
    assert!(registry.result("huggingface-j1").is_some());
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancel_stops_active_job_and_issues_remote_cancel() {
    let primary = Arc::new(ScriptedProvider::new(
        "local",
        vec![snapshot("local", JobStatus::Running, Some(0.2))],
    ));
    let registry = Arc::new(registry_with(primary.clone(), vec![], 20, 1000));

    let task = {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move { registry.generate(image_request(), None).await })
    };

    // Let the first tick land so the job is registered and active.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(registry.is_active("local-j1"));

    registry.cancel("local-j1").await.unwrap();

    let err = task.await.unwrap().unwrap_err();
    assert!(matches!(err, SiroccoError::Cancelled { .. }));

    assert!(!registry.is_active("local-j1"));
    assert_eq!(primary.cancels(), 1);
    // A local cancel is not a failure.
    assert!(registry.failures().is_empty());
}

#[tokio::test]
async fn cancel_on_terminal_job_is_a_noop() {
    let primary = Arc::new(ScriptedProvider::new(
        "local",
        vec![snapshot("local", JobStatus::Completed, Some(1.0))],
    ));
    let registry = registry_with(primary.clone(), vec![], 5, 20);

    registry.generate(image_request(), None).await.unwrap();
    assert!(registry.result("local-j1").is_some());

    registry.cancel("local-j1").await.unwrap();

    // No remote call, and the stored result is untouched.
    assert_eq!(primary.cancels(), 0);
    assert!(registry.result("local-j1").is_some());
}

#[tokio::test]
async fn cancel_remote_failure_is_swallowed() {
    let primary = Arc::new(ScriptedProvider::new(
        "local",
        vec![snapshot("local", JobStatus::Running, Some(0.2))],
    ));
    primary.cancel_fails.store(true, Ordering::SeqCst);
    let registry = Arc::new(registry_with(primary.clone(), vec![], 20, 1000));

    let task = {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move { registry.generate(image_request(), None).await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    // Best-effort: the remote error does not surface.
    registry.cancel("local-j1").await.unwrap();
    assert_eq!(primary.cancels(), 1);

    let err = task.await.unwrap().unwrap_err();
    assert!(matches!(err, SiroccoError::Cancelled { .. }));
}

// ---------------------------------------------------------------------------
// Progress write-back
// ---------------------------------------------------------------------------

#[tokio::test]
async fn progress_ticks_update_the_active_entry() {
    let primary = Arc::new(ScriptedProvider::new(
        "local",
        vec![snapshot("local", JobStatus::Running, Some(0.42))],
    ));
    let registry = Arc::new(registry_with(primary, vec![], 60, 1000));

    let task = {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move { registry.generate(image_request(), None).await })
    };

    tokio::time::sleep(Duration::from_millis(30)).await;
    let active = registry.active_jobs();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].job_id, "local-j1");
    assert_eq!(active[0].status, JobStatus::Running);
    assert_eq!(active[0].progress, Some(0.42));
    assert_eq!(active[0].provider_id, "local");

    registry.cancel("local-j1").await.unwrap();
    let _ = task.await.unwrap();
}

// ---------------------------------------------------------------------------
// Clearing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn clear_result_and_clear_error() {
    let mut failed = snapshot("local", JobStatus::Failed, None);
    failed.error = Some("boom".to_string());

    let primary = Arc::new(ScriptedProvider::new("local", vec![failed]));
    let registry = registry_with(primary, vec![], 5, 20);

    registry.generate(image_request(), None).await.unwrap();

    let failures = registry.failures();
    assert_eq!(failures.len(), 1);

    assert!(registry.clear_error(&failures[0].error_id));
    assert!(registry.failures().is_empty());
    // Clearing twice, or clearing the unknown, reports nothing removed.
    assert!(!registry.clear_error(&failures[0].error_id));
    assert!(!registry.clear_result("local-j1"));
}

#[tokio::test]
async fn clear_result_removes_stored_job() {
    let primary = Arc::new(ScriptedProvider::new(
        "local",
        vec![snapshot("local", JobStatus::Completed, Some(1.0))],
    ));
    let registry = registry_with(primary, vec![], 5, 20);

    registry.generate(image_request(), None).await.unwrap();
    assert!(registry.clear_result("local-j1"));
    assert!(registry.result("local-j1").is_none());
    assert!(registry.results().is_empty());
}

// ---------------------------------------------------------------------------
// Concurrency
// ---------------------------------------------------------------------------

#[tokio::test]
async fn text_and_audio_generations_run_concurrently() {
    // Two registries would be trivial; one registry, two providers' jobs.
    let primary = Arc::new(ScriptedProvider::new(
        "local",
        vec![snapshot("local", JobStatus::Completed, Some(1.0))],
    ));
    let registry = Arc::new(registry_with(primary, vec![], 5, 20));

    let text = {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move {
            registry
                .generate_text("llama-3-8b", "hello", TextParams::default())
                .await
        })
    };
    let audio = {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move {
            registry
                .generate_audio(
                    "musicgen",
                    "soft piano",
                    sirocco::job::AudioParams {
                        duration_secs: 10.0,
                        sample_rate: None,
                    },
                )
                .await
        })
    };

    let (text, audio) = tokio::join!(text, audio);
    assert!(text.unwrap().is_ok());
    assert!(audio.unwrap().is_ok());
}
