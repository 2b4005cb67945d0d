//! Bounded polling of a job until it reaches a terminal state.
//!
//! Each loop is a single sequential chain of suspend points (fetch, then
//! timed sleep), so progress callbacks for one job are never reordered.
//! Independent jobs may be polled concurrently; loops share no state.

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::client::JobClient;
use crate::error::SiroccoError;
use crate::job::Job;

/// Default attempt budget: with the default interval this caps a poll at
/// roughly five minutes.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 300;

/// Default fixed interval between poll ticks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Anything the poller can fetch job snapshots from.
#[async_trait]
pub trait JobSource: Send + Sync {
    async fn fetch_job(&self, job_id: &str) -> Result<Job, SiroccoError>;
}

#[async_trait]
impl JobSource for JobClient {
    async fn fetch_job(&self, job_id: &str) -> Result<Job, SiroccoError> {
        self.get_job(job_id).await
    }
}

/// Polling policy. Both knobs come from configuration, never from call sites.
#[derive(Debug, Clone)]
pub struct PollConfig {
    pub max_attempts: u32,
    pub poll_interval: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Poller {
    config: PollConfig,
}

impl Poller {
    pub fn new(config: PollConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PollConfig {
        &self.config
    }

    /// Poll `job_id` until it reaches a terminal state, invoking
    /// `on_progress` synchronously with each raw snapshot.
    ///
    /// A job the provider marks `failed` is an Ok return whose status is
    /// `Failed`; only auth failures, cancellation, and attempt exhaustion
    /// reject. Transient fetch errors consume an attempt and the loop keeps
    /// going. The cancellation token is checked at the top of every
    /// iteration and raced against the inter-tick sleep, so a cancel is
    /// observed by the loop itself rather than only by the caller's
    /// bookkeeping.
    pub async fn poll_until_complete<S, F>(
        &self,
        source: &S,
        job_id: &str,
        cancel: Option<&CancellationToken>,
        mut on_progress: F,
    ) -> Result<Job, SiroccoError>
    where
        S: JobSource + ?Sized,
        F: FnMut(&Job) + Send,
    {
        for attempt in 1..=self.config.max_attempts {
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                return Err(SiroccoError::Cancelled {
                    job_id: job_id.to_string(),
                });
            }

            match source.fetch_job(job_id).await {
                Ok(job) => {
                    on_progress(&job);
                    if job.is_terminal() {
                        tracing::info!(
                            job_id = job_id,
                            status = job.status.as_str(),
                            attempts = attempt,
                            "poll reached terminal state"
                        );
                        return Ok(job);
                    }
                    tracing::debug!(
                        job_id = job_id,
                        attempt = attempt,
                        progress = job.progress,
                        "job still in progress"
                    );
                }
                // Auth failures never resolve on their own.
                Err(e @ SiroccoError::AuthFailed { .. }) => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        job_id = job_id,
                        attempt = attempt,
                        "poll attempt failed: {e}"
                    );
                }
            }

            // No trailing sleep after the final attempt.
            if attempt < self.config.max_attempts {
                match cancel {
                    Some(token) => {
                        tokio::select! {
                            _ = token.cancelled() => {
                                return Err(SiroccoError::Cancelled {
                                    job_id: job_id.to_string(),
                                });
                            }
                            _ = tokio::time::sleep(self.config.poll_interval) => {}
                        }
                    }
                    None => tokio::time::sleep(self.config.poll_interval).await,
                }
            }
        }

        Err(SiroccoError::PollingTimeout {
            job_id: job_id.to_string(),
            attempts: self.config.max_attempts,
        })
    }
}
