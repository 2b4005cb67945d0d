//! Provider backends capable of executing a generation request.
//!
//! Each provider owns its wire shape behind build/parse functions and
//! normalizes whatever it returns (a job-based async response or a
//! synchronous direct result) into the uniform [`Job`] contract before it
//! leaves this module.

pub mod huggingface;
pub mod inference;
pub mod replicate;

use async_trait::async_trait;

use crate::error::SiroccoError;
use crate::job::{GenerationRequest, Job};
use crate::poller::JobSource;

#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable provider id, as stamped into `Job.metadata.provider`.
    fn id(&self) -> &str;

    /// Liveness probe. The router only consults this for the primary.
    async fn available(&self) -> bool;

    async fn submit(&self, request: &GenerationRequest) -> Result<Job, SiroccoError>;

    async fn fetch_job(&self, job_id: &str) -> Result<Job, SiroccoError>;

    /// Best-effort server-side cancel; must not error on terminal jobs.
    async fn cancel_job(&self, job_id: &str) -> Result<(), SiroccoError>;
}

// Any provider object can feed the poller directly.
#[async_trait]
impl JobSource for dyn Provider {
    async fn fetch_job(&self, job_id: &str) -> Result<Job, SiroccoError> {
        Provider::fetch_job(self, job_id).await
    }
}
