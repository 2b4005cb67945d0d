//! Primary provider: the secure inference service.
//!
//! Already speaks the uniform job contract, so submission and status reads
//! delegate straight to [`JobClient`]; no shape translation is needed.

use async_trait::async_trait;

use crate::client::JobClient;
use crate::error::SiroccoError;
use crate::job::{GenerationRequest, Job};
use crate::provider::Provider;
use crate::transport::Credentials;

/// Default id for the primary provider.
pub const PROVIDER_ID: &str = "local";

pub struct InferenceProvider {
    client: JobClient,
    id: String,
}

impl InferenceProvider {
    pub fn new(base_url: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            client: JobClient::new(base_url, credentials, PROVIDER_ID),
            id: PROVIDER_ID.to_string(),
        }
    }

    pub fn from_client(client: JobClient) -> Self {
        let id = client.provider().to_string();
        Self { client, id }
    }

    pub fn client(&self) -> &JobClient {
        &self.client
    }
}

#[async_trait]
impl Provider for InferenceProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn available(&self) -> bool {
        match self.client.health().await {
            Ok(health) => health.is_available(),
            Err(e) => {
                tracing::warn!(provider = self.id, "health check failed: {e}");
                false
            }
        }
    }

    async fn submit(&self, request: &GenerationRequest) -> Result<Job, SiroccoError> {
        self.client.submit(request).await
    }

    async fn fetch_job(&self, job_id: &str) -> Result<Job, SiroccoError> {
        self.client.get_job(job_id).await
    }

    async fn cancel_job(&self, job_id: &str) -> Result<(), SiroccoError> {
        self.client.cancel(job_id).await
    }
}
