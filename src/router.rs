//! Fallback routing between the primary inference service and legacy
//! providers.
//!
//! Routing decides once, before first submission: a failure after the
//! selected provider has been chosen propagates as-is rather than silently
//! retrying elsewhere.

use std::sync::Arc;

use crate::error::SiroccoError;
use crate::job::{GenerationRequest, Job, ProviderKind, ProviderSelection};
use crate::provider::Provider;

pub struct ProviderRouter {
    primary: Arc<dyn Provider>,
    /// Fallback candidates in declared order.
    secondaries: Vec<Arc<dyn Provider>>,
}

impl ProviderRouter {
    pub fn new(primary: Arc<dyn Provider>, secondaries: Vec<Arc<dyn Provider>>) -> Self {
        Self {
            primary,
            secondaries,
        }
    }

    pub fn primary_id(&self) -> &str {
        self.primary.id()
    }

    /// All configured provider ids, primary first.
    pub fn provider_ids(&self) -> Vec<&str> {
        std::iter::once(self.primary.id())
            .chain(self.secondaries.iter().map(|p| p.id()))
            .collect()
    }

    /// Look up a provider by id.
    pub fn provider(&self, provider_id: &str) -> Result<&Arc<dyn Provider>, SiroccoError> {
        if self.primary.id() == provider_id {
            return Ok(&self.primary);
        }
        self.secondaries
            .iter()
            .find(|p| p.id() == provider_id)
            .ok_or_else(|| SiroccoError::UnknownProvider {
                provider: provider_id.to_string(),
            })
    }

    /// Resolve a provider for this request.
    ///
    /// An explicit secondary preference is honored without probing the
    /// primary. Otherwise the primary's health decides: available → primary,
    /// else the first configured secondary (deterministic fallback order).
    pub async fn route(
        &self,
        request: &GenerationRequest,
        preference: Option<&str>,
    ) -> Result<ProviderSelection, SiroccoError> {
        if let Some(pref) = preference {
            if pref != self.primary.id() {
                let provider = self.provider(pref)?;
                return Ok(ProviderSelection {
                    provider_id: provider.id().to_string(),
                    kind: ProviderKind::Secondary,
                });
            }
        }

        if self.primary.available().await {
            return Ok(ProviderSelection {
                provider_id: self.primary.id().to_string(),
                kind: ProviderKind::Primary,
            });
        }

        match self.secondaries.first() {
            Some(fallback) => {
                tracing::warn!(
                    primary = self.primary.id(),
                    fallback = fallback.id(),
                    model = request.model,
                    "primary unavailable, falling back"
                );
                Ok(ProviderSelection {
                    provider_id: fallback.id().to_string(),
                    kind: ProviderKind::Secondary,
                })
            }
            None => Err(SiroccoError::Unavailable {
                provider: self.primary.id().to_string(),
            }),
        }
    }

    /// Route, submit against the selected provider, and tag the resulting
    /// job with the provider id. Submission failures propagate as-is; no
    /// cross-provider retry within one call.
    pub async fn submit(
        &self,
        request: &GenerationRequest,
        preference: Option<&str>,
    ) -> Result<Job, SiroccoError> {
        let selection = self.route(request, preference).await?;
        let provider = self.provider(&selection.provider_id)?;

        let mut job = provider.submit(request).await?;
        job.metadata
            .insert("provider".to_string(), selection.provider_id.clone().into());

        tracing::info!(
            provider = selection.provider_id,
            fallback = selection.is_fallback(),
            job_id = job.job_id,
            "request routed"
        );

        Ok(job)
    }

    /// Fetch a job through the provider that owns it.
    pub async fn fetch_job(&self, provider_id: &str, job_id: &str) -> Result<Job, SiroccoError> {
        self.provider(provider_id)?.fetch_job(job_id).await
    }

    /// Best-effort cancel through the provider that owns the job.
    pub async fn cancel_job(&self, provider_id: &str, job_id: &str) -> Result<(), SiroccoError> {
        self.provider(provider_id)?.cancel_job(job_id).await
    }
}
