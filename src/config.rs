use std::env;
use std::sync::Arc;
use std::time::Duration;

use crate::poller::{PollConfig, Poller};
use crate::provider::huggingface::HuggingFaceProvider;
use crate::provider::inference::InferenceProvider;
use crate::provider::replicate::ReplicateProvider;
use crate::provider::Provider;
use crate::registry::JobRegistry;
use crate::router::ProviderRouter;
use crate::transport::Credentials;

const DEFAULT_BASE_URL: &str = "http://localhost:8000";

/// Install the global tracing subscriber. Call once at process start;
/// embedding hosts that bring their own subscriber skip this.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

pub struct Config {
    pub base_url: String,
    pub credentials: Credentials,
    pub poll: PollConfig,
    pub huggingface_api_key: Option<String>,
    pub replicate_api_token: Option<String>,
}

impl Config {
    pub fn from_env() -> Self {
        let base_url = env::var("SIROCCO_BASE_URL").unwrap_or_else(|_| {
            tracing::warn!("SIROCCO_BASE_URL not set — using {DEFAULT_BASE_URL}");
            DEFAULT_BASE_URL.to_string()
        });

        // API key wins over a bearer token when both are present.
        let credentials = if let Ok(key) = env::var("SIROCCO_API_KEY") {
            Credentials::ApiKey(key)
        } else if let Ok(token) = env::var("SIROCCO_BEARER_TOKEN") {
            Credentials::Bearer(token)
        } else {
            tracing::warn!(
                "neither SIROCCO_API_KEY nor SIROCCO_BEARER_TOKEN set — requests are unauthenticated"
            );
            Credentials::None
        };

        let mut poll = PollConfig::default();
        if let Some(interval_ms) = parse_env::<u64>("SIROCCO_POLL_INTERVAL_MS") {
            poll.poll_interval = Duration::from_millis(interval_ms);
        }
        if let Some(max_attempts) = parse_env::<u32>("SIROCCO_MAX_POLL_ATTEMPTS") {
            poll.max_attempts = max_attempts;
        }

        let huggingface_api_key = env::var("HUGGINGFACE_API_KEY").ok();
        if huggingface_api_key.is_none() {
            tracing::warn!("HUGGINGFACE_API_KEY not set — huggingface fallback unavailable");
        }

        let replicate_api_token = env::var("REPLICATE_API_TOKEN").ok();
        if replicate_api_token.is_none() {
            tracing::warn!("REPLICATE_API_TOKEN not set — replicate fallback unavailable");
        }

        Self {
            base_url,
            credentials,
            poll,
            huggingface_api_key,
            replicate_api_token,
        }
    }

    /// Wire providers → router → registry. Secondaries are registered only
    /// when their key is present, in fixed fallback order.
    pub fn build_registry(self) -> JobRegistry {
        let primary: Arc<dyn Provider> =
            Arc::new(InferenceProvider::new(self.base_url, self.credentials));

        let mut secondaries: Vec<Arc<dyn Provider>> = Vec::new();
        if let Some(key) = self.huggingface_api_key {
            secondaries.push(Arc::new(HuggingFaceProvider::new(key)));
        }
        if let Some(token) = self.replicate_api_token {
            secondaries.push(Arc::new(ReplicateProvider::new(token)));
        }

        if secondaries.is_empty() {
            tracing::warn!("no fallback providers configured");
        }

        let router = Arc::new(ProviderRouter::new(primary, secondaries));
        JobRegistry::new(router, Poller::new(self.poll))
    }
}

/// Parse an env var, warning (and falling back to the default) on garbage.
fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = env::var(name).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("{name}={raw} is not valid — using default");
            None
        }
    }
}
