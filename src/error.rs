use thiserror::Error;

#[derive(Debug, Error)]
pub enum SiroccoError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("api error from {provider}: {code}: {message}")]
    Api {
        provider: String,
        code: String,
        status: Option<u16>,
        message: String,
    },

    #[error("auth failed for {provider}: {message}")]
    AuthFailed { provider: String, message: String },

    #[error("rate limited by {provider}")]
    RateLimited { provider: String },

    #[error("polling timed out for job {job_id} after {attempts} attempts")]
    PollingTimeout { job_id: String, attempts: u32 },

    #[error("cancelled: job {job_id}")]
    Cancelled { job_id: String },

    #[error("unknown provider: {provider}")]
    UnknownProvider { provider: String },

    #[error("provider unavailable: {provider}")]
    Unavailable { provider: String },

    #[error("schema parse error: {0}")]
    SchemaParse(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl SiroccoError {
    /// Extract provider name from structured error variants.
    /// Returns None for variants that don't carry provider context.
    pub fn provider(&self) -> Option<&str> {
        match self {
            Self::Api { provider, .. } => Some(provider),
            Self::AuthFailed { provider, .. } => Some(provider),
            Self::RateLimited { provider } => Some(provider),
            Self::UnknownProvider { provider } => Some(provider),
            Self::Unavailable { provider } => Some(provider),
            _ => None,
        }
    }

    /// Returns true for transient errors that may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) => true, // connection errors may be transient
            Self::RateLimited { .. } => true,
            Self::Api { status, .. } => {
                // 5xx = server error (retryable), 4xx = client error (not retryable)
                // status: None = envelope-level failure → safe default: NOT retryable
                status.is_some_and(|s| s >= 500)
            }
            Self::PollingTimeout { .. } => true,
            Self::Unavailable { .. } => true,
            _ => false,
        }
    }

    /// Produce a sanitized error message safe for surfacing to UI callers.
    /// Does not leak internal URLs, job ids, or upstream error bodies.
    pub fn user_message(&self) -> String {
        match self {
            Self::Network(_) => "could not reach the generation service".to_string(),
            Self::Api { provider, code, .. } => {
                format!("generation request rejected by {provider} ({code})")
            }
            Self::AuthFailed { provider, .. } => {
                format!("authentication failed for {provider} — please sign in again")
            }
            Self::RateLimited { provider } => {
                format!("rate limited by {provider} — try again shortly")
            }
            Self::PollingTimeout { attempts, .. } => {
                format!("generation did not finish after {attempts} status checks")
            }
            Self::Cancelled { .. } => "generation cancelled".to_string(),
            Self::UnknownProvider { provider } => format!("unknown provider: {provider}"),
            Self::Unavailable { provider } => {
                format!("{provider} is currently unavailable")
            }
            Self::SchemaParse(_) => "failed to parse provider response".to_string(),
            Self::InvalidRequest(msg) => format!("invalid request: {msg}"),
        }
    }
}
