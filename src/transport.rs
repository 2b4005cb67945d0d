//! Envelope HTTP transport for the primary inference service.
//!
//! Every response body is a `{success, data, error}` envelope. This layer
//! unwraps it and maps HTTP/envelope failures onto the error taxonomy; it
//! does not retry (the caller decides what is retryable).

use std::time::Duration;

use reqwest::{Client, Method};
use serde::Deserialize;

use crate::error::SiroccoError;

const MAX_RESPONSE_BYTES: usize = 2 * 1024 * 1024; // 2MB

/// Credential supplied by the local credential holder.
#[derive(Clone)]
pub enum Credentials {
    ApiKey(String),
    Bearer(String),
    None,
}

impl Credentials {
    /// Header (name, value) pair for this credential, if any.
    pub fn header(&self) -> Option<(&'static str, String)> {
        match self {
            Self::ApiKey(key) => Some(("X-API-Key", key.clone())),
            Self::Bearer(token) => Some(("Authorization", format!("Bearer {token}"))),
            Self::None => None,
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ApiKey(_) => f.write_str("Credentials::ApiKey([REDACTED])"),
            Self::Bearer(_) => f.write_str("Credentials::Bearer([REDACTED])"),
            Self::None => f.write_str("Credentials::None"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    success: bool,
    #[serde(default)]
    data: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<EnvelopeError>,
}

#[derive(Debug, Deserialize)]
struct EnvelopeError {
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug)]
pub struct Transport {
    client: Client,
    base_url: String,
    credentials: Credentials,
    provider: String,
}

impl Transport {
    pub fn new(base_url: impl Into<String>, credentials: Credentials, provider: impl Into<String>) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(4)
            .build()
            .expect("failed to build HTTP client");

        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
            provider: provider.into(),
        }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Send one request and unwrap the envelope, returning the `data` payload.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<serde_json::Value, SiroccoError> {
        let url = format!("{}{}", self.base_url, path);

        let mut req = self.client.request(method, &url);
        if let Some((name, value)) = self.credentials.header() {
            req = req.header(name, value);
        }
        if let Some(body) = body {
            req = req.json(body);
        }

        let response = req.send().await?;
        let status = response.status();

        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(SiroccoError::AuthFailed {
                provider: self.provider.clone(),
                message: format!("{status}"),
            });
        }

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(SiroccoError::RateLimited {
                provider: self.provider.clone(),
            });
        }

        let bytes = response.bytes().await.map_err(SiroccoError::Network)?;

        if bytes.len() > MAX_RESPONSE_BYTES {
            return Err(SiroccoError::Api {
                provider: self.provider.clone(),
                code: "response_too_large".to_string(),
                status: Some(status.as_u16()),
                message: format!("response too large: {} bytes", bytes.len()),
            });
        }

        if !status.is_success() {
            // Error bodies may still carry an envelope with a useful code.
            let (code, message) = match serde_json::from_slice::<Envelope>(&bytes) {
                Ok(Envelope { error: Some(e), .. }) => (e.code, e.message),
                _ => (
                    "http_error".to_string(),
                    String::from_utf8_lossy(&bytes).into_owned(),
                ),
            };
            return Err(SiroccoError::Api {
                provider: self.provider.clone(),
                code,
                status: Some(status.as_u16()),
                message,
            });
        }

        let envelope: Envelope = serde_json::from_slice(&bytes)
            .map_err(|e| SiroccoError::SchemaParse(format!("envelope: {e}")))?;

        if !envelope.success {
            let (code, message) = envelope
                .error
                .map(|e| (e.code, e.message))
                .unwrap_or_else(|| ("unknown".to_string(), "unspecified error".to_string()));
            return Err(SiroccoError::Api {
                provider: self.provider.clone(),
                code,
                status: None,
                message,
            });
        }

        Ok(envelope.data.unwrap_or(serde_json::Value::Null))
    }
}
