//! Data model for generation requests and provider-tracked jobs.
//!
//! A `Job` is owned by the provider; this crate only caches the last-observed
//! snapshot. Status transitions are monotonic along
//! pending → running → {completed|failed|cancelled}.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SiroccoError;

/// What kind of asset a request produces.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Text,
    Image,
    Audio,
}

impl Modality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Audio => "audio",
        }
    }
}

/// Provider-side lifecycle state of a job.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Terminal states admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether `next` is a legal successor of `self`. Self-transitions are
    /// allowed for non-terminal states (repeated poll snapshots).
    pub fn can_transition(&self, next: JobStatus) -> bool {
        match self {
            Self::Pending => true,
            Self::Running => !matches!(next, Self::Pending),
            _ => *self == next,
        }
    }
}

/// Quality preset for image generation. Legacy providers take a raw step
/// count, so each preset maps to one.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Draft,
    #[default]
    Standard,
    High,
}

impl Quality {
    pub fn sampling_steps(&self) -> u32 {
        match self {
            Self::Draft => 15,
            Self::Standard => 30,
            Self::High => 50,
        }
    }
}

/// Reference to a fine-tune adapter applied at inference time.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct AdapterRef {
    pub name: String,
    pub weight: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct TextParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ImageParams {
    /// Dimensions as "WxH", e.g. "512x512".
    pub size: String,
    /// Explicit sampling step count. Takes precedence over `quality`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub steps: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guidance: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<Quality>,
}

impl Default for ImageParams {
    fn default() -> Self {
        Self {
            size: "512x512".to_string(),
            steps: None,
            guidance: None,
            quality: None,
        }
    }
}

impl ImageParams {
    /// Parse the size string into (width, height).
    pub fn dimensions(&self) -> Result<(u32, u32), SiroccoError> {
        let (w, h) = self
            .size
            .split_once(['x', 'X'])
            .ok_or_else(|| SiroccoError::InvalidRequest(format!("bad size: {}", self.size)))?;
        let width = w
            .trim()
            .parse()
            .map_err(|_| SiroccoError::InvalidRequest(format!("bad width: {w}")))?;
        let height = h
            .trim()
            .parse()
            .map_err(|_| SiroccoError::InvalidRequest(format!("bad height: {h}")))?;
        Ok((width, height))
    }

    /// Effective sampling steps: explicit count wins, then quality preset,
    /// then the standard preset.
    pub fn effective_steps(&self) -> u32 {
        self.steps
            .unwrap_or_else(|| self.quality.unwrap_or_default().sampling_steps())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct AudioParams {
    pub duration_secs: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
}

/// Modality-specific sampling parameters, tagged by modality.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "modality", rename_all = "lowercase")]
pub enum GenerationParams {
    Text(TextParams),
    Image(ImageParams),
    Audio(AudioParams),
}

impl GenerationParams {
    pub fn modality(&self) -> Modality {
        match self {
            Self::Text(_) => Modality::Text,
            Self::Image(_) => Modality::Image,
            Self::Audio(_) => Modality::Audio,
        }
    }
}

/// A generation request. Immutable once submitted.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GenerationRequest {
    pub model: String,
    pub prompt: String,
    #[serde(flatten)]
    pub params: GenerationParams,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub adapters: Vec<AdapterRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl GenerationRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>, params: GenerationParams) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            params,
            adapters: Vec::new(),
            seed: None,
            metadata: serde_json::Map::new(),
        }
    }

    pub fn modality(&self) -> Modality {
        self.params.modality()
    }
}

/// Last-observed snapshot of a provider-tracked job.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Job {
    pub job_id: String,
    pub status: JobStatus,
    pub modality: Modality,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Fraction complete in 0.0–1.0, when the provider reports one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<f32>,
    /// Opaque provider payload, present once completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Failure message, present once failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Job {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Provider id stamped into metadata by the router at submit time.
    pub fn provider(&self) -> Option<&str> {
        self.metadata.get("provider").and_then(|v| v.as_str())
    }
}

/// Which provider the router resolved a request to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Primary,
    Secondary,
}

/// Routing outcome, carried in response metadata so callers and tests can
/// assert fallback behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSelection {
    pub provider_id: String,
    pub kind: ProviderKind,
}

impl ProviderSelection {
    pub fn is_fallback(&self) -> bool {
        self.kind == ProviderKind::Secondary
    }
}
