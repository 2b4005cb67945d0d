//! Derivation of the UI-facing progress view from a raw job snapshot.
//!
//! Snapshots are ephemeral: recomputed from the latest `Job` on every poll
//! tick, never persisted.

use chrono::{DateTime, Utc};

use crate::job::{Job, JobStatus};

/// Coarse fallback shown before enough signal exists to extrapolate.
const DEFAULT_ETA: &str = "~30 seconds";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub status: JobStatus,
    /// 0–100.
    pub percent: u8,
    pub message: String,
    /// Human-facing estimate, absent for terminal states.
    pub eta: Option<String>,
}

/// Derive a progress snapshot from a job, using the current wall clock for
/// the time-remaining extrapolation.
pub fn report(job: &Job) -> ProgressSnapshot {
    report_at(job, Utc::now())
}

/// Clock-injected variant of [`report`].
pub fn report_at(job: &Job, now: DateTime<Utc>) -> ProgressSnapshot {
    let percent = percent_of(job);

    let message = match job.status {
        JobStatus::Pending => "Queued for processing…".to_string(),
        JobStatus::Running => format!("Generating… {percent}%"),
        JobStatus::Completed => "Generation completed!".to_string(),
        JobStatus::Failed => {
            format!("Failed: {}", job.error.as_deref().unwrap_or("unknown error"))
        }
        JobStatus::Cancelled => "Generation cancelled".to_string(),
    };

    let eta = if job.status.is_terminal() {
        None
    } else {
        Some(estimate_remaining(job, now))
    };

    ProgressSnapshot {
        status: job.status,
        percent,
        message,
        eta,
    }
}

fn percent_of(job: &Job) -> u8 {
    match job.progress {
        Some(p) => (p.clamp(0.0, 1.0) * 100.0).round() as u8,
        None if job.status == JobStatus::Completed => 100,
        None => 0,
    }
}

/// Linear extrapolation from observed progress: `elapsed * (1/progress - 1)`.
/// Falls back to a fixed heuristic when there is no usable signal — no
/// historical-duration model is in scope here.
fn estimate_remaining(job: &Job, now: DateTime<Utc>) -> String {
    let progress = match job.progress {
        Some(p) if p > 0.0 => f64::from(p.min(1.0)),
        _ => return DEFAULT_ETA.to_string(),
    };
    let Some(started_at) = job.started_at else {
        return DEFAULT_ETA.to_string();
    };

    let elapsed_secs = (now - started_at).num_milliseconds() as f64 / 1000.0;
    if elapsed_secs <= 0.0 {
        return DEFAULT_ETA.to_string();
    }

    let remaining = elapsed_secs * (1.0 / progress - 1.0);
    format!("~{} seconds", remaining.round().max(0.0) as u64)
}
