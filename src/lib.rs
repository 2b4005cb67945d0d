//! Orchestration core for asynchronous generation jobs.
//!
//! Submits generation requests, polls remote jobs to a terminal state with
//! cooperative cancellation, derives UI-facing progress snapshots, and falls
//! back from the primary inference service to legacy providers when the
//! primary is down. Per-caller bookkeeping lives in [`registry::JobRegistry`].

pub mod client;
pub mod config;
pub mod error;
pub mod job;
pub mod poller;
pub mod progress;
pub mod provider;
pub mod registry;
pub mod router;
pub mod transport;

pub use client::JobClient;
pub use config::{init_tracing, Config};
pub use error::SiroccoError;
pub use job::{GenerationRequest, Job, JobStatus, Modality, ProviderSelection};
pub use poller::{PollConfig, Poller};
pub use progress::{report, ProgressSnapshot};
pub use registry::JobRegistry;
pub use router::ProviderRouter;
