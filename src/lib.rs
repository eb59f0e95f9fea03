//! castforge: podcast-to-education pipeline orchestrator.
//!
//! This library tracks podcast episodes through a fixed processing pipeline
//! (download → transcribe → chunk → generate), runs pipeline actions as
//! background jobs on a single worker, and exposes the result over an HTTP
//! API and a CLI.

// Core modules
pub mod cli;
pub mod config;
pub mod jobs;
pub mod pipeline;
pub mod poller;
pub mod server;
pub mod store;

// Re-export the types most embedders need
pub use config::AppConfig;
pub use jobs::{JobKind, JobManager, JobSnapshot, JobState, SubmitError, Submission};
pub use pipeline::{resolve, Stage, StagePlan};
pub use store::{Episode, EpisodeStatus, EpisodeStore};
