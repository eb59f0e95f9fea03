//! Job records for asynchronous pipeline actions.
//!
//! A job is the in-memory record of one submitted action. It is created at
//! submission, mutated only by the worker, and read by any number of
//! pollers as snapshot copies. Jobs are deliberately not persisted: a
//! process restart loses them, but the episode store keeps the truth needed
//! to resume.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::pipeline::{Stage, StageParams};
use crate::store::EpisodeStatus;

/// What a submitted job should do: one concrete stage, or a composite
/// action resolved into a plan at execution time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    /// Run the download stage only.
    Download,
    /// Run the transcribe stage only.
    Transcribe,
    /// Run the chunk stage only.
    Chunk,
    /// Run the generate stage only.
    Generate,
    /// Resolve and run all outstanding stages.
    Run,
    /// Clear the recorded error and run outstanding stages.
    Retry,
}

impl JobKind {
    /// Returns the canonical lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Download => "download",
            JobKind::Transcribe => "transcribe",
            JobKind::Chunk => "chunk",
            JobKind::Generate => "generate",
            JobKind::Run => "run",
            JobKind::Retry => "retry",
        }
    }

    /// The single stage this kind executes, if it is a stage action.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            JobKind::Download => Some(Stage::Download),
            JobKind::Transcribe => Some(Stage::Transcribe),
            JobKind::Chunk => Some(Stage::Chunk),
            JobKind::Generate => Some(Stage::Generate),
            JobKind::Run | JobKind::Retry => None,
        }
    }

    /// Returns whether this kind resolves a plan instead of one stage.
    pub fn is_composite(&self) -> bool {
        self.stage().is_none()
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "download" => Ok(JobKind::Download),
            "transcribe" => Ok(JobKind::Transcribe),
            "chunk" => Ok(JobKind::Chunk),
            "generate" => Ok(JobKind::Generate),
            "run" => Ok(JobKind::Run),
            "retry" => Ok(JobKind::Retry),
            other => Err(format!("unknown action: {other}")),
        }
    }
}

/// Lifecycle state of a job. Transitions are monotonic:
/// Queued → Running → Success | Error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Accepted, waiting for the worker.
    Queued,
    /// Currently executing on the worker.
    Running,
    /// Finished successfully; terminal.
    Success,
    /// Finished with a failure; terminal.
    Error,
}

impl JobState {
    /// Returns whether the job has finished (successfully or not).
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Success | JobState::Error)
    }

    /// Returns whether the job still occupies its episode.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Queued => f.write_str("queued"),
            JobState::Running => f.write_str("running"),
            JobState::Success => f.write_str("success"),
            JobState::Error => f.write_str("error"),
        }
    }
}

/// In-memory record of one submitted action.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    /// Unique id assigned at submission.
    pub id: Uuid,
    /// Episode the job acts on.
    pub episode_id: String,
    /// Action the job performs.
    pub kind: JobKind,
    /// Current lifecycle state.
    pub state: JobState,
    /// Stage currently executing (or last executed).
    pub stage: Option<Stage>,
    /// Options forwarded to the executors.
    pub params: StageParams,
    /// Stage-specific result payload, set on success.
    pub result: Option<serde_json::Value>,
    /// Failure message, set when the job ends in `Error`.
    pub error: Option<String>,
    /// Error the episode carried before this job cleared it (retry/run).
    #[serde(skip)]
    pub previous_error: Option<String>,
    /// When the job was submitted.
    pub created_at: DateTime<Utc>,
    /// When the record last changed.
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Creates a new queued job.
    pub fn new(episode_id: impl Into<String>, kind: JobKind, params: StageParams) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            episode_id: episode_id.into(),
            kind,
            state: JobState::Queued,
            stage: None,
            params,
            result: None,
            error: None,
            previous_error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Read-only copy of a job handed to pollers, enriched with the episode's
/// live status so clients need not issue a second read.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    /// Job id.
    pub id: Uuid,
    /// Episode the job acts on.
    pub episode_id: String,
    /// Action the job performs.
    pub kind: JobKind,
    /// Lifecycle state at snapshot time.
    pub state: JobState,
    /// Stage currently executing (or last executed).
    pub stage: Option<Stage>,
    /// Result payload if the job succeeded.
    pub result: Option<serde_json::Value>,
    /// Failure message if the job errored.
    pub error: Option<String>,
    /// The episode's status at snapshot time, if the episode still exists.
    pub episode_status: Option<EpisodeStatus>,
    /// When the job was submitted.
    pub created_at: DateTime<Utc>,
    /// When the job record last changed.
    pub updated_at: DateTime<Utc>,
}

impl JobSnapshot {
    /// Builds a snapshot from a job copy and the episode's live status.
    pub fn from_job(job: Job, episode_status: Option<EpisodeStatus>) -> Self {
        Self {
            id: job.id,
            episode_id: job.episode_id,
            kind: job.kind,
            state: job.state,
            stage: job.stage,
            result: job.result,
            error: job.error,
            episode_status,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}
