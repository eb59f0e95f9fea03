//! Stage executor contract.
//!
//! Stage implementations (downloading media, calling a transcription
//! service, segmenting text, calling a generation service) live outside the
//! orchestration core. The core only requires this uniform contract:
//! execute for one episode, return an outcome summary or a human-readable
//! failure. Executors must be idempotent when invoked with `force` and must
//! not leave side effects behind on failure beyond their own logging.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::plan::Stage;

/// Errors surfaced by stage executors.
#[derive(Debug, Error)]
pub enum StageError {
    /// The stage work itself failed; the message is shown to users.
    #[error("{0}")]
    Failed(String),

    /// No executor is registered for the stage.
    #[error("No executor registered for stage '{0}'")]
    MissingExecutor(Stage),

    /// Spawning or talking to an external tool failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Caller-supplied options forwarded to every executor.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct StageParams {
    /// Re-run the stage even if its output already exists.
    #[serde(default)]
    pub force: bool,
    /// Simulate without externally visible side effects. Only
    /// generation-style stages interpret this; the core passes it through.
    #[serde(default)]
    pub dry_run: bool,
}

impl StageParams {
    /// Creates params with both flags off.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the force flag.
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Sets the dry-run flag.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

/// Summary of a successful stage execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageOutcome {
    /// One-line human-readable description of what happened.
    pub detail: String,
    /// Path of the produced artifact, if the stage yields one file.
    pub path: Option<PathBuf>,
    /// Number of produced artifacts (e.g. chunks, content pieces).
    pub artifact_count: Option<u64>,
    /// Cost incurred by the stage in US dollars, if metered.
    pub cost_usd: Option<f64>,
}

impl StageOutcome {
    /// Creates an outcome with just a detail line.
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
            ..Self::default()
        }
    }

    /// Sets the produced artifact path.
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Sets the produced artifact count.
    pub fn with_artifact_count(mut self, count: u64) -> Self {
        self.artifact_count = Some(count);
        self
    }

    /// Sets the metered cost.
    pub fn with_cost_usd(mut self, cost: f64) -> Self {
        self.cost_usd = Some(cost);
        self
    }
}

/// Uniform contract every stage implementation fulfils.
#[async_trait]
pub trait StageExecutor: Send + Sync {
    /// Performs the stage work for one episode.
    async fn execute(
        &self,
        episode_id: &str,
        params: &StageParams,
    ) -> Result<StageOutcome, StageError>;
}

impl std::fmt::Debug for dyn StageExecutor + '_ {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StageExecutor")
    }
}

/// Registry mapping each stage to its executor.
#[derive(Clone, Default)]
pub struct ExecutorSet {
    executors: HashMap<&'static str, Arc<dyn StageExecutor>>,
}

impl ExecutorSet {
    /// Creates an empty set. Executing an unregistered stage fails with
    /// [`StageError::MissingExecutor`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an executor for a stage, replacing any previous one.
    pub fn register(mut self, stage: Stage, executor: Arc<dyn StageExecutor>) -> Self {
        self.executors.insert(stage.as_str(), executor);
        self
    }

    /// Registers the same executor for every stage. Mostly useful in tests.
    pub fn uniform(executor: Arc<dyn StageExecutor>) -> Self {
        let mut set = Self::new();
        for stage in Stage::ALL {
            set = set.register(stage, Arc::clone(&executor));
        }
        set
    }

    /// Looks up the executor for a stage.
    pub fn get(&self, stage: Stage) -> Result<&Arc<dyn StageExecutor>, StageError> {
        self.executors
            .get(stage.as_str())
            .ok_or(StageError::MissingExecutor(stage))
    }
}
