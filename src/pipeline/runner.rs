//! Plan execution against the episode store.
//!
//! The runner takes a resolved [`StagePlan`](super::plan::StagePlan) and
//! drives the registered executors through it, persisting every outcome to
//! the store as it goes. It fails fast: the first failing stage records the
//! error on the episode and stops the run; later stages are not attempted.
//! Progress is reported through a synchronous event callback so callers can
//! update job records and logs without the runner knowing about either.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{error, info};

use super::executor::{ExecutorSet, StageError, StageOutcome, StageParams};
use super::plan::{Decision, Stage, StagePlan};
use crate::store::{EpisodeStore, StoreError};

/// Errors from running a single stage outside a plan.
#[derive(Debug, Error)]
pub enum RunError {
    /// The executor reported a failure (already recorded on the episode).
    #[error("Stage '{stage}' failed: {message}")]
    StageFailed { stage: Stage, message: String },

    /// The store itself failed; nothing was recorded.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Progress notification emitted while a plan executes.
#[derive(Debug, Clone)]
pub enum StageEvent {
    /// A stage is about to execute.
    Started(Stage),
    /// A stage finished successfully.
    Completed { stage: Stage, detail: String },
    /// A stage failed; the run stops after this event.
    Failed { stage: Stage, error: String },
}

/// Result of one stage within a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageRunStatus {
    /// The stage executed and succeeded.
    Success,
    /// The stage was skipped by the plan.
    Skipped,
    /// The stage executed and failed.
    Failed,
}

/// Per-stage record inside a [`PipelineReport`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRunRecord {
    /// The stage this record describes.
    pub stage: Stage,
    /// How the stage ended.
    pub status: StageRunStatus,
    /// Wall-clock execution time in seconds (zero for skipped stages).
    pub duration_seconds: f64,
    /// Detail line from the executor, or the skip reason.
    pub detail: String,
    /// Failure message if the stage failed.
    pub error: Option<String>,
}

/// Aggregated outcome of one pipeline run for one episode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineReport {
    /// Episode the run was for.
    pub episode_id: String,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub completed_at: Option<DateTime<Utc>>,
    /// Per-stage results in pipeline order.
    pub stages: Vec<StageRunRecord>,
    /// Sum of metered stage costs.
    pub total_cost_usd: f64,
    /// Whether every executed stage succeeded.
    pub success: bool,
    /// Failure message of the stage that stopped the run.
    pub error: Option<String>,
}

impl PipelineReport {
    fn new(episode_id: &str) -> Self {
        Self {
            episode_id: episode_id.to_string(),
            started_at: Utc::now(),
            completed_at: None,
            stages: Vec::new(),
            total_cost_usd: 0.0,
            success: false,
            error: None,
        }
    }

    /// Stage names that executed successfully.
    pub fn stages_run(&self) -> Vec<&'static str> {
        self.stages
            .iter()
            .filter(|s| s.status == StageRunStatus::Success)
            .map(|s| s.stage.as_str())
            .collect()
    }

    /// Stage names the plan skipped.
    pub fn stages_skipped(&self) -> Vec<&'static str> {
        self.stages
            .iter()
            .filter(|s| s.status == StageRunStatus::Skipped)
            .map(|s| s.stage.as_str())
            .collect()
    }

    /// Compact JSON summary used as the job result payload.
    pub fn summary_json(&self) -> serde_json::Value {
        json!({
            "success": self.success,
            "cost_usd": self.total_cost_usd,
            "stages_run": self.stages_run(),
            "stages_skipped": self.stages_skipped(),
        })
    }
}

/// Executes stage plans and single stages, persisting results to the store.
pub struct PipelineRunner {
    store: Arc<dyn EpisodeStore>,
    executors: ExecutorSet,
}

impl PipelineRunner {
    /// Creates a runner over the given store and executor registry.
    pub fn new(store: Arc<dyn EpisodeStore>, executors: ExecutorSet) -> Self {
        Self { store, executors }
    }

    /// Runs every `run` entry of `plan` in pipeline order.
    ///
    /// `on_event` is invoked before each stage starts and after it completes
    /// or fails. Stage failures do not surface as `Err`: they are recorded
    /// on the episode and in the returned report, and stop the run. Only
    /// store failures propagate.
    pub async fn run_plan<F>(
        &self,
        episode_id: &str,
        plan: &StagePlan,
        params: &StageParams,
        mut on_event: F,
    ) -> Result<PipelineReport, StoreError>
    where
        F: FnMut(StageEvent),
    {
        let mut report = PipelineReport::new(episode_id);
        info!(episode_id = %episode_id, runnable = plan.run_count(), "Pipeline start");

        for entry in &plan.entries {
            if entry.decision == Decision::Skip {
                report.stages.push(StageRunRecord {
                    stage: entry.stage,
                    status: StageRunStatus::Skipped,
                    duration_seconds: 0.0,
                    detail: entry.reason.clone(),
                    error: None,
                });
                continue;
            }

            on_event(StageEvent::Started(entry.stage));
            let started = Instant::now();

            match self.execute_stage(entry.stage, episode_id, params).await {
                Ok(outcome) => {
                    let elapsed = started.elapsed().as_secs_f64();
                    self.store.record_success(episode_id, entry.stage).await?;
                    if let Some(cost) = outcome.cost_usd {
                        report.total_cost_usd += cost;
                    }
                    info!(
                        episode_id = %episode_id,
                        stage = %entry.stage,
                        detail = %outcome.detail,
                        "Stage completed"
                    );
                    on_event(StageEvent::Completed {
                        stage: entry.stage,
                        detail: outcome.detail.clone(),
                    });
                    report.stages.push(StageRunRecord {
                        stage: entry.stage,
                        status: StageRunStatus::Success,
                        duration_seconds: elapsed,
                        detail: outcome.detail,
                        error: None,
                    });
                }
                Err(e) => {
                    let elapsed = started.elapsed().as_secs_f64();
                    let message = format!("Stage '{}' failed: {e}", entry.stage);
                    error!(
                        episode_id = %episode_id,
                        stage = %entry.stage,
                        error = %e,
                        "Stage failed"
                    );
                    self.store.record_failure(episode_id, &message).await?;
                    on_event(StageEvent::Failed {
                        stage: entry.stage,
                        error: message.clone(),
                    });
                    report.stages.push(StageRunRecord {
                        stage: entry.stage,
                        status: StageRunStatus::Failed,
                        duration_seconds: elapsed,
                        detail: String::new(),
                        error: Some(e.to_string()),
                    });
                    report.error = Some(message);
                    break;
                }
            }
        }

        report.success = report.error.is_none();
        report.completed_at = Some(Utc::now());
        info!(
            episode_id = %episode_id,
            success = report.success,
            cost_usd = report.total_cost_usd,
            "Pipeline finished"
        );
        Ok(report)
    }

    /// Runs exactly one stage and persists its result.
    ///
    /// Used by single-stage actions, which bypass the resolver: the caller's
    /// force flag is handed to the executor unchanged.
    pub async fn run_single(
        &self,
        episode_id: &str,
        stage: Stage,
        params: &StageParams,
    ) -> Result<StageOutcome, RunError> {
        match self.execute_stage(stage, episode_id, params).await {
            Ok(outcome) => {
                self.store.record_success(episode_id, stage).await?;
                Ok(outcome)
            }
            Err(e) => {
                let message = format!("Stage '{stage}' failed: {e}");
                self.store.record_failure(episode_id, &message).await?;
                Err(RunError::StageFailed {
                    stage,
                    message: e.to_string(),
                })
            }
        }
    }

    async fn execute_stage(
        &self,
        stage: Stage,
        episode_id: &str,
        params: &StageParams,
    ) -> Result<StageOutcome, StageError> {
        let executor = self.executors.get(stage)?;
        executor.execute(episode_id, params).await
    }
}
