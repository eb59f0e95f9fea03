//! Client-side job polling.
//!
//! The CLI (and any embedding client) watches a submitted job by polling
//! its snapshot at a fixed interval until the job reaches a terminal state
//! or disappears from the registry. Observers are notified on stage
//! transitions and on the terminal outcome; a handle allows cancelling the
//! poll loop without affecting the job itself.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

use crate::jobs::{JobManager, JobSnapshot};
use crate::pipeline::Stage;

/// Default interval between poll requests.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Anything that can answer "what does job X look like right now".
#[async_trait]
pub trait StatusSource: Send + Sync {
    /// Returns the current snapshot, or `None` for an unknown job.
    async fn job_snapshot(&self, job_id: Uuid) -> Option<JobSnapshot>;
}

#[async_trait]
impl StatusSource for JobManager {
    async fn job_snapshot(&self, job_id: Uuid) -> Option<JobSnapshot> {
        self.get(job_id).await
    }
}

/// Callbacks fired as the watched job progresses. All methods default to
/// no-ops so observers implement only what they care about.
pub trait PollObserver: Send {
    /// The job moved to a new stage.
    fn on_stage(&mut self, _stage: Stage) {}

    /// The job finished successfully.
    fn on_success(&mut self, _snapshot: &JobSnapshot) {}

    /// The job finished with a failure.
    fn on_error(&mut self, _message: &str) {}
}

/// Observer that ignores everything. Useful when only the outcome matters.
pub struct SilentObserver;

impl PollObserver for SilentObserver {}

/// How a poll loop ended.
#[derive(Debug)]
pub enum PollOutcome {
    /// The job reached `success`.
    Success(JobSnapshot),
    /// The job reached `error`.
    Error(JobSnapshot),
    /// The job id stopped resolving (pruned or never existed).
    Vanished,
    /// The poll was cancelled before the job finished.
    Cancelled,
}

impl PollOutcome {
    /// Returns whether the watched job finished successfully.
    pub fn is_success(&self) -> bool {
        matches!(self, PollOutcome::Success(_))
    }
}

/// Polls one job until it reaches a terminal state.
pub struct JobPoller;

impl JobPoller {
    /// Spawns a poll loop for `job_id` against `source`.
    ///
    /// The loop reads a snapshot immediately, then sleeps `interval`
    /// between reads. It ends on a terminal job state, on an unknown job
    /// id, or when the returned handle is cancelled.
    pub fn spawn(
        source: Arc<dyn StatusSource>,
        job_id: Uuid,
        interval: Duration,
        mut observer: impl PollObserver + 'static,
    ) -> PollHandle {
        let (cancel_tx, mut cancel_rx) = broadcast::channel(1);

        let task = tokio::spawn(async move {
            let mut last_stage: Option<Stage> = None;

            loop {
                let Some(snapshot) = source.job_snapshot(job_id).await else {
                    debug!(job_id = %job_id, "Polled job no longer exists");
                    return PollOutcome::Vanished;
                };

                if snapshot.stage != last_stage {
                    last_stage = snapshot.stage;
                    if let Some(stage) = snapshot.stage {
                        observer.on_stage(stage);
                    }
                }

                if snapshot.state.is_terminal() {
                    return if snapshot.error.is_some() {
                        observer.on_error(snapshot.error.as_deref().unwrap_or("unknown error"));
                        PollOutcome::Error(snapshot)
                    } else {
                        observer.on_success(&snapshot);
                        PollOutcome::Success(snapshot)
                    };
                }

                tokio::select! {
                    _ = cancel_rx.recv() => return PollOutcome::Cancelled,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        });

        PollHandle { cancel_tx, task }
    }
}

/// Handle over a running poll loop.
pub struct PollHandle {
    cancel_tx: broadcast::Sender<()>,
    task: JoinHandle<PollOutcome>,
}

impl PollHandle {
    /// Asks the poll loop to stop at its next wakeup.
    pub fn cancel(&self) {
        let _ = self.cancel_tx.send(());
    }

    /// Waits for the poll loop to finish and returns its outcome.
    pub async fn wait(self) -> PollOutcome {
        self.task.await.unwrap_or(PollOutcome::Cancelled)
    }
}
