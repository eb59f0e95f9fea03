//! Background job manager for long-running pipeline actions.
//!
//! Accepts action submissions, enforces the one-active-job-per-episode
//! invariant, and executes all accepted jobs on exactly one worker task fed
//! from one FIFO queue. Global serialization is deliberate: the episode
//! store is SQLite, a single-writer database, so no two stage executions
//! may touch it concurrently.
//!
//! Jobs live only in memory. A process restart loses job visibility but
//! never episode-store truth; pipelines resume from the episode status.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use super::job::{Job, JobKind, JobSnapshot, JobState};
use super::log::EpisodeLog;
use crate::pipeline::{resolve, ExecutorSet, PipelineRunner, StageEvent, StageParams};
use crate::store::{EpisodeStore, StoreError};

/// Upper bound on retained job records. Once exceeded, terminal jobs are
/// pruned oldest-first; active jobs are never pruned.
pub const MAX_RETAINED_JOBS: usize = 256;

/// How long `shutdown` waits for the worker to drain.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors rejected synchronously at submission time. None of these creates
/// a job.
#[derive(Debug, Error)]
pub enum SubmitError {
    /// An active (queued or running) job already references the episode.
    #[error("An active job ({job_id}) already exists for episode '{episode_id}'")]
    Conflict { episode_id: String, job_id: Uuid },

    /// The episode id is unknown to the store.
    #[error("Episode not found: {0}")]
    EpisodeNotFound(String),

    /// `retry` was requested but the episode carries no error.
    #[error("Nothing to retry for episode '{0}': no recorded error")]
    NothingToRetry(String),

    /// The action name did not parse to a job kind.
    #[error("Unknown action: {0}")]
    UnknownAction(String),

    /// The manager has been shut down and accepts no more jobs.
    #[error("Job manager is shut down")]
    ShutDown,

    /// The episode store failed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Outcome of a submission.
#[derive(Debug)]
pub enum Submission {
    /// A job was queued; poll it by id.
    Queued(Uuid),
    /// The plan had no runnable stages; no job was created.
    NothingToDo(String),
}

impl Submission {
    /// The queued job id, if a job was created.
    pub fn job_id(&self) -> Option<Uuid> {
        match self {
            Submission::Queued(id) => Some(*id),
            Submission::NothingToDo(_) => None,
        }
    }
}

/// Job registry guarded by one lock: mutated by the worker, read by any
/// number of pollers.
struct Registry {
    jobs: HashMap<Uuid, Job>,
    order: VecDeque<Uuid>,
}

impl Registry {
    fn new() -> Self {
        Self {
            jobs: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn active_for_episode(&self, episode_id: &str) -> Option<Uuid> {
        self.jobs
            .values()
            .find(|job| job.episode_id == episode_id && job.state.is_active())
            .map(|job| job.id)
    }

    fn insert(&mut self, job: Job) {
        self.order.push_back(job.id);
        self.jobs.insert(job.id, job);
        self.prune();
    }

    fn update(&mut self, id: Uuid, f: impl FnOnce(&mut Job)) {
        if let Some(job) = self.jobs.get_mut(&id) {
            f(job);
            job.updated_at = Utc::now();
        }
    }

    fn get(&self, id: Uuid) -> Option<Job> {
        self.jobs.get(&id).cloned()
    }

    /// Drops the oldest terminal jobs once the retention cap is exceeded.
    fn prune(&mut self) {
        while self.jobs.len() > MAX_RETAINED_JOBS {
            let victim = self
                .order
                .iter()
                .position(|id| {
                    self.jobs
                        .get(id)
                        .map(|job| job.state.is_terminal())
                        .unwrap_or(true)
                })
                .and_then(|pos| self.order.remove(pos));

            match victim {
                Some(id) => {
                    self.jobs.remove(&id);
                }
                // Every retained job is still active; nothing to prune.
                None => break,
            }
        }
    }
}

struct ManagerInner {
    store: Arc<dyn EpisodeStore>,
    runner: PipelineRunner,
    log: EpisodeLog,
    registry: Mutex<Registry>,
    queue_tx: Mutex<Option<mpsc::UnboundedSender<Uuid>>>,
}

impl ManagerInner {
    fn update_job(&self, id: Uuid, f: impl FnOnce(&mut Job)) {
        let mut registry = self.registry.lock().expect("job registry lock poisoned");
        registry.update(id, f);
    }

    /// Executes one dequeued job. Returns the result payload or the failure
    /// message; either way the error never escapes to the worker loop.
    async fn execute(&self, job: &Job) -> Result<serde_json::Value, String> {
        match job.kind.stage() {
            Some(stage) => self.execute_single(job, stage).await,
            None => self.execute_composite(job).await,
        }
    }

    /// Runs a single-stage action. The resolver is bypassed: the caller
    /// asked for exactly this stage, and the executor handles `force`.
    async fn execute_single(
        &self,
        job: &Job,
        stage: crate::pipeline::Stage,
    ) -> Result<serde_json::Value, String> {
        self.update_job(job.id, |j| j.stage = Some(stage));
        self.log
            .append(&job.episode_id, job.kind, &format!("Running: {stage}"));

        match self
            .runner
            .run_single(&job.episode_id, stage, &job.params)
            .await
        {
            Ok(outcome) => {
                self.log.append(
                    &job.episode_id,
                    job.kind,
                    &format!("{stage} complete: {}", outcome.detail),
                );
                let mut value = serde_json::to_value(&outcome).unwrap_or_default();
                if let serde_json::Value::Object(map) = &mut value {
                    map.insert("success".to_string(), true.into());
                }
                Ok(value)
            }
            Err(e) => Err(e.to_string()),
        }
    }

    /// Runs a composite `run`/`retry` action: resolve a plan from the
    /// episode's live status, log it, then execute its runnable stages.
    async fn execute_composite(&self, job: &Job) -> Result<serde_json::Value, String> {
        let episode = self
            .store
            .get(&job.episode_id)
            .await
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("Episode not found: {}", job.episode_id))?;

        if let Some(prev) = &job.previous_error {
            self.log.append(
                &job.episode_id,
                job.kind,
                &format!("Cleared previous error: {prev}"),
            );
        }

        // Retry always resumes from the last successful stage.
        let force = match job.kind {
            JobKind::Run => job.params.force,
            _ => false,
        };

        let plan = resolve(episode.status, force);
        for entry in &plan.entries {
            self.log.append(
                &job.episode_id,
                job.kind,
                &format!("Plan: {} → {} ({})", entry.stage, entry.decision, entry.reason),
            );
        }

        if plan.is_noop() {
            self.log.append(
                &job.episode_id,
                job.kind,
                "Nothing to do: all stages already completed",
            );
            return Ok(json!({ "success": true, "message": "Nothing to do" }));
        }

        let report = self
            .runner
            .run_plan(&job.episode_id, &plan, &job.params, |event| match event {
                StageEvent::Started(stage) => {
                    self.update_job(job.id, |j| j.stage = Some(stage));
                    self.log
                        .append(&job.episode_id, job.kind, &format!("Running: {stage}"));
                }
                StageEvent::Completed { stage, detail } => {
                    self.log.append(
                        &job.episode_id,
                        job.kind,
                        &format!("{stage} complete: {detail}"),
                    );
                }
                // The failure message becomes the job's final ERROR line.
                StageEvent::Failed { .. } => {}
            })
            .await
            .map_err(|e| e.to_string())?;

        if report.success {
            self.log.append(
                &job.episode_id,
                job.kind,
                &format!("Pipeline complete: ${:.4}", report.total_cost_usd),
            );
            Ok(report.summary_json())
        } else {
            Err(report
                .error
                .unwrap_or_else(|| "Pipeline failed".to_string()))
        }
    }
}

/// Accepts pipeline actions and executes them one at a time.
pub struct JobManager {
    inner: Arc<ManagerInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl JobManager {
    /// Creates the manager and starts its worker task.
    pub fn new(store: Arc<dyn EpisodeStore>, executors: ExecutorSet, log: EpisodeLog) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(ManagerInner {
            runner: PipelineRunner::new(Arc::clone(&store), executors),
            store,
            log,
            registry: Mutex::new(Registry::new()),
            queue_tx: Mutex::new(Some(queue_tx)),
        });

        let worker = tokio::spawn(worker_loop(Arc::clone(&inner), queue_rx));

        Self {
            inner,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Submits an action for an episode.
    ///
    /// Validation, the retry precondition and the conflict check all happen
    /// here, synchronously; queue insertion never blocks on job execution.
    pub async fn submit(
        &self,
        episode_id: &str,
        kind: JobKind,
        params: StageParams,
    ) -> Result<Submission, SubmitError> {
        let episode = self
            .inner
            .store
            .get(episode_id)
            .await?
            .ok_or_else(|| SubmitError::EpisodeNotFound(episode_id.to_string()))?;

        // Early conflict check, before any store mutation below. The
        // authoritative check happens again under the registry lock.
        if let Some(job_id) = self.active_for_episode(episode_id) {
            return Err(SubmitError::Conflict {
                episode_id: episode_id.to_string(),
                job_id,
            });
        }

        let mut previous_error = None;

        match kind {
            JobKind::Run => {
                let plan = resolve(episode.status, params.force);
                if plan.is_noop() {
                    return Ok(Submission::NothingToDo("Nothing to do".to_string()));
                }
                if let Some(prev) = episode.error_message.clone() {
                    previous_error = Some(prev);
                    self.inner.store.clear_error(episode_id).await?;
                }
            }
            JobKind::Retry => {
                let prev = episode
                    .error_message
                    .clone()
                    .ok_or_else(|| SubmitError::NothingToRetry(episode_id.to_string()))?;
                previous_error = Some(prev);
                self.inner.store.clear_error(episode_id).await?;

                let plan = resolve(episode.status, false);
                if plan.is_noop() {
                    return Ok(Submission::NothingToDo("Nothing to do".to_string()));
                }
            }
            // Stage actions queue unconditionally; the executor owns the
            // force/skip semantics for a directly requested stage.
            _ => {}
        }

        let queue_tx = {
            let guard = self
                .inner
                .queue_tx
                .lock()
                .expect("queue sender lock poisoned");
            guard.as_ref().cloned().ok_or(SubmitError::ShutDown)?
        };

        let job_id = {
            let mut registry = self
                .inner
                .registry
                .lock()
                .expect("job registry lock poisoned");
            if let Some(active_id) = registry.active_for_episode(episode_id) {
                return Err(SubmitError::Conflict {
                    episode_id: episode_id.to_string(),
                    job_id: active_id,
                });
            }

            let mut job = Job::new(episode_id, kind, params);
            job.previous_error = previous_error;
            let id = job.id;
            registry.insert(job);
            id
        };

        if queue_tx.send(job_id).is_err() {
            let mut registry = self
                .inner
                .registry
                .lock()
                .expect("job registry lock poisoned");
            registry.jobs.remove(&job_id);
            return Err(SubmitError::ShutDown);
        }

        info!(
            job_id = %job_id,
            kind = %kind,
            episode_id = %episode_id,
            "Job submitted"
        );
        Ok(Submission::Queued(job_id))
    }

    /// Returns a snapshot of the job plus the episode's live status, or
    /// `None` for an unknown (or pruned) job id.
    pub async fn get(&self, job_id: Uuid) -> Option<JobSnapshot> {
        let job = {
            let registry = self
                .inner
                .registry
                .lock()
                .expect("job registry lock poisoned");
            registry.get(job_id)?
        };

        let episode_status = self
            .inner
            .store
            .get(&job.episode_id)
            .await
            .ok()
            .flatten()
            .map(|e| e.status);

        Some(JobSnapshot::from_job(job, episode_status))
    }

    /// Returns the last `n` log lines for an episode, oldest first.
    pub fn log_tail(&self, episode_id: &str, n: usize) -> Vec<String> {
        self.inner.log.tail(episode_id, n)
    }

    /// Returns the id of the active job for an episode, if any.
    pub fn active_for_episode(&self, episode_id: &str) -> Option<Uuid> {
        let registry = self
            .inner
            .registry
            .lock()
            .expect("job registry lock poisoned");
        registry.active_for_episode(episode_id)
    }

    /// Stops accepting jobs, drains the queue and waits for the worker.
    pub async fn shutdown(&self) {
        {
            let mut guard = self
                .inner
                .queue_tx
                .lock()
                .expect("queue sender lock poisoned");
            guard.take();
        }

        let handle = {
            let mut guard = self.worker.lock().expect("worker handle lock poisoned");
            guard.take()
        };

        if let Some(handle) = handle {
            if tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await.is_err() {
                warn!("Job worker did not stop within the shutdown timeout");
            }
        }
    }
}

/// The single worker: pulls job ids off the queue in FIFO order and
/// executes them one at a time. Stage failures are recorded, never
/// propagated; nothing here can crash the loop.
async fn worker_loop(inner: Arc<ManagerInner>, mut queue_rx: mpsc::UnboundedReceiver<Uuid>) {
    info!("Job worker started");

    while let Some(job_id) = queue_rx.recv().await {
        let job = {
            let registry = inner.registry.lock().expect("job registry lock poisoned");
            registry.get(job_id)
        };
        let Some(job) = job else {
            warn!(job_id = %job_id, "Dequeued job no longer in registry");
            continue;
        };

        inner.update_job(job_id, |j| j.state = JobState::Running);
        inner.log.append(
            &job.episode_id,
            job.kind,
            &format!("Starting {} for {}", job.kind, job.episode_id),
        );
        info!(
            job_id = %job_id,
            kind = %job.kind,
            episode_id = %job.episode_id,
            "Job started"
        );

        match inner.execute(&job).await {
            Ok(result) => {
                inner.update_job(job_id, |j| {
                    j.state = JobState::Success;
                    j.result = Some(result);
                });
                inner
                    .log
                    .append(&job.episode_id, job.kind, "Job completed successfully");
                info!(job_id = %job_id, "Job completed successfully");
            }
            Err(message) => {
                inner.update_job(job_id, |j| {
                    j.state = JobState::Error;
                    j.error = Some(message.clone());
                });
                inner
                    .log
                    .append(&job.episode_id, job.kind, &format!("ERROR: {message}"));
                warn!(job_id = %job_id, error = %message, "Job failed");
            }
        }
    }

    info!("Job worker stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use tempfile::TempDir;
    use tokio::sync::Semaphore;

    use super::*;
    use crate::pipeline::{Stage, StageError, StageExecutor, StageOutcome};
    use crate::store::{Episode, EpisodeStatus, MemoryEpisodeStore};

    /// Executor recording `(episode_id, stage)` calls; fails on the listed
    /// stages and optionally blocks on a semaphore until released.
    struct TestExecutor {
        stage: Stage,
        fail_on: Vec<Stage>,
        gate: Option<Arc<Semaphore>>,
        calls: Arc<StdMutex<Vec<(String, Stage)>>>,
    }

    #[async_trait]
    impl StageExecutor for TestExecutor {
        async fn execute(
            &self,
            episode_id: &str,
            _params: &StageParams,
        ) -> Result<StageOutcome, StageError> {
            if let Some(gate) = &self.gate {
                let permit = gate.acquire().await.expect("gate closed");
                permit.forget();
            }
            self.calls
                .lock()
                .unwrap()
                .push((episode_id.to_string(), self.stage));
            if self.fail_on.contains(&self.stage) {
                Err(StageError::Failed(format!("{} exploded", self.stage)))
            } else {
                Ok(StageOutcome::new(format!("{} ok", self.stage)).with_cost_usd(0.25))
            }
        }
    }

    struct Harness {
        manager: JobManager,
        store: Arc<MemoryEpisodeStore>,
        calls: Arc<StdMutex<Vec<(String, Stage)>>>,
        _logs: TempDir,
    }

    fn build_harness(fail_on: &[Stage], gate: Option<Arc<Semaphore>>) -> Harness {
        let store = Arc::new(MemoryEpisodeStore::new());
        let calls = Arc::new(StdMutex::new(Vec::new()));

        let mut set = ExecutorSet::new();
        for stage in Stage::ALL {
            set = set.register(
                stage,
                Arc::new(TestExecutor {
                    stage,
                    fail_on: fail_on.to_vec(),
                    gate: gate.clone(),
                    calls: Arc::clone(&calls),
                }),
            );
        }

        let logs = TempDir::new().expect("tempdir should create");
        let log = EpisodeLog::new(logs.path()).expect("log should create");
        let manager = JobManager::new(store.clone() as Arc<dyn EpisodeStore>, set, log);

        Harness {
            manager,
            store,
            calls,
            _logs: logs,
        }
    }

    async fn seed(harness: &Harness, id: &str, status: EpisodeStatus, error: Option<&str>) {
        let mut episode = Episode::new(id, "Test episode", "https://example.com/a");
        episode.status = status;
        episode.error_message = error.map(|s| s.to_string());
        harness.store.insert(&episode).await.unwrap();
    }

    async fn wait_terminal(manager: &JobManager, job_id: Uuid) -> JobSnapshot {
        for _ in 0..500 {
            if let Some(snapshot) = manager.get(job_id).await {
                if snapshot.state.is_terminal() {
                    return snapshot;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("job {job_id} did not reach a terminal state");
    }

    async fn wait_state(manager: &JobManager, job_id: Uuid, state: JobState) {
        for _ in 0..500 {
            if let Some(snapshot) = manager.get(job_id).await {
                if snapshot.state == state {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("job {job_id} did not reach state {state}");
    }

    #[tokio::test]
    async fn test_run_executes_full_pipeline() {
        let harness = build_harness(&[], None);
        seed(&harness, "ep-001", EpisodeStatus::New, None).await;

        let submission = harness
            .manager
            .submit("ep-001", JobKind::Run, StageParams::new())
            .await
            .expect("submit should work");
        let job_id = submission.job_id().expect("job should be queued");

        let snapshot = wait_terminal(&harness.manager, job_id).await;
        assert_eq!(snapshot.state, JobState::Success);
        assert_eq!(snapshot.episode_status, Some(EpisodeStatus::Generated));

        let result = snapshot.result.expect("result payload should exist");
        assert_eq!(result["stages_run"].as_array().unwrap().len(), 4);
        assert_eq!(result["cost_usd"], 1.0);

        let tail = harness.manager.log_tail("ep-001", 50);
        assert!(tail[0].contains("Starting run for ep-001"));
        assert!(tail.iter().any(|l| l.contains("Plan: download")));
        assert!(tail.last().unwrap().contains("Job completed successfully"));
    }

    #[tokio::test]
    async fn test_run_on_terminal_status_creates_no_job() {
        let harness = build_harness(&[], None);
        seed(&harness, "ep-001", EpisodeStatus::Generated, None).await;

        let submission = harness
            .manager
            .submit("ep-001", JobKind::Run, StageParams::new())
            .await
            .expect("submit should work");

        assert!(submission.job_id().is_none());
        assert!(matches!(submission, Submission::NothingToDo(_)));
        assert!(harness.manager.active_for_episode("ep-001").is_none());
        assert!(harness.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_with_force_on_terminal_status_runs_everything() {
        let harness = build_harness(&[], None);
        seed(&harness, "ep-001", EpisodeStatus::Generated, None).await;

        let submission = harness
            .manager
            .submit("ep-001", JobKind::Run, StageParams::new().with_force(true))
            .await
            .expect("submit should work");
        let job_id = submission.job_id().expect("force should queue a job");

        let snapshot = wait_terminal(&harness.manager, job_id).await;
        assert_eq!(snapshot.state, JobState::Success);
        assert_eq!(harness.calls.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_retry_without_error_is_precondition_failure() {
        let harness = build_harness(&[], None);
        seed(&harness, "ep-001", EpisodeStatus::Chunked, None).await;

        let err = harness
            .manager
            .submit("ep-001", JobKind::Retry, StageParams::new())
            .await
            .expect_err("retry should be rejected");
        assert!(matches!(err, SubmitError::NothingToRetry(_)));
        assert!(harness.manager.active_for_episode("ep-001").is_none());
    }

    #[tokio::test]
    async fn test_retry_clears_error_and_resumes_from_last_stage() {
        let harness = build_harness(&[], None);
        seed(
            &harness,
            "ep-001",
            EpisodeStatus::Chunked,
            Some("Stage 'generate' failed: boom"),
        )
        .await;

        let submission = harness
            .manager
            .submit("ep-001", JobKind::Retry, StageParams::new())
            .await
            .expect("retry should queue");
        let job_id = submission.job_id().expect("job should be queued");

        let snapshot = wait_terminal(&harness.manager, job_id).await;
        assert_eq!(snapshot.state, JobState::Success);

        // Only the generate stage runs; earlier stages are skipped.
        let calls = harness.calls.lock().unwrap().clone();
        assert_eq!(calls, vec![("ep-001".to_string(), Stage::Generate)]);

        let episode = harness.store.get("ep-001").await.unwrap().unwrap();
        assert_eq!(episode.status, EpisodeStatus::Generated);
        assert!(!episode.has_error());

        let tail = harness.manager.log_tail("ep-001", 50);
        assert!(tail.iter().any(|l| l.contains("Cleared previous error")));
    }

    #[tokio::test]
    async fn test_failing_stage_stops_pipeline_and_errors_job() {
        let harness = build_harness(&[Stage::Transcribe], None);
        seed(&harness, "ep-001", EpisodeStatus::New, None).await;

        let submission = harness
            .manager
            .submit("ep-001", JobKind::Run, StageParams::new())
            .await
            .expect("submit should work");
        let job_id = submission.job_id().unwrap();

        let snapshot = wait_terminal(&harness.manager, job_id).await;
        assert_eq!(snapshot.state, JobState::Error);
        assert!(snapshot
            .error
            .as_deref()
            .unwrap()
            .contains("Stage 'transcribe' failed"));
        assert_eq!(snapshot.episode_status, Some(EpisodeStatus::Downloaded));

        let episode = harness.store.get("ep-001").await.unwrap().unwrap();
        assert_eq!(episode.retry_count, 1);
        assert!(episode.has_error());

        // Chunk and generate never ran.
        let calls = harness.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 2);
    }

    #[tokio::test]
    async fn test_conflict_while_job_is_active() {
        let gate = Arc::new(Semaphore::new(0));
        let harness = build_harness(&[], Some(Arc::clone(&gate)));
        seed(&harness, "ep-001", EpisodeStatus::Downloaded, None).await;

        let first = harness
            .manager
            .submit("ep-001", JobKind::Transcribe, StageParams::new())
            .await
            .expect("first submit should queue");
        let first_id = first.job_id().unwrap();
        wait_state(&harness.manager, first_id, JobState::Running).await;

        let err = harness
            .manager
            .submit("ep-001", JobKind::Chunk, StageParams::new())
            .await
            .expect_err("second submit should conflict");
        match err {
            SubmitError::Conflict { job_id, .. } => assert_eq!(job_id, first_id),
            other => panic!("expected conflict, got {other}"),
        }

        gate.add_permits(10);
        let snapshot = wait_terminal(&harness.manager, first_id).await;
        assert_eq!(snapshot.state, JobState::Success);

        // Once the first job is terminal the episode is free again.
        let second = harness
            .manager
            .submit("ep-001", JobKind::Chunk, StageParams::new())
            .await
            .expect("submit after completion should queue");
        wait_terminal(&harness.manager, second.job_id().unwrap()).await;
    }

    #[tokio::test]
    async fn test_jobs_for_different_episodes_run_fifo() {
        let harness = build_harness(&[], None);
        seed(&harness, "ep-001", EpisodeStatus::Chunked, None).await;
        seed(&harness, "ep-002", EpisodeStatus::Chunked, None).await;

        let a = harness
            .manager
            .submit("ep-001", JobKind::Run, StageParams::new())
            .await
            .unwrap()
            .job_id()
            .unwrap();
        let b = harness
            .manager
            .submit("ep-002", JobKind::Run, StageParams::new())
            .await
            .unwrap()
            .job_id()
            .unwrap();

        wait_terminal(&harness.manager, a).await;
        wait_terminal(&harness.manager, b).await;

        let calls = harness.calls.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec![
                ("ep-001".to_string(), Stage::Generate),
                ("ep-002".to_string(), Stage::Generate),
            ]
        );
    }

    #[tokio::test]
    async fn test_single_stage_job_advances_only_one_status() {
        let harness = build_harness(&[], None);
        seed(&harness, "ep-001", EpisodeStatus::New, None).await;

        let submission = harness
            .manager
            .submit("ep-001", JobKind::Download, StageParams::new())
            .await
            .expect("submit should queue");
        let snapshot = wait_terminal(&harness.manager, submission.job_id().unwrap()).await;

        assert_eq!(snapshot.state, JobState::Success);
        assert_eq!(snapshot.stage, Some(Stage::Download));
        assert_eq!(snapshot.episode_status, Some(EpisodeStatus::Downloaded));
        assert_eq!(snapshot.result.unwrap()["success"], true);
    }

    #[tokio::test]
    async fn test_unknown_episode_is_rejected() {
        let harness = build_harness(&[], None);
        let err = harness
            .manager
            .submit("nope", JobKind::Run, StageParams::new())
            .await
            .expect_err("unknown episode should be rejected");
        assert!(matches!(err, SubmitError::EpisodeNotFound(_)));
    }

    #[tokio::test]
    async fn test_unknown_job_id_returns_none() {
        let harness = build_harness(&[], None);
        assert!(harness.manager.get(Uuid::new_v4()).await.is_none());
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_submissions() {
        let harness = build_harness(&[], None);
        seed(&harness, "ep-001", EpisodeStatus::New, None).await;

        harness.manager.shutdown().await;

        let err = harness
            .manager
            .submit("ep-001", JobKind::Run, StageParams::new())
            .await
            .expect_err("submit after shutdown should fail");
        assert!(matches!(err, SubmitError::ShutDown));
    }

    #[test]
    fn test_registry_prunes_oldest_terminal_jobs() {
        let mut registry = Registry::new();

        for i in 0..MAX_RETAINED_JOBS + 10 {
            let mut job = Job::new(format!("ep-{i}"), JobKind::Run, StageParams::new());
            job.state = JobState::Success;
            registry.insert(job);
        }

        assert_eq!(registry.jobs.len(), MAX_RETAINED_JOBS);
        // The oldest records are the ones that were dropped.
        assert!(registry
            .jobs
            .values()
            .all(|job| job.episode_id != "ep-0" && job.episode_id != "ep-1"));
    }

    #[test]
    fn test_registry_never_prunes_active_jobs() {
        let mut registry = Registry::new();

        for i in 0..MAX_RETAINED_JOBS + 5 {
            let job = Job::new(format!("ep-{i}"), JobKind::Run, StageParams::new());
            registry.insert(job);
        }

        // All jobs are queued (active), so the cap cannot evict anything.
        assert_eq!(registry.jobs.len(), MAX_RETAINED_JOBS + 5);
    }
}
