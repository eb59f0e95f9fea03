//! End-to-end pipeline tests over the real SQLite store and shell-command
//! stage executors.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use uuid::Uuid;

use castforge::jobs::{EpisodeLog, JobKind, JobManager, JobSnapshot, Submission};
use castforge::pipeline::{CommandStageExecutor, ExecutorSet, Stage, StageParams};
use castforge::store::{Episode, EpisodeStatus, EpisodeStore, SqliteEpisodeStore};
use castforge::SubmitError;

struct App {
    manager: JobManager,
    store: Arc<SqliteEpisodeStore>,
    _logs: TempDir,
}

async fn build_app(executors: ExecutorSet) -> App {
    let store = Arc::new(
        SqliteEpisodeStore::connect("sqlite::memory:")
            .await
            .expect("in-memory database should open"),
    );
    let logs = TempDir::new().expect("tempdir should create");
    let log = EpisodeLog::new(logs.path()).expect("log dir should create");
    let manager = JobManager::new(store.clone() as Arc<dyn EpisodeStore>, executors, log);
    App {
        manager,
        store,
        _logs: logs,
    }
}

/// Executor set where every stage is a shell command echoing its name.
fn echo_executors() -> ExecutorSet {
    let mut set = ExecutorSet::new();
    for stage in Stage::ALL {
        set = set.register(
            stage,
            Arc::new(CommandStageExecutor::new(
                stage,
                format!("echo '{stage} finished'"),
            )),
        );
    }
    set
}

async fn add_episode(app: &App, id: &str, status: EpisodeStatus) {
    let mut episode = Episode::new(id, "Integration episode", "https://example.com/audio.mp3");
    episode.status = status;
    app.store.insert(&episode).await.expect("insert should work");
}

async fn submit(app: &App, id: &str, kind: JobKind, params: StageParams) -> Uuid {
    match app.manager.submit(id, kind, params).await {
        Ok(Submission::Queued(job_id)) => job_id,
        other => panic!("expected a queued job, got {other:?}"),
    }
}

async fn wait_terminal(app: &App, job_id: Uuid) -> JobSnapshot {
    for _ in 0..1000 {
        if let Some(snapshot) = app.manager.get(job_id).await {
            if snapshot.state.is_terminal() {
                return snapshot;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("job {job_id} never finished");
}

#[tokio::test]
async fn full_pipeline_runs_from_new_to_generated() {
    let app = build_app(echo_executors()).await;
    add_episode(&app, "ep-001", EpisodeStatus::New).await;

    let job_id = submit(&app, "ep-001", JobKind::Run, StageParams::new()).await;
    let snapshot = wait_terminal(&app, job_id).await;

    assert_eq!(snapshot.state.to_string(), "success");
    assert_eq!(snapshot.episode_status, Some(EpisodeStatus::Generated));

    let result = snapshot.result.expect("run should produce a summary");
    assert_eq!(result["success"], true);
    assert_eq!(result["stages_run"].as_array().unwrap().len(), 4);

    let episode = app.store.get("ep-001").await.unwrap().unwrap();
    assert_eq!(episode.status, EpisodeStatus::Generated);
    assert_eq!(episode.artifacts.len(), 4);
    assert!(episode.error_message.is_none());

    let tail = app.manager.log_tail("ep-001", 100);
    assert!(tail.iter().any(|l| l.contains("Plan: download → run")));
    assert!(tail.iter().any(|l| l.contains("download finished")));
    assert!(tail.last().unwrap().contains("Job completed successfully"));
}

#[tokio::test]
async fn failed_stage_is_recorded_and_retry_resumes() {
    let work = TempDir::new().unwrap();
    let marker = work.path().join("chunker-fixed");

    // Chunking fails until the marker file appears.
    let mut set = ExecutorSet::new();
    for stage in Stage::ALL {
        let command = if stage == Stage::Chunk {
            format!(
                "test -f {} && echo 'chunked' || {{ echo 'chunker unavailable' >&2; exit 1; }}",
                marker.display()
            )
        } else {
            format!("echo '{stage} finished'")
        };
        set = set.register(stage, Arc::new(CommandStageExecutor::new(stage, command)));
    }

    let app = build_app(set).await;
    add_episode(&app, "ep-002", EpisodeStatus::New).await;

    let job_id = submit(&app, "ep-002", JobKind::Run, StageParams::new()).await;
    let snapshot = wait_terminal(&app, job_id).await;

    assert_eq!(snapshot.state.to_string(), "error");
    let message = snapshot.error.expect("failed job should carry an error");
    assert!(message.contains("Stage 'chunk' failed"));
    assert!(message.contains("chunker unavailable"));

    // Completed stages survive; the episode parks at the failure point.
    let episode = app.store.get("ep-002").await.unwrap().unwrap();
    assert_eq!(episode.status, EpisodeStatus::Transcribed);
    assert_eq!(episode.retry_count, 1);
    assert!(episode.error_message.is_some());

    // Fix the external tool, then retry.
    std::fs::write(&marker, b"").unwrap();
    let job_id = submit(&app, "ep-002", JobKind::Retry, StageParams::new()).await;
    let snapshot = wait_terminal(&app, job_id).await;

    assert_eq!(snapshot.state.to_string(), "success");
    let episode = app.store.get("ep-002").await.unwrap().unwrap();
    assert_eq!(episode.status, EpisodeStatus::Generated);
    assert!(episode.error_message.is_none());

    // The retry picked up where the run stopped.
    let result = snapshot.result.unwrap();
    assert_eq!(result["stages_run"].as_array().unwrap().len(), 2);
    assert_eq!(result["stages_skipped"].as_array().unwrap().len(), 2);

    let tail = app.manager.log_tail("ep-002", 100);
    assert!(tail.iter().any(|l| l.contains("Cleared previous error")));

    // A second retry has nothing to act on.
    let err = app
        .manager
        .submit("ep-002", JobKind::Retry, StageParams::new())
        .await
        .expect_err("retry without an error should be rejected");
    assert!(matches!(err, SubmitError::NothingToRetry(_)));
}

#[tokio::test]
async fn single_stage_job_then_run_skips_completed_work() {
    let app = build_app(echo_executors()).await;
    add_episode(&app, "ep-003", EpisodeStatus::New).await;

    let job_id = submit(&app, "ep-003", JobKind::Download, StageParams::new()).await;
    let snapshot = wait_terminal(&app, job_id).await;
    assert_eq!(snapshot.episode_status, Some(EpisodeStatus::Downloaded));

    let job_id = submit(&app, "ep-003", JobKind::Run, StageParams::new()).await;
    let snapshot = wait_terminal(&app, job_id).await;

    let result = snapshot.result.unwrap();
    assert_eq!(result["stages_skipped"].as_array().unwrap()[0], "download");
    assert_eq!(result["stages_run"].as_array().unwrap().len(), 3);
    assert_eq!(snapshot.episode_status, Some(EpisodeStatus::Generated));
}

#[tokio::test]
async fn dry_run_flag_reaches_stage_commands() {
    let mut set = echo_executors();
    set = set.register(
        Stage::Generate,
        Arc::new(CommandStageExecutor::new(
            Stage::Generate,
            "test \"$CASTFORGE_DRY_RUN\" = 1 && echo 'generated (dry run)'",
        )),
    );

    let app = build_app(set).await;
    add_episode(&app, "ep-004", EpisodeStatus::Chunked).await;

    let job_id = submit(
        &app,
        "ep-004",
        JobKind::Run,
        StageParams::new().with_dry_run(true),
    )
    .await;
    let snapshot = wait_terminal(&app, job_id).await;

    assert_eq!(snapshot.state.to_string(), "success");
    let tail = app.manager.log_tail("ep-004", 20);
    assert!(tail.iter().any(|l| l.contains("generated (dry run)")));
}

#[tokio::test]
async fn force_reruns_a_finished_episode() {
    let app = build_app(echo_executors()).await;
    add_episode(&app, "ep-005", EpisodeStatus::Generated).await;

    // Without force there is nothing to do and no job is created.
    let submission = app
        .manager
        .submit("ep-005", JobKind::Run, StageParams::new())
        .await
        .unwrap();
    assert!(matches!(submission, Submission::NothingToDo(_)));

    let job_id = submit(
        &app,
        "ep-005",
        JobKind::Run,
        StageParams::new().with_force(true),
    )
    .await;
    let snapshot = wait_terminal(&app, job_id).await;

    assert_eq!(snapshot.state.to_string(), "success");
    assert_eq!(
        snapshot.result.unwrap()["stages_run"].as_array().unwrap().len(),
        4
    );
}
