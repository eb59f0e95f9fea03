//! CLI command definitions for castforge.
//!
//! Every command that touches episodes goes through the same store and job
//! manager the HTTP API uses, so behavior is identical regardless of which
//! surface triggered the action.

use std::sync::Arc;

use anyhow::{anyhow, Context};
use clap::Parser;
use tracing::info;

use crate::config::AppConfig;
use crate::jobs::{EpisodeLog, JobKind, JobManager, Submission};
use crate::pipeline::{resolve, Stage, StageParams};
use crate::poller::{JobPoller, PollObserver, PollOutcome, StatusSource};
use crate::server::{self, AppState};
use crate::store::{Episode, EpisodeStore, SqliteEpisodeStore};

/// Podcast-to-education pipeline orchestrator.
#[derive(Parser)]
#[command(name = "castforge")]
#[command(about = "Orchestrate the podcast education pipeline")]
#[command(version)]
#[command(
    long_about = "castforge tracks podcast episodes through a fixed pipeline \
(download → transcribe → chunk → generate) and runs stages as background jobs.\n\n\
Example usage:\n  castforge add ep-001 \"Episode title\" https://example.com/ep1.mp3\n  \
castforge run ep-001\n  castforge serve"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// SQLite connection string.
    #[arg(long, global = true, env = "CASTFORGE_DATABASE_URL")]
    pub database_url: Option<String>,

    /// Directory holding per-episode log files.
    #[arg(long, global = true, env = "CASTFORGE_LOGS_DIR")]
    pub logs_dir: Option<String>,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Start the HTTP API server.
    Serve(ServeArgs),

    /// Register a new episode.
    Add(AddArgs),

    /// Run all outstanding pipeline stages for an episode.
    Run(RunArgs),

    /// Clear a recorded error and re-run outstanding stages.
    Retry(RetryArgs),

    /// Show which stages a run would execute, without running anything.
    Plan(PlanArgs),

    /// Show one episode, or all episodes.
    Status(StatusArgs),

    /// Print the tail of an episode's job log.
    Log(LogArgs),

    /// Create the database file and schema.
    InitDb,
}

/// Arguments for `castforge serve`.
#[derive(Parser, Debug)]
pub struct ServeArgs {
    /// Address to bind (host:port).
    #[arg(short, long, env = "CASTFORGE_BIND_ADDR")]
    pub bind: Option<String>,
}

/// Arguments for `castforge add`.
#[derive(Parser, Debug)]
pub struct AddArgs {
    /// Episode identifier (unique).
    pub episode_id: String,

    /// Human-readable episode title.
    pub title: String,

    /// Source URL of the episode audio.
    pub source_url: String,
}

/// Arguments for `castforge run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Episode to run.
    pub episode_id: String,

    /// Re-run stages even if their output already exists.
    #[arg(short, long)]
    pub force: bool,

    /// Simulate side-effecting stages.
    #[arg(long)]
    pub dry_run: bool,
}

/// Arguments for `castforge retry`.
#[derive(Parser, Debug)]
pub struct RetryArgs {
    /// Episode to retry.
    pub episode_id: String,
}

/// Arguments for `castforge plan`.
#[derive(Parser, Debug)]
pub struct PlanArgs {
    /// Episode to plan for.
    pub episode_id: String,

    /// Plan as if --force were passed to run.
    #[arg(short, long)]
    pub force: bool,
}

/// Arguments for `castforge status`.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Episode to show; omit to list all episodes.
    pub episode_id: Option<String>,
}

/// Arguments for `castforge log`.
#[derive(Parser, Debug)]
pub struct LogArgs {
    /// Episode whose log to print.
    pub episode_id: String,

    /// Number of lines from the end.
    #[arg(short, long, default_value = "50")]
    pub lines: usize,
}

/// Parse CLI arguments without executing a command.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let mut config = AppConfig::from_env().context("invalid configuration")?;
    if let Some(url) = &cli.database_url {
        config = config.with_database_url(url);
    }
    if let Some(dir) = &cli.logs_dir {
        config = config.with_logs_dir(dir);
    }
    config.validate().context("invalid configuration")?;

    match cli.command {
        Commands::Serve(args) => run_serve_command(config, args).await,
        Commands::Add(args) => run_add_command(config, args).await,
        Commands::Run(args) => {
            run_action_command(
                config,
                &args.episode_id,
                JobKind::Run,
                StageParams::new()
                    .with_force(args.force)
                    .with_dry_run(args.dry_run),
            )
            .await
        }
        Commands::Retry(args) => {
            run_action_command(config, &args.episode_id, JobKind::Retry, StageParams::new())
                .await
        }
        Commands::Plan(args) => run_plan_command(config, args).await,
        Commands::Status(args) => run_status_command(config, args).await,
        Commands::Log(args) => run_log_command(config, args).await,
        Commands::InitDb => run_init_db_command(config).await,
    }
}

async fn open_store(config: &AppConfig) -> anyhow::Result<Arc<SqliteEpisodeStore>> {
    let store = SqliteEpisodeStore::connect(&config.database_url)
        .await
        .with_context(|| format!("failed to open database '{}'", config.database_url))?;
    Ok(Arc::new(store))
}

fn build_manager(
    config: &AppConfig,
    store: Arc<SqliteEpisodeStore>,
) -> anyhow::Result<Arc<JobManager>> {
    let log = EpisodeLog::new(&config.logs_dir).with_context(|| {
        format!("failed to create log directory '{}'", config.logs_dir.display())
    })?;
    Ok(Arc::new(JobManager::new(
        store as Arc<dyn EpisodeStore>,
        config.executor_set(),
        log,
    )))
}

async fn run_serve_command(mut config: AppConfig, args: ServeArgs) -> anyhow::Result<()> {
    if let Some(bind) = args.bind {
        config = config.with_bind_addr(bind);
    }

    let store = open_store(&config).await?;
    let manager = build_manager(&config, Arc::clone(&store))?;

    let state = AppState {
        manager,
        store: store as Arc<dyn EpisodeStore>,
    };
    server::serve(&config.bind_addr, state)
        .await
        .context("HTTP server failed")
}

async fn run_add_command(config: AppConfig, args: AddArgs) -> anyhow::Result<()> {
    let store = open_store(&config).await?;
    let episode = Episode::new(&args.episode_id, &args.title, &args.source_url);
    store
        .insert(&episode)
        .await
        .with_context(|| format!("failed to add episode '{}'", args.episode_id))?;

    info!(episode_id = %args.episode_id, "Episode added");
    println!("Added episode '{}' ({})", args.episode_id, args.title);
    Ok(())
}

/// Observer printing progress lines while the CLI waits on a job.
struct PrintingObserver;

impl PollObserver for PrintingObserver {
    fn on_stage(&mut self, stage: Stage) {
        println!("  → {stage}");
    }
}

/// Submits a composite action and waits for the job to finish.
async fn run_action_command(
    config: AppConfig,
    episode_id: &str,
    kind: JobKind,
    params: StageParams,
) -> anyhow::Result<()> {
    let store = open_store(&config).await?;
    let manager = build_manager(&config, store)?;

    let submission = manager.submit(episode_id, kind, params).await?;
    let job_id = match submission {
        Submission::Queued(job_id) => job_id,
        Submission::NothingToDo(message) => {
            println!("{message}");
            return Ok(());
        }
    };

    println!("Started {kind} for '{episode_id}' (job {job_id})");
    let handle = JobPoller::spawn(
        Arc::clone(&manager) as Arc<dyn StatusSource>,
        job_id,
        config.poll_interval(),
        PrintingObserver,
    );
    let outcome = handle.wait().await;
    manager.shutdown().await;

    match outcome {
        PollOutcome::Success(snapshot) => {
            println!("Done. Episode status: {}", describe_status(&snapshot.episode_status));
            if let Some(result) = snapshot.result {
                println!("{result}");
            }
            Ok(())
        }
        PollOutcome::Error(snapshot) => Err(anyhow!(
            "{kind} failed: {}",
            snapshot.error.unwrap_or_else(|| "unknown error".to_string())
        )),
        PollOutcome::Vanished => Err(anyhow!("job {job_id} disappeared before finishing")),
        PollOutcome::Cancelled => Err(anyhow!("wait for job {job_id} was cancelled")),
    }
}

fn describe_status(status: &Option<crate::store::EpisodeStatus>) -> String {
    status
        .map(|s| s.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

async fn run_plan_command(config: AppConfig, args: PlanArgs) -> anyhow::Result<()> {
    let store = open_store(&config).await?;
    let episode = store
        .get(&args.episode_id)
        .await?
        .ok_or_else(|| anyhow!("episode not found: {}", args.episode_id))?;

    let plan = resolve(episode.status, args.force);
    println!(
        "Plan for '{}' (status: {}):",
        args.episode_id, episode.status
    );
    for entry in &plan.entries {
        println!("  {:<10} {:<5} {}", entry.stage, entry.decision, entry.reason);
    }
    if plan.is_noop() {
        println!("Nothing to do");
    }
    Ok(())
}

async fn run_status_command(config: AppConfig, args: StatusArgs) -> anyhow::Result<()> {
    let store = open_store(&config).await?;

    match args.episode_id {
        Some(episode_id) => {
            let episode = store
                .get(&episode_id)
                .await?
                .ok_or_else(|| anyhow!("episode not found: {episode_id}"))?;
            print_episode(&episode);
        }
        None => {
            let episodes = store.list().await?;
            if episodes.is_empty() {
                println!("No episodes");
                return Ok(());
            }
            println!("{:<16} {:<12} {:>7}  ERROR", "EPISODE", "STATUS", "RETRIES");
            for episode in episodes {
                println!(
                    "{:<16} {:<12} {:>7}  {}",
                    episode.episode_id,
                    episode.status,
                    episode.retry_count,
                    episode.error_message.as_deref().unwrap_or("-")
                );
            }
        }
    }
    Ok(())
}

fn print_episode(episode: &Episode) {
    println!("Episode:  {}", episode.episode_id);
    println!("Title:    {}", episode.title);
    println!("Source:   {}", episode.source_url);
    println!("Status:   {}", episode.status);
    println!("Retries:  {}", episode.retry_count);
    if let Some(error) = &episode.error_message {
        println!("Error:    {error}");
    }
    let artifacts: Vec<String> = episode.artifacts.iter().map(|a| a.to_string()).collect();
    println!(
        "Artifacts: {}",
        if artifacts.is_empty() {
            "-".to_string()
        } else {
            artifacts.join(", ")
        }
    );
    println!("Updated:  {}", episode.updated_at.format("%Y-%m-%d %H:%M:%S"));
}

async fn run_log_command(config: AppConfig, args: LogArgs) -> anyhow::Result<()> {
    let log = EpisodeLog::new(&config.logs_dir).with_context(|| {
        format!("failed to open log directory '{}'", config.logs_dir.display())
    })?;

    let lines = log.tail(&args.episode_id, args.lines);
    if lines.is_empty() {
        println!("No log entries for '{}'", args.episode_id);
        return Ok(());
    }
    for line in lines {
        println!("{line}");
    }
    Ok(())
}

async fn run_init_db_command(config: AppConfig) -> anyhow::Result<()> {
    open_store(&config).await?;
    println!("Database ready at {}", config.database_url);
    Ok(())
}
