//! Subprocess-backed stage executor.
//!
//! The binary wires each stage to an external command (a downloader script,
//! a transcription client, ...). The command runs under `sh -c` and receives
//! the episode id and flags through the environment:
//!
//! - `CASTFORGE_EPISODE_ID`
//! - `CASTFORGE_FORCE` (`0`/`1`)
//! - `CASTFORGE_DRY_RUN` (`0`/`1`)
//!
//! The last non-empty stdout line becomes the outcome detail; on a non-zero
//! exit the stderr tail becomes the failure message.

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::executor::{StageError, StageExecutor, StageOutcome, StageParams};
use super::plan::Stage;

/// How many stderr lines to keep in a failure message.
const STDERR_TAIL_LINES: usize = 5;

/// Stage executor that shells out to a configured command.
pub struct CommandStageExecutor {
    stage: Stage,
    command: String,
}

impl CommandStageExecutor {
    /// Creates an executor running `command` for `stage`.
    pub fn new(stage: Stage, command: impl Into<String>) -> Self {
        Self {
            stage,
            command: command.into(),
        }
    }

    /// The command line this executor runs.
    pub fn command(&self) -> &str {
        &self.command
    }
}

fn flag(value: bool) -> &'static str {
    if value {
        "1"
    } else {
        "0"
    }
}

fn last_line(text: &str) -> Option<&str> {
    text.lines().rev().find(|line| !line.trim().is_empty())
}

fn tail_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

#[async_trait]
impl StageExecutor for CommandStageExecutor {
    async fn execute(
        &self,
        episode_id: &str,
        params: &StageParams,
    ) -> Result<StageOutcome, StageError> {
        debug!(
            stage = %self.stage,
            episode_id = %episode_id,
            command = %self.command,
            "Running stage command"
        );

        let output = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .env("CASTFORGE_EPISODE_ID", episode_id)
            .env("CASTFORGE_FORCE", flag(params.force))
            .env("CASTFORGE_DRY_RUN", flag(params.dry_run))
            .output()
            .await?;

        if output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let detail = last_line(&stdout)
                .unwrap_or("ok")
                .to_string();
            Ok(StageOutcome::new(detail))
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail = tail_lines(&stderr, STDERR_TAIL_LINES);
            let message = if tail.is_empty() {
                format!("command exited with {}", output.status)
            } else {
                tail
            };
            Err(StageError::Failed(message))
        }
    }
}
