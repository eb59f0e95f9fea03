//! Per-episode append-only logs.
//!
//! One text file per episode under `<logs_dir>/episodes/`. The job worker
//! is the only appender; readers take a tail snapshot of whatever is on
//! disk at read time. Append failures are logged and swallowed: a log write
//! must never fail a job.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use chrono::Utc;
use tracing::warn;

use super::job::JobKind;

/// Append-only per-episode log files.
#[derive(Debug, Clone)]
pub struct EpisodeLog {
    dir: PathBuf,
}

impl EpisodeLog {
    /// Creates the log directory tree and returns the handle.
    pub fn new(logs_dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = logs_dir.into().join("episodes");
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, episode_id: &str) -> PathBuf {
        self.dir.join(format!("{episode_id}.log"))
    }

    /// Appends one timestamped line to the episode's log.
    ///
    /// Never fails: write errors are reported via `warn!` and dropped.
    pub fn append(&self, episode_id: &str, kind: JobKind, message: &str) {
        let ts = Utc::now().format("%Y-%m-%d %H:%M:%S");
        let line = format!("{ts} [{kind}] {message}\n");
        let path = self.path_for(episode_id);

        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .and_then(|mut f| f.write_all(line.as_bytes()));

        if let Err(e) = result {
            warn!(path = %path.display(), error = %e, "Failed to write episode log");
        }
    }

    /// Returns the last `n` complete lines in chronological order, or an
    /// empty vector if no log exists yet.
    pub fn tail(&self, episode_id: &str, n: usize) -> Vec<String> {
        let path = self.path_for(episode_id);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(_) => return Vec::new(),
        };

        let lines: Vec<&str> = content.lines().collect();
        let start = lines.len().saturating_sub(n);
        lines[start..].iter().map(|s| s.to_string()).collect()
    }
}
