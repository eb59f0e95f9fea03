//! Application configuration.
//!
//! Defaults are usable out of the box; every field can be overridden via a
//! `CASTFORGE_*` environment variable or the CLI flags that feed the
//! builder methods. Validation happens once, up front, so the rest of the
//! code can trust the values.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::pipeline::{CommandStageExecutor, ExecutorSet, Stage};

/// Configuration errors, reported before anything starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A field has an unusable value.
    #[error("Invalid configuration for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    /// An environment variable exists but cannot be parsed.
    #[error("Invalid value in {var}: {reason}")]
    InvalidEnv { var: &'static str, reason: String },
}

/// Shell command lines for the pipeline stages.
///
/// Each stage is an external command invoked with the episode id and flags
/// in its environment, which keeps heavy tooling (downloaders, speech
/// models, LLM clients) out of this process.
#[derive(Debug, Clone)]
pub struct StageCommands {
    pub download: String,
    pub transcribe: String,
    pub chunk: String,
    pub generate: String,
}

impl Default for StageCommands {
    fn default() -> Self {
        Self {
            download: "scripts/download.sh".to_string(),
            transcribe: "scripts/transcribe.sh".to_string(),
            chunk: "scripts/chunk.sh".to_string(),
            generate: "scripts/generate.sh".to_string(),
        }
    }
}

impl StageCommands {
    /// The command line configured for a stage.
    pub fn command_for(&self, stage: Stage) -> &str {
        match stage {
            Stage::Download => &self.download,
            Stage::Transcribe => &self.transcribe,
            Stage::Chunk => &self.chunk,
            Stage::Generate => &self.generate,
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// SQLite connection string for the episode store.
    pub database_url: String,
    /// Directory holding per-episode log files.
    pub logs_dir: PathBuf,
    /// Address the HTTP API binds to.
    pub bind_addr: String,
    /// Interval between CLI job polls, in seconds.
    pub poll_interval_secs: u64,
    /// Stage command lines.
    pub stages: StageCommands,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://data/castforge.db".to_string(),
            logs_dir: PathBuf::from("data/logs"),
            bind_addr: "127.0.0.1:8080".to_string(),
            poll_interval_secs: 2,
            stages: StageCommands::default(),
        }
    }
}

impl AppConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads overrides from `CASTFORGE_*` environment variables on top of
    /// the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(value) = std::env::var("CASTFORGE_DATABASE_URL") {
            config.database_url = value;
        }
        if let Ok(value) = std::env::var("CASTFORGE_LOGS_DIR") {
            config.logs_dir = PathBuf::from(value);
        }
        if let Ok(value) = std::env::var("CASTFORGE_BIND_ADDR") {
            config.bind_addr = value;
        }
        if let Ok(value) = std::env::var("CASTFORGE_POLL_INTERVAL_SECS") {
            config.poll_interval_secs =
                value.parse().map_err(|_| ConfigError::InvalidEnv {
                    var: "CASTFORGE_POLL_INTERVAL_SECS",
                    reason: format!("expected an integer, got '{value}'"),
                })?;
        }
        if let Ok(value) = std::env::var("CASTFORGE_CMD_DOWNLOAD") {
            config.stages.download = value;
        }
        if let Ok(value) = std::env::var("CASTFORGE_CMD_TRANSCRIBE") {
            config.stages.transcribe = value;
        }
        if let Ok(value) = std::env::var("CASTFORGE_CMD_CHUNK") {
            config.stages.chunk = value;
        }
        if let Ok(value) = std::env::var("CASTFORGE_CMD_GENERATE") {
            config.stages.generate = value;
        }

        config.validate()?;
        Ok(config)
    }

    /// Sets the database URL.
    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = url.into();
        self
    }

    /// Sets the log directory.
    pub fn with_logs_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.logs_dir = dir.into();
        self
    }

    /// Sets the HTTP bind address.
    pub fn with_bind_addr(mut self, addr: impl Into<String>) -> Self {
        self.bind_addr = addr.into();
        self
    }

    /// Sets the poll interval in seconds.
    pub fn with_poll_interval_secs(mut self, secs: u64) -> Self {
        self.poll_interval_secs = secs;
        self
    }

    /// The poll interval as a [`Duration`].
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Checks the configuration for unusable values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_url.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "database_url",
                reason: "must not be empty".to_string(),
            });
        }
        if self.bind_addr.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "bind_addr",
                reason: "must not be empty".to_string(),
            });
        }
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "poll_interval_secs",
                reason: "must be at least 1".to_string(),
            });
        }
        for stage in Stage::ALL {
            if self.stages.command_for(stage).is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "stages",
                    reason: format!("no command configured for stage '{stage}'"),
                });
            }
        }
        Ok(())
    }

    /// Builds the executor registry from the configured stage commands.
    pub fn executor_set(&self) -> ExecutorSet {
        let mut set = ExecutorSet::new();
        for stage in Stage::ALL {
            set = set.register(
                stage,
                Arc::new(CommandStageExecutor::new(
                    stage,
                    self.stages.command_for(stage),
                )),
            );
        }
        set
    }
}
