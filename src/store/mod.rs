//! Episode store: the durable single source of truth for pipeline state.
//!
//! Jobs and the worker never touch episode rows directly; they go through
//! the [`EpisodeStore`] interface. Two implementations exist:
//!
//! - [`SqliteEpisodeStore`]: the production store backed by SQLite.
//! - [`MemoryEpisodeStore`]: an in-process store for tests and embedding.
//!
//! SQLite is effectively single-writer, which is why job execution is
//! serialized on one worker (see [`crate::jobs`]).

pub mod database;
pub mod episode;
pub mod memory;

pub use database::SqliteEpisodeStore;
pub use episode::{ArtifactKind, Episode, EpisodeStatus};
pub use memory::MemoryEpisodeStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::pipeline::Stage;

/// Errors that can occur during episode store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Connection to the backing database failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Query execution failed.
    #[error("Query failed: {0}")]
    QueryFailed(#[from] sqlx::Error),

    /// Episode not found.
    #[error("Episode not found: {0}")]
    NotFound(String),

    /// Stored data could not be decoded.
    #[error("Corrupt record: {0}")]
    Decode(String),

    /// Serialization of the artifact manifest failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Narrow interface to the durable episode state.
///
/// Only the job worker writes through this trait, so implementations do not
/// need to coordinate concurrent writers. Status mutations keep the episode
/// invariants: status only moves forward, a stage success clears the error
/// and records the produced artifact, a stage failure leaves the status
/// untouched and increments the retry counter.
#[async_trait]
pub trait EpisodeStore: Send + Sync {
    /// Inserts a new episode record.
    async fn insert(&self, episode: &Episode) -> Result<(), StoreError>;

    /// Fetches an episode by id, or `None` if unknown.
    async fn get(&self, episode_id: &str) -> Result<Option<Episode>, StoreError>;

    /// Lists all episodes in detection order.
    async fn list(&self) -> Result<Vec<Episode>, StoreError>;

    /// Records a successful stage execution: advances the status to the
    /// stage's produced status (never backwards), adds the artifact to the
    /// manifest and clears any previous error.
    async fn record_success(&self, episode_id: &str, stage: Stage) -> Result<(), StoreError>;

    /// Records a failed stage execution: stores the error message and
    /// increments the retry counter. The status is left at the last
    /// successfully completed stage.
    async fn record_failure(&self, episode_id: &str, error: &str) -> Result<(), StoreError>;

    /// Clears a stale error message without touching anything else.
    async fn clear_error(&self, episode_id: &str) -> Result<(), StoreError>;
}
