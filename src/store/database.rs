//! SQLite-backed episode store.
//!
//! Stores episode state in a single `episodes` table. The artifact manifest
//! is kept as a JSON-encoded array and the status as its lowercase name.
//! The pool is capped at one connection: SQLite allows only one writer at a
//! time and the job worker is the only writer in the process anyway.

use std::collections::BTreeSet;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use super::episode::{ArtifactKind, Episode, EpisodeStatus};
use super::{EpisodeStore, StoreError};
use crate::pipeline::Stage;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS episodes (
    episode_id    TEXT PRIMARY KEY,
    title         TEXT NOT NULL,
    source_url    TEXT NOT NULL DEFAULT '',
    status        TEXT NOT NULL,
    error_message TEXT,
    retry_count   INTEGER NOT NULL DEFAULT 0,
    artifacts     TEXT NOT NULL DEFAULT '[]',
    detected_at   TEXT NOT NULL,
    updated_at    TEXT NOT NULL
)
"#;

/// SQLite episode store.
pub struct SqliteEpisodeStore {
    pool: SqlitePool,
}

impl SqliteEpisodeStore {
    /// Connects to the database, creating the file and schema if needed.
    ///
    /// # Arguments
    ///
    /// * `database_url` - SQLite connection string (e.g. `sqlite://data/castforge.db`)
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Creates a store from an existing pool and ensures the schema exists.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Returns a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        sqlx::query(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    fn episode_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Episode, StoreError> {
        let status_raw: String = row.get("status");
        let status = EpisodeStatus::from_str(&status_raw).map_err(StoreError::Decode)?;

        let artifacts_raw: String = row.get("artifacts");
        let artifacts: BTreeSet<ArtifactKind> = serde_json::from_str(&artifacts_raw)?;

        let retry_count: i64 = row.get("retry_count");
        let detected_at: DateTime<Utc> = row.get("detected_at");
        let updated_at: DateTime<Utc> = row.get("updated_at");

        Ok(Episode {
            episode_id: row.get("episode_id"),
            title: row.get("title"),
            source_url: row.get("source_url"),
            status,
            error_message: row.get("error_message"),
            retry_count: retry_count.max(0) as u32,
            artifacts,
            detected_at,
            updated_at,
        })
    }

    async fn fetch_required(&self, episode_id: &str) -> Result<Episode, StoreError> {
        self.get(episode_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(episode_id.to_string()))
    }

    async fn write_back(&self, episode: &Episode) -> Result<(), StoreError> {
        let artifacts = serde_json::to_string(&episode.artifacts)?;

        sqlx::query(
            r#"
            UPDATE episodes
            SET status = ?, error_message = ?, retry_count = ?, artifacts = ?, updated_at = ?
            WHERE episode_id = ?
            "#,
        )
        .bind(episode.status.as_str())
        .bind(&episode.error_message)
        .bind(i64::from(episode.retry_count))
        .bind(&artifacts)
        .bind(Utc::now())
        .bind(&episode.episode_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl EpisodeStore for SqliteEpisodeStore {
    async fn insert(&self, episode: &Episode) -> Result<(), StoreError> {
        let artifacts = serde_json::to_string(&episode.artifacts)?;

        sqlx::query(
            r#"
            INSERT INTO episodes (
                episode_id, title, source_url, status, error_message,
                retry_count, artifacts, detected_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&episode.episode_id)
        .bind(&episode.title)
        .bind(&episode.source_url)
        .bind(episode.status.as_str())
        .bind(&episode.error_message)
        .bind(i64::from(episode.retry_count))
        .bind(&artifacts)
        .bind(episode.detected_at)
        .bind(episode.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, episode_id: &str) -> Result<Option<Episode>, StoreError> {
        let row = sqlx::query("SELECT * FROM episodes WHERE episode_id = ?")
            .bind(episode_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(Self::episode_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn list(&self) -> Result<Vec<Episode>, StoreError> {
        let rows = sqlx::query("SELECT * FROM episodes ORDER BY detected_at ASC")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::episode_from_row).collect()
    }

    async fn record_success(&self, episode_id: &str, stage: Stage) -> Result<(), StoreError> {
        let mut episode = self.fetch_required(episode_id).await?;

        if stage.produces() > episode.status {
            episode.status = stage.produces();
        }
        episode.artifacts.insert(stage.artifact());
        episode.error_message = None;

        self.write_back(&episode).await
    }

    async fn record_failure(&self, episode_id: &str, error: &str) -> Result<(), StoreError> {
        let mut episode = self.fetch_required(episode_id).await?;

        episode.error_message = Some(error.to_string());
        episode.retry_count += 1;

        self.write_back(&episode).await
    }

    async fn clear_error(&self, episode_id: &str) -> Result<(), StoreError> {
        let mut episode = self.fetch_required(episode_id).await?;

        episode.error_message = None;

        self.write_back(&episode).await
    }
}
