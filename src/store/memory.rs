//! In-memory episode store.
//!
//! Implements the same invariants as the SQLite store without any I/O.
//! Used by unit tests and by embedders that do not need durability.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use super::episode::Episode;
use super::{EpisodeStore, StoreError};
use crate::pipeline::Stage;

/// Episode store backed by a process-local map.
#[derive(Default)]
pub struct MemoryEpisodeStore {
    episodes: Mutex<HashMap<String, Episode>>,
}

impl MemoryEpisodeStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn with_episode<T>(
        &self,
        episode_id: &str,
        f: impl FnOnce(&mut Episode) -> T,
    ) -> Result<T, StoreError> {
        let mut episodes = self.episodes.lock().expect("episode map lock poisoned");
        let episode = episodes
            .get_mut(episode_id)
            .ok_or_else(|| StoreError::NotFound(episode_id.to_string()))?;
        let value = f(episode);
        episode.updated_at = Utc::now();
        Ok(value)
    }
}

#[async_trait]
impl EpisodeStore for MemoryEpisodeStore {
    async fn insert(&self, episode: &Episode) -> Result<(), StoreError> {
        let mut episodes = self.episodes.lock().expect("episode map lock poisoned");
        episodes.insert(episode.episode_id.clone(), episode.clone());
        Ok(())
    }

    async fn get(&self, episode_id: &str) -> Result<Option<Episode>, StoreError> {
        let episodes = self.episodes.lock().expect("episode map lock poisoned");
        Ok(episodes.get(episode_id).cloned())
    }

    async fn list(&self) -> Result<Vec<Episode>, StoreError> {
        let episodes = self.episodes.lock().expect("episode map lock poisoned");
        let mut all: Vec<Episode> = episodes.values().cloned().collect();
        all.sort_by(|a, b| a.detected_at.cmp(&b.detected_at));
        Ok(all)
    }

    async fn record_success(&self, episode_id: &str, stage: Stage) -> Result<(), StoreError> {
        self.with_episode(episode_id, |episode| {
            if stage.produces() > episode.status {
                episode.status = stage.produces();
            }
            episode.artifacts.insert(stage.artifact());
            episode.error_message = None;
        })
    }

    async fn record_failure(&self, episode_id: &str, error: &str) -> Result<(), StoreError> {
        self.with_episode(episode_id, |episode| {
            episode.error_message = Some(error.to_string());
            episode.retry_count += 1;
        })
    }

    async fn clear_error(&self, episode_id: &str) -> Result<(), StoreError> {
        self.with_episode(episode_id, |episode| {
            episode.error_message = None;
        })
    }
}
