//! Episode records and their lifecycle status.
//!
//! An episode is one unit of work moving through the content pipeline.
//! Its `status` tracks the last stage that completed successfully and only
//! ever advances forward; a failed stage leaves the status where it was and
//! records the error instead.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of an episode, strictly ordered along the pipeline.
///
/// The derived ordering follows variant declaration order, so
/// `New < Downloaded < Transcribed < Chunked < Generated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EpisodeStatus {
    /// Detected but not yet processed.
    New,
    /// Audio has been fetched.
    Downloaded,
    /// A transcript exists.
    Transcribed,
    /// The transcript has been split into chunks.
    Chunked,
    /// Content generation finished; terminal status.
    Generated,
}

impl EpisodeStatus {
    /// Returns the canonical lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            EpisodeStatus::New => "new",
            EpisodeStatus::Downloaded => "downloaded",
            EpisodeStatus::Transcribed => "transcribed",
            EpisodeStatus::Chunked => "chunked",
            EpisodeStatus::Generated => "generated",
        }
    }

    /// Returns whether this is the terminal pipeline status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EpisodeStatus::Generated)
    }
}

impl fmt::Display for EpisodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EpisodeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(EpisodeStatus::New),
            "downloaded" => Ok(EpisodeStatus::Downloaded),
            "transcribed" => Ok(EpisodeStatus::Transcribed),
            "chunked" => Ok(EpisodeStatus::Chunked),
            "generated" => Ok(EpisodeStatus::Generated),
            other => Err(format!("unknown episode status: {other}")),
        }
    }
}

/// Kind of artifact a pipeline stage produces for an episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    /// Downloaded audio file.
    Audio,
    /// Raw transcript.
    Transcript,
    /// Segmented transcript chunks.
    Chunks,
    /// Generated educational content.
    Content,
}

impl ArtifactKind {
    /// Returns the canonical lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Audio => "audio",
            ArtifactKind::Transcript => "transcript",
            ArtifactKind::Chunks => "chunks",
            ArtifactKind::Content => "content",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single episode and its pipeline state.
///
/// Owned by the episode store; everything else reads and mutates it through
/// the [`EpisodeStore`](super::EpisodeStore) interface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    /// Stable external identifier (e.g. the feed entry id).
    pub episode_id: String,
    /// Human-readable title.
    pub title: String,
    /// Source media URL.
    pub source_url: String,
    /// Last successfully completed pipeline status.
    pub status: EpisodeStatus,
    /// Error from the most recent failed stage, if any.
    pub error_message: Option<String>,
    /// Number of failed stage executions recorded for this episode.
    pub retry_count: u32,
    /// Manifest of artifact kinds produced so far.
    pub artifacts: BTreeSet<ArtifactKind>,
    /// When the episode was first seen.
    pub detected_at: DateTime<Utc>,
    /// When the episode record last changed.
    pub updated_at: DateTime<Utc>,
}

impl Episode {
    /// Creates a new episode in the `New` status.
    pub fn new(
        episode_id: impl Into<String>,
        title: impl Into<String>,
        source_url: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            episode_id: episode_id.into(),
            title: title.into(),
            source_url: source_url.into(),
            status: EpisodeStatus::New,
            error_message: None,
            retry_count: 0,
            artifacts: BTreeSet::new(),
            detected_at: now,
            updated_at: now,
        }
    }

    /// Returns whether the episode currently carries a stage failure.
    pub fn has_error(&self) -> bool {
        self.error_message.is_some()
    }
}
