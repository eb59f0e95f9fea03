//! Stage definitions and the pipeline plan resolver.
//!
//! The pipeline is a fixed sequence of four stages. [`resolve`] is a pure
//! function of the episode status and the force flag: it produces a
//! [`StagePlan`] marking each stage as run or skip, and never consults error
//! state (whether a retry is *permitted* is decided at submission time, not
//! here). Keeping it pure makes it trivially table-testable.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::store::{ArtifactKind, EpisodeStatus};

/// One pipeline stage. The set is closed; the resolver and the worker
/// iterate [`Stage::ALL`] rather than dispatching on strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Fetch the episode audio.
    Download,
    /// Produce a transcript from the audio.
    Transcribe,
    /// Segment the transcript.
    Chunk,
    /// Generate content from the chunks.
    Generate,
}

impl Stage {
    /// All stages in pipeline execution order.
    pub const ALL: [Stage; 4] = [
        Stage::Download,
        Stage::Transcribe,
        Stage::Chunk,
        Stage::Generate,
    ];

    /// The episode status a successful run of this stage produces.
    pub fn produces(&self) -> EpisodeStatus {
        match self {
            Stage::Download => EpisodeStatus::Downloaded,
            Stage::Transcribe => EpisodeStatus::Transcribed,
            Stage::Chunk => EpisodeStatus::Chunked,
            Stage::Generate => EpisodeStatus::Generated,
        }
    }

    /// The artifact kind this stage records in the episode manifest.
    pub fn artifact(&self) -> ArtifactKind {
        match self {
            Stage::Download => ArtifactKind::Audio,
            Stage::Transcribe => ArtifactKind::Transcript,
            Stage::Chunk => ArtifactKind::Chunks,
            Stage::Generate => ArtifactKind::Content,
        }
    }

    /// Returns the canonical lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Download => "download",
            Stage::Transcribe => "transcribe",
            Stage::Chunk => "chunk",
            Stage::Generate => "generate",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "download" => Ok(Stage::Download),
            "transcribe" => Ok(Stage::Transcribe),
            "chunk" => Ok(Stage::Chunk),
            "generate" => Ok(Stage::Generate),
            other => Err(format!("unknown stage: {other}")),
        }
    }
}

/// Run/skip decision for one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    /// The stage must execute.
    Run,
    /// The stage already completed and is not forced.
    Skip,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Run => f.write_str("run"),
            Decision::Skip => f.write_str("skip"),
        }
    }
}

/// One entry of a [`StagePlan`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanEntry {
    /// The stage this entry decides about.
    pub stage: Stage,
    /// Whether the stage runs or is skipped.
    pub decision: Decision,
    /// Human-readable explanation for the decision.
    pub reason: String,
}

/// Ordered run/skip decisions, one per stage in pipeline order.
///
/// Computed fresh on every planning request and never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagePlan {
    /// Entries in pipeline order, one per stage.
    pub entries: Vec<PlanEntry>,
}

impl StagePlan {
    /// Stages marked `run`, in execution order.
    pub fn run_stages(&self) -> Vec<Stage> {
        self.entries
            .iter()
            .filter(|e| e.decision == Decision::Run)
            .map(|e| e.stage)
            .collect()
    }

    /// Number of stages that would execute.
    pub fn run_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.decision == Decision::Run)
            .count()
    }

    /// Returns whether the plan has nothing to execute.
    ///
    /// Callers must treat this as "nothing to do", not as an error.
    pub fn is_noop(&self) -> bool {
        self.run_count() == 0
    }
}

/// Computes which stages must run for an episode at `status`.
///
/// With `force` every stage runs regardless of status. Otherwise each stage
/// whose produced status is at or below `status` is skipped as already
/// completed, and everything after that point runs.
pub fn resolve(status: EpisodeStatus, force: bool) -> StagePlan {
    let mut entries = Vec::with_capacity(Stage::ALL.len());
    let mut prior_runs = false;

    for stage in Stage::ALL {
        if force {
            entries.push(PlanEntry {
                stage,
                decision: Decision::Run,
                reason: "forced".to_string(),
            });
        } else if stage.produces() <= status {
            entries.push(PlanEntry {
                stage,
                decision: Decision::Skip,
                reason: "already completed".to_string(),
            });
        } else {
            let reason = if prior_runs {
                "after prior stages".to_string()
            } else {
                format!("status={status}")
            };
            prior_runs = true;
            entries.push(PlanEntry {
                stage,
                decision: Decision::Run,
                reason,
            });
        }
    }

    StagePlan { entries }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decisions(plan: &StagePlan) -> Vec<Decision> {
        plan.entries.iter().map(|e| e.decision).collect()
    }

    #[test]
    fn test_resolve_table_without_force() {
        use Decision::{Run, Skip};

        let cases = [
            (EpisodeStatus::New, vec![Run, Run, Run, Run]),
            (EpisodeStatus::Downloaded, vec![Skip, Run, Run, Run]),
            (EpisodeStatus::Transcribed, vec![Skip, Skip, Run, Run]),
            (EpisodeStatus::Chunked, vec![Skip, Skip, Skip, Run]),
            (EpisodeStatus::Generated, vec![Skip, Skip, Skip, Skip]),
        ];

        for (status, expected) in cases {
            let plan = resolve(status, false);
            assert_eq!(
                decisions(&plan),
                expected,
                "unexpected plan for status {status}"
            );
        }
    }

    #[test]
    fn test_resolve_force_runs_everything() {
        for status in [
            EpisodeStatus::New,
            EpisodeStatus::Downloaded,
            EpisodeStatus::Transcribed,
            EpisodeStatus::Chunked,
            EpisodeStatus::Generated,
        ] {
            let plan = resolve(status, true);
            assert_eq!(plan.run_count(), 4, "force must run all stages");
            assert!(plan.entries.iter().all(|e| e.reason == "forced"));
        }
    }

    #[test]
    fn test_terminal_status_is_noop_not_error() {
        let plan = resolve(EpisodeStatus::Generated, false);
        assert!(plan.is_noop());
        assert!(plan.run_stages().is_empty());
    }

    #[test]
    fn test_plan_preserves_pipeline_order() {
        let plan = resolve(EpisodeStatus::New, false);
        let stages: Vec<Stage> = plan.entries.iter().map(|e| e.stage).collect();
        assert_eq!(stages, Stage::ALL.to_vec());
    }

    #[test]
    fn test_skip_reasons_are_explanatory() {
        let plan = resolve(EpisodeStatus::Downloaded, false);
        assert_eq!(plan.entries[0].reason, "already completed");
        assert_eq!(plan.entries[1].reason, "status=downloaded");
        assert_eq!(plan.entries[2].reason, "after prior stages");
    }

    #[test]
    fn test_stage_roundtrip_and_produced_status() {
        for stage in Stage::ALL {
            let parsed: Stage = stage.as_str().parse().expect("should parse");
            assert_eq!(parsed, stage);
        }
        assert_eq!(Stage::Generate.produces(), EpisodeStatus::Generated);
        assert!("upload".parse::<Stage>().is_err());
    }
}
