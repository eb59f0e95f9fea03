//! Pipeline stages, planning and execution.
//!
//! The pipeline has a fixed stage order: download → transcribe → chunk →
//! generate. This module provides:
//!
//! - [`plan::resolve`]: the pure stage resolver deciding run/skip per stage
//! - [`executor::StageExecutor`]: the contract stage implementations fulfil
//! - [`runner::PipelineRunner`]: plan execution with fail-fast semantics
//! - [`command::CommandStageExecutor`]: the subprocess wiring the binary uses
//!
//! The resolver is a pure function so plans can be tested exhaustively; the
//! runner owns all episode-store writes during a run.

pub mod command;
pub mod executor;
pub mod plan;
pub mod runner;

pub use command::CommandStageExecutor;
pub use executor::{ExecutorSet, StageError, StageExecutor, StageOutcome, StageParams};
pub use plan::{resolve, Decision, PlanEntry, Stage, StagePlan};
pub use runner::{PipelineReport, PipelineRunner, RunError, StageEvent, StageRunRecord, StageRunStatus};
