//! Background job engine.
//!
//! Pipeline actions run asynchronously: a submission is validated, queued,
//! and handed a job id; a single worker task executes jobs FIFO while
//! clients poll job state and tail per-episode logs.
//!
//! - [`job`]: job records, kinds, states and poller-facing snapshots
//! - [`manager::JobManager`]: submission, the worker, and the job registry
//! - [`log::EpisodeLog`]: append-only per-episode log files

pub mod job;
pub mod log;
pub mod manager;

pub use job::{Job, JobKind, JobSnapshot, JobState};
pub use log::EpisodeLog;
pub use manager::{JobManager, SubmitError, Submission, MAX_RETAINED_JOBS};
