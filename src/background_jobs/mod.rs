//! Background job scheduling and execution system.
//!
//! Runs the periodic work that keeps every listener's timeline ahead of the
//! clock and prunes spins that have long since aired.

mod context;
mod job;
pub mod jobs;
mod scheduler;

pub use context::JobContext;
pub use job::{BackgroundJob, HookEvent, JobError, JobSchedule};
pub use scheduler::{JobRun, JobRunHistory, JobRunStatus, JobScheduler};
