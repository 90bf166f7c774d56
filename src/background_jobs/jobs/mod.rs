//! Specific background job implementations.

pub mod extend_schedules;
pub mod spin_cleanup;

pub use extend_schedules::{ExtendBatchReport, ExtendSchedulesJob, ListenerFailure};
pub use spin_cleanup::SpinCleanupJob;
