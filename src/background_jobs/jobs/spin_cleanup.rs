//! Spin cleanup background job.
//!
//! Deletes spins that aired longer ago than the retention period so that
//! timelines only carry recent history.

use crate::background_jobs::{
    context::JobContext,
    job::{BackgroundJob, JobError, JobSchedule},
};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{info, warn};

pub struct SpinCleanupJob {
    interval: Duration,
    retention: chrono::Duration,
}

impl SpinCleanupJob {
    pub fn new(interval: Duration, retention_hours: u64) -> Self {
        Self {
            interval,
            retention: chrono::Duration::hours(retention_hours as i64),
        }
    }

    /// Deletes every listener's spins older than the retention period relative to `now`.
    /// Returns the number of deleted spins.
    pub fn cleanup(&self, ctx: &JobContext, now: DateTime<Utc>) -> Result<usize, JobError> {
        let cutoff = now - self.retention;
        let listeners = ctx
            .store()
            .list_listener_ids()
            .map_err(|e| JobError::ExecutionFailed(e.to_string()))?;

        info!(
            "Cleaning up spins older than {} (cutoff: {})",
            self.retention, cutoff
        );

        let mut deleted = 0;
        for user_id in listeners {
            if ctx.is_cancelled() {
                return Err(JobError::Cancelled);
            }
            match ctx.generator.remove_spins_before(&user_id, cutoff) {
                Ok(count) => deleted += count,
                Err(e) => warn!("Failed to clean up spins for {}: {}", user_id, e),
            }
        }

        Ok(deleted)
    }
}

impl BackgroundJob for SpinCleanupJob {
    fn id(&self) -> &'static str {
        "spin_cleanup"
    }

    fn name(&self) -> &'static str {
        "Spin Cleanup"
    }

    fn description(&self) -> &'static str {
        "Delete spins that aired before the retention period"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::Interval(self.interval)
    }

    fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        if ctx.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        let deleted = self.cleanup(ctx, Utc::now())?;
        if deleted > 0 {
            info!("Deleted {} old spins", deleted);
        } else {
            info!("No spins to clean up");
        }

        Ok(())
    }
}
