//! Extend-all-listeners background job.
//!
//! Keeps every listener's timeline generated up to the configured horizon.
//! Failures are isolated per listener: one bad station never stops the batch.

use crate::background_jobs::{
    context::JobContext,
    job::{BackgroundJob, HookEvent, JobError, JobSchedule},
};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerFailure {
    pub user_id: String,
    pub kind: &'static str,
    pub message: String,
}

/// Outcome of one pass over all listeners.
#[derive(Debug, Clone, Default)]
pub struct ExtendBatchReport {
    pub succeeded: usize,
    pub spins_created: usize,
    pub commercials_created: usize,
    pub fallback_picks: usize,
    pub failed: Vec<ListenerFailure>,
}

impl ExtendBatchReport {
    pub fn attempted(&self) -> usize {
        self.succeeded + self.failed.len()
    }
}

pub struct ExtendSchedulesJob {
    interval: Duration,
    max_attempts: u32,
}

impl ExtendSchedulesJob {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Extends the given listeners, or every listener when `only` is `None`.
    pub fn run_batch(
        &self,
        ctx: &JobContext,
        only: Option<&[String]>,
        now: DateTime<Utc>,
    ) -> Result<ExtendBatchReport, JobError> {
        let listeners = match only {
            Some(ids) => ids.to_vec(),
            None => ctx
                .store()
                .list_listener_ids()
                .map_err(|e| JobError::ExecutionFailed(e.to_string()))?,
        };

        let horizon = ctx.generator.default_horizon(now);
        let mut report = ExtendBatchReport::default();

        for user_id in listeners {
            if ctx.is_cancelled() {
                info!(
                    "Extend batch cancelled after {} listeners",
                    report.attempted()
                );
                return Err(JobError::Cancelled);
            }

            let mut attempt = 1;
            loop {
                match ctx.generator.extend(&user_id, now, horizon) {
                    Ok(outcome) => {
                        report.succeeded += 1;
                        report.spins_created += outcome.spins_created;
                        report.commercials_created += outcome.commercials_created;
                        report.fallback_picks += outcome.fallback_picks;
                        break;
                    }
                    Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                        warn!(
                            "Extending schedule for {} failed (attempt {}/{}), retrying: {}",
                            user_id, attempt, self.max_attempts, e
                        );
                        attempt += 1;
                    }
                    Err(e) => {
                        warn!("Failed to extend schedule for {}: {}", user_id, e);
                        report.failed.push(ListenerFailure {
                            user_id: user_id.clone(),
                            kind: e.kind(),
                            message: e.to_string(),
                        });
                        break;
                    }
                }
            }
        }

        Ok(report)
    }
}

impl BackgroundJob for ExtendSchedulesJob {
    fn id(&self) -> &'static str {
        "extend_schedules"
    }

    fn name(&self) -> &'static str {
        "Extend Schedules"
    }

    fn description(&self) -> &'static str {
        "Generate every listener's timeline up to the scheduling horizon"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::Combined {
            interval: Some(self.interval),
            hooks: vec![HookEvent::OnStartup],
        }
    }

    fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        if ctx.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        let report = self.run_batch(ctx, None, Utc::now())?;

        info!(
            "Extended {} of {} listener schedules ({} spins, {} commercials, {} fallback picks)",
            report.succeeded,
            report.attempted(),
            report.spins_created,
            report.commercials_created,
            report.fallback_picks
        );

        if report.succeeded == 0 && !report.failed.is_empty() {
            return Err(JobError::ExecutionFailed(format!(
                "all {} listeners failed to extend",
                report.failed.len()
            )));
        }

        Ok(())
    }
}
