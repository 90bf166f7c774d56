use super::context::JobContext;
use super::job::{BackgroundJob, HookEvent, JobError};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const MAX_RUN_HISTORY: usize = 100;
const IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(60);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobRunStatus {
    Completed,
    Failed,
    Cancelled,
}

/// One finished execution of a job.
#[derive(Debug, Clone)]
pub struct JobRun {
    pub job_id: String,
    pub triggered_by: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: JobRunStatus,
    pub error_message: Option<String>,
}

/// Recent job runs, newest last.
#[derive(Clone, Default)]
pub struct JobRunHistory {
    runs: Arc<Mutex<VecDeque<JobRun>>>,
}

impl JobRunHistory {
    fn record(&self, run: JobRun) {
        let mut runs = self.runs.lock().unwrap_or_else(PoisonError::into_inner);
        if runs.len() == MAX_RUN_HISTORY {
            runs.pop_front();
        }
        runs.push_back(run);
    }

    pub fn runs(&self) -> Vec<JobRun> {
        self.runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn runs_for(&self, job_id: &str) -> Vec<JobRun> {
        self.runs()
            .into_iter()
            .filter(|run| run.job_id == job_id)
            .collect()
    }
}

/// Manages background job scheduling and execution.
pub struct JobScheduler {
    jobs: HashMap<String, Arc<dyn BackgroundJob>>,

    /// Next due time for interval-based jobs.
    next_runs: HashMap<String, DateTime<Utc>>,

    /// Currently running jobs with their task handles.
    running_handles: HashMap<String, JoinHandle<()>>,

    /// Cancellation tokens for each running job.
    job_cancel_tokens: HashMap<String, CancellationToken>,

    /// Finished job ids, so the loop wakes up as soon as a job is done.
    completion_sender: mpsc::UnboundedSender<String>,
    completion_receiver: mpsc::UnboundedReceiver<String>,

    /// Token to signal scheduler shutdown.
    shutdown_token: CancellationToken,

    /// Shared context provided to jobs during execution.
    job_context: JobContext,

    history: JobRunHistory,
}

impl JobScheduler {
    pub fn new(shutdown_token: CancellationToken, job_context: JobContext) -> Self {
        let (completion_sender, completion_receiver) = mpsc::unbounded_channel();
        Self {
            jobs: HashMap::new(),
            next_runs: HashMap::new(),
            running_handles: HashMap::new(),
            job_cancel_tokens: HashMap::new(),
            completion_sender,
            completion_receiver,
            shutdown_token,
            job_context,
            history: JobRunHistory::default(),
        }
    }

    /// Register a job with the scheduler.
    ///
    /// Interval jobs first become due one interval after registration. Jobs
    /// that should also run right away subscribe to `HookEvent::OnStartup`.
    pub fn register_job(&mut self, job: Arc<dyn BackgroundJob>) {
        let job_id = job.id().to_string();
        info!("Registering job: {} - {}", job_id, job.description());
        if let Some(interval) = job.schedule().interval() {
            self.next_runs
                .insert(job_id.clone(), Utc::now() + to_chrono(interval));
        }
        self.jobs.insert(job_id, job);
    }

    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    /// Handle onto the run history, usable after the scheduler has been moved into a task.
    pub fn history(&self) -> JobRunHistory {
        self.history.clone()
    }

    /// Main scheduler loop.
    pub async fn run(&mut self) {
        info!(
            "Starting job scheduler with {} registered jobs",
            self.job_count()
        );

        self.trigger_jobs_for_hook(HookEvent::OnStartup);

        loop {
            let sleep_duration = self.time_until_next_scheduled_job();
            debug!(
                "Scheduler sleeping for {:?} until next scheduled job",
                sleep_duration
            );

            tokio::select! {
                _ = tokio::time::sleep(sleep_duration) => {
                    self.run_due_jobs();
                }
                Some(job_id) = self.completion_receiver.recv() => {
                    self.finish_job(&job_id).await;
                }
                _ = self.shutdown_token.cancelled() => {
                    info!("Scheduler received shutdown signal");
                    self.shutdown().await;
                    break;
                }
            }
        }
    }

    fn is_running(&self, job_id: &str) -> bool {
        self.running_handles.contains_key(job_id)
    }

    /// Calculate time until the next scheduled job should run.
    fn time_until_next_scheduled_job(&self) -> Duration {
        let now = Utc::now();
        let mut min_duration = IDLE_CHECK_INTERVAL;

        for (job_id, next_run) in &self.next_runs {
            if self.is_running(job_id) {
                continue;
            }
            if *next_run <= now {
                return Duration::ZERO;
            }
            let duration = (*next_run - now).to_std().unwrap_or(Duration::from_secs(1));
            min_duration = min_duration.min(duration);
        }

        min_duration
    }

    /// Run all jobs that are due for scheduled execution.
    fn run_due_jobs(&mut self) {
        let now = Utc::now();
        let due: Vec<String> = self
            .next_runs
            .iter()
            .filter(|(job_id, next_run)| **next_run <= now && !self.is_running(job_id))
            .map(|(job_id, _)| job_id.clone())
            .collect();

        for job_id in due {
            self.spawn_job(&job_id, "schedule");
        }
    }

    /// Trigger all jobs that listen for a specific hook event.
    fn trigger_jobs_for_hook(&mut self, event: HookEvent) {
        let mut jobs_to_trigger = Vec::new();
        for (job_id, job) in &self.jobs {
            if !job.schedule().is_triggered_by(event) {
                continue;
            }
            if self.is_running(job_id) {
                debug!("Skipping hook trigger for already running job: {}", job_id);
                continue;
            }
            jobs_to_trigger.push(job_id.clone());
        }

        let trigger = format!("hook:{}", event);
        for job_id in jobs_to_trigger {
            self.spawn_job(&job_id, &trigger);
        }
    }

    /// Spawn a job execution task.
    fn spawn_job(&mut self, job_id: &str, triggered_by: &str) {
        let job = match self.jobs.get(job_id) {
            Some(job) => Arc::clone(job),
            None => {
                error!("Attempted to spawn unknown job: {}", job_id);
                return;
            }
        };

        info!("Starting job: {} (triggered_by: {})", job_id, triggered_by);

        // Push the next due time out now so the loop does not respin while the job runs.
        if let Some(interval) = job.schedule().interval() {
            self.next_runs
                .insert(job_id.to_string(), Utc::now() + to_chrono(interval));
        }

        let cancel_token = self.job_context.cancellation_token.child_token();
        self.job_cancel_tokens
            .insert(job_id.to_string(), cancel_token.clone());
        let ctx = JobContext::new(cancel_token, Arc::clone(&self.job_context.generator));

        let history = self.history.clone();
        let completion_sender = self.completion_sender.clone();
        let job_id_owned = job_id.to_string();
        let triggered_by = triggered_by.to_string();

        let handle = tokio::spawn(async move {
            let started_at = Utc::now();
            let start_time = Instant::now();
            let result = tokio::task::spawn_blocking(move || job.execute(&ctx)).await;
            let elapsed = start_time.elapsed();

            let (status, error_message) = match result {
                Ok(Ok(())) => {
                    info!(
                        "Job {} completed successfully in {:?}",
                        job_id_owned, elapsed
                    );
                    (JobRunStatus::Completed, None)
                }
                Ok(Err(JobError::Cancelled)) => {
                    info!("Job {} was cancelled after {:?}", job_id_owned, elapsed);
                    (JobRunStatus::Cancelled, None)
                }
                Ok(Err(e)) => {
                    error!("Job {} failed after {:?}: {}", job_id_owned, elapsed, e);
                    (JobRunStatus::Failed, Some(e.to_string()))
                }
                Err(e) => {
                    error!("Job {} panicked after {:?}: {}", job_id_owned, elapsed, e);
                    (JobRunStatus::Failed, Some(format!("Task panic: {}", e)))
                }
            };

            history.record(JobRun {
                job_id: job_id_owned.clone(),
                triggered_by,
                started_at,
                finished_at: Utc::now(),
                status,
                error_message,
            });
            let _ = completion_sender.send(job_id_owned);
        });

        self.running_handles.insert(job_id.to_string(), handle);
    }

    /// Drops the handle of a job whose task reported completion.
    async fn finish_job(&mut self, job_id: &str) {
        if let Some(handle) = self.running_handles.remove(job_id) {
            let _ = handle.await;
        }
        self.job_cancel_tokens.remove(job_id);
    }

    /// Gracefully shut down the scheduler.
    async fn shutdown(&mut self) {
        info!("Shutting down scheduler...");

        for (job_id, token) in self.job_cancel_tokens.drain() {
            debug!("Cancelling job: {}", job_id);
            token.cancel();
        }

        for (job_id, handle) in self.running_handles.drain() {
            if tokio::time::timeout(SHUTDOWN_GRACE, handle).await.is_err() {
                warn!("Job {} did not stop within {:?}", job_id, SHUTDOWN_GRACE);
            }
        }

        info!("Scheduler shutdown complete");
    }
}

fn to_chrono(interval: Duration) -> chrono::Duration {
    chrono::Duration::from_std(interval).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background_jobs::JobSchedule;
    use crate::config::{CommercialSettings, SchedulingSettings};
    use crate::scheduling::PlaylistGenerator;
    use crate::station_store::SqliteStationStore;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct TestJob {
        id: &'static str,
        schedule: JobSchedule,
        execution_count: Arc<AtomicUsize>,
        should_fail: Arc<AtomicBool>,
    }

    impl TestJob {
        fn new(id: &'static str, schedule: JobSchedule) -> Self {
            Self {
                id,
                schedule,
                execution_count: Arc::new(AtomicUsize::new(0)),
                should_fail: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    impl BackgroundJob for TestJob {
        fn id(&self) -> &'static str {
            self.id
        }

        fn name(&self) -> &'static str {
            "Test Job"
        }

        fn description(&self) -> &'static str {
            "A test job for unit tests"
        }

        fn schedule(&self) -> JobSchedule {
            self.schedule.clone()
        }

        fn execute(&self, _ctx: &JobContext) -> Result<(), JobError> {
            self.execution_count.fetch_add(1, Ordering::SeqCst);
            if self.should_fail.load(Ordering::SeqCst) {
                Err(JobError::ExecutionFailed("Test failure".to_string()))
            } else {
                Ok(())
            }
        }
    }

    /// Waits until the job has been cancelled, then reports it.
    struct BlockingJob;

    impl BackgroundJob for BlockingJob {
        fn id(&self) -> &'static str {
            "blocking"
        }

        fn name(&self) -> &'static str {
            "Blocking Job"
        }

        fn description(&self) -> &'static str {
            "Runs until cancelled"
        }

        fn schedule(&self) -> JobSchedule {
            JobSchedule::Hook(HookEvent::OnStartup)
        }

        fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
            while !ctx.is_cancelled() {
                std::thread::sleep(Duration::from_millis(5));
            }
            Err(JobError::Cancelled)
        }
    }

    fn create_test_scheduler() -> (JobScheduler, CancellationToken) {
        let store = Arc::new(SqliteStationStore::in_memory().unwrap());
        let generator = Arc::new(PlaylistGenerator::new(
            store,
            &SchedulingSettings::default(),
            CommercialSettings::default(),
            StdRng::seed_from_u64(7),
        ));

        let shutdown_token = CancellationToken::new();
        let job_context = JobContext::new(shutdown_token.child_token(), generator);
        let scheduler = JobScheduler::new(shutdown_token.clone(), job_context);

        (scheduler, shutdown_token)
    }

    async fn wait_for(condition: impl Fn() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_register_job() {
        let (mut scheduler, _shutdown) = create_test_scheduler();
        scheduler.register_job(Arc::new(TestJob::new(
            "test_job",
            JobSchedule::Hook(HookEvent::OnStartup),
        )));
        assert_eq!(scheduler.job_count(), 1);
    }

    #[tokio::test]
    async fn test_startup_hook_runs_job_once() {
        let (mut scheduler, shutdown) = create_test_scheduler();
        let job = TestJob::new("startup_job", JobSchedule::Hook(HookEvent::OnStartup));
        let count = job.execution_count.clone();
        scheduler.register_job(Arc::new(job));
        let history = scheduler.history();

        let task = tokio::spawn(async move { scheduler.run().await });
        wait_for(|| history.runs_for("startup_job").len() == 1).await;
        shutdown.cancel();
        task.await.unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 1);
        let runs = history.runs_for("startup_job");
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, JobRunStatus::Completed);
        assert_eq!(runs[0].triggered_by, "hook:OnStartup");
    }

    #[tokio::test]
    async fn test_interval_job_runs_repeatedly() {
        let (mut scheduler, shutdown) = create_test_scheduler();
        let job = TestJob::new("ticker", JobSchedule::Interval(Duration::from_millis(20)));
        let count = job.execution_count.clone();
        scheduler.register_job(Arc::new(job));
        let history = scheduler.history();

        let task = tokio::spawn(async move { scheduler.run().await });
        wait_for(|| history.runs_for("ticker").len() >= 3).await;
        shutdown.cancel();
        task.await.unwrap();

        assert!(count.load(Ordering::SeqCst) >= 3);
        assert!(history
            .runs_for("ticker")
            .iter()
            .all(|run| run.triggered_by == "schedule"));
    }

    #[tokio::test]
    async fn test_failed_job_is_recorded() {
        let (mut scheduler, shutdown) = create_test_scheduler();
        let job = TestJob::new("failing", JobSchedule::Hook(HookEvent::OnStartup));
        job.should_fail.store(true, Ordering::SeqCst);
        scheduler.register_job(Arc::new(job));
        let history = scheduler.history();

        let task = tokio::spawn(async move { scheduler.run().await });
        wait_for(|| history.runs_for("failing").len() == 1).await;
        shutdown.cancel();
        task.await.unwrap();

        let runs = history.runs_for("failing");
        assert_eq!(runs[0].status, JobRunStatus::Failed);
        assert_eq!(
            runs[0].error_message.as_deref(),
            Some("Execution failed: Test failure")
        );
    }

    #[tokio::test]
    async fn test_shutdown_cancels_running_job() {
        let (mut scheduler, shutdown) = create_test_scheduler();
        scheduler.register_job(Arc::new(BlockingJob));
        let history = scheduler.history();

        let task = tokio::spawn(async move { scheduler.run().await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();
        task.await.unwrap();

        let runs = history.runs_for("blocking");
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, JobRunStatus::Cancelled);
    }
}
